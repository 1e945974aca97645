//! invpoll — register polling engine for energy-storage and inverter hardware
//!
//! Devices are described by a register table; the engine batches the table
//! into as few bounded reads as possible, executes them over Modbus RTU/TCP or
//! the vendor framed protocol, decodes the returned words into typed values
//! and extracts categorized alerts from bitfield registers.
//!
//! The CLI and logger setup live in hidden modules to keep them out of the
//! generated documentation.

pub mod api;
#[doc(hidden)]
pub mod boot;
#[doc(hidden)]
pub mod cli;
pub mod core;
pub mod protocol;
pub mod utils;

pub use api::*;
