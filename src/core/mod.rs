//! Core types shared by the protocol layer and the session controller
//!
//! - [`error`]: the engine error taxonomy
//! - [`snapshot`]: decoded cycle output and cycle statistics

pub mod error;
pub mod snapshot;

pub use error::{EngineError, EngineResult};
pub use snapshot::{CycleOutcome, CycleStats, Snapshot};
