//! Shared utilities for invpoll
//!
//! Small helpers used by both the engine and the CLI frontend:
//! - Hex formatting for frame dumps
//! - Blocking sleep for inter-read pacing and retry backoff

pub mod hex;
pub mod sleep;

pub use hex::*;
pub use sleep::*;
