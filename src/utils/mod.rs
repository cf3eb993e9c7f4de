//! Shared utilities: the crate-level error type and tracing initialisation.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
