//! Shared wire protocol and error types for the passage tunnel system.

pub mod error;
pub mod protocol;

pub use error::{Error, Result};
