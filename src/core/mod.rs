//! Core utilities and common types for the runtime.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
