//! Shared types for Chisel

pub mod error;

pub use error::{Denial, MutationError, Result};
