//! Core shared types: the error enum with stable codes and its CLI-facing
//! rendering wrapper.

pub mod error;

pub use error::{ErrorContext, TomeiError};
