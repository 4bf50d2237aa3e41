//! Shared error types

mod limit_error;

pub use limit_error::LimitError;
