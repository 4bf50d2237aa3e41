//! Rate-limit wait errors
//!
//! Shared by the REST bucket limiter and the identify limiter.

/// Error returned when a rate-limit wait is abandoned
///
/// A wait that ends this way has acquired no lock and performed no I/O;
/// the bucket it targeted is untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// The caller's deadline elapsed before the bucket became available
    #[error("deadline exceeded while waiting for rate limit bucket")]
    DeadlineExceeded,
}
