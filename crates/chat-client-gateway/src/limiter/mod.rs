//! Identify rate limiting

mod identify;

pub use identify::{IdentifyPermit, IdentifyRateLimiter};
