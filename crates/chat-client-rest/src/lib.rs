//! # chat-client-rest
//!
//! Rate-limited REST access: routes with major parameters, the
//! server-taught bucket rate limiter, and a thin `reqwest`-based client.
//! The endpoint catalogue lives downstream; callers construct [`Route`]s
//! and get back decoded JSON.

pub mod client;
pub mod headers;
pub mod limiter;
pub mod route;

pub use client::{GatewayBot, RestClient, RestError, SessionStartLimit};
pub use headers::RateLimitHeaders;
pub use limiter::{BucketPermit, RestRateLimiter};
pub use route::Route;
