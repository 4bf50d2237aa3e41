//! Rate-limit response headers
//!
//! The server teaches the client its real limits through these headers;
//! they are advisory input to the limiter, so absent or malformed values
//! degrade to `None` with a debug log rather than failing the request.

use reqwest::header::HeaderMap;
use std::time::Duration;

const BUCKET: &str = "x-ratelimit-bucket";
const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const GLOBAL: &str = "x-ratelimit-global";
const RETRY_AFTER: &str = "retry-after";

/// Parsed rate-limit headers from one REST response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Bucket hash the server teaches for this route
    pub bucket: Option<String>,

    /// Total requests per window
    pub limit: Option<i64>,

    /// Requests left in the current window
    pub remaining: Option<i64>,

    /// Time until the current window resets
    pub reset_after: Option<Duration>,

    /// Whether a `Retry-After` applies process-wide rather than per bucket
    pub global: bool,

    /// Server-mandated wait before the next request (429 responses)
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Parse whatever rate-limit headers the response carries
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            bucket: str_header(headers, BUCKET).map(ToString::to_string),
            limit: parse_header(headers, LIMIT),
            remaining: parse_header(headers, REMAINING),
            reset_after: seconds_header(headers, RESET_AFTER),
            global: str_header(headers, GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true")),
            retry_after: seconds_header(headers, RETRY_AFTER),
        }
    }

    /// Whether the response taught us anything at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn str_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let value = headers.get(name)?;
    match value.to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            tracing::debug!(header = name, "non-ASCII rate limit header; ignoring");
            None
        }
    }
}

fn parse_header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    let raw = str_header(headers, name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::debug!(header = name, value = raw, "malformed rate limit header; ignoring");
            None
        }
    }
}

/// Fractional-second durations (`reset-after: 1.5`); negatives ignored
fn seconds_header(headers: &HeaderMap, name: &str) -> Option<Duration> {
    let seconds: f64 = parse_header(headers, name)?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        tracing::debug!(header = name, value = seconds, "negative rate limit duration; ignoring");
        None
    }
}
