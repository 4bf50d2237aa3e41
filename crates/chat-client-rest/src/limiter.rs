//! REST bucket rate limiter
//!
//! The server groups routes into rate-limit buckets it only reveals
//! through response headers, so the limiter self-tunes: a route's first
//! request runs against a provisional bucket (one free call, limit
//! unknown), and the response teaches the real hash, limit, and window.
//! Buckets live for the limiter's lifetime.
//!
//! `DashMap` guards the route-hash and bucket maps; each bucket's
//! `tokio::sync::Mutex` serializes its in-flight request. The bucket lock
//! is held from grant until the response headers are reported back, so
//! responses for one bucket are processed in submission order.

use crate::headers::RateLimitHeaders;
use crate::route::Route;
use chat_client_common::LimitError;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep_until, timeout_at, Instant};

/// One bucket's rate-limit window
#[derive(Debug)]
struct BucketState {
    /// Requests left in the window; `remaining = 1` until taught
    remaining: i64,
    /// Window size; `-1` until taught
    limit: i64,
    /// When the window renews, if the server told us
    reset_at: Option<Instant>,
}

impl BucketState {
    /// Degraded mode: one free call until the server teaches real limits
    fn untaught() -> Self {
        Self {
            remaining: 1,
            limit: -1,
            reset_at: None,
        }
    }
}

struct Shared {
    /// Route key to server-taught bucket hash
    route_hashes: DashMap<String, String>,
    /// Bucket key (`hash:major`) to bucket
    buckets: DashMap<String, Arc<Mutex<BucketState>>>,
    /// Process-wide lockout; while in the future every bucket waits
    global_until: RwLock<Option<Instant>>,
}

/// Gates outbound REST calls using server-taught bucket windows
pub struct RestRateLimiter {
    shared: Arc<Shared>,
}

impl Default for RestRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RestRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                route_hashes: DashMap::new(),
                buckets: DashMap::new(),
                global_until: RwLock::new(None),
            }),
        }
    }

    /// Acquire the bucket for a route
    ///
    /// Locks the route's bucket (one in-flight request per bucket), then
    /// waits out the process-wide global lockout and, when the bucket is
    /// exhausted, its reset. If `deadline` passes before any of that
    /// completes, returns [`LimitError::DeadlineExceeded`] with the lock
    /// released and the bucket untouched.
    ///
    /// The returned permit holds the bucket lock until the response
    /// headers are reported through [`BucketPermit::complete`] (or the
    /// permit is dropped).
    pub async fn acquire(
        &self,
        route: &Route,
        deadline: Option<Instant>,
    ) -> Result<BucketPermit, LimitError> {
        let route_key = route.key();
        let hash = self
            .shared
            .route_hashes
            .get(&route_key)
            .map(|entry| entry.value().clone());
        // Untaught routes run against a provisional bucket keyed by the
        // route itself; the response headers migrate it to the real hash
        let bucket_key = route.bucket_key(hash.as_deref().unwrap_or(&route_key));

        let bucket = self
            .shared
            .buckets
            .entry(bucket_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(BucketState::untaught())))
            .clone();

        let mut guard = match deadline {
            Some(deadline) => timeout_at(deadline, Arc::clone(&bucket).lock_owned())
                .await
                .map_err(|_| LimitError::DeadlineExceeded)?,
            None => Arc::clone(&bucket).lock_owned().await,
        };

        loop {
            // The global lockout outranks every bucket window
            let global_until = *self.shared.global_until.read();
            if let Some(until) = global_until {
                let now = Instant::now();
                if until > now {
                    check_deadline(deadline, until)?;
                    tracing::info!(
                        wait_ms = (until - now).as_millis() as u64,
                        "waiting out global rate limit"
                    );
                    sleep_until(until).await;
                    continue;
                }
            }

            if guard.remaining <= 0 {
                if let Some(reset_at) = guard.reset_at {
                    let now = Instant::now();
                    if reset_at > now {
                        check_deadline(deadline, reset_at)?;
                        tracing::debug!(
                            bucket = %bucket_key,
                            wait_ms = (reset_at - now).as_millis() as u64,
                            "bucket exhausted; waiting for reset"
                        );
                        sleep_until(reset_at).await;
                    }
                }
                // Window renewed; the response will re-teach exact counts
                guard.remaining = if guard.limit > 0 { guard.limit } else { 1 };
                guard.reset_at = None;
                continue;
            }
            break;
        }

        Ok(BucketPermit {
            guard,
            bucket,
            bucket_key,
            route_key,
            major: route.bucket_key(""),
            shared: Arc::clone(&self.shared),
            completed: false,
        })
    }
}

impl std::fmt::Debug for RestRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestRateLimiter")
            .field("routes", &self.shared.route_hashes.len())
            .field("buckets", &self.shared.buckets.len())
            .finish()
    }
}

/// Abort the wait without touching the bucket when the caller's deadline
/// falls before the wake-up time
fn check_deadline(deadline: Option<Instant>, wake_at: Instant) -> Result<(), LimitError> {
    if deadline.is_some_and(|d| d < wake_at) {
        return Err(LimitError::DeadlineExceeded);
    }
    Ok(())
}

/// Permission for one in-flight request on a bucket
///
/// Holds the bucket lock. [`complete`](Self::complete) feeds the response
/// headers back and releases; dropping without completing (transport
/// failure) conservatively burns one slot and releases.
pub struct BucketPermit {
    guard: OwnedMutexGuard<BucketState>,
    bucket: Arc<Mutex<BucketState>>,
    bucket_key: String,
    route_key: String,
    /// `":{major}"` suffix for recomputing the key once a hash is taught
    major: String,
    shared: Arc<Shared>,
    completed: bool,
}

impl BucketPermit {
    /// Report the response's rate-limit headers and release the bucket
    ///
    /// A global `Retry-After` arms the process-wide lockout; a non-global
    /// one exhausts this bucket until the window passes. Taught counters
    /// overwrite the bucket's; a response with no counters at all burns
    /// one slot conservatively. A newly taught hash re-keys the bucket so
    /// later requests to routes sharing the hash share the window.
    pub fn complete(mut self, headers: &RateLimitHeaders) {
        self.completed = true;
        let now = Instant::now();

        if let Some(retry_after) = headers.retry_after {
            if headers.global {
                *self.shared.global_until.write() = Some(now + retry_after);
                tracing::warn!(
                    retry_ms = retry_after.as_millis() as u64,
                    "global rate limit hit"
                );
            } else {
                self.guard.remaining = 0;
                self.guard.reset_at = Some(now + retry_after);
                tracing::warn!(
                    bucket = %self.bucket_key,
                    retry_ms = retry_after.as_millis() as u64,
                    "bucket rate limit hit"
                );
            }
        }

        if let Some(hash) = &headers.bucket {
            let learned_key = format!("{}{}", hash, self.major);
            if learned_key != self.bucket_key {
                tracing::debug!(route = %self.route_key, hash = %hash, "bucket hash learned");
                self.shared
                    .route_hashes
                    .insert(self.route_key.clone(), hash.clone());
                // Move this bucket under its real key, state intact; the
                // entry API keeps an already-learned sibling canonical
                self.shared
                    .buckets
                    .entry(learned_key)
                    .or_insert_with(|| Arc::clone(&self.bucket));
                self.shared.buckets.remove(&self.bucket_key);
            }
        }

        if let Some(limit) = headers.limit {
            self.guard.limit = limit;
        }
        if let Some(remaining) = headers.remaining {
            self.guard.remaining = remaining;
        } else if headers.retry_after.is_none() {
            self.guard.remaining = (self.guard.remaining - 1).max(0);
        }
        if let Some(reset_after) = headers.reset_after {
            self.guard.reset_at = Some(now + reset_after);
        }
    }
}

impl Drop for BucketPermit {
    fn drop(&mut self) {
        if !self.completed {
            // No response observed; assume the request spent a slot
            self.guard.remaining = (self.guard.remaining - 1).max(0);
        }
    }
}

impl std::fmt::Debug for BucketPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketPermit")
            .field("bucket", &self.bucket_key)
            .finish()
    }
}
