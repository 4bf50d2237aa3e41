//! Identify rate limiter
//!
//! The server only allows a new session handshake every `identify_wait`
//! per concurrency key (`shard_id % max_concurrency`). Shards sharing a
//! key serialize their identifies; distinct keys proceed in parallel, up
//! to `max_concurrency` simultaneous handshakes cluster-wide.
//!
//! `DashMap` guards the key-to-bucket structure; each bucket's own
//! `tokio::sync::Mutex` serializes use of its window. The two locks are
//! never held across each other.

use chat_client_common::LimitError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep_until, timeout_at, Instant};

type Bucket = Arc<Mutex<Option<Instant>>>;

/// Gates how often any shard may perform the login handshake
pub struct IdentifyRateLimiter {
    max_concurrency: u16,
    identify_wait: Duration,

    /// Concurrency key to bucket; buckets persist for the limiter's lifetime
    buckets: DashMap<u16, Bucket>,
}

impl IdentifyRateLimiter {
    /// Create a limiter for the given concurrency settings
    #[must_use]
    pub fn new(max_concurrency: u16, identify_wait: Duration) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            identify_wait,
            buckets: DashMap::new(),
        }
    }

    /// The concurrency key a shard identifies under
    #[must_use]
    pub fn key_for(&self, shard_id: u32) -> u16 {
        (shard_id % u32::from(self.max_concurrency)) as u16
    }

    /// Acquire an identify slot for a shard
    ///
    /// Blocks until the shard's bucket is free and its spacing window has
    /// elapsed. If `deadline` passes first, returns
    /// [`LimitError::DeadlineExceeded`] with the bucket untouched and no
    /// lock held.
    ///
    /// The returned permit holds the bucket lock; dropping it stamps the
    /// next-allowed time and releases the bucket.
    pub async fn acquire(
        &self,
        shard_id: u32,
        deadline: Option<Instant>,
    ) -> Result<IdentifyPermit, LimitError> {
        let key = self.key_for(shard_id);
        let bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let guard = match deadline {
            Some(deadline) => timeout_at(deadline, bucket.lock_owned())
                .await
                .map_err(|_| LimitError::DeadlineExceeded)?,
            None => bucket.lock_owned().await,
        };

        if let Some(reset_at) = *guard {
            let now = Instant::now();
            if reset_at > now {
                if deadline.is_some_and(|d| d < reset_at) {
                    // Guard drops here without stamping a new reset
                    return Err(LimitError::DeadlineExceeded);
                }

                tracing::debug!(
                    shard = shard_id,
                    bucket = key,
                    wait_ms = (reset_at - now).as_millis() as u64,
                    "identify bucket throttled; waiting"
                );
                sleep_until(reset_at).await;
                tracing::debug!(shard = shard_id, bucket = key, "identify bucket available");
            }
        }

        Ok(IdentifyPermit {
            guard,
            key,
            identify_wait: self.identify_wait,
        })
    }
}

impl std::fmt::Debug for IdentifyRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyRateLimiter")
            .field("max_concurrency", &self.max_concurrency)
            .field("identify_wait", &self.identify_wait)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

/// Permission to send one Identify frame
///
/// Holds the bucket lock for its concurrency key. Dropping the permit
/// (after the identify was sent, or after it failed) starts the spacing
/// window and releases the bucket, so the next identify on the same key
/// waits at least `identify_wait`.
pub struct IdentifyPermit {
    guard: OwnedMutexGuard<Option<Instant>>,
    key: u16,
    identify_wait: Duration,
}

impl IdentifyPermit {
    /// The concurrency key this permit was issued for
    #[must_use]
    pub fn key(&self) -> u16 {
        self.key
    }
}

impl Drop for IdentifyPermit {
    fn drop(&mut self) {
        *self.guard = Some(Instant::now() + self.identify_wait);
    }
}

impl std::fmt::Debug for IdentifyPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyPermit").field("key", &self.key).finish()
    }
}
