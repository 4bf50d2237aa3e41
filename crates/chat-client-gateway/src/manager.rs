//! Shard manager
//!
//! Coordinates one session per managed shard: resolves the shard topology
//! (asking the REST API when the total is left at auto-detect), shares one
//! identify limiter across all sessions, and fans open/close out over them
//! concurrently. Shards are independent after open; one shard's failure
//! never touches its siblings.

use crate::error::GatewayError;
use crate::events::{ShardEvent, ShardId};
use crate::limiter::IdentifyRateLimiter;
use crate::session::{GatewaySession, SessionStatus};
use chat_client_common::{ClientConfig, Snowflake};
use chat_client_rest::{RestClient, RestError};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Close code that keeps the server-side session resumable
const RESUMABLE_CLOSE: u16 = 4000;

/// Close code that tells the server to discard the session
const CLEAN_CLOSE: u16 = 1000;

/// Which shard a guild's events arrive on
///
/// The routing function the server uses: the snowflake's timestamp part
/// modulo the shard count. `shard_count` of zero is treated as one.
#[must_use]
pub fn shard_for_guild(guild_id: Snowflake, shard_count: u32) -> u32 {
    let count = u64::from(shard_count.max(1));
    (guild_id.timestamp_part() % count) as u32
}

/// Errors surfaced by shard-manager operations
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The REST call that detects shard topology failed
    #[error("gateway parameter auto-detection failed: {0}")]
    AutoDetect(#[from] RestError),

    /// The resolved configuration yields no shards to manage
    #[error("no shards to manage")]
    NoShards,

    /// One or more shards failed to open; the rest are running
    #[error("{} shard(s) failed to open", failures.len())]
    OpenFailed {
        /// The shards that failed, with each shard's own error
        failures: Vec<(u32, GatewayError)>,
    },

    /// The shard ID is outside the resolved topology
    #[error("unknown shard: {0}")]
    UnknownShard(u32),

    /// A single-shard operation failed
    #[error(transparent)]
    Shard(#[from] GatewayError),
}

/// Topology and limiter shared by every session, fixed at first open
#[derive(Clone)]
struct Resolved {
    config: Arc<ClientConfig>,
    limiter: Arc<IdentifyRateLimiter>,
}

/// Owns and coordinates the gateway sessions of one process
pub struct ShardManager {
    config: Arc<ClientConfig>,
    rest: Arc<RestClient>,
    events: mpsc::UnboundedSender<ShardEvent>,
    sessions: DashMap<u32, Arc<GatewaySession>>,
    resolved: Mutex<Option<Resolved>>,
}

impl ShardManager {
    /// Create a manager and the receiving end of its event stream
    ///
    /// Events from every managed shard arrive on the returned receiver,
    /// per-shard in observation order.
    pub fn new(
        config: ClientConfig,
        rest: Arc<RestClient>,
    ) -> (Self, mpsc::UnboundedReceiver<ShardEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let manager = Self {
            config: Arc::new(config),
            rest,
            events,
            sessions: DashMap::new(),
            resolved: Mutex::new(None),
        };
        (manager, event_rx)
    }

    /// Open every managed shard concurrently
    ///
    /// Resolves the shard topology first: with `shard_count = 0` the REST
    /// API supplies the recommended count, the identify concurrency, and
    /// the gateway URL. Failures are collected per shard; shards that did
    /// open stay open.
    pub async fn open(&self) -> Result<(), ManagerError> {
        let resolved = self.resolve().await?;
        let shard_ids = resolved.config.effective_shard_ids();
        if shard_ids.is_empty() {
            return Err(ManagerError::NoShards);
        }

        tracing::info!(
            shards = shard_ids.len(),
            total = resolved.config.shard_count,
            "opening shards"
        );

        let opens = shard_ids.into_iter().map(|id| {
            let session = self.session_for(&resolved, id);
            async move { (id, session.open().await) }
        });

        let failures: Vec<(u32, GatewayError)> = futures_util::future::join_all(opens)
            .await
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|err| (id, err)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            for (id, err) in &failures {
                tracing::error!(shard = id, error = %err, "shard failed to open");
            }
            Err(ManagerError::OpenFailed { failures })
        }
    }

    /// Close every session concurrently, invalidating the server-side
    /// sessions, and wait for all of them
    pub async fn close(&self) {
        let sessions: Vec<Arc<GatewaySession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        tracing::info!(shards = sessions.len(), "closing shards");
        futures_util::future::join_all(sessions.iter().map(|s| s.close(CLEAN_CLOSE))).await;
    }

    /// Open a single shard
    pub async fn open_shard(&self, shard_id: u32) -> Result<(), ManagerError> {
        let resolved = self.resolve().await?;
        if shard_id >= resolved.config.shard_count {
            return Err(ManagerError::UnknownShard(shard_id));
        }
        self.session_for(&resolved, shard_id).open().await?;
        Ok(())
    }

    /// Close a single shard, leaving its server-side session resumable
    pub async fn close_shard(&self, shard_id: u32) -> Result<(), ManagerError> {
        let session = self
            .session(shard_id)
            .ok_or(ManagerError::UnknownShard(shard_id))?;
        session.close(RESUMABLE_CLOSE).await;
        Ok(())
    }

    /// The session managing a shard, if one has been created
    #[must_use]
    pub fn session(&self, shard_id: u32) -> Option<Arc<GatewaySession>> {
        self.sessions.get(&shard_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Status snapshot of every created session
    #[must_use]
    pub fn statuses(&self) -> Vec<(u32, SessionStatus)> {
        let mut statuses: Vec<(u32, SessionStatus)> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().status()))
            .collect();
        statuses.sort_unstable_by_key(|(id, _)| *id);
        statuses
    }

    /// Resolve topology once; later calls reuse the first resolution
    async fn resolve(&self) -> Result<Resolved, ManagerError> {
        let mut slot = self.resolved.lock().await;
        if let Some(resolved) = slot.as_ref() {
            return Ok(resolved.clone());
        }

        let config = if self.config.shard_count == 0 {
            let gateway = self.rest.get_gateway_bot().await?;
            tracing::info!(
                shards = gateway.shards,
                max_concurrency = gateway.session_start_limit.max_concurrency,
                remaining_starts = gateway.session_start_limit.remaining,
                "gateway parameters auto-detected"
            );

            let mut config = (*self.config).clone();
            config.shard_count = gateway.shards.max(1);
            config.max_concurrency = gateway.session_start_limit.max_concurrency;
            config.gateway_url = gateway.url;
            Arc::new(config)
        } else {
            Arc::clone(&self.config)
        };

        let limiter = Arc::new(IdentifyRateLimiter::new(
            config.max_concurrency,
            config.identify_wait,
        ));
        let resolved = Resolved { config, limiter };
        *slot = Some(resolved.clone());
        Ok(resolved)
    }

    fn session_for(&self, resolved: &Resolved, shard_id: u32) -> Arc<GatewaySession> {
        self.sessions
            .entry(shard_id)
            .or_insert_with(|| {
                GatewaySession::new(
                    ShardId::new(shard_id, resolved.config.shard_count),
                    Arc::clone(&resolved.config),
                    Arc::clone(&resolved.limiter),
                    self.events.clone(),
                )
            })
            .clone()
    }
}

impl std::fmt::Debug for ShardManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardManager")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
