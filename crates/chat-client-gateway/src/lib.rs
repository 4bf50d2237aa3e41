//! # chat-client-gateway
//!
//! Client side of the gateway wire protocol: per-shard session state
//! machine (handshake, heartbeating, resume/reconnect), the identify rate
//! limiter, and the shard manager that coordinates a set of sessions.

pub mod error;
pub mod events;
pub mod limiter;
pub mod manager;
pub mod protocol;
pub mod session;

pub use error::GatewayError;
pub use events::ShardEvent;
pub use limiter::{IdentifyPermit, IdentifyRateLimiter};
pub use manager::{shard_for_guild, ManagerError, ShardManager};
pub use session::{GatewaySession, SessionStatus, ShardId};
