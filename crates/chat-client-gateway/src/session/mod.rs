//! Gateway session
//!
//! One shard's full connection lifecycle: handshake, heartbeating,
//! resume, and reconnect.

mod heartbeat;
mod session;
mod state;

pub use crate::events::ShardId;
pub use session::GatewaySession;
pub use state::SessionStatus;

pub(crate) use state::SessionState;
