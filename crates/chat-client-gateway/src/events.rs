//! Shard lifecycle and dispatch events
//!
//! The session forwards everything it observes through an
//! `mpsc::UnboundedSender<ShardEvent>` injected at construction. The
//! consumer (cache, typed-event pipeline) lives entirely downstream; the
//! session never holds a reference back to its owner.

use crate::protocol::CloseCode;
use serde_json::Value;

/// Identity of one shard: its number and the total shard count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardId {
    /// Shard number (0-based)
    pub number: u32,
    /// Total shards across the bot
    pub total: u32,
}

impl ShardId {
    /// Create a shard identity
    #[must_use]
    pub const fn new(number: u32, total: u32) -> Self {
        Self { number, total }
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.number, self.total)
    }
}

/// Events emitted by a gateway session, in per-shard observation order
///
/// Across shards there is no ordering relationship.
#[derive(Debug, Clone)]
pub enum ShardEvent {
    /// The transport connected and Hello was received
    Connected { shard: ShardId },

    /// A fresh session was established
    Ready { shard: ShardId, session_id: String },

    /// A dropped session was resumed; missed events follow as dispatches
    Resumed { shard: ShardId },

    /// A server event, exactly as observed on the stream
    Dispatch {
        shard: ShardId,
        /// Event type name (e.g. `MESSAGE_CREATE`)
        event_type: String,
        /// Stream sequence number, strictly increasing per connected stream
        sequence: u64,
        /// Raw decoded payload for the downstream pipeline
        payload: Value,
    },

    /// The session lost its transport and is attempting recovery
    Reconnecting { shard: ShardId },

    /// The session closed and will not reconnect on its own
    Disconnected {
        shard: ShardId,
        /// Close code observed, if the peer sent one
        code: Option<CloseCode>,
    },
}
