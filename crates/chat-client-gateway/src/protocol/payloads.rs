//! Payload definitions
//!
//! Shapes carried in the `d` field of the gateway envelope, one per opcode
//! the client sends or cares about decoding.

use chat_client_common::Intents;
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
///
/// First frame the server sends on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
///
/// Starts a brand-new session. Sending one consumes a slot from the
/// identify rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Bot authentication token
    pub token: String,

    /// Client properties reported to the server
    pub properties: IdentifyProperties,

    /// Requested event groups
    pub intents: Intents,

    /// `[shard_id, shard_count]`; omitted for unsharded bots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

/// Client connection properties
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system
    pub os: String,

    /// Library name
    pub browser: String,

    /// Device name
    pub device: String,
}

impl IdentifyProperties {
    /// Properties identifying this library
    #[must_use]
    pub fn library() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::library()
    }
}

/// Payload for op 4 (Resume)
///
/// Reattaches to an existing session, replaying events after `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Bot authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// Payload of the READY dispatch
///
/// Only the fields the resilience layer needs; the rest of the entity
/// snapshot is forwarded untouched to the event pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Session ID for later resumes
    pub session_id: String,

    /// Preferred gateway URL for resuming this session
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_gateway_url: Option<String>,
}
