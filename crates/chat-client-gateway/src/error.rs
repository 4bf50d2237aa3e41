//! Gateway error types

use crate::protocol::CloseCode;
use chat_client_common::LimitError;
use tokio_tungstenite::tungstenite;

/// Errors surfaced by the gateway session and shard manager
///
/// Transient transport failures are recovered internally by the reconnect
/// policy and never appear here; these are the conditions a caller has to
/// act on.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// `open()` was called on a session that already has a live transport
    #[error("session is already open")]
    AlreadyOpen,

    /// The server closed the handshake with a code that will fail on
    /// every retry (bad token, disallowed intents, bad shard config)
    #[error("fatal close during handshake: {0}")]
    FatalClose(CloseCode),

    /// The server sent something other than the expected handshake frame
    #[error("handshake protocol violation: {0}")]
    Handshake(String),

    /// The Hello/Ready exchange did not complete within the configured
    /// handshake timeout
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The transport failed before the handshake completed
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// A frame could not be decoded during the handshake
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The identify limiter wait was abandoned at the caller's deadline
    #[error(transparent)]
    Limit(#[from] LimitError),
}

impl GatewayError {
    /// Check whether retrying `open()` could possibly succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::FatalClose(_) | Self::AlreadyOpen => false,
            Self::Handshake(_)
            | Self::HandshakeTimeout
            | Self::Transport(_)
            | Self::Decode(_)
            | Self::Limit(_) => true,
        }
    }
}
