//! Session state
//!
//! Mutable per-session fields. Only the session's own tasks write here;
//! everything else observes through the read accessors.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No transport; the session is idle
    Disconnected,
    /// Transport is being established
    Connecting,
    /// Transport up, waiting for the server's Hello frame
    WaitingForHello,
    /// Fresh login handshake in flight
    Identifying,
    /// Resume handshake in flight
    Resuming,
    /// Handshake complete, stream live
    Connected,
    /// Transport lost, recovery in progress
    Reconnecting,
}

impl SessionStatus {
    /// Get the name of this status
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::WaitingForHello => "WaitingForHello",
            Self::Identifying => "Identifying",
            Self::Resuming => "Resuming",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable state of one gateway session
#[derive(Debug)]
pub(crate) struct SessionState {
    status: RwLock<SessionStatus>,

    /// Last dispatch sequence observed on the current session.
    /// Monotonic non-decreasing while the stream lives; cleared only on
    /// a fresh (non-resumed) login.
    sequence: RwLock<Option<u64>>,

    /// Session ID assigned by READY; present while the session is
    /// resumable
    session_id: RwLock<Option<String>>,

    /// Gateway URL the server prefers for resuming this session
    resume_gateway_url: RwLock<Option<String>>,

    /// When the last heartbeat was sent
    last_heartbeat_sent: RwLock<Option<Instant>>,

    /// When the last heartbeat ACK was observed
    last_heartbeat_ack: RwLock<Option<Instant>>,

    /// Whether the last sent heartbeat has been acknowledged
    heartbeat_acked: AtomicBool,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            status: RwLock::new(SessionStatus::Disconnected),
            sequence: RwLock::new(None),
            session_id: RwLock::new(None),
            resume_gateway_url: RwLock::new(None),
            last_heartbeat_sent: RwLock::new(None),
            last_heartbeat_ack: RwLock::new(None),
            heartbeat_acked: AtomicBool::new(true),
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    pub(crate) fn sequence(&self) -> Option<u64> {
        *self.sequence.read()
    }

    /// Record a dispatch sequence number
    ///
    /// Returns false when the sequence does not advance; such dispatches
    /// are duplicates (or reordered frames) and must not reach the event
    /// pipeline.
    pub(crate) fn observe_sequence(&self, seq: u64) -> bool {
        let mut current = self.sequence.write();
        match *current {
            Some(last) if seq <= last => false,
            _ => {
                *current = Some(seq);
                true
            }
        }
    }

    /// Store the identity of a freshly established session
    pub(crate) fn set_session(&self, session_id: String, resume_url: Option<String>) {
        *self.session_id.write() = Some(session_id);
        *self.resume_gateway_url.write() = resume_url;
    }

    /// Forget the session entirely; the next login must be a fresh
    /// identify with a restarted sequence
    pub(crate) fn clear_session(&self) {
        *self.session_id.write() = None;
        *self.resume_gateway_url.write() = None;
        *self.sequence.write() = None;
    }

    /// What a resume would reattach to, if anything
    pub(crate) fn resume_target(&self) -> Option<(String, u64)> {
        let session_id = self.session_id.read().clone()?;
        let seq = (*self.sequence.read())?;
        Some((session_id, seq))
    }

    pub(crate) fn resume_gateway_url(&self) -> Option<String> {
        self.resume_gateway_url.read().clone()
    }

    pub(crate) fn record_heartbeat_sent(&self) {
        *self.last_heartbeat_sent.write() = Some(Instant::now());
        self.heartbeat_acked.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_heartbeat_ack(&self) {
        *self.last_heartbeat_ack.write() = Some(Instant::now());
        self.heartbeat_acked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn heartbeat_acked(&self) -> bool {
        self.heartbeat_acked.load(Ordering::SeqCst)
    }

    /// Reset heartbeat bookkeeping for a new transport
    pub(crate) fn reset_heartbeat(&self) {
        *self.last_heartbeat_sent.write() = None;
        *self.last_heartbeat_ack.write() = None;
        self.heartbeat_acked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn last_heartbeat_sent(&self) -> Option<Instant> {
        *self.last_heartbeat_sent.read()
    }

    pub(crate) fn last_heartbeat_ack(&self) -> Option<Instant> {
        *self.last_heartbeat_ack.read()
    }
}
