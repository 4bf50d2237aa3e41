//! Heartbeat task
//!
//! One task per live transport. Sends a heartbeat every interval carrying
//! the last observed sequence; a tick that finds the previous beat
//! unacknowledged, or a send that fails, reports the connection as
//! zombied so the session forces a reconnect. Both conditions are
//! treated identically.

use super::SessionState;
use crate::events::ShardId;
use crate::protocol::GatewayMessage;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Spawn the heartbeat task for a freshly established transport
///
/// The first beat fires after `interval * U(0, jitter_factor)` so that a
/// fleet of shards reconnecting together does not beat in lockstep.
pub(crate) fn spawn_heartbeat(
    shard: ShardId,
    state: Arc<SessionState>,
    interval: Duration,
    jitter_factor: f64,
    outbound: mpsc::Sender<GatewayMessage>,
    zombied: mpsc::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_factor.clamp(0.0, 1.0));
        sleep(interval.mul_f64(jitter)).await;

        loop {
            let seq = state.sequence();
            if outbound.send(GatewayMessage::heartbeat(seq)).await.is_err() {
                tracing::warn!(shard = %shard, "heartbeat channel closed; reporting connection as zombied");
                let _ = zombied.try_send(());
                return;
            }
            state.record_heartbeat_sent();
            tracing::trace!(shard = %shard, sequence = ?seq, "heartbeat sent");

            sleep(interval).await;

            if !state.heartbeat_acked() {
                tracing::warn!(
                    shard = %shard,
                    interval_ms = interval.as_millis() as u64,
                    "heartbeat not acknowledged within one interval; connection zombied"
                );
                let _ = zombied.try_send(());
                return;
            }
        }
    })
}
