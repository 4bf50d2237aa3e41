//! Gateway session tests against a scripted mock gateway

use anyhow::{Context, Result};
use chat_client_common::{ClientConfig, Intents};
use chat_client_gateway::{
    GatewayError, GatewaySession, IdentifyRateLimiter, SessionStatus, ShardEvent, ShardId,
};
use chat_client_gateway::protocol::CloseCode;
use integration_tests::MockGateway;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn test_config(gateway_url: String) -> ClientConfig {
    ClientConfig::new("test-token")
        .with_intents(Intents::unprivileged())
        .with_gateway_url(gateway_url)
        .with_handshake_timeout(Duration::from_secs(5))
        .with_heartbeat_jitter(0.0)
        .with_identify_wait(Duration::from_millis(10))
}

fn session_for(
    config: ClientConfig,
) -> (Arc<GatewaySession>, mpsc::UnboundedReceiver<ShardEvent>) {
    let (events, event_rx) = mpsc::unbounded_channel();
    let limiter = Arc::new(IdentifyRateLimiter::new(
        config.max_concurrency,
        config.identify_wait,
    ));
    let session = GatewaySession::new(ShardId::new(0, 1), Arc::new(config), limiter, events);
    (session, event_rx)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ShardEvent>) -> Result<ShardEvent> {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .context("timed out waiting for shard event")?
        .context("event channel closed")
}

#[tokio::test]
async fn test_fresh_handshake_and_ordered_dispatch() -> Result<()> {
    let gateway = MockGateway::spawn(|_, mut conn| async move {
        conn.hello(45_000).await?;

        let identify = conn.expect_op(2).await?;
        assert_eq!(identify["d"]["token"], "test-token");
        assert_eq!(identify["d"]["shard"], json!([0, 1]));
        assert!(identify["d"]["intents"].is_u64());

        conn.ready("sess-1", 1).await?;
        conn.dispatch("MESSAGE_CREATE", 2, json!({ "id": "100" })).await?;
        conn.dispatch("MESSAGE_CREATE", 3, json!({ "id": "101" })).await?;
        conn.serve_until_close().await
    })
    .await?;

    let (session, mut events) = session_for(test_config(gateway.url()));
    session.open().await?;
    assert_eq!(session.status(), SessionStatus::Connected);

    // A second open on a live session is refused
    assert!(matches!(session.open().await, Err(GatewayError::AlreadyOpen)));

    assert!(matches!(
        next_event(&mut events).await?,
        ShardEvent::Connected { .. }
    ));

    // READY arrives both as a raw dispatch and as the lifecycle event
    match next_event(&mut events).await? {
        ShardEvent::Dispatch { event_type, sequence, .. } => {
            assert_eq!(event_type, "READY");
            assert_eq!(sequence, 1);
        }
        other => panic!("expected READY dispatch, got {other:?}"),
    }
    match next_event(&mut events).await? {
        ShardEvent::Ready { session_id, .. } => assert_eq!(session_id, "sess-1"),
        other => panic!("expected Ready, got {other:?}"),
    }

    for (expected_seq, expected_id) in [(2, "100"), (3, "101")] {
        match next_event(&mut events).await? {
            ShardEvent::Dispatch { event_type, sequence, payload, .. } => {
                assert_eq!(event_type, "MESSAGE_CREATE");
                assert_eq!(sequence, expected_seq);
                assert_eq!(payload["id"], expected_id);
            }
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    session.close(1000).await;
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert!(matches!(
        next_event(&mut events).await?,
        ShardEvent::Disconnected { code: None, .. }
    ));

    Ok(())
}

#[tokio::test]
async fn test_duplicate_sequences_are_dropped() -> Result<()> {
    let gateway = MockGateway::spawn(|_, mut conn| async move {
        conn.hello(45_000).await?;
        conn.expect_op(2).await?;
        conn.ready("sess-1", 1).await?;
        conn.dispatch("MESSAGE_CREATE", 2, json!({ "id": "a" })).await?;
        // Replayed frame: same sequence must not reach the consumer twice
        conn.dispatch("MESSAGE_CREATE", 2, json!({ "id": "a" })).await?;
        conn.dispatch("MESSAGE_CREATE", 3, json!({ "id": "b" })).await?;
        conn.serve_until_close().await
    })
    .await?;

    let (session, mut events) = session_for(test_config(gateway.url()));
    session.open().await?;

    let mut sequences = Vec::new();
    loop {
        match next_event(&mut events).await? {
            ShardEvent::Dispatch { sequence, .. } => {
                sequences.push(sequence);
                if sequence == 3 {
                    break;
                }
            }
            _ => {}
        }
    }
    assert_eq!(sequences, vec![1, 2, 3]);

    session.close(1000).await;
    Ok(())
}

#[tokio::test]
async fn test_server_requested_reconnect_resumes() -> Result<()> {
    let gateway = MockGateway::spawn(|ordinal, mut conn| async move {
        conn.hello(45_000).await?;
        match ordinal {
            0 => {
                conn.expect_op(2).await?;
                conn.ready("sess-1", 1).await?;
                conn.dispatch("MESSAGE_CREATE", 2, json!({ "id": "a" })).await?;
                conn.request_reconnect().await?;
                conn.serve_until_close().await
            }
            _ => {
                let resume = conn.expect_op(4).await?;
                assert_eq!(resume["d"]["session_id"], "sess-1");
                assert_eq!(resume["d"]["seq"], 2);
                conn.resumed(3).await?;
                conn.serve_until_close().await
            }
        }
    })
    .await?;

    let (session, mut events) = session_for(test_config(gateway.url()));
    session.open().await?;

    // Drain the fresh-handshake events up to the first dispatch
    loop {
        if let ShardEvent::Dispatch { sequence: 2, .. } = next_event(&mut events).await? {
            break;
        }
    }

    assert!(matches!(
        next_event(&mut events).await?,
        ShardEvent::Reconnecting { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await?,
        ShardEvent::Connected { .. }
    ));

    // RESUMED advances the stream and completes the recovery
    loop {
        match next_event(&mut events).await? {
            ShardEvent::Resumed { .. } => break,
            ShardEvent::Dispatch { event_type, sequence, .. } => {
                assert_eq!(event_type, "RESUMED");
                assert_eq!(sequence, 3);
            }
            other => panic!("unexpected event during resume: {other:?}"),
        }
    }
    assert_eq!(session.status(), SessionStatus::Connected);
    assert_eq!(session.sequence(), Some(3));

    session.close(1000).await;
    Ok(())
}

#[tokio::test]
async fn test_missed_heartbeat_ack_forces_resume() -> Result<()> {
    let gateway = MockGateway::spawn(|ordinal, mut conn| async move {
        match ordinal {
            0 => {
                // Short interval so the ack gap is hit quickly; after
                // READY no heartbeat is ever answered
                conn.hello(300).await?;
                conn.expect_op(2).await?;
                conn.ready("sess-z", 1).await?;
                conn.ignore_until_close().await
            }
            _ => {
                conn.hello(45_000).await?;
                let resume = conn.expect_op(4).await?;
                assert_eq!(resume["d"]["session_id"], "sess-z");
                assert_eq!(resume["d"]["seq"], 1);
                conn.resumed(2).await?;
                conn.serve_until_close().await
            }
        }
    })
    .await?;

    let (session, mut events) = session_for(test_config(gateway.url()));
    assert!(session.last_heartbeat_sent().is_none());
    assert!(session.last_heartbeat_ack().is_none());
    session.open().await?;

    // The unanswered heartbeat zombies the connection; recovery resumes
    // the same session and the stream picks up where it left off
    let mut reconnecting = false;
    let mut sequences = Vec::new();
    loop {
        match next_event(&mut events).await? {
            ShardEvent::Reconnecting { .. } => reconnecting = true,
            ShardEvent::Dispatch { sequence, .. } => sequences.push(sequence),
            ShardEvent::Resumed { .. } => break,
            _ => {}
        }
    }
    assert!(reconnecting);
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(session.status(), SessionStatus::Connected);
    assert_eq!(session.sequence(), Some(2));
    assert!(session.last_heartbeat_sent().is_some());

    session.close(1000).await;
    Ok(())
}

#[tokio::test]
async fn test_resumable_invalid_session_resumes_without_delay() -> Result<()> {
    let gateway = MockGateway::spawn(|ordinal, mut conn| async move {
        conn.hello(45_000).await?;
        match ordinal {
            0 => {
                conn.expect_op(2).await?;
                conn.ready("sess-i", 1).await?;
                conn.invalid_session(true).await?;
                conn.serve_until_close().await
            }
            _ => {
                let resume = conn.expect_op(4).await?;
                assert_eq!(resume["d"]["session_id"], "sess-i");
                conn.resumed(2).await?;
                conn.serve_until_close().await
            }
        }
    })
    .await?;

    let (session, mut events) = session_for(test_config(gateway.url()));
    session.open().await?;

    // A resumable invalidation reattaches immediately; the 1-5 s login
    // delay is reserved for the fresh-identify case
    let mut reattach_started = None;
    loop {
        match next_event(&mut events).await? {
            ShardEvent::Reconnecting { .. } => reattach_started = Some(Instant::now()),
            ShardEvent::Resumed { .. } => break,
            _ => {}
        }
    }
    let started = reattach_started.expect("no reconnect observed");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(session.status(), SessionStatus::Connected);

    session.close(1000).await;
    Ok(())
}

#[tokio::test]
async fn test_close_interrupts_pending_open() -> Result<()> {
    let gateway = MockGateway::spawn(|_, mut conn| async move {
        // Stall the handshake so a close arrives mid-open
        sleep(Duration::from_millis(600)).await;
        conn.hello(45_000).await?;
        conn.expect_op(2).await?;
        conn.ready("sess-1", 1).await?;
        conn.serve_until_close().await
    })
    .await?;

    let (session, mut events) = session_for(test_config(gateway.url()));
    let opener = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.open().await })
    };
    sleep(Duration::from_millis(100)).await;

    // close() must not block behind the stalled handshake
    let start = Instant::now();
    session.close(1000).await;
    assert!(start.elapsed() < Duration::from_millis(300));

    // The open settles on its own and honors the close
    opener.await??;
    assert_eq!(session.status(), SessionStatus::Disconnected);
    loop {
        if let ShardEvent::Disconnected { .. } = next_event(&mut events).await? {
            break;
        }
    }

    Ok(())
}

#[tokio::test]
async fn test_fatal_close_surfaces_without_retry() -> Result<()> {
    let gateway = MockGateway::spawn(|_, mut conn| async move {
        conn.hello(45_000).await?;
        conn.expect_op(2).await?;
        conn.close(4004).await
    })
    .await?;

    let (session, _events) = session_for(test_config(gateway.url()));
    match session.open().await {
        Err(GatewayError::FatalClose(code)) => {
            assert_eq!(code, CloseCode::AuthenticationFailed);
        }
        other => panic!("expected fatal close, got {other:?}"),
    }
    assert_eq!(session.status(), SessionStatus::Disconnected);

    Ok(())
}
