//! Shard manager tests against mock gateway and REST servers

use anyhow::Result;
use chat_client_common::{ClientConfig, Intents};
use chat_client_gateway::protocol::CloseCode;
use chat_client_gateway::{GatewayError, ManagerError, SessionStatus, ShardManager};
use chat_client_rest::RestClient;
use integration_tests::{CannedResponse, MockGateway, MockRest};
use std::sync::Arc;
use std::time::Duration;

fn manager_config(gateway_url: String, shard_count: u32) -> ClientConfig {
    ClientConfig::new("test-token")
        .with_intents(Intents::unprivileged())
        .with_gateway_url(gateway_url)
        .with_shard_count(shard_count)
        .with_handshake_timeout(Duration::from_secs(5))
        .with_heartbeat_jitter(0.0)
        .with_identify_wait(Duration::from_millis(10))
}

fn manager_for(config: ClientConfig) -> Result<ShardManager> {
    let rest = Arc::new(RestClient::new(Arc::new(config.clone()))?);
    let (manager, _events) = ShardManager::new(config, rest);
    // The receiver is dropped; sessions tolerate a gone consumer
    Ok(manager)
}

#[tokio::test]
async fn test_open_collects_failures_without_stopping_siblings() -> Result<()> {
    let gateway = MockGateway::spawn(|_, mut conn| async move {
        conn.hello(45_000).await?;
        let identify = conn.expect_op(2).await?;
        // Shard 1 is refused outright; shard 0 comes up normally
        if identify["d"]["shard"][0] == 1 {
            return conn.close(4004).await;
        }
        conn.ready("sess-0", 1).await?;
        conn.serve_until_close().await
    })
    .await?;

    let manager = manager_for(manager_config(gateway.url(), 2))?;
    match manager.open().await {
        Err(ManagerError::OpenFailed { failures }) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, 1);
            assert!(matches!(
                failures[0].1,
                GatewayError::FatalClose(CloseCode::AuthenticationFailed)
            ));
        }
        other => panic!("expected partial open failure, got {other:?}"),
    }

    // The sibling shard is untouched by its neighbor's failure
    assert_eq!(
        manager.statuses(),
        vec![
            (0, SessionStatus::Connected),
            (1, SessionStatus::Disconnected),
        ]
    );

    manager.close().await;
    assert_eq!(
        manager.statuses(),
        vec![
            (0, SessionStatus::Disconnected),
            (1, SessionStatus::Disconnected),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_auto_detection_resolves_topology() -> Result<()> {
    let gateway = MockGateway::spawn(|_, mut conn| async move {
        conn.hello(45_000).await?;
        let identify = conn.expect_op(2).await?;
        // The detected total must reach every shard's identify
        assert_eq!(identify["d"]["shard"][1], 2);
        let shard = identify["d"]["shard"][0]
            .as_u64()
            .expect("identify without shard number");
        conn.ready(&format!("sess-{shard}"), 1).await?;
        conn.serve_until_close().await
    })
    .await?;

    let body = format!(
        r#"{{
            "url": "{}",
            "shards": 2,
            "session_start_limit": {{
                "total": 1000,
                "remaining": 998,
                "reset_after": 14400000,
                "max_concurrency": 1
            }}
        }}"#,
        gateway.url()
    );
    let rest_server = MockRest::spawn(vec![CannedResponse::json(200, &body)]).await?;

    // shard_count 0 defers the whole topology to the REST API, including
    // the gateway URL itself
    let config = manager_config("ws://unused.invalid".to_string(), 0)
        .with_rest_url(rest_server.url());
    let manager = manager_for(config)?;

    manager.open().await?;
    assert_eq!(
        manager.statuses(),
        vec![
            (0, SessionStatus::Connected),
            (1, SessionStatus::Connected),
        ]
    );
    // Detection runs once, not per shard
    assert_eq!(rest_server.requests().len(), 1);

    // Shards outside the resolved topology are rejected
    assert!(matches!(
        manager.open_shard(5).await,
        Err(ManagerError::UnknownShard(5))
    ));
    assert!(matches!(
        manager.close_shard(5).await,
        Err(ManagerError::UnknownShard(5))
    ));

    manager.close().await;
    assert_eq!(
        manager.statuses(),
        vec![
            (0, SessionStatus::Disconnected),
            (1, SessionStatus::Disconnected),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_single_shard_close_and_reopen_resumes() -> Result<()> {
    let gateway = MockGateway::spawn(|ordinal, mut conn| async move {
        conn.hello(45_000).await?;
        match ordinal {
            0 => {
                conn.expect_op(2).await?;
                conn.ready("sess-0", 1).await?;
                conn.serve_until_close().await
            }
            _ => {
                // close_shard leaves the session resumable, so the
                // reopen resumes instead of identifying
                let resume = conn.expect_op(4).await?;
                assert_eq!(resume["d"]["session_id"], "sess-0");
                conn.resumed(2).await?;
                conn.serve_until_close().await
            }
        }
    })
    .await?;

    let manager = manager_for(manager_config(gateway.url(), 1))?;
    manager.open().await?;
    assert_eq!(manager.statuses(), vec![(0, SessionStatus::Connected)]);

    manager.close_shard(0).await?;
    assert_eq!(manager.statuses(), vec![(0, SessionStatus::Disconnected)]);

    manager.open_shard(0).await?;
    assert_eq!(manager.statuses(), vec![(0, SessionStatus::Connected)]);

    manager.close().await;
    Ok(())
}
