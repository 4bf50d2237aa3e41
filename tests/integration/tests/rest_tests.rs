//! REST client tests against a canned-response mock server

use anyhow::Result;
use chat_client_common::ClientConfig;
use chat_client_rest::{RestClient, RestError};
use integration_tests::{CannedResponse, MockRest};
use std::sync::Arc;
use std::time::{Duration, Instant};

const GATEWAY_BOT_BODY: &str = r#"{
    "url": "wss://gateway.example.chat",
    "shards": 2,
    "session_start_limit": {
        "total": 1000,
        "remaining": 999,
        "reset_after": 14400000,
        "max_concurrency": 1
    }
}"#;

fn client_for(rest_url: String) -> Result<RestClient> {
    let config = Arc::new(ClientConfig::new("test-token").with_rest_url(rest_url));
    Ok(RestClient::new(config)?)
}

#[tokio::test]
async fn test_get_gateway_bot_sends_auth_and_decodes() -> Result<()> {
    let server = MockRest::spawn(vec![CannedResponse::json(200, GATEWAY_BOT_BODY)
        .with_header("x-ratelimit-bucket", "gw")
        .with_header("x-ratelimit-limit", "2")
        .with_header("x-ratelimit-remaining", "1")
        .with_header("x-ratelimit-reset-after", "5")])
    .await?;

    let client = client_for(server.url())?;
    let gateway = client.get_gateway_bot().await?;
    assert_eq!(gateway.shards, 2);
    assert_eq!(gateway.session_start_limit.max_concurrency, 1);
    assert_eq!(gateway.url, "wss://gateway.example.chat");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("GET /gateway/bot"));
    assert!(requests[0]
        .to_ascii_lowercase()
        .contains("authorization: bot test-token"));

    Ok(())
}

#[tokio::test]
async fn test_rate_limited_request_retried_after_window() -> Result<()> {
    let server = MockRest::spawn(vec![
        CannedResponse::json(429, r#"{"message":"rate limited"}"#)
            .with_header("retry-after", "0.2"),
        CannedResponse::json(200, GATEWAY_BOT_BODY),
    ])
    .await?;

    let client = client_for(server.url())?;

    let start = Instant::now();
    let gateway = client.get_gateway_bot().await?;
    assert_eq!(gateway.shards, 2);

    // The retry waited out the taught window first
    assert!(start.elapsed() >= Duration::from_millis(200));
    assert_eq!(server.requests().len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_api_error_carries_status_and_body() -> Result<()> {
    let server = MockRest::spawn(vec![CannedResponse::json(
        403,
        r#"{"message":"missing access"}"#,
    )])
    .await?;

    let client = client_for(server.url())?;
    match client.get_gateway_bot().await {
        Err(RestError::Api { status, body }) => {
            assert_eq!(status, 403);
            assert!(body.contains("missing access"));
        }
        other => panic!("expected api error, got {other:?}"),
    }

    Ok(())
}
