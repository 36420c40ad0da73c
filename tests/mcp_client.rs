//! MCP Client Integration Tests
//!
//! Drives the stdio JSON-RPC client against an in-process fake server:
//! handshake, correlation, timeout, retry and error classification.

mod common;

use std::time::Duration;

use officeflow::adapters::{McpClientOptions, McpError, McpStdioClient};
use serde_json::json;

use common::{spawn_fake_server, Reply, ServerLog};

fn options() -> McpClientOptions {
    McpClientOptions::new("fake-server", "/tmp")
        .with_timeout(Duration::from_millis(200))
        .with_retries(1)
}

async fn connect<F>(options: McpClientOptions, handler: F) -> (McpStdioClient, ServerLog)
where
    F: FnMut(&str, &serde_json::Value) -> Reply + Send + 'static,
{
    let server = spawn_fake_server(handler);
    let client = McpStdioClient::connect(options, server.reader, server.writer)
        .await
        .unwrap();
    (client, server.log)
}

#[tokio::test]
async fn test_handshake_then_list_tools() {
    let (client, log) = connect(options(), |_, _| Reply::Silent).await;

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "codex");
    assert_eq!(tools[0].description.as_deref(), Some("run codex"));

    let received = log.received();
    assert_eq!(received[0]["method"], "initialize");
    assert_eq!(received[0]["params"]["protocolVersion"], "2025-06-18");
    assert_eq!(received[1]["method"], "notifications/initialized");
    assert!(received[1].get("id").is_none());
    assert!(client.is_running());
}

#[tokio::test]
async fn test_call_tool_prefers_structured_content() {
    let (client, log) = connect(options(), |_, params| {
        assert_eq!(params["name"], "codex");
        Reply::Result(json!({
            "content": [{"type": "text", "text": "ignored"}],
            "structuredContent": {"summary": "edited 2 files"}
        }))
    })
    .await;

    let output = client
        .call_tool("codex", json!({"prompt": "do it"}))
        .await
        .unwrap();

    assert_eq!(output, json!({"summary": "edited 2 files"}));
    let calls = log.requests_for("tools/call");
    assert_eq!(calls[0]["params"]["arguments"]["prompt"], "do it");
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_timeout_is_retried_with_fresh_id() {
    let mut calls = 0;
    let (client, log) = connect(options(), move |_, _| {
        calls += 1;
        if calls == 1 {
            Reply::Silent
        } else {
            Reply::Result(json!({"content": "second time"}))
        }
    })
    .await;

    let output = client.call_tool("codex", json!({})).await.unwrap();
    assert_eq!(output, json!("second time"));

    let calls = log.requests_for("tools/call");
    assert_eq!(calls.len(), 2);
    assert_ne!(calls[0]["id"], calls[1]["id"]);
}

#[tokio::test]
async fn test_timeout_exhausts_retries() {
    let (client, log) = connect(options(), |_, _| Reply::Silent).await;

    let err = client.call_tool("codex", json!({})).await.unwrap_err();

    assert!(matches!(err, McpError::Timeout { .. }));
    assert_eq!(err.code(), "MCP_TIMEOUT");
    assert_eq!(log.requests_for("tools/call").len(), 2);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_late_response_is_dropped() {
    let mut calls = 0;
    let (client, _log) = connect(options().with_retries(0), move |_, _| {
        calls += 1;
        if calls == 1 {
            Reply::Late(Duration::from_millis(400), json!({"content": "too late"}))
        } else {
            Reply::Result(json!({"content": "on time"}))
        }
    })
    .await;

    let err = client.call_tool("codex", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Timeout { .. }));

    // Let the stale reply arrive; it must not satisfy the next request
    tokio::time::sleep(Duration::from_millis(300)).await;

    let output = client.call_tool("codex", json!({})).await.unwrap();
    assert_eq!(output, json!("on time"));
    assert!(client.is_running());
}

#[tokio::test]
async fn test_approval_code_is_not_retried() {
    let (client, log) = connect(options(), |_, _| {
        Reply::Error(-32001, "needs approval".to_string())
    })
    .await;

    let err = client.call_tool("codex", json!({})).await.unwrap_err();

    assert!(matches!(err, McpError::Approval(_)));
    assert!(!err.is_retryable());
    assert_eq!(log.requests_for("tools/call").len(), 1);
}

#[tokio::test]
async fn test_is_error_result_is_classified() {
    let mut calls = 0;
    let (client, _log) = connect(options(), move |_, _| {
        calls += 1;
        let message = if calls == 1 { "permission denied" } else { "boom" };
        Reply::Result(json!({"isError": true, "content": message}))
    })
    .await;

    let err = client.call_tool("codex", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::Approval(_)));
    assert!(err.to_string().contains("MCP tool call failed for codex"));

    let err = client.call_tool("codex", json!({})).await.unwrap_err();
    assert!(matches!(err, McpError::ToolFailure(_)));
    assert_eq!(err.code(), "MCP_TOOL");
}

#[tokio::test]
async fn test_hangup_rejects_pending_request() {
    let (client, _log) = connect(
        options()
            .with_timeout(Duration::from_secs(5))
            .with_retries(0),
        |_, _| Reply::Hangup,
    )
    .await;

    let err = client.call_tool("codex", json!({})).await.unwrap_err();

    assert!(matches!(err, McpError::Transport(_)));
    assert!(!client.is_running());
    assert_eq!(client.pending_requests(), 0);

    // Nothing to talk to any more
    let err = client.list_tools().await.unwrap_err();
    assert!(matches!(err, McpError::Transport(_)));
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (client, _log) = connect(options(), |_, _| Reply::Silent).await;

    client.shutdown().await.unwrap();
    client.shutdown().await.unwrap();

    assert!(!client.is_running());
}
