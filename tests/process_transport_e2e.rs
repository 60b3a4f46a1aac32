//! End-to-end tests for the process transport against the echo worker.

use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem_mcp_client::{
    ClientConfig, ConnectionState, McpClient, McpClientBuilder, McpClientError, ProcessConfig,
    ProcessTransport, Transport, TransportError,
};
use tandem_mcp_json_rpc::{JsonRpcMessage, JsonRpcRequest, RequestId};
use tokio_util::sync::CancellationToken;
use tracing::info;

fn worker_config() -> ProcessConfig {
    ProcessConfig::new(env!("CARGO_BIN_EXE_echo-worker")).with_env("RUST_LOG", "info")
}

async fn connected_client(config: ProcessConfig) -> McpClient {
    let client = McpClientBuilder::new()
        .with_transport(ProcessTransport::new(config))
        .build()
        .expect("client");
    client
        .connect(&CancellationToken::new())
        .await
        .expect("handshake with echo worker");
    client
}

#[tokio::test]
async fn test_worker_handshake_and_calls() {
    let _ = tracing_subscriber::fmt::try_init();

    let stderr_lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let config = worker_config().with_stderr_handler({
        let stderr_lines = Arc::clone(&stderr_lines);
        move |line| stderr_lines.lock().unwrap().push(line.to_string())
    });
    let client = connected_client(config).await;

    assert_eq!(client.state(), ConnectionState::Initialized);
    let server_info = client.server_info().unwrap();
    assert_eq!(server_info.server_info.name, "echo-worker");
    assert_eq!(server_info.protocol_version, "2025-06-18");
    assert!(server_info.capabilities.tools.is_some());

    tokio_test::assert_ok!(client.ping().await);

    let echoed = client
        .call("echo", Some(json!({"text": "hello", "n": [1, 2]})))
        .await
        .unwrap();
    assert_eq!(echoed, json!({"text": "hello", "n": [1, 2]}));

    match client.call("fail", Some(json!({"message": "nope"}))).await {
        Err(McpClientError::ServerError {
            code,
            message,
            data,
        }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "nope");
            assert_eq!(data, Some(json!({"message": "nope"})));
        }
        other => panic!("expected server error, got {:?}", other),
    }

    let missing = client.call("does/not/exist", None).await.unwrap_err();
    assert_eq!(missing.error_code(), Some(-32601));

    client.disconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // stderr is drained before disconnect returns
    let lines = stderr_lines.lock().unwrap();
    info!("worker wrote {} stderr lines", lines.len());
    assert!(lines.iter().any(|line| line.contains("Initialize")));
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated() {
    let _ = tracing_subscriber::fmt::try_init();
    let client = Arc::new(connected_client(worker_config()).await);

    let calls = (0..16).map(|n| {
        let client = Arc::clone(&client);
        tokio::spawn(async move { (n, client.call("echo", Some(json!({"n": n}))).await) })
    });
    for call in futures::future::join_all(calls).await {
        let (n, result) = call.unwrap();
        assert_eq!(result.unwrap(), json!({"n": n}));
    }
    assert_eq!(client.pending_requests(), 0);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_call_leaves_client_usable() {
    let _ = tracing_subscriber::fmt::try_init();
    let client = Arc::new(connected_client(worker_config()).await);

    let cancel = CancellationToken::new();
    let sleeping = {
        let client = Arc::clone(&client);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            client
                .request("sleep", Some(json!({"ms": 300})), &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    assert!(matches!(
        sleeping.await.unwrap(),
        Err(McpClientError::Cancelled)
    ));
    assert_eq!(client.pending_requests(), 0);

    // the worker still answers the abandoned call; that reply must be dropped
    tokio_test::assert_ok!(client.ping().await);

    let timed_out = client
        .call_with_timeout("sleep", Some(json!({"ms": 500})), Duration::from_millis(50))
        .await;
    assert!(matches!(timed_out, Err(McpClientError::Timeout)));
    assert_eq!(client.pending_requests(), 0);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_worker_crash_fails_handshake() {
    let _ = tracing_subscriber::fmt::try_init();
    let client = McpClientBuilder::new()
        .with_transport(ProcessTransport::new(
            ProcessConfig::new("sh").with_args(["-c", "read line; exit 3"]),
        ))
        .build()
        .unwrap();

    let err = client
        .connect(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_transport_failure(), "unexpected error: {:?}", err);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[cfg(unix)]
#[tokio::test]
async fn test_client_reconnects_after_worker_is_killed() {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = Arc::new(ProcessTransport::new(worker_config()));
    let client = McpClient::from_arc(transport.clone(), ClientConfig::default());
    client.connect(&CancellationToken::new()).await.unwrap();
    tokio_test::assert_ok!(client.ping().await);

    let first = transport.pid().unwrap();
    let status = std::process::Command::new("kill")
        .args(["-9", &first.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    tokio::time::timeout(Duration::from_secs(5), async {
        while client.state() != ConnectionState::Disconnected {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("reader must notice the dead worker");
    assert!(!transport.is_connected());

    client.connect(&CancellationToken::new()).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Initialized);
    assert_ne!(transport.pid(), Some(first));
    tokio_test::assert_ok!(client.ping().await);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_force_kills_stubborn_child() {
    let _ = tracing_subscriber::fmt::try_init();
    // `sleep` never reads stdin, so closing it does not end the process
    let transport = ProcessTransport::new(
        ProcessConfig::new("sleep")
            .with_args(["30"])
            .with_shutdown_grace(Duration::from_millis(200)),
    );
    transport.connect(&CancellationToken::new()).await.unwrap();
    assert!(transport.pid().is_some());

    tokio::time::timeout(Duration::from_secs(5), transport.disconnect())
        .await
        .expect("disconnect must return after the grace window")
        .unwrap();
    assert!(!transport.is_connected());
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_exits_cleanly_on_sigterm() {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = ProcessTransport::new(worker_config());
    let cancel = CancellationToken::new();
    transport.connect(&cancel).await.unwrap();

    // one round trip so the worker is past startup
    let ping: JsonRpcMessage = JsonRpcRequest::new_no_params(RequestId::Number(1), "ping").into();
    transport.send(&ping, &cancel).await.unwrap();
    let reply = transport.receive(&cancel).await.unwrap();
    assert_eq!(reply.id(), Some(&RequestId::Number(1)));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let pid = transport.pid().unwrap();
    let status = std::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    let end = tokio::time::timeout(Duration::from_secs(5), transport.receive(&cancel))
        .await
        .expect("worker did not exit");
    assert!(
        matches!(end, Err(McpClientError::Transport(TransportError::Closed))),
        "unexpected end of stream: {:?}",
        end
    );
    transport.disconnect().await.unwrap();
}
