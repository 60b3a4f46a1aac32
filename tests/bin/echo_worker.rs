//! # Echo Worker
//!
//! Stdio MCP worker used by the integration tests. Speaks newline-delimited
//! JSON-RPC on stdin/stdout and logs to stderr.
//!
//! Methods:
//! - `initialize` - answers the handshake with the requested protocol version
//! - `ping` - returns `null`
//! - `echo` - returns its params unchanged
//! - `fail` - returns application error -32000 carrying the params as data
//! - `sleep` - waits `{"ms": n}` milliseconds, then returns `{"slept": n}`
//!
//! Exits on EOF, SIGINT or SIGTERM.

use serde_json::{Value, json};
use std::time::Duration;
use tandem_mcp_protocol::{
    Implementation, InitializeParams, InitializeResult, LoggingCapabilities, McpVersion,
    ServerCapabilities, ToolsCapabilities, methods,
};
use tandem_mcp_server::{DispatchError, JsonRpcDispatcher, StdioServer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // stdout is reserved for protocol traffic
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Signal received, shutting down");
            cancel.cancel();
        }
    });

    let code = match StdioServer::new(dispatcher()).serve(cancel).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Stdio server failed");
            1
        }
    };
    info!("Echo worker exiting");
    // a blocked stdin read would otherwise hold up runtime shutdown
    std::process::exit(code);
}

fn dispatcher() -> JsonRpcDispatcher {
    let mut dispatcher = JsonRpcDispatcher::new();

    dispatcher.register_fn(methods::INITIALIZE, |params, _ctx| async move {
        let params: InitializeParams = serde_json::from_value(params.unwrap_or_default())
            .map_err(|e| DispatchError::InvalidParams(e.to_string()))?;
        let version = params
            .protocol_version
            .parse::<McpVersion>()
            .unwrap_or_else(|_| {
                warn!(requested = %params.protocol_version, "Unknown protocol version, offering latest");
                McpVersion::LATEST
            });
        info!(client = %params.client_info.name, protocol = %version, "Initialize");

        let capabilities = ServerCapabilities {
            tools: Some(ToolsCapabilities::default()),
            logging: Some(LoggingCapabilities {}),
            ..Default::default()
        };
        let result = InitializeResult::new(
            version,
            capabilities,
            Implementation::new("echo-worker", env!("CARGO_PKG_VERSION")),
        );
        serde_json::to_value(result).map_err(|e| DispatchError::Internal(e.to_string()))
    });

    dispatcher.register_fn(methods::PING, |_params, _ctx| async move { Ok(Value::Null) });

    dispatcher.register_fn("echo", |params, _ctx| async move {
        Ok(params.unwrap_or(Value::Null))
    });

    dispatcher.register_fn("fail", |params, _ctx| async move {
        let message = params
            .as_ref()
            .and_then(|p| p.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("requested failure")
            .to_string();
        Err(DispatchError::Application {
            code: -32000,
            message,
            data: params,
        })
    });

    dispatcher.register_fn("sleep", |params, ctx| async move {
        let ms = params
            .as_ref()
            .and_then(|p| p.get("ms"))
            .and_then(Value::as_u64)
            .ok_or_else(|| DispatchError::InvalidParams("expected {\"ms\": <integer>}".into()))?;
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(DispatchError::Internal("shutting down".into())),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!({"slept": ms})),
        }
    });

    dispatcher
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sigterm), Ok(mut sigint)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) else {
        warn!("Could not install signal handlers");
        return std::future::pending().await;
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}
