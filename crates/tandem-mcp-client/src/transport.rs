//! Transport layer for MCP client

use async_trait::async_trait;
use tandem_mcp_json_rpc::JsonRpcMessage;
use tokio_util::sync::CancellationToken;

use crate::error::McpClientResult;

pub mod process;
pub mod sse;

pub use process::{ProcessConfig, ProcessTransport, StderrHandler};
pub use sse::SseTransport;

/// Transport type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Worker subprocess speaking newline-delimited JSON on stdio
    Process,
    /// Server-sent event stream with a POST back-channel
    Sse,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Process => write!(f, "process"),
            TransportType::Sse => write!(f, "SSE"),
        }
    }
}

/// A bidirectional message channel.
///
/// All methods take `&self` so one task can sit in [`receive`](Transport::receive)
/// while others [`send`](Transport::send). Every blocking call honours the
/// supplied token and returns [`McpClientError::Cancelled`](crate::McpClientError::Cancelled)
/// once it fires.
#[async_trait]
pub trait Transport: Send + Sync {
    fn transport_type(&self) -> TransportType;

    /// Establish the channel. Calling it on a connected transport is a no-op.
    async fn connect(&self, cancel: &CancellationToken) -> McpClientResult<()>;

    /// Release every resource and unblock any pending `receive`. Idempotent.
    async fn disconnect(&self) -> McpClientResult<()>;

    /// Hand one message to the channel.
    async fn send(&self, message: &JsonRpcMessage, cancel: &CancellationToken)
    -> McpClientResult<()>;

    /// Wait for the next complete message.
    ///
    /// A clean end of the channel is reported as
    /// [`TransportError::Closed`](crate::TransportError::Closed); anything else
    /// that ends the channel is a different transport error.
    async fn receive(&self, cancel: &CancellationToken) -> McpClientResult<JsonRpcMessage>;

    fn is_connected(&self) -> bool;
}

/// Type alias for a boxed transport
pub type BoxedTransport = Box<dyn Transport>;
