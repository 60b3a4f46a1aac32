//! # MCP Client Library
//!
//! Client side of the MCP JSON-RPC core: a [`Transport`] abstraction with a
//! subprocess and an SSE implementation, and [`McpClient`], which runs the
//! initialize handshake and correlates replies with in-flight calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tandem_mcp_client::{McpClientBuilder, ProcessConfig, ProcessTransport};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = ProcessTransport::new(ProcessConfig::new("my-mcp-worker"));
//!     let client = McpClientBuilder::new().with_transport(transport).build()?;
//!
//!     client.connect(&CancellationToken::new()).await?;
//!     let tools = client.list_tools(None).await?;
//!     println!("Available tools: {}", tools);
//!
//!     client.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Transport Types
//!
//! ### Process Transport
//!
//! Spawns the worker and exchanges one JSON message per line on its stdin
//! and stdout. Worker stderr is forwarded to `tracing` or a custom handler.
//!
//! ### SSE Transport
//!
//! ```rust,no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use tandem_mcp_client::transport::SseTransport;
//!
//! let transport = SseTransport::new("http://localhost:8080/sse")?;
//! # Ok(())
//! # }
//! ```
//!
//! The first event on the stream must be `endpoint`; its data names the URL
//! that outbound messages are POSTed to.

pub mod client;
pub mod config;
pub mod error;
pub mod event_stream;
mod pending;
pub mod prelude;
pub mod transport;

// Re-export main types
pub use client::{ConnectionState, McpClient, McpClientBuilder, NotificationHandler};
pub use config::{ClientConfig, SseTransportConfig, TimeoutConfig};
pub use error::{McpClientError, McpClientResult, ProtocolError, SessionError, TransportError};
pub use event_stream::{DEFAULT_MAX_LINE_LENGTH, LineTooLong, SseDecoder, SseEvent, SseParser};

// Re-export transport types
pub use transport::{
    BoxedTransport, ProcessConfig, ProcessTransport, SseTransport, StderrHandler, Transport,
    TransportType,
};
