//! # MCP Server Transports
//!
//! Serving side of the MCP JSON-RPC core. Both servers drive a
//! [`JsonRpcDispatcher`]:
//!
//! - [`StdioServer`] reads one message per line from stdin and writes replies
//!   to stdout
//! - [`SseServer`] multiplexes sessions over HTTP: an event stream per
//!   session plus a POST endpoint for inbound messages
//!
//! ```rust,no_run
//! use tandem_mcp_server::SseServer;
//! use serde_json::Value;
//!
//! # async fn run() -> tandem_mcp_server::Result<()> {
//! let server = SseServer::builder()
//!     .register_fn("ping", |_params, _ctx| async move { Ok(Value::Null) })
//!     .build();
//! server.run().await
//! # }
//! ```

pub mod cors;
pub mod error;
pub mod session;
pub mod sse;
pub mod stdio;

pub use cors::CorsLayer;
pub use error::{McpServerError, Result};
pub use session::{Session, SessionRegistry};
pub use sse::{SseServer, SseServerBuilder, SseServerConfig};
pub use stdio::StdioServer;

// Re-export foundational types
pub use tandem_mcp_json_rpc::{
    DispatchError, JsonRpcDispatcher, JsonRpcHandler, RequestContext, ToJsonRpcError,
};
