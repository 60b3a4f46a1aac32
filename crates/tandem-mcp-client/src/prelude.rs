//! # MCP Client Prelude
//!
//! ```rust
//! use tandem_mcp_client::prelude::*;
//! ```

// Core client types
pub use crate::client::{ConnectionState, McpClient, McpClientBuilder};
pub use crate::config::{ClientConfig, SseTransportConfig, TimeoutConfig};
pub use crate::error::{McpClientError, McpClientResult};

// Transport types
pub use crate::transport::{ProcessConfig, ProcessTransport, SseTransport, Transport, TransportType};

// Message types
pub use tandem_mcp_json_rpc::{JsonRpcMessage, JsonRpcNotification, RequestId};
pub use tandem_mcp_protocol::{Implementation, LoggingLevel, McpVersion};

pub use std::time::Duration;
pub use tokio_util::sync::CancellationToken;
