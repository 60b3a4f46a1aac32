//! Error types for MCP client operations

use serde_json::Value;
use tandem_mcp_json_rpc::{EnvelopeError, JsonRpcErrorObject};
use tandem_mcp_protocol::UnsupportedProtocolVersion;
use thiserror::Error;

/// Result type for MCP client operations
pub type McpClientResult<T> = Result<T, McpClientError>;

#[derive(Error, Debug)]
pub enum McpClientError {
    /// Transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Handshake and session state errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation timed out")]
    Timeout,

    #[error("Operation cancelled")]
    Cancelled,

    /// The peer answered with a JSON-RPC error
    #[error("Server error (code {code}): {message}")]
    ServerError {
        code: i64,
        message: String,
        data: Option<Value>,
    },
}

/// Transport-specific errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Failed to spawn worker process: {0}")]
    Spawn(std::io::Error),

    #[error("Worker process exited: {0}")]
    ProcessExited(String),

    /// The channel ended without error
    #[error("Transport closed")]
    Closed,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Unexpected event type: {0}")]
    UnexpectedEvent(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedProtocolVersion),
}

/// Handshake state errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session not initialized")]
    NotInitialized,

    #[error("Client already connected")]
    AlreadyConnected,

    #[error("Initialization failed: {0}")]
    InitializeFailed(String),
}

impl McpClientError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn server_error(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Get the error code if this is a server error
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// True when the channel is gone and further calls on it cannot succeed.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// A cloneable rendition used to fail every waiter when a transport dies.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::Transport(TransportError::Closed) => TransportError::Closed.into(),
            Self::Transport(TransportError::ProcessExited(status)) => {
                TransportError::ProcessExited(status.clone()).into()
            }
            Self::Transport(TransportError::NotConnected) => TransportError::NotConnected.into(),
            other => TransportError::ConnectionLost(other.to_string()).into(),
        }
    }
}

impl From<JsonRpcErrorObject> for McpClientError {
    fn from(error: JsonRpcErrorObject) -> Self {
        Self::ServerError {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

impl From<EnvelopeError> for McpClientError {
    fn from(error: EnvelopeError) -> Self {
        Self::Protocol(ProtocolError::Envelope(error))
    }
}
