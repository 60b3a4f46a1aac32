//! # JSON-RPC 2.0 core
//!
//! Transport-agnostic JSON-RPC 2.0 types and dispatch logic shared by the
//! tandem-mcp client and server crates. Nothing here knows about pipes,
//! sockets or HTTP.
//!
//! - [`JsonRpcMessage`] is the four-shape wire envelope with strict decoding
//! - [`RequestId`] keeps integer and string identifiers distinct
//! - [`JsonRpcDispatcher`] routes requests and notifications to handlers

pub mod dispatch;
pub mod error;
pub mod message;
pub mod notification;
pub mod prelude;
pub mod request;
pub mod response;
pub mod types;

pub use dispatch::{
    DispatchError, FunctionHandler, JsonRpcDispatcher, JsonRpcHandler, RequestContext,
    ToJsonRpcError,
};
pub use error::{EnvelopeError, JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use message::JsonRpcMessage;
pub use notification::JsonRpcNotification;
pub use request::JsonRpcRequest;
pub use response::JsonRpcResponse;
pub use types::{JsonRpcVersion, RequestId};

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}
