//! Common re-exports.
//!
//! ```rust
//! use tandem_mcp_json_rpc::prelude::*;
//! ```

pub use crate::dispatch::{
    DispatchError, JsonRpcDispatcher, JsonRpcHandler, RequestContext, ToJsonRpcError,
};
pub use crate::error::{EnvelopeError, JsonRpcError, JsonRpcErrorCode, JsonRpcErrorObject};
pub use crate::error_codes::*;
pub use crate::message::JsonRpcMessage;
pub use crate::notification::JsonRpcNotification;
pub use crate::request::JsonRpcRequest;
pub use crate::response::JsonRpcResponse;
pub use crate::types::{JsonRpcVersion, RequestId};
