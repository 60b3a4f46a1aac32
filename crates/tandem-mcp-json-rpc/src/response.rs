use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonRpcVersion, RequestId};

/// A successful JSON-RPC response. `result` is always present on the wire,
/// `null` included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            result,
        }
    }

    pub fn null(id: RequestId) -> Self {
        Self::new(id, Value::Null)
    }
}

impl<T> From<(RequestId, T)> for JsonRpcResponse
where
    T: Into<Value>,
{
    fn from((id, result): (RequestId, T)) -> Self {
        Self::new(id, result.into())
    }
}
