use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{JsonRpcVersion, RequestId};

/// A JSON-RPC request. `params` is carried as an opaque value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            id,
            method: method.into(),
            params,
        }
    }

    /// Create a new request with no parameters
    pub fn new_no_params(id: RequestId, method: impl Into<String>) -> Self {
        Self::new(id, method, None)
    }

    /// Get a named parameter (if params are an object)
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(
            RequestId::Number(1),
            "tools/call",
            Some(json!({"name": "add"})),
        );
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": "add"}})
        );
        assert_eq!(request.get_param("name"), Some(&json!("add")));
    }

    #[test]
    fn test_request_without_params() {
        let request = JsonRpcRequest::new_no_params(RequestId::from("a"), "ping");
        let text = serde_json::to_string(&request).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#);
    }
}
