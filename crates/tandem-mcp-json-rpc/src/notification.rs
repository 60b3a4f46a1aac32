use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::JsonRpcVersion;

/// A JSON-RPC notification (request without an id). Never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    #[serde(rename = "jsonrpc")]
    pub version: JsonRpcVersion,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            version: JsonRpcVersion::V2_0,
            method: method.into(),
            params,
        }
    }

    pub fn new_no_params(method: impl Into<String>) -> Self {
        Self::new(method, None)
    }

    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.as_ref()?.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_has_no_id() {
        let notification = JsonRpcNotification::new_no_params("notifications/initialized");
        let value = serde_json::to_value(&notification).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["method"], "notifications/initialized");
    }

    #[test]
    fn test_notification_params() {
        let notification =
            JsonRpcNotification::new("notifications/progress", Some(json!({"progress": 3})));
        assert_eq!(notification.get_param("progress"), Some(&json!(3)));
        assert_eq!(notification.get_param("missing"), None);
    }
}
