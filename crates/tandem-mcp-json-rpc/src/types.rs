use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Error text used whenever an `id` member is present but has an unusable type.
pub const INVALID_ID_MESSAGE: &str = "identifier must be an integer or string";

/// A request identifier. Integers and strings keep their declared type on the wire.
///
/// An absent identifier is modelled as `Option::None` by the containing type,
/// never as `0` or `""`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Decode an identifier from a raw JSON value.
    ///
    /// Integer interpretation is tried first, then string. Floats, booleans,
    /// arrays, objects and `null` are rejected.
    pub fn from_json(value: &Value) -> Result<Self, String> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(RequestId::Number)
                .ok_or_else(|| INVALID_ID_MESSAGE.to_string()),
            Value::String(s) => Ok(RequestId::String(s.clone())),
            _ => Err(INVALID_ID_MESSAGE.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RequestId::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RequestId::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        RequestId::from_json(&raw).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// JSON-RPC protocol tag. Only "2.0" is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonRpcVersion {
    #[default]
    V2_0,
}

impl JsonRpcVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonRpcVersion::V2_0 => crate::JSONRPC_VERSION,
        }
    }
}

impl fmt::Display for JsonRpcVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            crate::JSONRPC_VERSION => Ok(JsonRpcVersion::V2_0),
            _ => Err(serde::de::Error::custom(format!(
                "Invalid JSON-RPC version: {}",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_id_keeps_declared_type() {
        assert_eq!(serde_json::to_string(&RequestId::Number(42)).unwrap(), "42");
        assert_eq!(
            serde_json::to_string(&RequestId::from("42")).unwrap(),
            r#""42""#
        );

        let n: RequestId = serde_json::from_str("7").unwrap();
        let s: RequestId = serde_json::from_str(r#""7""#).unwrap();
        assert_eq!(n, RequestId::Number(7));
        assert_eq!(s, RequestId::String("7".to_string()));
        assert_ne!(n, s);
    }

    #[test]
    fn test_request_id_rejects_other_types() {
        for bad in [json!(1.5), json!(true), json!([1]), json!({"a": 1})] {
            let err = serde_json::from_value::<RequestId>(bad).unwrap_err();
            assert!(err.to_string().contains(INVALID_ID_MESSAGE));
        }
        assert!(RequestId::from_json(&Value::Null).is_err());
        assert!(RequestId::from_json(&json!(u64::MAX)).is_err());
    }

    #[test]
    fn test_json_rpc_version() {
        assert_eq!(serde_json::to_string(&JsonRpcVersion::V2_0).unwrap(), r#""2.0""#);
        assert!(serde_json::from_str::<JsonRpcVersion>(r#""1.0""#).is_err());
    }
}
