//! The four wire shapes of a JSON-RPC 2.0 message, discriminated by which
//! members are present.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EnvelopeError, JsonRpcError, JsonRpcErrorObject};
use crate::notification::JsonRpcNotification;
use crate::request::JsonRpcRequest;
use crate::response::JsonRpcResponse;
use crate::types::{JsonRpcVersion, RequestId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
}

impl JsonRpcMessage {
    /// Decode one message from its text form.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Decode one message from raw bytes. Invalid UTF-8 is a parse error.
    pub fn parse_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Self::parse(std::str::from_utf8(bytes)?)
    }

    /// Byte-level [`parse_for_reply`](Self::parse_for_reply).
    pub fn parse_slice_for_reply(bytes: &[u8]) -> Result<Self, JsonRpcError> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::parse_for_reply(text),
            Err(e) => Err(JsonRpcError::new(
                None,
                EnvelopeError::from(e).to_error_object(),
            )),
        }
    }

    /// Decode one message, producing the error response a server should send
    /// back when the message is rejected. The identifier is recovered from the
    /// raw object whenever it is usable.
    pub fn parse_for_reply(text: &str) -> Result<Self, JsonRpcError> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return Err(JsonRpcError::new(
                    None,
                    EnvelopeError::Json(e).to_error_object(),
                ));
            }
        };
        let id = value
            .get("id")
            .and_then(|raw| RequestId::from_json(raw).ok());
        Self::from_value(value).map_err(|e| JsonRpcError::new(id, e.to_error_object()))
    }

    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut object) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        check_version(&object)?;

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(RequestId::from_json(&raw).map_err(EnvelopeError::InvalidId)?),
        };

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err(EnvelopeError::InvalidShape(
                    "\"method\" must be a string".to_string(),
                ));
            };
            let params = object.remove("params");
            return Ok(match id {
                Some(id) => JsonRpcMessage::Request(JsonRpcRequest {
                    version: JsonRpcVersion::V2_0,
                    id,
                    method,
                    params,
                }),
                None => JsonRpcMessage::Notification(JsonRpcNotification {
                    version: JsonRpcVersion::V2_0,
                    method,
                    params,
                }),
            });
        }

        match (object.remove("result"), object.remove("error")) {
            (Some(_), Some(_)) => Err(EnvelopeError::InvalidShape(
                "response carries both \"result\" and \"error\"".to_string(),
            )),
            (Some(result), None) => {
                let id = id.ok_or_else(|| {
                    EnvelopeError::InvalidShape("response without identifier".to_string())
                })?;
                Ok(JsonRpcMessage::Response(JsonRpcResponse::new(id, result)))
            }
            (None, Some(error)) => {
                let error: JsonRpcErrorObject = serde_json::from_value(error).map_err(|e| {
                    EnvelopeError::InvalidShape(format!("malformed \"error\" member: {}", e))
                })?;
                Ok(JsonRpcMessage::Error(JsonRpcError::new(id, error)))
            }
            (None, None) => Err(EnvelopeError::InvalidShape(
                "message has neither \"method\", \"result\" nor \"error\"".to_string(),
            )),
        }
    }

    /// Serialize as one newline-terminated line, the stdio framing unit.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(request) => Some(&request.id),
            JsonRpcMessage::Notification(_) => None,
            JsonRpcMessage::Response(response) => Some(&response.id),
            JsonRpcMessage::Error(error) => error.id.as_ref(),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(request) => Some(&request.method),
            JsonRpcMessage::Notification(notification) => Some(&notification.method),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, JsonRpcMessage::Error(_))
    }
}

fn check_version(object: &Map<String, Value>) -> Result<(), EnvelopeError> {
    match object.get("jsonrpc") {
        None => Err(EnvelopeError::MissingVersion),
        Some(Value::String(tag)) if tag == crate::JSONRPC_VERSION => Ok(()),
        Some(Value::String(tag)) => Err(EnvelopeError::InvalidVersion(tag.clone())),
        Some(other) => Err(EnvelopeError::InvalidVersion(other.to_string())),
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        JsonRpcMessage::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        Self::Request(request)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        Self::Notification(notification)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        Self::Response(response)
    }
}

impl From<JsonRpcError> for JsonRpcMessage {
    fn from(error: JsonRpcError) -> Self {
        Self::Error(error)
    }
}
