//! Configuration types for MCP client

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tandem_mcp_protocol::{ClientCapabilities, Implementation, McpVersion};

use crate::event_stream::DEFAULT_MAX_LINE_LENGTH;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Identity announced in the initialize request
    pub client_info: Implementation,

    pub capabilities: ClientCapabilities,

    /// Revision offered during the handshake
    pub protocol_version: McpVersion,

    pub timeouts: TimeoutConfig,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Bound on `Transport::connect`
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// Default bound for [`McpClient::call`](crate::McpClient::call)
    #[serde(with = "duration_serde")]
    pub request: Duration,

    /// Bound on the initialize round trip
    #[serde(with = "duration_serde")]
    pub initialization: Duration,
}

/// SSE transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseTransportConfig {
    /// Bound on opening the stream and receiving the endpoint event
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Bound on each POST
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    pub user_agent: String,

    /// Events buffered between the stream reader and `receive`
    pub event_buffer: usize,

    /// Longest SSE line accepted before the stream is dropped
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

fn default_max_line_length() -> usize {
    DEFAULT_MAX_LINE_LENGTH
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_info: Implementation::new("tandem-mcp-client", env!("CARGO_PKG_VERSION")),
            capabilities: ClientCapabilities::default(),
            protocol_version: McpVersion::LATEST,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
            initialization: Duration::from_secs(15),
        }
    }
}

impl Default for SseTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            user_agent: format!("tandem-mcp-client/{}", env!("CARGO_PKG_VERSION")),
            event_buffer: 100,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_serialization() {
        let config = ClientConfig::default();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["timeouts"]["request"], 30_000);
        assert_eq!(value["protocol_version"], "2025-06-18");
        let _deserialized: ClientConfig = serde_json::from_value(value).unwrap();
    }

    #[test]
    fn test_durations_are_milliseconds() {
        let config: SseTransportConfig = serde_json::from_value(json!({
            "connect_timeout": 250,
            "request_timeout": 1500,
            "user_agent": "test-agent",
            "event_buffer": 4
        }))
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_line_length, DEFAULT_MAX_LINE_LENGTH);
    }
}
