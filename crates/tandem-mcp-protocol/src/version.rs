//! Protocol revisions understood by this implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum McpVersion {
    #[serde(rename = "2024-11-05")]
    V2024_11_05,
    #[serde(rename = "2025-03-26")]
    V2025_03_26,
    #[serde(rename = "2025-06-18")]
    V2025_06_18,
}

impl McpVersion {
    /// Version offered by default in the initialize request
    pub const LATEST: McpVersion = McpVersion::V2025_06_18;

    pub const SUPPORTED: [McpVersion; 3] = [
        McpVersion::V2025_06_18,
        McpVersion::V2025_03_26,
        McpVersion::V2024_11_05,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            McpVersion::V2024_11_05 => "2024-11-05",
            McpVersion::V2025_03_26 => "2025-03-26",
            McpVersion::V2025_06_18 => "2025-06-18",
        }
    }

    pub fn is_supported(version: &str) -> bool {
        version.parse::<McpVersion>().is_ok()
    }
}

impl Default for McpVersion {
    fn default() -> Self {
        Self::LATEST
    }
}

impl fmt::Display for McpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a peer negotiates a revision outside [`McpVersion::SUPPORTED`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported protocol version: {version}")]
pub struct UnsupportedProtocolVersion {
    pub version: String,
}

impl FromStr for McpVersion {
    type Err = UnsupportedProtocolVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        McpVersion::SUPPORTED
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnsupportedProtocolVersion {
                version: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        assert_eq!("2025-06-18".parse::<McpVersion>(), Ok(McpVersion::V2025_06_18));
        assert_eq!("2024-11-05".parse::<McpVersion>(), Ok(McpVersion::V2024_11_05));
        let err = "1.0".parse::<McpVersion>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported protocol version: 1.0");
    }

    #[test]
    fn test_latest_is_supported() {
        assert!(McpVersion::is_supported(McpVersion::LATEST.as_str()));
        assert_eq!(McpVersion::default(), McpVersion::LATEST);
    }
}
