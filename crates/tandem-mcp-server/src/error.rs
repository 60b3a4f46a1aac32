use thiserror::Error;

/// Result type for MCP server operations
pub type Result<T> = std::result::Result<T, McpServerError>;

/// Server-side errors
#[derive(Debug, Error)]
pub enum McpServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_and_display() {
        let io: McpServerError =
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken").into();
        assert!(matches!(io, McpServerError::Io(_)));
        assert_eq!(io.to_string(), "IO error: port taken");

        let json: McpServerError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(json, McpServerError::Serialization(_)));

        assert_eq!(
            McpServerError::SessionNotFound("abc".into()).to_string(),
            "Session not found: abc"
        );
        assert_eq!(
            McpServerError::SessionClosed("abc".into()).to_string(),
            "Session closed: abc"
        );
    }
}
