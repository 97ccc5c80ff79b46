use std::time::Duration;

use thiserror::Error;

/// Error taxonomy for the execution pipeline.
///
/// Cancellation and timeout are ordinary values of this type, never panics
/// or unwinding. The pipeline matches on `Aborted`/`Timeout` to classify
/// terminal events.
#[derive(Error, Debug)]
pub enum Error {
    #[error("operation aborted")]
    Aborted,

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("hook error: {0}")]
    Hook(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// `true` for caller-requested cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// `true` for deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(Error::Aborted.to_string(), "operation aborted");

        let err = Error::Timeout(Duration::from_secs(30));
        assert!(err.to_string().contains("timed out"));

        let err = Error::Mcp("connection refused".into());
        assert_eq!(err.to_string(), "MCP error: connection refused");

        let err = Error::Hook(" panicked".into());
        assert!(err.to_string().starts_with("hook error:"));
    }

    #[test]
    fn abort_and_timeout_predicates() {
        assert!(Error::Aborted.is_abort());
        assert!(!Error::Aborted.is_timeout());

        let timeout = Error::Timeout(Duration::from_secs(1));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_abort());

        let other = Error::Tool("boom".into());
        assert!(!other.is_abort());
        assert!(!other.is_timeout());
    }
}
