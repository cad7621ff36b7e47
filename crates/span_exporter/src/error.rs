//! Error types for span export operations.

use thiserror::Error;

/// Why a single delivery attempt failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The batch could not be encoded; retrying cannot help.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Connection refused, timeout, DNS failure and friends.
    #[error("transport error: {0}")]
    Transport(String),

    /// The collector answered with a non-2xx status.
    #[error("collector returned non-success status {status}")]
    Status { status: u16 },

    /// The attempt was abandoned because shutdown's deadline passed.
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Returns `true` if the batch must be dropped rather than retried.
    #[inline]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Transport(format!("connection failed: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by the exporter's public API.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The exporter has been shut down and no longer accepts records.
    #[error("exporter closed")]
    Closed,

    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The exporter was created outside a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    Runtime(String),
}

impl ExportError {
    /// Returns `true` if the exporter is permanently unusable.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_serialization_is_permanent() {
        assert!(DeliveryError::Serialization("bad float".into()).is_permanent());
        assert!(!DeliveryError::Transport("refused".into()).is_permanent());
        assert!(!DeliveryError::Status { status: 503 }.is_permanent());
        assert!(!DeliveryError::Cancelled.is_permanent());
    }

    #[test]
    fn test_only_closed_is_terminal() {
        assert!(ExportError::Closed.is_terminal());
        assert!(!ExportError::Config("bad url".into()).is_terminal());
        assert!(!ExportError::Runtime("no reactor".into()).is_terminal());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ExportError::Closed.to_string(), "exporter closed");
        assert_eq!(
            DeliveryError::Status { status: 502 }.to_string(),
            "collector returned non-success status 502"
        );
    }
}
