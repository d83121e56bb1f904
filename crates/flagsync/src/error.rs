//! Error types for the feature-state repository.
//!
//! - `RepositoryError`: top-level error returned by the facade
//! - `TransportError`: failures reported by a log transport
//! - `CodecError`: payload encoding and decoding failures

use thiserror::Error;

/// Errors returned by [`FeatureStateRepository`](crate::FeatureStateRepository) operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The inbound log was not caught up within the initialization timeout.
    #[error(
        "initialization timed out after {timeout_ms}ms with {pending_partitions} partition(s) not caught up"
    )]
    InitializationTimeout {
        /// The configured initialization timeout.
        timeout_ms: u64,
        /// Number of partitions still behind their construction-time end offset.
        pending_partitions: usize,
    },

    /// The log transport reported an error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A feature state could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Invalid repository configuration.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Required configuration key is missing.
    #[error("missing required config: {0}")]
    MissingConfig(String),

    /// The repository has been closed.
    #[error("repository closed")]
    Closed,

    /// An internal error that doesn't fit other categories.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors reported by a [`LogTransport`](crate::transport::LogTransport).
///
/// Transports never retry on their own; retry policy belongs to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Failed to connect to or create a client for the log.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The topic does not exist.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// The log did not accept a published record.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Fetching records failed.
    #[error("poll failed: {0}")]
    PollFailed(String),

    /// Fetching partition metadata or watermarks failed.
    #[error("metadata request failed: {0}")]
    MetadataFailed(String),

    /// Operation timed out.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// The transport handle has been closed.
    #[error("transport closed")]
    Closed,
}

/// Errors that occur while encoding or decoding a feature-state payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// JSON parsing or encoding error.
    #[error("JSON error: {0}")]
    Json(String),

    /// A required field is missing or empty.
    #[error("missing field: {0}")]
    MissingField(String),

    /// The payload is malformed.
    #[error("malformed input: {0}")]
    MalformedInput(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization_timeout_display() {
        let err = RepositoryError::InitializationTimeout {
            timeout_ms: 1000,
            pending_partitions: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("1000ms"));
        assert!(msg.contains("3 partition(s)"));
    }

    #[test]
    fn test_transport_error_into_repository_error() {
        let err: RepositoryError = TransportError::PublishFailed("broker down".into()).into();
        assert!(matches!(err, RepositoryError::Transport(_)));
        assert!(err.to_string().contains("broker down"));
    }

    #[test]
    fn test_codec_error_from_json() {
        let json_err: Result<serde_json::Value, _> = serde_json::from_str("{bad json");
        let codec_err: CodecError = json_err.unwrap_err().into();
        assert!(matches!(codec_err, CodecError::Json(_)));
    }

    #[test]
    fn test_codec_error_into_repository_error() {
        let err: RepositoryError = CodecError::MissingField("feature".into()).into();
        assert!(matches!(err, RepositoryError::Codec(_)));
        assert!(err.to_string().contains("feature"));
    }

    #[test]
    fn test_transport_timeout_display() {
        assert_eq!(TransportError::Timeout(250).to_string(), "timeout after 250ms");
    }
}
