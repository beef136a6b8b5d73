//! Error types for the sync core

use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Sync error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No connectivity, checked before a request is attempted
    #[error("Not connected")]
    NotConnected,

    /// Bearer token missing or rejected by the backend
    #[error("Credential missing or invalid: {0}")]
    CredentialMissing(String),

    /// Request could not be built or was rejected as malformed
    #[error("Malformed request: {0}")]
    RequestMalformed(String),

    /// Server or transport failure
    #[error("Server error{}: {message}", status_suffix(.status))]
    Server { status: Option<u16>, message: String },

    /// Response or stored record could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Lookup matched nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local store failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" {}", s)).unwrap_or_default()
}

impl SyncError {
    /// Transport/server and store failures are retried at the next flush or
    /// reconciliation pass. Everything else is reported and left alone.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Server { .. } | SyncError::Persistence(_))
    }

    pub fn server(message: impl Into<String>) -> Self {
        SyncError::Server {
            status: None,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

impl From<sled::Error> for SyncError {
    fn from(err: sled::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for SyncError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SyncError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        SyncError::Decode(err.to_string())
    }
}

#[cfg(feature = "client")]
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Decode(err.to_string())
        } else if err.is_builder() {
            SyncError::RequestMalformed(err.to_string())
        } else {
            SyncError::Server {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(SyncError::server("boom").is_retryable());
        assert!(SyncError::Persistence("disk".into()).is_retryable());
        assert!(!SyncError::NotConnected.is_retryable());
        assert!(!SyncError::Decode("bad".into()).is_retryable());
        assert!(!SyncError::RequestMalformed("bad".into()).is_retryable());
        assert!(!SyncError::CredentialMissing("token".into()).is_retryable());
    }

    #[test]
    fn test_server_display() {
        let err = SyncError::Server {
            status: Some(503),
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "Server error 503: unavailable");
        assert_eq!(SyncError::server("reset").to_string(), "Server error: reset");
    }
}
