//! Error types for the OCI client.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from OCI API calls and credential resolution.
#[derive(Debug, Error)]
pub enum OciError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The service answered with a non-2xx status.
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config profile: {0}")]
    Config(String),

    #[error("Invalid private key: {0}")]
    Key(String),

    #[error("Instance identity unavailable: {0}")]
    Identity(String),

    #[error("Federation failed: {0}")]
    Federation(String),

    #[error("Request signing failed: {0}")]
    Signing(String),
}

/// Error body returned by OCI services.
///
/// Rendered with both the code and the message so callers matching on the
/// display string see the same text the provider sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Error returned by {service} service. Http status code: {status}. Error code: {code}. \
     Opc request id: {opc_request_id}. Message: {message}"
)]
pub struct ServiceError {
    /// Service that produced the error (e.g. "Compute").
    pub service: String,

    /// HTTP status code.
    pub status: u16,

    /// Provider error code (e.g. "LimitExceeded", "InternalError").
    pub code: String,

    /// Human-readable message.
    pub message: String,

    /// Request id assigned by the provider, for support tickets.
    pub opc_request_id: String,
}

impl ServiceError {
    /// Returns true when the provider reported the given error code.
    pub fn has_code(&self, code: &str) -> bool {
        self.code == code
    }
}
