//! Error types for triage.

use thiserror::Error;

/// Result type alias using triage's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for triage operations.
///
/// Variants fall into three policy classes that the queue scheduler acts on:
/// configuration problems skip a whole sweep, retryable classifier problems
/// count against a capture's retry budget, and storage problems leave the
/// capture in its pre-attempt state.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Persistence collaborator failed outside of sqlx (e.g. constraint in memory store)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Capture not found
    #[error("Capture not found: {0}")]
    CaptureNotFound(uuid::Uuid),

    /// Classifier has no credential; nothing can be classified
    #[error("Classifier not configured: {0}")]
    ConfigurationMissing(String),

    /// Classifier answered with something that is not a usable classification
    #[error("Invalid classifier response: {0}")]
    InvalidResponse(String),

    /// Transport-level failure reaching the classifier (connect, timeout)
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Classifier service reported a transient error (rate limit, 5xx)
    #[error("Inference error: {0}")]
    Inference(String),

    /// Classifier refused the request in a way a retry will not fix
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Capture status change not allowed by the lifecycle
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a later attempt at the same capture may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::InvalidResponse(_) | Error::NetworkUnavailable(_) | Error::Inference(_)
        )
    }

    /// Whether the failure came from the persistence layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Storage(_))
    }

    pub fn is_configuration_missing(&self) -> bool {
        matches!(self, Error::ConfigurationMissing(_))
    }

    /// Whether the failure indicates lost connectivity to the classifier.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::NetworkUnavailable(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::NetworkUnavailable(e.to_string())
        } else if e.is_decode() {
            Error::InvalidResponse(e.to_string())
        } else {
            Error::Inference(e.to_string())
        }
    }
}
