//! Error types for Notary Service infrastructure

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the notary infrastructure
#[derive(Error, Debug)]
pub enum NotaryError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Audit log entry not found
    #[error("audit log entry not found: {0}")]
    AuditEntryNotFound(Uuid),

    /// Queued event not found (already acked or never enqueued)
    #[error("queued event not found: {0}")]
    QueuedEventNotFound(Uuid),

    /// Secret profile missing or disabled
    #[error("secret profile not found for user {0}")]
    SecretProfileNotFound(String),

    /// Credential hashing error
    #[error("credential hashing error: {0}")]
    CredentialHash(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid argument supplied by a caller
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for NotaryError {
    fn from(e: serde_json::Error) -> Self {
        NotaryError::Serialization(e.to_string())
    }
}

/// Result type for notary infrastructure operations
pub type Result<T> = std::result::Result<T, NotaryError>;
