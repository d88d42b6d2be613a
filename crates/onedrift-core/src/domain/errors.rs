//! Domain error types

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid item identifier
    #[error("Invalid item ID: {0}")]
    InvalidItemId(String),

    /// Invalid email address format
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    /// Unknown drive type keyword
    #[error("Invalid drive type: {0}")]
    InvalidDriveType(String),

    /// Malformed canonical drive identifier
    #[error("Invalid canonical drive ID: {0}")]
    InvalidCanonicalId(String),

    /// Invalid content hash format (expected quickXorHash Base64)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Unknown item type keyword
    #[error("Invalid item type: {0}")]
    InvalidItemType(String),

    /// Unknown conflict kind / resolution keyword
    #[error("Invalid conflict field: {0}")]
    InvalidConflictField(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
