//! Shared primitives for all Rust crates in Bastion.

#![forbid(unsafe_code)]

/// Explicit per-request context threaded from the request boundary.
pub mod context;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use context::RequestContext;

/// Result type used across Bastion crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Access policy predicate failed for the principal.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Audit capture failed inside the host transaction.
    #[error("audit capture failed: {0}")]
    AuditCaptureFailed(String),

    /// Partition range collides with an existing partition.
    #[error("partition conflict: {0}")]
    PartitionConflict(String),

    /// Referenced encryption key version does not exist.
    #[error("encryption key not found: {0}")]
    KeyNotFound(String),

    /// Ciphertext could not be opened with the referenced key.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Backup artifacts do not cover the recorded manifest.
    #[error("backup verification failed: {0}")]
    BackupVerificationFailed(String),

    /// Operation was cancelled before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns whether retrying the same operation may succeed.
    ///
    /// Only transient infrastructure failures qualify. Key, ciphertext, policy
    /// and audit errors are deterministic for the same inputs.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}
