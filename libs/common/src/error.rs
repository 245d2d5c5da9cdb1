//! Custom error types for the common library
//!
//! This module defines the error taxonomy shared by every document store
//! implementation and by the services built on top of them.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for document store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error occurred while connecting to the backing database
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Error occurred during schema migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Store configuration error: {0}")]
    Configuration(String),

    /// The access rules refused the operation
    #[error("Permission denied on {path}")]
    PermissionDenied { path: String },

    /// The addressed document does not exist
    #[error("Document not found: {path}")]
    NotFound { path: String },

    /// A stored document does not match the expected record shape
    #[error("Malformed document {path}: {reason}")]
    Malformed { path: String, reason: String },

    /// The store or its change feed is not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Error reported by the Redis cache
    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

impl StoreError {
    /// Whether the access rules refused the operation
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, StoreError::PermissionDenied { .. })
    }

    /// Whether the addressed document was missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub(crate) fn denied(path: impl Into<String>) -> Self {
        StoreError::PermissionDenied { path: path.into() }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        StoreError::NotFound { path: path.into() }
    }
}

/// Type alias for Result with StoreError
pub type StoreResult<T> = Result<T, StoreError>;
