//! # Storage Errors
//!
//! Error types for the in-memory record store.

use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    // ==================
    // Namespace Errors
    // ==================
    /// Namespace does not exist
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Namespace already exists
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    // ==================
    // Document Errors
    // ==================
    /// Document is not a JSON object or carries an unusable `_id`
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// `_id` already present in the collection
    #[error("Duplicate key in {namespace}: _id {id}")]
    DuplicateKey { namespace: String, id: String },

    /// Capped collections only lose records by overwrite
    #[error("Cannot remove from capped collection: {0}")]
    CappedRemove(String),

    // ==================
    // Index Errors
    // ==================
    /// No index with that name
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// The primary key index cannot be dropped
    #[error("Cannot drop the _id index of {0}")]
    IdIndexDrop(String),

    // ==================
    // Internal Errors
    // ==================
    /// A lock holder panicked
    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Error code string in AERO_* form
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::CollectionNotFound(_) => "AERO_STORAGE_COLLECTION_NOT_FOUND",
            StorageError::CollectionExists(_) => "AERO_STORAGE_COLLECTION_EXISTS",
            StorageError::InvalidDocument(_) => "AERO_STORAGE_INVALID_DOCUMENT",
            StorageError::DuplicateKey { .. } => "AERO_STORAGE_DUPLICATE_KEY",
            StorageError::CappedRemove(_) => "AERO_STORAGE_CAPPED_REMOVE",
            StorageError::IndexNotFound(_) => "AERO_STORAGE_INDEX_NOT_FOUND",
            StorageError::IdIndexDrop(_) => "AERO_STORAGE_ID_INDEX_DROP",
            StorageError::LockPoisoned => "AERO_STORAGE_LOCK_POISONED",
        }
    }
}
