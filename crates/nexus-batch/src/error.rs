//! Error types for the Nexus batch writer

use thiserror::Error;

/// Result type alias using the batch writer's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while bulk-loading a record store
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from storage operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LMDB/heed database errors (catalog)
    #[error("Database error: {0}")]
    Database(#[from] heed::Error),

    /// Store cannot be opened or extended
    #[error("Storage error: {0}")]
    Storage(String),

    /// Catalog errors (type/key mappings)
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// A mutation named a node or relationship that does not exist
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Node or relationship not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Property value that has no on-disk encoding
    #[error("Unsupported property value: {0}")]
    UnsupportedValue(String),

    /// A record or chain read back from disk violates the store format
    #[error("Store corruption: {0}")]
    Corruption(String),

    /// Operation attempted after `shutdown()`
    #[error("Batch inserter has been shut down")]
    Closed,

    /// A single-relationship lookup matched more than one relationship
    #[error("More than one relationship: {0}")]
    AmbiguousRelationship(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid-reference error
    pub fn invalid_reference(msg: impl Into<String>) -> Self {
        Self::InvalidReference(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an unsupported-value error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedValue(msg.into())
    }

    /// Create a corruption error
    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }

    /// Whether this error reports a damaged store rather than a bad request
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }
}
