//! Error types for the migration pipeline

use anne_core::StorageError;
use thiserror::Error;

/// Failures reading the legacy store
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to connect to source: {0}")]
    Connection(String),

    #[error("Query on {table} failed: {reason}")]
    Query { table: String, reason: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Failed to read dump {path}: {reason}")]
    Dump { path: String, reason: String },
}

/// Failure transforming a single source row. Counted and logged, never fatal.
#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("invalid value in '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("document rejected by schema: {0}")]
    Schema(String),
}

/// Phase-level failures. These stop the phase and mark it failed.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Default language '{0}' has not been migrated")]
    MissingDefaultLanguage(String),

    #[error("{entity} count mismatch: source {source_count}, destination {destination_count}")]
    CountMismatch {
        entity: String,
        source_count: u64,
        destination_count: u64,
    },

    #[error(
        "Wishlist success rate {rate:.1}% is below {threshold:.1}% ({migrated} of {source_count} items)"
    )]
    WishlistBelowThreshold {
        migrated: u64,
        source_count: u64,
        rate: f64,
        threshold: f64,
    },

    #[error("Invalid phase plan: {0}")]
    Plan(String),

    #[error("Invalid status record: {0}")]
    Status(String),
}
