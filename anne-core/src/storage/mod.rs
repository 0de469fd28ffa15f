//! Destination document stores
//!
//! The migration only needs a narrow slice of a document database: clearing a
//! collection, dropping and rebuilding its indexes, unordered bulk inserts,
//! counts and scans, plus a keyed upsert for phase status records.

pub mod collection;
pub mod local;
#[cfg(feature = "mongo-sink")]
pub mod mongo;

pub use collection::Collection;
pub use local::LocalStore;
#[cfg(feature = "mongo-sink")]
pub use mongo::MongoStore;

use crate::document::{Document, ObjectId, Value};
use crate::schema::IndexDefinition;
use async_trait::async_trait;

/// Per-document failure inside an unordered bulk insert
#[derive(Debug, Clone, PartialEq)]
pub struct WriteError {
    /// Position of the document in the attempted batch
    pub index: usize,
    /// Id of the rejected document
    pub id: ObjectId,
    pub message: String,
}

/// Result of an unordered bulk insert that reached the store
#[derive(Debug, Clone, Default)]
pub struct InsertManyOutcome {
    /// Ids of documents that were written
    pub inserted: Vec<ObjectId>,
    /// Documents rejected individually (duplicate keys, validation)
    pub write_errors: Vec<WriteError>,
}

impl InsertManyOutcome {
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn failed_count(&self) -> usize {
        self.write_errors.len()
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Index build failed on {collection}.{index}: {reason}")]
    IndexBuild {
        collection: String,
        index: String,
        reason: String,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Persistence(e.to_string())
    }
}

/// Destination store used by the loaders, the verifier and the status store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Delete every document in a collection, returning how many were removed
    async fn clear_collection(&self, collection: &str) -> Result<u64, StorageError>;

    /// Drop all secondary indexes of a collection
    async fn drop_indexes(&self, collection: &str) -> Result<(), StorageError>;

    /// Build indexes over the documents currently stored
    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexDefinition],
    ) -> Result<(), StorageError>;

    /// Unordered bulk insert. `Err` means the call itself failed and nothing
    /// can be assumed about the batch; per-document rejections are reported in
    /// the outcome.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyOutcome, StorageError>;

    /// Number of documents in a collection (0 for a missing collection)
    async fn count(&self, collection: &str) -> Result<u64, StorageError>;

    /// Sum of the lengths of an embedded array field across a collection
    async fn count_embedded(&self, collection: &str, array_field: &str)
        -> Result<u64, StorageError>;

    /// Every document of a collection, in insertion order
    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StorageError>;

    /// First document whose `field` equals `value`
    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, StorageError>;

    /// Replace the document whose `key_field` matches the given document's
    /// value (keeping the stored id), or insert it when none matches
    async fn upsert_by(
        &self,
        collection: &str,
        key_field: &str,
        document: Document,
    ) -> Result<(), StorageError>;
}
