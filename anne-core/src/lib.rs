//! Anne core: document model, collection schemas and destination stores
//!
//! Shared by the migration tool and anything else that needs to read or write
//! the migrated collections.

pub mod config;
pub mod document;
pub mod logging;
pub mod schema;
pub mod storage;

pub use config::{DestinationKind, MigrationConfig, SourceKind};
pub use document::{object, Document, DocumentError, ObjectId, Value};
pub use logging::{init_logging, LoggingConfig, MigrationLog};
pub use schema::{FieldDefinition, FieldType, IndexDefinition, Schema, SchemaError, ValidationError};
pub use storage::{DocumentStore, InsertManyOutcome, LocalStore, StorageError, WriteError};

#[cfg(feature = "mongo-sink")]
pub use storage::MongoStore;
