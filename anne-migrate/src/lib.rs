//! Anne migration library
//!
//! Moves the legacy OpenCart store into the Anne document store in six
//! dependency-ordered phases. Source ids are translated to destination ids
//! through an in-memory mapping table, and each phase is verified against the
//! source before the next one may start.

pub mod check;
pub mod context;
pub mod entities;
pub mod error;
pub mod loader;
pub mod mapping;
pub mod models;
pub mod phases;
pub mod source;
pub mod status;
pub mod validation;

pub use check::{run_check, CheckReport};
pub use context::{DefaultLanguage, MigrationContext};
pub use entities::{EmailAssigner, Entity};
pub use error::{MigrateError, RowError, SourceError};
pub use loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
pub use mapping::{EntityKind, MappingTable};
pub use phases::{format_duration, validate_plan, Migrator, Phase, PhaseOutcome};
pub use source::{DumpSource, SourceRow, SourceStore};
pub use status::{PhaseStatus, StatusRecord, StatusStore};
pub use validation::{Verifier, VerificationReport};
