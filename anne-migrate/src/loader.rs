//! Batch loader shared by every entity
//!
//! Each entity load follows the same template: clear the collection, drop its
//! indexes, transform rows one at a time, insert in unordered batches, then
//! rebuild the indexes whatever happened. Row and batch failures are counted
//! and logged, never raised.

use crate::error::{MigrateError, RowError};
use crate::mapping::{EntityKind, MappingTable, ProposedMapping};
use anne_core::{Document, DocumentStore, MigrationLog, ObjectId, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Counters for one entity load, or aggregated over a phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub batch_size: usize,
    pub last_batch_size: usize,
    pub total_batches: u64,
}

impl LoadStats {
    /// Fold another load into this total
    pub fn merge(&mut self, other: &LoadStats) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.total_batches += other.total_batches;
        if other.total_batches > 0 {
            self.last_batch_size = other.last_batch_size;
        }
        self.batch_size = self.batch_size.max(other.batch_size);
    }
}

/// A document built from one source row, plus the mappings to record once
/// the document is stored
#[derive(Debug, Clone)]
pub struct Transformed {
    pub document: Document,
    pub mappings: Vec<ProposedMapping>,
}

impl Transformed {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            mappings: Vec::new(),
        }
    }

    /// Map `source_id` of `kind` to this document's id
    pub fn maps(mut self, kind: EntityKind, source_id: i64) -> Self {
        let id = self.document.id;
        self.mappings.push(ProposedMapping::new(kind, source_id, id));
        self
    }

    /// Map an embedded document id
    pub fn maps_embedded(mut self, kind: EntityKind, source_id: i64, id: ObjectId) -> Self {
        self.mappings.push(ProposedMapping::new(kind, source_id, id));
        self
    }
}

/// What a transform decided for one row
#[derive(Debug)]
pub enum RowOutcome {
    Insert(Transformed),
    /// Row intentionally not migrated, with the reason
    Skip(String),
}

/// Loads one entity into its collection
pub struct BatchLoader<'a> {
    store: &'a dyn DocumentStore,
    schema: &'a Schema,
    log: &'a MigrationLog,
    batch_size: usize,
}

impl<'a> BatchLoader<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        schema: &'a Schema,
        log: &'a MigrationLog,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            schema,
            log,
            batch_size: batch_size.max(1),
        }
    }

    /// Run the load. `items` pairs each row's source id with its payload and
    /// should be ordered by that id. Only a failure to clear the collection
    /// is returned as an error.
    pub async fn run<T, F>(
        &self,
        mappings: &mut MappingTable,
        items: Vec<(i64, T)>,
        mut transform: F,
    ) -> Result<LoadStats, MigrateError>
    where
        F: FnMut(&MappingTable, i64, &T) -> Result<RowOutcome, RowError>,
    {
        let collection = self.schema.collection.as_str();
        let total = items.len();
        let mut stats = LoadStats {
            batch_size: self.batch_size,
            ..LoadStats::default()
        };

        self.log.info(format!("Starting {collection} migration: {total} rows"));
        let cleared = self.store.clear_collection(collection).await?;
        if cleared > 0 {
            self.log.info(format!("Cleared {cleared} existing documents"));
        }
        if let Err(e) = self.store.drop_indexes(collection).await {
            self.log.warn(format!("Failed to drop indexes: {e}"));
        }

        let mut batch: Vec<Transformed> = Vec::with_capacity(self.batch_size);
        for (source_id, item) in &items {
            stats.processed += 1;

            match transform(mappings, *source_id, item) {
                Ok(RowOutcome::Insert(mut transformed)) => {
                    self.schema.apply_defaults(&mut transformed.document);
                    match self.schema.validate(&transformed.document) {
                        Ok(()) => batch.push(transformed),
                        Err(e) => {
                            stats.failed += 1;
                            self.log.error(format!(
                                "Row {source_id}: {}",
                                RowError::Schema(e.to_string())
                            ));
                        }
                    }
                }
                Ok(RowOutcome::Skip(reason)) => {
                    stats.skipped += 1;
                    self.log.warn(format!("Row {source_id} skipped: {reason}"));
                }
                Err(e) => {
                    stats.failed += 1;
                    self.log.error(format!("Row {source_id}: {e}"));
                }
            }

            if batch.len() >= self.batch_size {
                self.flush(mappings, &mut batch, &mut stats, total).await;
            }
        }
        if !batch.is_empty() {
            self.flush(mappings, &mut batch, &mut stats, total).await;
        }

        if let Err(e) = self
            .store
            .create_indexes(collection, &self.schema.indexes)
            .await
        {
            self.log.error(format!("Failed to rebuild indexes: {e}"));
        }

        self.log.info(format!(
            "Finished {collection}: processed {}, succeeded {}, failed {}, skipped {}",
            stats.processed, stats.succeeded, stats.failed, stats.skipped
        ));
        Ok(stats)
    }

    async fn flush(
        &self,
        mappings: &mut MappingTable,
        batch: &mut Vec<Transformed>,
        stats: &mut LoadStats,
        total: usize,
    ) {
        let collection = self.schema.collection.as_str();
        let pending = std::mem::take(batch);
        let size = pending.len();
        stats.total_batches += 1;
        stats.last_batch_size = size;
        let batch_no = stats.total_batches;

        let mut proposed = Vec::new();
        let mut documents = Vec::with_capacity(size);
        for transformed in pending {
            let parent = transformed.document.id;
            proposed.extend(transformed.mappings.into_iter().map(|m| (parent, m)));
            documents.push(transformed.document);
        }

        match self.store.insert_many(collection, documents).await {
            Ok(outcome) => {
                stats.succeeded += outcome.inserted_count() as u64;
                stats.failed += outcome.failed_count() as u64;
                for write_error in &outcome.write_errors {
                    self.log.error(format!(
                        "Batch {batch_no}: document {} rejected: {}",
                        write_error.id, write_error.message
                    ));
                }

                // Embedded ids are committed with their parent document
                let inserted: HashSet<ObjectId> = outcome.inserted.iter().copied().collect();
                for (parent, mapping) in proposed {
                    if inserted.contains(&parent) {
                        mappings.commit(mapping);
                    }
                }

                self.log
                    .info(format!("Progress: {}/{} documents", stats.succeeded, total));
            }
            Err(e) => {
                stats.failed += size as u64;
                self.log.error(format!("Batch {batch_no} failed: {e}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anne_core::{FieldDefinition, FieldType, IndexDefinition, LocalStore, Value};

    fn schema() -> Schema {
        Schema::new("countries")
            .with_field("legacyId", FieldDefinition::new(FieldType::Int64).required())
            .with_field("name", FieldDefinition::new(FieldType::string()).required())
            .with_index(IndexDefinition::single("legacyId").unique())
    }

    fn country(id: i64, name: &str) -> Transformed {
        Transformed::new(
            Document::new()
                .field("legacyId", id)
                .field("name", name),
        )
        .maps(EntityKind::Country, id)
    }

    #[tokio::test]
    async fn test_row_errors_and_skips_are_isolated() {
        let store = LocalStore::in_memory();
        let schema = schema();
        let log = MigrationLog::console("countries");
        let mut mappings = MappingTable::new();

        let items: Vec<(i64, &str)> = (1..=5).map(|i| (i, "row")).collect();
        let stats = BatchLoader::new(&store, &schema, &log, 2)
            .run(&mut mappings, items, |_, id, _| match id {
                2 => Err(RowError::MissingColumn("name".to_string())),
                4 => Ok(RowOutcome::Skip("no country".to_string())),
                _ => Ok(RowOutcome::Insert(country(id, "Iran"))),
            })
            .await
            .unwrap();

        assert_eq!(stats.processed, 5);
        assert_eq!(stats.succeeded, 3);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.total_batches, 2);
        assert_eq!(stats.last_batch_size, 1);
        assert_eq!(store.count("countries").await.unwrap(), 3);
        assert_eq!(mappings.len(EntityKind::Country), 3);
        assert!(mappings.get(EntityKind::Country, 2).is_none());
    }

    #[tokio::test]
    async fn test_schema_violation_counts_as_failed() {
        let store = LocalStore::in_memory();
        let schema = schema();
        let log = MigrationLog::console("countries");
        let mut mappings = MappingTable::new();

        let stats = BatchLoader::new(&store, &schema, &log, 100)
            .run(&mut mappings, vec![(1, ())], |_, id, _| {
                Ok(RowOutcome::Insert(Transformed::new(
                    Document::new().field("legacyId", id),
                )))
            })
            .await
            .unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 0);
        assert_eq!(stats.total_batches, 0);
    }

    #[tokio::test]
    async fn test_rejected_documents_leave_no_mapping() {
        let store = LocalStore::in_memory();
        let schema = schema();
        let log = MigrationLog::console("countries");
        let mut mappings = MappingTable::new();

        // The store refuses documents nested deeper than it allows
        let mut too_deep = Value::Null;
        for _ in 0..20 {
            too_deep = Value::Array(vec![too_deep]);
        }

        let stats = BatchLoader::new(&store, &schema, &log, 100)
            .run(&mut mappings, vec![(1, ()), (2, ()), (3, ())], |_, id, _| {
                let mut transformed = country(id, "Iran");
                if id == 2 {
                    transformed.document.insert("blob", too_deep.clone());
                }
                Ok(RowOutcome::Insert(transformed))
            })
            .await
            .unwrap();

        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert!(mappings.get(EntityKind::Country, 1).is_some());
        assert!(mappings.get(EntityKind::Country, 2).is_none());
        assert!(mappings.get(EntityKind::Country, 3).is_some());
    }

    #[tokio::test]
    async fn test_reload_clears_previous_documents_and_rebuilds_indexes() {
        let store = LocalStore::in_memory();
        let schema = schema();
        let log = MigrationLog::console("countries");

        for _ in 0..2 {
            let mut mappings = MappingTable::new();
            BatchLoader::new(&store, &schema, &log, 100)
                .run(&mut mappings, vec![(1, ()), (2, ())], |_, id, _| {
                    Ok(RowOutcome::Insert(country(id, "Iran")))
                })
                .await
                .unwrap();
        }

        assert_eq!(store.count("countries").await.unwrap(), 2);
        assert_eq!(store.indexes("countries").len(), 1);
    }

    #[test]
    fn test_merge_stats() {
        let mut total = LoadStats::default();
        total.merge(&LoadStats {
            processed: 10,
            succeeded: 9,
            failed: 1,
            skipped: 0,
            batch_size: 100,
            last_batch_size: 10,
            total_batches: 1,
        });
        total.merge(&LoadStats {
            processed: 3,
            succeeded: 2,
            failed: 0,
            skipped: 1,
            batch_size: 100,
            last_batch_size: 2,
            total_batches: 1,
        });

        assert_eq!(total.processed, 13);
        assert_eq!(total.succeeded, 11);
        assert_eq!(total.skipped, 1);
        assert_eq!(total.total_batches, 2);
        assert_eq!(total.last_batch_size, 2);
    }
}
