//! Shared state threaded through every loader of a run

use crate::error::MigrateError;
use crate::mapping::{EntityKind, MappingTable};
use crate::models;
use crate::source::SourceStore;
use anne_core::config::{MigrationSettings, VerificationSettings};
use anne_core::{Document, DocumentStore, MigrationLog, ObjectId, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// The migrated default language
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultLanguage {
    pub source_id: i64,
    pub id: ObjectId,
    pub code: String,
}

pub struct MigrationContext {
    pub source: Arc<dyn SourceStore>,
    pub store: Arc<dyn DocumentStore>,
    pub mappings: MappingTable,
    pub settings: MigrationSettings,
    pub verification: VerificationSettings,
    write_log_files: bool,
}

impl MigrationContext {
    pub fn new(
        source: Arc<dyn SourceStore>,
        store: Arc<dyn DocumentStore>,
        settings: MigrationSettings,
        verification: VerificationSettings,
    ) -> Self {
        Self {
            source,
            store,
            mappings: MappingTable::new(),
            settings,
            verification,
            write_log_files: true,
        }
    }

    /// Log to `tracing` only, without creating log files
    pub fn without_log_files(mut self) -> Self {
        self.write_log_files = false;
        self
    }

    /// Log for one entity or phase, `<log_dir>/<name>.log`
    pub fn log(&self, name: &str) -> MigrationLog {
        if !self.write_log_files {
            return MigrationLog::console(name);
        }
        match MigrationLog::open(&self.settings.log_dir, name) {
            Ok(log) => log,
            Err(e) => {
                warn!("Cannot open log file for {}: {}, logging to console only", name, e);
                MigrationLog::console(name)
            }
        }
    }

    /// Resolve the configured default language. Missing is fatal for the phase.
    pub async fn default_language(&self) -> Result<DefaultLanguage, MigrateError> {
        let code = self.settings.default_language_code.clone();
        let rows = self.source.select_all("language", &["language_id"]).await?;

        let source_id = rows
            .iter()
            .find(|row| row.text("code").eq_ignore_ascii_case(&code))
            .and_then(|row| row.int("language_id").ok())
            .ok_or_else(|| MigrateError::MissingDefaultLanguage(code.clone()))?;

        let id = self
            .mappings
            .get(EntityKind::Language, source_id)
            .ok_or_else(|| MigrateError::MissingDefaultLanguage(code.clone()))?;

        Ok(DefaultLanguage {
            source_id,
            id,
            code,
        })
    }

    /// Rebuild a mapping from the `legacyId` fields stored in the destination
    pub async fn hydrate(&mut self, kind: EntityKind) -> Result<usize, MigrateError> {
        let entries = match kind {
            EntityKind::ProductOptionValue => {
                let products = self.store.find_all(models::PRODUCTS).await?;
                embedded_legacy_ids(&products, "options")
            }
            _ => {
                let documents = self.store.find_all(collection_for(kind)).await?;
                documents
                    .iter()
                    .filter_map(|doc| Some((doc.get(models::LEGACY_ID)?.as_i64()?, doc.id)))
                    .collect()
            }
        };

        let loaded = self.mappings.hydrate(kind, entries);
        info!("Hydrated {} mapping from destination: {} entries", kind, loaded);
        Ok(loaded)
    }
}

/// Collection whose documents carry the ids of `kind`
pub fn collection_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Country => models::COUNTRIES,
        EntityKind::Zone => models::ZONES,
        EntityKind::Language => models::LANGUAGES,
        EntityKind::ProductOption => models::PRODUCT_OPTIONS,
        EntityKind::Category => models::CATEGORIES,
        EntityKind::Customer => models::CUSTOMERS,
        EntityKind::Product | EntityKind::ProductOptionValue => models::PRODUCTS,
    }
}

fn embedded_legacy_ids(documents: &[Document], array_field: &str) -> Vec<(i64, ObjectId)> {
    documents
        .iter()
        .filter_map(|doc| doc.get(array_field).and_then(Value::as_array))
        .flatten()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let legacy = obj.get(models::LEGACY_ID)?.as_i64()?;
            let id = obj.get("_id")?.as_object_id()?;
            Some((legacy, id))
        })
        .collect()
}
