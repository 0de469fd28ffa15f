//! Phase status records in the `migrationstatuses` collection

use crate::error::MigrateError;
use crate::loader::LoadStats;
use crate::models::{self, MIGRATION_STATUSES};
use anne_core::{object, Document, DocumentStore, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PhaseStatus {
    InProgress,
    Completed,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseStatus::InProgress => "inProgress",
            PhaseStatus::Completed => "completed",
            PhaseStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "inProgress" => Some(PhaseStatus::InProgress),
            "completed" => Some(PhaseStatus::Completed),
            "failed" => Some(PhaseStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One phase's status record as read back from the store
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    pub phase: String,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub details: LoadStats,
    pub error: Option<String>,
}

/// Writes one record per phase, keyed by phase name
pub struct StatusStore<'a> {
    store: &'a dyn DocumentStore,
}

impl<'a> StatusStore<'a> {
    pub fn new(store: &'a dyn DocumentStore) -> Self {
        Self { store }
    }

    pub async fn mark_in_progress(
        &self,
        phase: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), MigrateError> {
        let doc = Document::new()
            .field("phase", phase)
            .field("status", PhaseStatus::InProgress.as_str())
            .field("startedAt", started_at)
            .field("completedAt", Value::Null)
            .field("details", details(&LoadStats::default()))
            .field("error", Value::Null);
        self.write(doc).await
    }

    /// Record the outcome of a phase. `error` marks it failed.
    pub async fn mark_finished(
        &self,
        phase: &str,
        started_at: DateTime<Utc>,
        stats: &LoadStats,
        error: Option<String>,
    ) -> Result<(), MigrateError> {
        let completed_at = Utc::now();
        let status = if error.is_some() {
            PhaseStatus::Failed
        } else {
            PhaseStatus::Completed
        };
        let doc = Document::new()
            .field("phase", phase)
            .field("status", status.as_str())
            .field("startedAt", started_at)
            .field("completedAt", completed_at)
            .field(
                "durationMs",
                (completed_at - started_at).num_milliseconds(),
            )
            .field("details", details(stats))
            .field("error", error);
        self.write(doc).await
    }

    pub async fn get(&self, phase: &str) -> Result<Option<StatusRecord>, MigrateError> {
        let found = self
            .store
            .find_one(MIGRATION_STATUSES, "phase", &Value::from(phase))
            .await?;
        Ok(found.and_then(|doc| record(&doc)))
    }

    async fn write(&self, doc: Document) -> Result<(), MigrateError> {
        let schema = models::migration_statuses();
        schema
            .validate(&doc)
            .map_err(|e| MigrateError::Status(e.to_string()))?;
        self.store.upsert_by(MIGRATION_STATUSES, "phase", doc).await?;
        Ok(())
    }
}

fn details(stats: &LoadStats) -> Value {
    object([
        ("processed", Value::from(stats.processed as i64)),
        ("succeeded", Value::from(stats.succeeded as i64)),
        ("failed", Value::from(stats.failed as i64)),
        ("skipped", Value::from(stats.skipped as i64)),
        ("batchSize", Value::from(stats.batch_size as i64)),
        ("lastBatchSize", Value::from(stats.last_batch_size as i64)),
        ("totalBatches", Value::from(stats.total_batches as i64)),
    ])
}

fn record(doc: &Document) -> Option<StatusRecord> {
    let date = |key: &str| match doc.get(key) {
        Some(Value::DateTime(dt)) => Some(*dt),
        _ => None,
    };
    let detail = |key: &str| {
        doc.get_by_path(&format!("details.{key}"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    };

    Some(StatusRecord {
        phase: doc.get("phase")?.as_str()?.to_string(),
        status: PhaseStatus::parse(doc.get("status")?.as_str()?)?,
        started_at: date("startedAt"),
        completed_at: date("completedAt"),
        duration_ms: doc.get("durationMs").and_then(Value::as_i64),
        details: LoadStats {
            processed: detail("processed") as u64,
            succeeded: detail("succeeded") as u64,
            failed: detail("failed") as u64,
            skipped: detail("skipped") as u64,
            batch_size: detail("batchSize") as usize,
            last_batch_size: detail("lastBatchSize") as usize,
            total_batches: detail("totalBatches") as u64,
        },
        error: doc.get("error").and_then(Value::as_str).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anne_core::LocalStore;

    #[tokio::test]
    async fn test_status_lifecycle() {
        let store = LocalStore::in_memory();
        let statuses = StatusStore::new(&store);
        let started = Utc::now();

        statuses.mark_in_progress("phase1", started).await.unwrap();
        let record = statuses.get("phase1").await.unwrap().unwrap();
        assert_eq!(record.status, PhaseStatus::InProgress);
        assert!(record.completed_at.is_none());

        let stats = LoadStats {
            processed: 12,
            succeeded: 11,
            failed: 1,
            batch_size: 100,
            last_batch_size: 12,
            total_batches: 1,
            ..LoadStats::default()
        };
        statuses
            .mark_finished("phase1", started, &stats, None)
            .await
            .unwrap();

        let record = statuses.get("phase1").await.unwrap().unwrap();
        assert_eq!(record.status, PhaseStatus::Completed);
        assert_eq!(record.details, stats);
        assert!(record.duration_ms.unwrap() >= 0);
        assert_eq!(store.count(MIGRATION_STATUSES).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_status_keeps_error() {
        let store = LocalStore::in_memory();
        let statuses = StatusStore::new(&store);
        let started = Utc::now();

        statuses.mark_in_progress("phase3", started).await.unwrap();
        statuses
            .mark_finished(
                "phase3",
                started,
                &LoadStats::default(),
                Some("customers count mismatch".to_string()),
            )
            .await
            .unwrap();

        let record = statuses.get("phase3").await.unwrap().unwrap();
        assert_eq!(record.status, PhaseStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("customers count mismatch"));
        assert!(statuses.get("phase4").await.unwrap().is_none());
    }
}
