//! Source backed by JSON table dumps
//!
//! A dump directory holds one `<prefix><table>.json` file per table, each an
//! array of row objects. Used to rehearse a migration offline.

use super::{sort_rows, validate_identifier, SourceRow, SourceStore, TABLES};
use crate::error::SourceError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// In-memory copy of the legacy tables
#[derive(Debug, Clone, Default)]
pub struct DumpSource {
    prefix: String,
    origin: String,
    tables: HashMap<String, Vec<SourceRow>>,
}

impl DumpSource {
    /// Empty source with no tables
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            origin: "memory".to_string(),
            tables: HashMap::new(),
        }
    }

    /// Load every known table present in `dir`
    pub fn open(dir: &Path, prefix: &str) -> Result<Self, SourceError> {
        let mut source = Self {
            prefix: prefix.to_string(),
            origin: dir.display().to_string(),
            tables: HashMap::new(),
        };

        for table in TABLES {
            let path = dir.join(format!("{prefix}{table}.json"));
            if !path.exists() {
                debug!("No dump for table {}{}", prefix, table);
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|e| SourceError::Dump {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let rows: Vec<SourceRow> = serde_json::from_str(&raw).map_err(|e| SourceError::Dump {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            source.tables.insert(table.to_string(), rows);
        }

        info!(
            "Loaded {} tables from dump {}",
            source.tables.len(),
            source.origin
        );
        Ok(source)
    }

    /// Register (or replace) a table
    pub fn with_table(mut self, table: &str, rows: Vec<SourceRow>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    /// Register every known table as empty
    pub fn with_empty_tables(mut self) -> Self {
        for table in TABLES {
            self.tables.entry(table.to_string()).or_default();
        }
        self
    }

    fn rows(&self, table: &str) -> Result<&Vec<SourceRow>, SourceError> {
        validate_identifier(table)?;
        self.tables
            .get(table)
            .ok_or_else(|| SourceError::TableNotFound(self.table_name(table)))
    }
}

#[async_trait]
impl SourceStore for DumpSource {
    fn describe(&self) -> String {
        format!("dump:{}", self.origin)
    }

    fn table_name(&self, table: &str) -> String {
        format!("{}{}", self.prefix, table)
    }

    async fn select_all(
        &self,
        table: &str,
        order_by: &[&str],
    ) -> Result<Vec<SourceRow>, SourceError> {
        for column in order_by {
            validate_identifier(column)?;
        }
        let mut rows = self.rows(table)?.clone();
        sort_rows(&mut rows, order_by);
        Ok(rows)
    }

    async fn count(&self, table: &str) -> Result<u64, SourceError> {
        Ok(self.rows(table)?.len() as u64)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, SourceError> {
        validate_identifier(table)?;
        Ok(self.tables.contains_key(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_dump_directory() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("oc_country.json"),
            r#"[{"country_id": 2, "name": "Turkey"}, {"country_id": 1, "name": "Iran"}]"#,
        )
        .unwrap();

        let source = DumpSource::open(temp_dir.path(), "oc_").unwrap();
        assert!(source.table_exists("country").await.unwrap());
        assert!(!source.table_exists("zone").await.unwrap());
        assert_eq!(source.count("country").await.unwrap(), 2);

        let rows = source.select_all("country", &["country_id"]).await.unwrap();
        assert_eq!(rows[0].text("name"), "Iran");
        assert!(matches!(
            source.select_all("zone", &["zone_id"]).await,
            Err(SourceError::TableNotFound(name)) if name == "oc_zone"
        ));
    }

    #[tokio::test]
    async fn test_bad_dump_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("oc_zone.json"), "{not json").unwrap();

        let err = DumpSource::open(temp_dir.path(), "oc_").unwrap_err();
        assert!(matches!(err, SourceError::Dump { path, .. } if path.ends_with("oc_zone.json")));
    }
}
