//! Pre-flight check: target schemas and source tables. Never writes.

use crate::error::MigrateError;
use crate::models;
use crate::source::{SourceStore, TABLES};
use tracing::{info, warn};

/// Presence and size of one source table
#[derive(Debug, Clone, PartialEq)]
pub struct TableReport {
    pub table: String,
    /// `None` when the table does not exist
    pub rows: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub schema_errors: Vec<String>,
    pub tables: Vec<TableReport>,
}

impl CheckReport {
    /// Schemas are consistent. Missing tables are reported but do not fail
    /// the check.
    pub fn passed(&self) -> bool {
        self.schema_errors.is_empty()
    }

    pub fn missing_tables(&self) -> impl Iterator<Item = &TableReport> {
        self.tables.iter().filter(|t| t.rows.is_none())
    }

    pub fn print(&self) {
        println!("\n=== Migration Check ===");
        println!("Schemas: {}", if self.schema_errors.is_empty() { "ok" } else { "INVALID" });
        for error in &self.schema_errors {
            println!("  {error}");
        }
        println!("Source tables:");
        for table in &self.tables {
            match table.rows {
                Some(rows) => println!("  {:<32} {:>10}", table.table, rows),
                None => println!("  {:<32} {:>10}", table.table, "missing"),
            }
        }
        println!("=======================\n");
    }
}

pub async fn run_check(source: &dyn SourceStore) -> Result<CheckReport, MigrateError> {
    let mut report = CheckReport::default();

    for schema in models::all_schemas() {
        match schema.check_consistency() {
            Ok(()) => info!("Schema {} ok", schema.collection),
            Err(e) => report.schema_errors.push(e.to_string()),
        }
    }

    info!("Checking source {}", source.describe());
    for table in TABLES {
        let name = source.table_name(table);
        let rows = if source.table_exists(table).await? {
            Some(source.count(table).await?)
        } else {
            warn!("Source table {} is missing", name);
            None
        };
        report.tables.push(TableReport { table: name, rows });
    }

    Ok(report)
}
