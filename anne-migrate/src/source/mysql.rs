//! MySQL source over an `sqlx` pool

use super::{validate_identifier, SourceRow, SourceStore, SqlValue};
use crate::error::SourceError;
use anne_core::config::SourceSettings;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};
use tracing::{debug, info};

/// Legacy OpenCart database
pub struct MySqlSource {
    pool: MySqlPool,
    prefix: String,
}

impl MySqlSource {
    /// Connect and return a source reading tables with the configured prefix
    pub async fn connect(settings: &SourceSettings) -> Result<Self, SourceError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        info!("Connected to MySQL source");
        Ok(Self {
            pool,
            prefix: settings.table_prefix.clone(),
        })
    }

    fn quoted_table(&self, table: &str) -> Result<String, SourceError> {
        let full = self.table_name(table);
        validate_identifier(&full)?;
        Ok(format!("`{full}`"))
    }

    fn query_error(&self, table: &str, e: sqlx::Error) -> SourceError {
        SourceError::Query {
            table: self.table_name(table),
            reason: e.to_string(),
        }
    }
}

/// Decode a row by dispatching on each column's declared type. Values that
/// fail to decode (zero dates, odd charsets) become null.
fn decode_row(row: &MySqlRow) -> SourceRow {
    let mut out = SourceRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_ascii_uppercase();
        out.insert(column.name().to_string(), decode_column(row, idx, &type_name));
    }
    out
}

fn decode_column(row: &MySqlRow, idx: usize, type_name: &str) -> SqlValue {
    let base = type_name.split_whitespace().next().unwrap_or_default();
    match base {
        "BOOLEAN" => match row.try_get::<Option<bool>, _>(idx) {
            Ok(v) => v.map_or(SqlValue::Null, |b| SqlValue::Int(i64::from(b))),
            Err(_) => SqlValue::Null,
        },
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" if type_name.contains("UNSIGNED") => {
            match row.try_get::<Option<u64>, _>(idx) {
                Ok(v) => v.map_or(SqlValue::Null, |n| SqlValue::Int(n as i64)),
                Err(_) => SqlValue::Null,
            }
        }
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            match row.try_get::<Option<i64>, _>(idx) {
                Ok(v) => v.map_or(SqlValue::Null, SqlValue::Int),
                Err(_) => SqlValue::Null,
            }
        }
        "DECIMAL" => match row.try_get::<Option<BigDecimal>, _>(idx) {
            Ok(v) => v
                .and_then(|d| d.to_f64())
                .map_or(SqlValue::Null, SqlValue::Float),
            Err(_) => SqlValue::Null,
        },
        "FLOAT" => match row.try_get::<Option<f32>, _>(idx) {
            Ok(v) => v.map_or(SqlValue::Null, |f| SqlValue::Float(f64::from(f))),
            Err(_) => SqlValue::Null,
        },
        "DOUBLE" => match row.try_get::<Option<f64>, _>(idx) {
            Ok(v) => v.map_or(SqlValue::Null, SqlValue::Float),
            Err(_) => SqlValue::Null,
        },
        "DATETIME" | "TIMESTAMP" => match row.try_get::<Option<NaiveDateTime>, _>(idx) {
            Ok(v) => v.map_or(SqlValue::Null, |dt| {
                SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string())
            }),
            Err(_) => SqlValue::Null,
        },
        "DATE" => match row.try_get::<Option<NaiveDate>, _>(idx) {
            Ok(v) => v.map_or(SqlValue::Null, |d| SqlValue::Text(d.format("%Y-%m-%d").to_string())),
            Err(_) => SqlValue::Null,
        },
        _ => match row.try_get::<Option<String>, _>(idx) {
            Ok(v) => v.map_or(SqlValue::Null, SqlValue::Text),
            Err(_) => match row.try_get::<Option<Vec<u8>>, _>(idx) {
                Ok(v) => v.map_or(SqlValue::Null, |bytes| {
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }),
                Err(_) => SqlValue::Null,
            },
        },
    }
}

#[async_trait]
impl SourceStore for MySqlSource {
    fn describe(&self) -> String {
        format!("mysql (prefix '{}')", self.prefix)
    }

    fn table_name(&self, table: &str) -> String {
        format!("{}{}", self.prefix, table)
    }

    async fn select_all(
        &self,
        table: &str,
        order_by: &[&str],
    ) -> Result<Vec<SourceRow>, SourceError> {
        let mut sql = format!("SELECT * FROM {}", self.quoted_table(table)?);
        if !order_by.is_empty() {
            for column in order_by {
                validate_identifier(column)?;
            }
            let columns: Vec<String> = order_by.iter().map(|c| format!("`{c}`")).collect();
            sql.push_str(&format!(" ORDER BY {}", columns.join(", ")));
        }

        debug!("{}", sql);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.query_error(table, e))?;

        Ok(rows.iter().map(decode_row).collect())
    }

    async fn count(&self, table: &str) -> Result<u64, SourceError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.quoted_table(table)?);
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.query_error(table, e))?;
        Ok(count.max(0) as u64)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, SourceError> {
        let full = self.table_name(table);
        validate_identifier(&full)?;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(&full)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| self.query_error(table, e))?;
        Ok(count > 0)
    }
}
