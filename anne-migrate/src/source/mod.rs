//! Legacy OpenCart source
//!
//! Loaders only ever issue `SELECT * FROM <table> ORDER BY <pk>`; joins happen
//! in memory so the MySQL source and the JSON dump source behave the same.

pub mod dump;
pub mod mysql;

pub use dump::DumpSource;
pub use mysql::MySqlSource;

use crate::error::{RowError, SourceError};
use anne_core::config::{SourceKind, SourceSettings};
use anne_core::Value;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// Every table the migration reads, without the table prefix
pub const TABLES: &[&str] = &[
    "country",
    "zone",
    "language",
    "option",
    "option_description",
    "option_value",
    "option_value_description",
    "category",
    "category_description",
    "user",
    "customer",
    "address",
    "product",
    "product_description",
    "product_to_category",
    "product_image",
    "product_option_value",
    "cart",
    "customer_wishlist",
    "order",
    "order_product",
    "order_option",
    "order_total",
    "order_history",
];

/// A single column value as read from the legacy store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    fn compare(&self, other: &SqlValue) -> Ordering {
        fn rank(v: &SqlValue) -> u8 {
            match v {
                SqlValue::Null => 0,
                SqlValue::Bool(_) | SqlValue::Int(_) | SqlValue::Float(_) => 1,
                SqlValue::Text(_) => 2,
            }
        }
        fn number(v: &SqlValue) -> f64 {
            match v {
                SqlValue::Bool(b) => f64::from(u8::from(*b)),
                SqlValue::Int(i) => *i as f64,
                SqlValue::Float(f) => *f,
                _ => 0.0,
            }
        }

        match (self, other) {
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (a, b) if rank(a) == 1 && rank(b) == 1 => number(a)
                .partial_cmp(&number(b))
                .unwrap_or(Ordering::Equal),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(i64::from(v))
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// One row of a legacy table, keyed by column name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRow(BTreeMap<String, SqlValue>);

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column setter
    pub fn set(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, column: String, value: SqlValue) {
        self.0.insert(column, value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }

    /// Integer column; text holding an integer is accepted
    pub fn int(&self, column: &str) -> Result<i64, RowError> {
        match self.get(column) {
            None => Err(RowError::MissingColumn(column.to_string())),
            Some(SqlValue::Int(i)) => Ok(*i),
            Some(SqlValue::Bool(b)) => Ok(i64::from(*b)),
            Some(SqlValue::Float(f)) if f.fract() == 0.0 => Ok(*f as i64),
            Some(SqlValue::Text(s)) => s.trim().parse().map_err(|_| RowError::InvalidValue {
                column: column.to_string(),
                reason: format!("'{s}' is not an integer"),
            }),
            Some(other) => Err(RowError::InvalidValue {
                column: column.to_string(),
                reason: format!("expected integer, got {other:?}"),
            }),
        }
    }

    /// Integer column, `default` when missing, null or unparsable
    pub fn int_or(&self, column: &str, default: i64) -> i64 {
        self.int(column).unwrap_or(default)
    }

    pub fn float(&self, column: &str) -> f64 {
        match self.get(column) {
            Some(SqlValue::Int(i)) => *i as f64,
            Some(SqlValue::Float(f)) => *f,
            Some(SqlValue::Text(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Text column; null and missing read as the empty string
    pub fn text(&self, column: &str) -> String {
        match self.get(column) {
            Some(SqlValue::Text(s)) => s.clone(),
            Some(SqlValue::Int(i)) => i.to_string(),
            Some(SqlValue::Float(f)) => f.to_string(),
            Some(SqlValue::Bool(b)) => b.to_string(),
            Some(SqlValue::Null) | None => String::new(),
        }
    }

    /// Text column with surrounding whitespace removed, `None` when empty
    pub fn opt_text(&self, column: &str) -> Option<String> {
        let text = self.text(column);
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    /// Tinyint flag column
    pub fn flag(&self, column: &str) -> bool {
        match self.get(column) {
            Some(SqlValue::Bool(b)) => *b,
            Some(SqlValue::Int(i)) => *i != 0,
            Some(SqlValue::Float(f)) => *f != 0.0,
            Some(SqlValue::Text(s)) => matches!(s.trim(), "1" | "true" | "TRUE"),
            _ => false,
        }
    }

    /// DATETIME or DATE column. Zero dates and unparsable text read as `None`.
    pub fn datetime(&self, column: &str) -> Option<DateTime<Utc>> {
        match self.get(column) {
            Some(SqlValue::Text(s)) => parse_datetime(s),
            _ => None,
        }
    }

    /// DATETIME column as a document value, null when absent
    pub fn datetime_value(&self, column: &str) -> Value {
        self.datetime(column).into()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Parse MySQL `DATETIME` / `DATE` text
pub fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() || text.starts_with("0000-00-00") {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Order rows by the given columns, ascending
pub fn sort_rows(rows: &mut [SourceRow], order_by: &[&str]) {
    rows.sort_by(|a, b| {
        for column in order_by {
            let left = a.get(column).unwrap_or(&SqlValue::Null);
            let right = b.get(column).unwrap_or(&SqlValue::Null);
            match left.compare(right) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    });
}

/// Reject anything that is not a plain SQL identifier
pub fn validate_identifier(name: &str) -> Result<(), SourceError> {
    static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
    let valid = IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(name));

    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidIdentifier(name.to_string()))
    }
}

/// Read-only access to the legacy tables. Table names are given without the
/// configured prefix.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Human readable description for logs
    fn describe(&self) -> String;

    /// Full table name including the prefix
    fn table_name(&self, table: &str) -> String;

    /// Every row of a table ordered by `order_by`
    async fn select_all(&self, table: &str, order_by: &[&str]) -> Result<Vec<SourceRow>, SourceError>;

    async fn count(&self, table: &str) -> Result<u64, SourceError>;

    async fn table_exists(&self, table: &str) -> Result<bool, SourceError>;
}

/// Open the configured source
pub async fn connect(settings: &SourceSettings) -> Result<Arc<dyn SourceStore>, SourceError> {
    match settings.kind {
        SourceKind::Mysql => Ok(Arc::new(MySqlSource::connect(settings).await?)),
        SourceKind::Dump => Ok(Arc::new(DumpSource::open(
            &settings.dump_dir,
            &settings.table_prefix,
        )?)),
    }
}
