//! Document and Value types for migrated records
//!
//! This module provides the core data structures written to the destination store:
//! - Document: a JSON-like record keyed by an `ObjectId`
//! - Value: an enum covering JSON types plus ObjectId and DateTime
//! - Field path navigation for nested document access

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

/// Maximum document size in bytes (16 MB, the MongoDB limit)
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Maximum nesting depth for documents
pub const MAX_NESTING_DEPTH: usize = 16;

static PROCESS_UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
static COUNTER: OnceLock<AtomicU32> = OnceLock::new();

/// 12-byte document identifier, layout compatible with MongoDB ObjectIds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Create a new ObjectId: 4-byte timestamp, 5-byte process value, 3-byte counter
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let timestamp = Utc::now().timestamp() as u32;
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());

        let process = PROCESS_UNIQUE.get_or_init(|| {
            let r = rand::random::<u64>().to_be_bytes();
            [r[0], r[1], r[2], r[3], r[4]]
        });
        bytes[4..9].copy_from_slice(process);

        let counter = COUNTER
            .get_or_init(|| AtomicU32::new(rand::random::<u32>() & 0x00FF_FFFF))
            .fetch_add(1, Ordering::Relaxed);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);

        Self(bytes)
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Seconds since the epoch encoded in the id
    pub fn timestamp(&self) -> i64 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.0[0..4]);
        u32::from_be_bytes(bytes) as i64
    }

    /// Lowercase 24-character hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| DocumentError::InvalidObjectId(s.to_string()))?;
        let bytes: [u8; 12] = raw
            .try_into()
            .map_err(|_| DocumentError::InvalidObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Value type supporting all JSON types plus ObjectId and DateTime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Null value, also used for unresolved references
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int32(i32),
    /// 64-bit integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Embedded object
    Object(BTreeMap<String, Value>),
    /// Reference to another document
    ObjectId(ObjectId),
    /// DateTime with UTC timezone
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int32(_) | Value::Int64(_) | Value::Float64(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(i) => Some(*i as i64),
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(i) => Some(*i as f64),
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(oid) => Some(*oid),
            _ => None,
        }
    }

    /// Approximate encoded size in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Bool(_) => 1,
            Value::Int32(_) => 4,
            Value::Int64(_) => 8,
            Value::Float64(_) => 8,
            Value::String(s) => s.len(),
            Value::Array(arr) => arr.iter().map(|v| v.size_bytes()).sum::<usize>() + 8,
            Value::Object(obj) => {
                obj.iter()
                    .map(|(k, v)| k.len() + v.size_bytes())
                    .sum::<usize>()
                    + 8
            }
            Value::ObjectId(_) => 12,
            Value::DateTime(_) => 8,
        }
    }

    /// Get the nesting depth of this value
    pub fn nesting_depth(&self) -> usize {
        match self {
            Value::Array(arr) => 1 + arr.iter().map(|v| v.nesting_depth()).max().unwrap_or(0),
            Value::Object(obj) => 1 + obj.values().map(|v| v.nesting_depth()).max().unwrap_or(0),
            _ => 0,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int32(i)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Self {
        Value::Array(arr)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(obj: BTreeMap<String, Value>) -> Self {
        Value::Object(obj)
    }
}

impl From<ObjectId> for Value {
    fn from(oid: ObjectId) -> Self {
        Value::ObjectId(oid)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Build an embedded object from `(key, value)` pairs
pub fn object<I, K>(pairs: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
}

/// Document with nested fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique document identifier
    #[serde(rename = "_id")]
    pub id: ObjectId,

    /// Document fields, ordered for deterministic output
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    /// Create a new document with a fresh ID
    pub fn new() -> Self {
        Self::with_id(ObjectId::new())
    }

    /// Create a document with a specific ID
    pub fn with_id(id: ObjectId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Create a document from fields
    pub fn from_fields(id: ObjectId, fields: BTreeMap<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Builder-style insert
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Insert a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Get a field by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a mutable field by key
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    /// Remove a field
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Get field by path (e.g., "addresses.0.city"); `_id` resolves to the document id
    pub fn get_by_path(&self, path: &str) -> Option<Value> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts == ["_id"] {
            return Some(Value::ObjectId(self.id));
        }
        self.get_by_path_parts(&parts).cloned()
    }

    fn get_by_path_parts(&self, parts: &[&str]) -> Option<&Value> {
        let (first, rest) = parts.split_first()?;
        let mut current = self.fields.get(*first)?;

        for &part in rest {
            match current {
                Value::Object(obj) => {
                    current = obj.get(part)?;
                }
                Value::Array(arr) => {
                    let index = part.parse::<usize>().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// Set field by path (e.g., "customerInfo.email"), creating intermediate objects
    pub fn set_by_path(&mut self, path: &str, value: Value) -> Result<(), DocumentError> {
        let parts: Vec<&str> = path.split('.').collect();
        let Some((field_name, parent_path)) = parts.split_last() else {
            return Err(DocumentError::InvalidPath(path.to_string()));
        };

        if parent_path.is_empty() {
            self.fields.insert(field_name.to_string(), value);
            return Ok(());
        }

        let mut current = self
            .fields
            .entry(parent_path[0].to_string())
            .or_insert_with(|| Value::Object(BTreeMap::new()));

        for &part in &parent_path[1..] {
            match current {
                Value::Object(obj) => {
                    current = obj
                        .entry(part.to_string())
                        .or_insert_with(|| Value::Object(BTreeMap::new()));
                }
                _ => {
                    return Err(DocumentError::InvalidPath(format!(
                        "{path}: path traverses non-object"
                    )));
                }
            }
        }

        match current {
            Value::Object(obj) => {
                obj.insert(field_name.to_string(), value);
                Ok(())
            }
            _ => Err(DocumentError::InvalidPath(format!(
                "{path}: parent is not an object"
            ))),
        }
    }

    /// Approximate document size in bytes
    pub fn size_bytes(&self) -> usize {
        12 + self
            .fields
            .iter()
            .map(|(k, v)| k.len() + v.size_bytes())
            .sum::<usize>()
    }

    /// Validate document constraints
    pub fn validate(&self) -> Result<(), DocumentError> {
        let size = self.size_bytes();
        if size > MAX_DOCUMENT_SIZE {
            return Err(DocumentError::DocumentTooLarge {
                size,
                max: MAX_DOCUMENT_SIZE,
            });
        }

        let max_depth = self
            .fields
            .values()
            .map(|v| v.nesting_depth())
            .max()
            .unwrap_or(0);

        if max_depth > MAX_NESTING_DEPTH {
            return Err(DocumentError::NestingTooDeep {
                depth: max_depth,
                max: MAX_NESTING_DEPTH,
            });
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, DocumentError> {
        serde_json::to_string(self).map_err(|e| DocumentError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(json).map_err(|e| DocumentError::DeserializationError(e.to_string()))
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Document-related errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document too large: {size} bytes (max: {max})")]
    DocumentTooLarge { size: usize, max: usize },

    #[error("Nesting too deep: {depth} levels (max: {max})")]
    NestingTooDeep { depth: usize, max: usize },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
