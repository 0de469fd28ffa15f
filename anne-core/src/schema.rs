//! Collection schema definition and validation
//!
//! Every destination collection written by the migration has a `Schema`:
//! field types, required/nullable flags, validators and the index set that
//! is dropped before a bulk load and rebuilt after it.

use crate::document::{Document, Value};
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

/// Schema definition for a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Collection the schema describes
    pub collection: String,
    /// Schema version
    pub version: u32,
    /// Field definitions
    pub fields: BTreeMap<String, FieldDefinition>,
    /// Index definitions
    pub indexes: Vec<IndexDefinition>,
}

impl Schema {
    /// Create a new empty schema
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            version: 1,
            fields: BTreeMap::new(),
            indexes: Vec::new(),
        }
    }

    /// Add a field definition
    pub fn add_field(&mut self, name: impl Into<String>, field_def: FieldDefinition) {
        self.fields.insert(name.into(), field_def);
    }

    /// Builder-style field definition
    pub fn with_field(mut self, name: impl Into<String>, field_def: FieldDefinition) -> Self {
        self.add_field(name, field_def);
        self
    }

    /// Add an index definition
    pub fn add_index(&mut self, index_def: IndexDefinition) {
        self.indexes.push(index_def);
    }

    /// Builder-style index definition
    pub fn with_index(mut self, index_def: IndexDefinition) -> Self {
        self.add_index(index_def);
        self
    }

    /// Validate a document against this schema. Unknown fields are allowed.
    pub fn validate(&self, doc: &Document) -> Result<(), ValidationError> {
        validate_fields(&self.fields, &doc.fields, "")
    }

    /// Apply defaults for missing fields
    pub fn apply_defaults(&self, doc: &mut Document) {
        for (field_name, field_def) in &self.fields {
            if !doc.contains_key(field_name) {
                if let Some(default_value) = &field_def.default {
                    doc.insert(field_name.clone(), default_value.clone());
                }
            }
        }
    }

    /// Check that the schema itself is coherent: indexes reference declared
    /// fields, index names are unique, regex validators compile and defaults
    /// match their declared type.
    pub fn check_consistency(&self) -> Result<(), SchemaError> {
        let mut names = HashSet::new();
        for index in &self.indexes {
            if !names.insert(index.name.as_str()) {
                return Err(SchemaError::DuplicateIndex {
                    collection: self.collection.clone(),
                    index: index.name.clone(),
                });
            }
            for field in index.fields() {
                if !self.declares_path(field) {
                    return Err(SchemaError::UndeclaredIndexField {
                        collection: self.collection.clone(),
                        index: index.name.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }

        check_definitions(&self.collection, &self.fields, "")
    }

    /// Whether a dotted path resolves to a declared field
    pub fn declares_path(&self, path: &str) -> bool {
        if path == "_id" {
            return true;
        }
        let mut fields = &self.fields;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let Some(def) = fields.get(part) else {
                return false;
            };
            if parts.peek().is_none() {
                return true;
            }
            match def.field_type.nested_fields() {
                Some(nested) => fields = nested,
                None => return false,
            }
        }
        false
    }
}

fn validate_fields(
    defs: &BTreeMap<String, FieldDefinition>,
    values: &BTreeMap<String, Value>,
    prefix: &str,
) -> Result<(), ValidationError> {
    for (field_name, field_def) in defs {
        let path = if prefix.is_empty() {
            field_name.clone()
        } else {
            format!("{prefix}.{field_name}")
        };

        match values.get(field_name) {
            None if field_def.required => return Err(ValidationError::RequiredFieldMissing(path)),
            None => {}
            Some(value) => field_def.validate(&path, value)?,
        }
    }
    Ok(())
}

fn check_definitions(
    collection: &str,
    defs: &BTreeMap<String, FieldDefinition>,
    prefix: &str,
) -> Result<(), SchemaError> {
    for (name, def) in defs {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };

        if let Some(default) = &def.default {
            if !def.accepts(default) {
                return Err(SchemaError::BadDefault {
                    collection: collection.to_string(),
                    field: path,
                });
            }
        }

        for validator in &def.validators {
            if let Validator::Regex(pattern) = validator {
                compiled(pattern).map_err(|e| SchemaError::BadRegex {
                    collection: collection.to_string(),
                    field: path.clone(),
                    error: e.to_string(),
                })?;
            }
        }

        if let Some(nested) = def.field_type.nested_fields() {
            check_definitions(collection, nested, &path)?;
        }
    }
    Ok(())
}

/// Field definition with type, constraints, and validators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Field type
    pub field_type: FieldType,
    /// Whether the field must be present
    pub required: bool,
    /// Whether an explicit null is accepted
    pub nullable: bool,
    /// Default value if not provided
    pub default: Option<Value>,
    /// Validators to apply
    pub validators: Vec<Validator>,
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            nullable: false,
            default: None,
            validators: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn add_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    fn accepts(&self, value: &Value) -> bool {
        (self.nullable && value.is_null()) || self.field_type.is_compatible(value)
    }

    /// Validate a value against this field definition
    pub fn validate(&self, field_name: &str, value: &Value) -> Result<(), ValidationError> {
        if value.is_null() && self.nullable {
            return Ok(());
        }

        if !self.field_type.is_compatible(value) {
            return Err(ValidationError::TypeMismatch {
                field: field_name.to_string(),
                expected: self.field_type.describe(),
                actual: describe_value(value).to_string(),
            });
        }

        match (&self.field_type, value) {
            (FieldType::Object { fields }, Value::Object(obj)) => {
                validate_fields(fields, obj, field_name)?;
            }
            (FieldType::Array { item }, Value::Array(items)) => {
                for (i, v) in items.iter().enumerate() {
                    item.validate(&format!("{field_name}.{i}"), v)?;
                }
            }
            _ => {}
        }

        for validator in &self.validators {
            validator.validate(field_name, value)?;
        }

        Ok(())
    }
}

/// Field type enumeration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldType {
    /// String type with optional max length
    String { max_length: Option<usize> },
    Int32,
    Int64,
    Float64,
    Boolean,
    Date,
    ObjectId,
    /// Array whose items follow a field definition
    Array { item: Box<FieldDefinition> },
    /// Embedded object with field definitions
    Object { fields: BTreeMap<String, FieldDefinition> },
    /// Reference to a document in another collection
    Reference { collection: String },
    /// Any type (no validation)
    Any,
}

impl FieldType {
    /// Plain string with no length limit
    pub fn string() -> Self {
        FieldType::String { max_length: None }
    }

    /// Reference to another collection
    pub fn reference(collection: &str) -> Self {
        FieldType::Reference {
            collection: collection.to_string(),
        }
    }

    /// Array of the given field definition
    pub fn array_of(item: FieldDefinition) -> Self {
        FieldType::Array {
            item: Box::new(item),
        }
    }

    /// Embedded object built from `(name, definition)` pairs
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldDefinition)>,
        K: Into<String>,
    {
        FieldType::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Check if a value is compatible with this field type
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::String { max_length }, Value::String(s)) => {
                max_length.map_or(true, |max| s.chars().count() <= max)
            }
            (FieldType::Int32, Value::Int32(_)) => true,
            (FieldType::Int64, Value::Int64(_)) | (FieldType::Int64, Value::Int32(_)) => true,
            (FieldType::Float64, v) => v.is_number(),
            (FieldType::Boolean, Value::Bool(_)) => true,
            (FieldType::Date, Value::DateTime(_)) => true,
            (FieldType::ObjectId, Value::ObjectId(_)) => true,
            (FieldType::Array { .. }, Value::Array(_)) => true,
            (FieldType::Object { .. }, Value::Object(_)) => true,
            (FieldType::Reference { .. }, Value::ObjectId(_)) => true,
            (FieldType::Any, _) => true,
            _ => false,
        }
    }

    fn nested_fields(&self) -> Option<&BTreeMap<String, FieldDefinition>> {
        match self {
            FieldType::Object { fields } => Some(fields),
            FieldType::Array { item } => item.field_type.nested_fields(),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            FieldType::String { .. } => "string".to_string(),
            FieldType::Int32 => "int32".to_string(),
            FieldType::Int64 => "int64".to_string(),
            FieldType::Float64 => "float64".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Date => "date".to_string(),
            FieldType::ObjectId => "objectId".to_string(),
            FieldType::Array { .. } => "array".to_string(),
            FieldType::Object { .. } => "object".to_string(),
            FieldType::Reference { collection } => format!("reference({collection})"),
            FieldType::Any => "any".to_string(),
        }
    }
}

fn describe_value(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int32(_) => "int32",
        Value::Int64(_) => "int64",
        Value::Float64(_) => "float64",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        Value::ObjectId(_) => "objectId",
        Value::DateTime(_) => "date",
    }
}

/// Validator for field values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Validator {
    /// Minimum numeric value
    Min(f64),
    /// Maximum numeric value
    Max(f64),
    /// Minimum string/array length
    MinLength(usize),
    /// Regular expression pattern
    Regex(String),
    /// Enum of allowed values
    Enum(Vec<Value>),
}

/// Compile a pattern once per process; later lookups share the compiled form
fn compiled(pattern: &str) -> Result<Regex, regex::Error> {
    static PATTERNS: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(Default::default);

    if let Some(re) = patterns.read().get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    patterns.write().insert(pattern.to_string(), re.clone());
    Ok(re)
}

impl Validator {
    pub fn validate(&self, field_name: &str, value: &Value) -> Result<(), ValidationError> {
        match self {
            Validator::Min(min) => {
                if let Some(num) = value.as_f64() {
                    if num < *min {
                        return Err(ValidationError::MinValueViolation {
                            field: field_name.to_string(),
                            min: *min,
                            actual: num,
                        });
                    }
                }
            }
            Validator::Max(max) => {
                if let Some(num) = value.as_f64() {
                    if num > *max {
                        return Err(ValidationError::MaxValueViolation {
                            field: field_name.to_string(),
                            max: *max,
                            actual: num,
                        });
                    }
                }
            }
            Validator::MinLength(min_len) => {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(arr) => arr.len(),
                    _ => return Ok(()),
                };
                if len < *min_len {
                    return Err(ValidationError::MinLengthViolation {
                        field: field_name.to_string(),
                        min: *min_len,
                        actual: len,
                    });
                }
            }
            Validator::Regex(pattern) => {
                if let Value::String(s) = value {
                    let re = compiled(pattern).map_err(|e| ValidationError::InvalidRegex {
                        pattern: pattern.clone(),
                        error: e.to_string(),
                    })?;
                    if !re.is_match(s) {
                        return Err(ValidationError::RegexMismatch {
                            field: field_name.to_string(),
                            pattern: pattern.clone(),
                            value: s.clone(),
                        });
                    }
                }
            }
            Validator::Enum(allowed_values) => {
                if !allowed_values.contains(value) {
                    return Err(ValidationError::EnumViolation {
                        field: field_name.to_string(),
                        actual: value.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Index name
    pub name: String,
    /// Index type
    pub index_type: IndexType,
    /// Whether the index is unique
    pub unique: bool,
    /// Whether documents without the field (or with null) are left out
    pub sparse: bool,
}

impl IndexDefinition {
    /// Create a new single-field index
    pub fn single(field: &str) -> Self {
        Self {
            name: format!("idx_{}", field.replace('.', "_")),
            index_type: IndexType::Single {
                field: field.to_string(),
            },
            unique: false,
            sparse: false,
        }
    }

    /// Create a new compound index
    pub fn compound(fields: &[&str]) -> Self {
        let name = format!("idx_{}", fields.join("_").replace('.', "_"));
        Self {
            name,
            index_type: IndexType::Compound {
                fields: fields.iter().map(|f| f.to_string()).collect(),
            },
            unique: false,
            sparse: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    /// Indexed field paths
    pub fn fields(&self) -> Vec<&str> {
        match &self.index_type {
            IndexType::Single { field } => vec![field.as_str()],
            IndexType::Compound { fields } => fields.iter().map(String::as_str).collect(),
        }
    }
}

/// Index type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexType {
    /// Single field index
    Single { field: String },
    /// Compound index on multiple fields
    Compound { fields: Vec<String> },
}

/// Errors in a schema definition itself
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("{collection}: duplicate index name '{index}'")]
    DuplicateIndex { collection: String, index: String },

    #[error("{collection}: index '{index}' references undeclared field '{field}'")]
    UndeclaredIndexField {
        collection: String,
        index: String,
        field: String,
    },

    #[error("{collection}: default for '{field}' does not match its type")]
    BadDefault { collection: String, field: String },

    #[error("{collection}: invalid regex on '{field}': {error}")]
    BadRegex {
        collection: String,
        field: String,
        error: String,
    },
}

/// Document validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Required field missing: {0}")]
    RequiredFieldMissing(String),

    #[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Min value violation for field '{field}': min={min}, actual={actual}")]
    MinValueViolation { field: String, min: f64, actual: f64 },

    #[error("Max value violation for field '{field}': max={max}, actual={actual}")]
    MaxValueViolation { field: String, max: f64, actual: f64 },

    #[error("Min length violation for field '{field}': min={min}, actual={actual}")]
    MinLengthViolation {
        field: String,
        min: usize,
        actual: usize,
    },

    #[error("Regex mismatch for field '{field}': pattern='{pattern}', value='{value}'")]
    RegexMismatch {
        field: String,
        pattern: String,
        value: String,
    },

    #[error("Invalid regex pattern '{pattern}': {error}")]
    InvalidRegex { pattern: String, error: String },

    #[error("Enum violation for field '{field}': {actual:?} not in allowed set")]
    EnumViolation { field: String, actual: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{object, ObjectId};

    fn customer_schema() -> Schema {
        Schema::new("customers")
            .with_field("email", FieldDefinition::new(FieldType::string()).required())
            .with_field("language", FieldDefinition::new(FieldType::reference("languages")).nullable())
            .with_field(
                "addresses",
                FieldDefinition::new(FieldType::array_of(FieldDefinition::new(FieldType::object([
                    ("city", FieldDefinition::new(FieldType::string()).required()),
                    ("country", FieldDefinition::new(FieldType::reference("countries")).nullable()),
                ])))),
            )
            .with_index(IndexDefinition::single("email").unique())
            .with_index(IndexDefinition::single("addresses.country"))
    }

    #[test]
    fn test_required_and_nullable() {
        let schema = customer_schema();

        let doc = Document::new().field("email", "a@b.c").field("language", Value::Null);
        assert!(schema.validate(&doc).is_ok());

        let missing = Document::new();
        assert!(matches!(
            schema.validate(&missing),
            Err(ValidationError::RequiredFieldMissing(f)) if f == "email"
        ));
    }

    #[test]
    fn test_nested_array_validation() {
        let schema = customer_schema();
        let doc = Document::new().field("email", "a@b.c").field(
            "addresses",
            vec![
                object([("city", Value::from("York")), ("country", Value::from(ObjectId::new()))]),
                object([("country", Value::Null)]),
            ],
        );

        match schema.validate(&doc) {
            Err(ValidationError::RequiredFieldMissing(path)) => assert_eq!(path, "addresses.1.city"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch() {
        let schema = customer_schema();
        let doc = Document::new().field("email", 12i32);
        assert!(matches!(
            schema.validate(&doc),
            Err(ValidationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_string_max_length() {
        let field = FieldType::String { max_length: Some(3) };
        assert!(field.is_compatible(&Value::from("abc")));
        assert!(!field.is_compatible(&Value::from("abcd")));
    }

    #[test]
    fn test_validators() {
        assert!(Validator::Min(0.0).validate("price", &Value::Float64(-1.0)).is_err());
        assert!(Validator::Max(10.0).validate("qty", &Value::Int32(5)).is_ok());
        assert!(Validator::MinLength(1).validate("name", &Value::from("")).is_err());
        assert!(Validator::Regex(r"^[^@]+@[^@]+$".to_string())
            .validate("email", &Value::from("x@y"))
            .is_ok());
        assert!(Validator::Enum(vec!["a".into(), "b".into()])
            .validate("s", &Value::from("c"))
            .is_err());
    }

    #[test]
    fn test_regex_validator_reuses_compiled_pattern() {
        let validator = Validator::Regex(r"^\d{4}-\d{2}$".to_string());
        assert!(validator.validate("code", &Value::from("2024-01")).is_ok());
        assert!(matches!(
            validator.validate("code", &Value::from("2024")),
            Err(ValidationError::RegexMismatch { .. })
        ));

        let first = compiled(r"^\d{4}-\d{2}$").unwrap();
        let second = compiled(r"^\d{4}-\d{2}$").unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert!(compiled("(unclosed").is_err());
    }

    #[test]
    fn test_apply_defaults() {
        let schema = Schema::new("carts").with_field(
            "items",
            FieldDefinition::new(FieldType::array_of(FieldDefinition::new(FieldType::Any)))
                .default_value(Value::Array(vec![])),
        );
        let mut doc = Document::new();
        schema.apply_defaults(&mut doc);
        assert_eq!(doc.get("items"), Some(&Value::Array(vec![])));
    }

    #[test]
    fn test_consistency_checks() {
        assert!(customer_schema().check_consistency().is_ok());
        assert!(customer_schema().declares_path("addresses.city"));
        assert!(!customer_schema().declares_path("addresses.street"));

        let undeclared = customer_schema().with_index(IndexDefinition::single("phone"));
        assert!(matches!(
            undeclared.check_consistency(),
            Err(SchemaError::UndeclaredIndexField { .. })
        ));

        let duplicate = customer_schema().with_index(IndexDefinition::single("email"));
        assert!(matches!(
            duplicate.check_consistency(),
            Err(SchemaError::DuplicateIndex { .. })
        ));

        let bad_default = Schema::new("x").with_field(
            "n",
            FieldDefinition::new(FieldType::Int32).default_value(Value::from("one")),
        );
        assert!(matches!(
            bad_default.check_consistency(),
            Err(SchemaError::BadDefault { .. })
        ));
    }

    #[test]
    fn test_index_definition() {
        let index = IndexDefinition::single("email").unique();
        assert!(index.unique);
        assert_eq!(index.name, "idx_email");

        let compound = IndexDefinition::compound(&["customer", "products"]);
        assert_eq!(compound.name, "idx_customer_products");
        assert_eq!(compound.fields(), vec!["customer", "products"]);

        assert_eq!(IndexDefinition::single("options.legacyId").name, "idx_options_legacyId");
    }
}
