//! In-process collection with unique-index enforcement

use crate::document::{Document, ObjectId, Value};
use crate::schema::IndexDefinition;
use crate::storage::{InsertManyOutcome, StorageError, WriteError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Collection holding documents in insertion order plus its active indexes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Collection name
    name: String,
    /// Documents in insertion order
    documents: Vec<Document>,
    /// Active index definitions
    indexes: Vec<IndexDefinition>,
    /// Creation timestamp
    created_at: DateTime<Utc>,
    /// Last update timestamp
    updated_at: DateTime<Utc>,
    /// Snapshot generation, bumped each time the collection is written whole
    #[serde(default)]
    generation: u64,
    #[serde(skip)]
    ids: HashSet<ObjectId>,
    /// index name -> keys currently taken, for unique indexes
    #[serde(skip)]
    unique_keys: HashMap<String, HashSet<String>>,
}

impl Collection {
    /// Create a new empty collection
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            documents: Vec::new(),
            indexes: Vec::new(),
            created_at: now,
            updated_at: now,
            generation: 0,
            ids: HashSet::new(),
            unique_keys: HashMap::new(),
        }
    }

    /// Rebuild the lookup structures after deserialization
    pub fn reindex(&mut self) -> Result<(), StorageError> {
        self.ids = self.documents.iter().map(|d| d.id).collect();
        let indexes = std::mem::take(&mut self.indexes);
        self.unique_keys.clear();
        let result = self.create_indexes(&indexes);
        if result.is_err() {
            self.indexes = indexes;
        }
        result
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn document_count(&self) -> u64 {
        self.documents.len() as u64
    }

    pub fn indexes(&self) -> &[IndexDefinition] {
        &self.indexes
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Remove every document, keeping index definitions
    pub fn clear(&mut self) -> u64 {
        let removed = self.documents.len() as u64;
        self.documents.clear();
        self.ids.clear();
        for keys in self.unique_keys.values_mut() {
            keys.clear();
        }
        self.touch();
        removed
    }

    pub fn drop_indexes(&mut self) {
        self.indexes.clear();
        self.unique_keys.clear();
        self.touch();
    }

    /// Add indexes, checking unique ones against existing documents
    pub fn create_indexes(&mut self, definitions: &[IndexDefinition]) -> Result<(), StorageError> {
        for definition in definitions {
            if self.indexes.iter().any(|i| i.name == definition.name) {
                continue;
            }

            if definition.unique {
                let mut keys = HashSet::new();
                for doc in &self.documents {
                    if let Some(key) = index_key(definition, doc) {
                        if !keys.insert(key.clone()) {
                            return Err(StorageError::IndexBuild {
                                collection: self.name.clone(),
                                index: definition.name.clone(),
                                reason: format!("duplicate key {key}"),
                            });
                        }
                    }
                }
                self.unique_keys.insert(definition.name.clone(), keys);
            }

            self.indexes.push(definition.clone());
        }
        self.touch();
        Ok(())
    }

    /// Unordered insert: each document is accepted or rejected on its own
    pub fn insert_many(&mut self, documents: Vec<Document>) -> InsertManyOutcome {
        let mut outcome = InsertManyOutcome::default();

        for (index, doc) in documents.into_iter().enumerate() {
            match self.insert_one(doc) {
                Ok(id) => outcome.inserted.push(id),
                Err((id, message)) => outcome.write_errors.push(WriteError { index, id, message }),
            }
        }

        self.touch();
        outcome
    }

    fn insert_one(&mut self, doc: Document) -> Result<ObjectId, (ObjectId, String)> {
        let id = doc.id;
        if self.ids.contains(&id) {
            return Err((id, format!("duplicate key _id: {id}")));
        }
        doc.validate().map_err(|e| (id, e.to_string()))?;

        let mut claimed = Vec::new();
        for definition in self.indexes.iter().filter(|i| i.unique) {
            let Some(key) = index_key(definition, &doc) else {
                continue;
            };
            let taken = self
                .unique_keys
                .get(&definition.name)
                .map_or(false, |keys| keys.contains(&key));
            if taken {
                return Err((
                    id,
                    format!("duplicate key on index {}: {}", definition.name, key),
                ));
            }
            claimed.push((definition.name.clone(), key));
        }

        for (index_name, key) in claimed {
            self.unique_keys.entry(index_name).or_default().insert(key);
        }
        self.ids.insert(id);
        self.documents.push(doc);
        Ok(id)
    }

    /// Drop every document past the first `len`, releasing their ids and
    /// unique keys
    pub fn truncate(&mut self, len: usize) {
        if len >= self.documents.len() {
            return;
        }
        let removed: Vec<Document> = self.documents.drain(len..).collect();
        for doc in &removed {
            self.ids.remove(&doc.id);
            for definition in self.indexes.iter().filter(|i| i.unique) {
                if let (Some(key), Some(keys)) = (
                    index_key(definition, doc),
                    self.unique_keys.get_mut(&definition.name),
                ) {
                    keys.remove(&key);
                }
            }
        }
        self.touch();
    }

    /// Replace the document matching `key_field`, keeping its id, or insert it
    pub fn upsert_by(&mut self, key_field: &str, mut doc: Document) -> Result<(), StorageError> {
        let key = doc.get_by_path(key_field).unwrap_or(Value::Null);
        let position = self
            .documents
            .iter()
            .position(|d| d.get_by_path(key_field).unwrap_or(Value::Null) == key);

        match position {
            Some(pos) => {
                doc.id = self.documents[pos].id;
                self.documents[pos] = doc;
                self.reindex()?;
            }
            None => {
                if let Err((_, message)) = self.insert_one(doc) {
                    return Err(StorageError::Backend(message));
                }
            }
        }
        self.touch();
        Ok(())
    }

    pub fn find_one(&self, field: &str, value: &Value) -> Option<&Document> {
        self.documents
            .iter()
            .find(|d| d.get_by_path(field).as_ref() == Some(value))
    }

    /// Sum of array lengths stored under `array_field`
    pub fn count_embedded(&self, array_field: &str) -> u64 {
        self.documents
            .iter()
            .filter_map(|d| d.get(array_field).and_then(Value::as_array).map(Vec::len))
            .sum::<usize>() as u64
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Index key for a document, or `None` when a sparse index skips it
fn index_key(definition: &IndexDefinition, doc: &Document) -> Option<String> {
    let values: Vec<Value> = definition
        .fields()
        .into_iter()
        .map(|f| doc.get_by_path(f).unwrap_or(Value::Null))
        .collect();

    if definition.sparse && values.iter().all(Value::is_null) {
        return None;
    }

    Some(serde_json::to_string(&values).unwrap_or_else(|_| format!("{values:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(email: &str) -> Document {
        Document::new().field("email", email)
    }

    #[test]
    fn test_unordered_insert_isolates_duplicates() {
        let mut collection = Collection::new("customers");
        collection
            .create_indexes(&[IndexDefinition::single("email").unique()])
            .unwrap();

        let outcome = collection.insert_many(vec![
            customer("a@x.com"),
            customer("a@x.com"),
            customer("b@x.com"),
        ]);

        assert_eq!(outcome.inserted_count(), 2);
        assert_eq!(outcome.failed_count(), 1);
        assert_eq!(outcome.write_errors[0].index, 1);
        assert_eq!(collection.document_count(), 2);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut collection = Collection::new("zones");
        let doc = Document::new();
        let outcome = collection.insert_many(vec![doc.clone(), doc]);
        assert_eq!(outcome.inserted_count(), 1);
        assert!(outcome.write_errors[0].message.contains("_id"));
    }

    #[test]
    fn test_sparse_unique_skips_nulls() {
        let mut collection = Collection::new("carts");
        collection
            .create_indexes(&[IndexDefinition::single("customer").unique().sparse()])
            .unwrap();

        let outcome = collection.insert_many(vec![
            Document::new().field("customer", Value::Null),
            Document::new().field("customer", Value::Null),
        ]);
        assert_eq!(outcome.inserted_count(), 2);
    }

    #[test]
    fn test_index_build_detects_existing_duplicates() {
        let mut collection = Collection::new("customers");
        collection.insert_many(vec![customer("a@x.com"), customer("a@x.com")]);

        let result = collection.create_indexes(&[IndexDefinition::single("email").unique()]);
        assert!(matches!(result, Err(StorageError::IndexBuild { .. })));
        assert!(collection.indexes().is_empty());
    }

    #[test]
    fn test_clear_and_drop_indexes() {
        let mut collection = Collection::new("customers");
        collection
            .create_indexes(&[IndexDefinition::single("email").unique()])
            .unwrap();
        collection.insert_many(vec![customer("a@x.com")]);

        assert_eq!(collection.clear(), 1);
        assert_eq!(collection.indexes().len(), 1);
        assert_eq!(collection.insert_many(vec![customer("a@x.com")]).inserted_count(), 1);

        collection.drop_indexes();
        assert!(collection.indexes().is_empty());
        assert_eq!(collection.insert_many(vec![customer("a@x.com")]).inserted_count(), 1);
    }

    #[test]
    fn test_upsert_keeps_original_id() {
        let mut collection = Collection::new("migrationstatuses");
        let first = Document::new().field("phase", "phase1").field("status", "inProgress");
        let first_id = first.id;
        collection.upsert_by("phase", first).unwrap();

        let second = Document::new().field("phase", "phase1").field("status", "completed");
        collection.upsert_by("phase", second).unwrap();

        assert_eq!(collection.document_count(), 1);
        let stored = collection.find_one("phase", &Value::from("phase1")).unwrap();
        assert_eq!(stored.id, first_id);
        assert_eq!(stored.get("status"), Some(&Value::from("completed")));
    }

    #[test]
    fn test_count_embedded() {
        let mut collection = Collection::new("wishlists");
        collection.insert_many(vec![
            Document::new().field("products", vec![Value::from(1i64), Value::from(2i64)]),
            Document::new().field("products", vec![Value::from(3i64)]),
            Document::new(),
        ]);
        assert_eq!(collection.count_embedded("products"), 3);
    }

    #[test]
    fn test_truncate_releases_ids_and_keys() {
        let mut collection = Collection::new("customers");
        collection
            .create_indexes(&[IndexDefinition::single("email").unique()])
            .unwrap();
        collection.insert_many(vec![customer("a@x.com")]);
        let late = customer("b@x.com");
        collection.insert_many(vec![late.clone()]);

        collection.truncate(1);
        assert_eq!(collection.document_count(), 1);

        let outcome = collection.insert_many(vec![late, customer("a@x.com")]);
        assert_eq!(outcome.inserted_count(), 1);
        assert_eq!(outcome.write_errors[0].index, 1);
    }
}
