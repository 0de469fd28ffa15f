//! MongoDB destination store

use crate::document::{Document, ObjectId, Value};
use crate::schema::IndexDefinition;
use crate::storage::{DocumentStore, InsertManyOutcome, StorageError, WriteError};
use async_trait::async_trait;
use bson::{doc, Bson};
use futures::TryStreamExt;
use mongodb::error::ErrorKind;
use mongodb::options::{IndexOptions, InsertManyOptions};
use mongodb::{Client, Database, IndexModel};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// MongoDB reports a missing namespace with this code
const NAMESPACE_NOT_FOUND: i32 = 26;

/// Store backed by a MongoDB database
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Connect and select `database`
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StorageError> {
        let client = Client::with_uri_str(uri).await?;
        client
            .database(database)
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        info!("Connected to MongoDB database {}", database);
        Ok(Self {
            database: client.database(database),
        })
    }

    fn collection(&self, name: &str) -> mongodb::Collection<bson::Document> {
        self.database.collection(name)
    }
}

impl From<mongodb::error::Error> for StorageError {
    fn from(e: mongodb::error::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// Convert a document into BSON, mapping the id to `_id`
pub fn to_bson_document(document: &Document) -> bson::Document {
    let mut out = bson::Document::new();
    out.insert("_id", Bson::ObjectId(to_bson_oid(document.id)));
    for (key, value) in &document.fields {
        out.insert(key.clone(), to_bson(value));
    }
    out
}

/// Convert a BSON document read back from MongoDB
pub fn from_bson_document(mut raw: bson::Document) -> Result<Document, StorageError> {
    let id = match raw.remove("_id") {
        Some(Bson::ObjectId(oid)) => ObjectId::from_bytes(oid.bytes()),
        other => {
            return Err(StorageError::Backend(format!(
                "unsupported _id value: {other:?}"
            )))
        }
    };
    let fields: BTreeMap<String, Value> = raw.into_iter().map(|(k, v)| (k, from_bson(v))).collect();
    Ok(Document::from_fields(id, fields))
}

fn to_bson_oid(id: ObjectId) -> bson::oid::ObjectId {
    bson::oid::ObjectId::from_bytes(*id.as_bytes())
}

fn to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int32(i) => Bson::Int32(*i),
        Value::Int64(i) => Bson::Int64(*i),
        Value::Float64(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.iter()
                .map(|(k, v)| (k.clone(), to_bson(v)))
                .collect(),
        ),
        Value::ObjectId(id) => Bson::ObjectId(to_bson_oid(*id)),
        Value::DateTime(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
    }
}

fn from_bson(value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Int32(i) => Value::Int32(i),
        Bson::Int64(i) => Value::Int64(i),
        Bson::Double(f) => Value::Float64(f),
        Bson::String(s) => Value::String(s),
        Bson::Array(items) => Value::Array(items.into_iter().map(from_bson).collect()),
        Bson::Document(map) => Value::Object(map.into_iter().map(|(k, v)| (k, from_bson(v))).collect()),
        Bson::ObjectId(oid) => Value::ObjectId(ObjectId::from_bytes(oid.bytes())),
        Bson::DateTime(dt) => Value::DateTime(dt.to_chrono()),
        Bson::Decimal128(d) => Value::String(d.to_string()),
        other => Value::String(other.to_string()),
    }
}

fn index_model(definition: &IndexDefinition) -> IndexModel {
    let mut keys = bson::Document::new();
    for field in definition.fields() {
        keys.insert(field, 1i32);
    }
    let options = IndexOptions::builder()
        .name(definition.name.clone())
        .unique(definition.unique.then_some(true))
        .sparse(definition.sparse.then_some(true))
        .build();
    IndexModel::builder().keys(keys).options(options).build()
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn clear_collection(&self, collection: &str) -> Result<u64, StorageError> {
        let result = self.collection(collection).delete_many(doc! {}, None).await?;
        Ok(result.deleted_count)
    }

    async fn drop_indexes(&self, collection: &str) -> Result<(), StorageError> {
        match self.collection(collection).drop_indexes(None).await {
            Ok(()) => Ok(()),
            Err(e) => match e.kind.as_ref() {
                ErrorKind::Command(cmd) if cmd.code == NAMESPACE_NOT_FOUND => {
                    debug!(collection, "No indexes to drop, collection does not exist");
                    Ok(())
                }
                _ => Err(e.into()),
            },
        }
    }

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexDefinition],
    ) -> Result<(), StorageError> {
        if indexes.is_empty() {
            return Ok(());
        }
        let models: Vec<IndexModel> = indexes.iter().map(index_model).collect();
        self.collection(collection)
            .create_indexes(models, None)
            .await
            .map_err(|e| StorageError::IndexBuild {
                collection: collection.to_string(),
                index: indexes
                    .iter()
                    .map(|i| i.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyOutcome, StorageError> {
        if documents.is_empty() {
            return Ok(InsertManyOutcome::default());
        }
        let ids: Vec<ObjectId> = documents.iter().map(|d| d.id).collect();
        let raw: Vec<bson::Document> = documents.iter().map(to_bson_document).collect();
        let options = InsertManyOptions::builder().ordered(false).build();

        match self.collection(collection).insert_many(raw, options).await {
            Ok(_) => Ok(InsertManyOutcome {
                inserted: ids,
                write_errors: Vec::new(),
            }),
            Err(e) => match e.kind.as_ref() {
                ErrorKind::BulkWrite(failure) => {
                    let write_errors: Vec<WriteError> = failure
                        .write_errors
                        .iter()
                        .flatten()
                        .map(|w| WriteError {
                            index: w.index,
                            id: ids[w.index.min(ids.len() - 1)],
                            message: format!("E{}: {}", w.code, w.message),
                        })
                        .collect();
                    if write_errors.is_empty() {
                        return Err(e.into());
                    }
                    let inserted = ids
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !write_errors.iter().any(|w| w.index == *i))
                        .map(|(_, id)| *id)
                        .collect();
                    Ok(InsertManyOutcome {
                        inserted,
                        write_errors,
                    })
                }
                _ => Err(e.into()),
            },
        }
    }

    async fn count(&self, collection: &str) -> Result<u64, StorageError> {
        Ok(self.collection(collection).count_documents(None, None).await?)
    }

    async fn count_embedded(
        &self,
        collection: &str,
        array_field: &str,
    ) -> Result<u64, StorageError> {
        let pipeline = vec![
            doc! { "$project": { "n": { "$size": { "$ifNull": [format!("${array_field}"), []] } } } },
            doc! { "$group": { "_id": Bson::Null, "total": { "$sum": "$n" } } },
        ];
        let mut cursor = self.collection(collection).aggregate(pipeline, None).await?;
        let total = match cursor.try_next().await? {
            Some(row) => match row.get("total") {
                Some(Bson::Int32(n)) => *n as u64,
                Some(Bson::Int64(n)) => *n as u64,
                Some(Bson::Double(n)) => *n as u64,
                _ => 0,
            },
            None => 0,
        };
        Ok(total)
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StorageError> {
        let cursor = self.collection(collection).find(None, None).await?;
        let raw: Vec<bson::Document> = cursor.try_collect().await?;
        raw.into_iter().map(from_bson_document).collect()
    }

    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, StorageError> {
        let filter = doc! { field: to_bson(value) };
        match self.collection(collection).find_one(filter, None).await? {
            Some(raw) => Ok(Some(from_bson_document(raw)?)),
            None => Ok(None),
        }
    }

    async fn upsert_by(
        &self,
        collection: &str,
        key_field: &str,
        mut document: Document,
    ) -> Result<(), StorageError> {
        let key = document.get_by_path(key_field).unwrap_or(Value::Null);
        let filter = doc! { key_field: to_bson(&key) };
        let coll = self.collection(collection);

        match coll.find_one(filter.clone(), None).await? {
            Some(existing) => {
                if let Some(Bson::ObjectId(oid)) = existing.get("_id") {
                    document.id = ObjectId::from_bytes(oid.bytes());
                }
                coll.replace_one(filter, to_bson_document(&document), None)
                    .await?;
            }
            None => {
                coll.insert_one(to_bson_document(&document), None).await?;
            }
        }
        Ok(())
    }
}
