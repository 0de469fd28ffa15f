//! File-backed local document store
//!
//! Collections live in memory behind a read-write lock. With a data directory,
//! each collection is a snapshot `<dir>/collections/<name>.json` plus a journal
//! `<name>.<generation>.jsonl` of documents inserted since that snapshot.
//! Inserts append to the journal; every other mutation rewrites the snapshot
//! through a temporary file and starts a new journal generation. A mutation
//! whose write fails leaves the in-memory collection unchanged.

use crate::document::{Document, Value};
use crate::schema::IndexDefinition;
use crate::storage::{Collection, DocumentStore, InsertManyOutcome, StorageError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const COLLECTIONS_DIR: &str = "collections";

/// Local destination store
#[derive(Clone)]
pub struct LocalStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
    data_dir: Option<PathBuf>,
}

impl LocalStore {
    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            data_dir: None,
        }
    }

    /// Open (or create) a store persisted under `data_dir`
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let collections_dir = data_dir.join(COLLECTIONS_DIR);
        std::fs::create_dir_all(&collections_dir)?;

        let mut collections = HashMap::new();
        let mut journals = Vec::new();
        for entry in std::fs::read_dir(&collections_dir)? {
            let path = entry?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {
                    let raw = std::fs::read_to_string(&path)?;
                    let mut collection: Collection = serde_json::from_str(&raw)?;
                    collection.reindex()?;
                    collections.insert(collection.name().to_string(), collection);
                }
                Some("jsonl") => journals.push(path),
                _ => {}
            }
        }

        let current: HashSet<PathBuf> = collections
            .values()
            .map(|c| journal_path(&collections_dir, c.name(), c.generation()))
            .collect();
        for path in journals {
            if !current.contains(&path) {
                remove_stale_journal(&path);
            }
        }

        for collection in collections.values_mut() {
            let path = journal_path(&collections_dir, collection.name(), collection.generation());
            let replayed = if path.exists() {
                replay_journal(collection, &path)?
            } else {
                0
            };
            debug!(
                collection = collection.name(),
                documents = collection.document_count(),
                replayed,
                "Loaded collection"
            );
        }

        info!(
            "Opened local store at {:?} ({} collections)",
            data_dir,
            collections.len()
        );

        Ok(Self {
            collections: Arc::new(RwLock::new(collections)),
            data_dir: Some(data_dir),
        })
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Names of all collections, sorted
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Indexes currently active on a collection
    pub fn indexes(&self, collection: &str) -> Vec<IndexDefinition> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.indexes().to_vec())
            .unwrap_or_default()
    }

    /// Run `f` on a copy of a collection (created on demand), write the copy
    /// as the new snapshot and only then swap it in
    fn mutate<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        let mut collections = self.collections.write();
        let current = collections
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(name));
        let Some(dir) = &self.data_dir else {
            return f(current);
        };

        let mut staged = current.clone();
        let result = f(&mut staged)?;
        write_snapshot(dir, &mut staged)?;
        *current = staged;
        Ok(result)
    }

    /// Insert into memory, then append the inserted documents to the journal.
    /// A failed append takes the documents back out.
    fn append(
        &self,
        name: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyOutcome, StorageError> {
        let mut collections = self.collections.write();
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(name));
        let Some(dir) = &self.data_dir else {
            return Ok(collection.insert_many(documents));
        };

        if collection.generation() == 0 {
            let mut staged = collection.clone();
            write_snapshot(dir, &mut staged)?;
            *collection = staged;
        }

        let before = collection.documents().len();
        let outcome = collection.insert_many(documents);
        let path = journal_path(
            &dir.join(COLLECTIONS_DIR),
            collection.name(),
            collection.generation(),
        );
        if let Err(e) = append_journal(&path, &collection.documents()[before..]) {
            collection.truncate(before);
            return Err(e);
        }
        Ok(outcome)
    }
}

fn journal_path(collections_dir: &Path, name: &str, generation: u64) -> PathBuf {
    collections_dir.join(format!("{name}.{generation}.jsonl"))
}

/// Bump the generation of `staged` and write it whole
fn write_snapshot(data_dir: &Path, staged: &mut Collection) -> Result<(), StorageError> {
    let previous = staged.generation();
    staged.next_generation();

    let dir = data_dir.join(COLLECTIONS_DIR);
    let target = dir.join(format!("{}.json", staged.name()));
    let tmp = dir.join(format!("{}.json.tmp", staged.name()));
    std::fs::write(&tmp, serde_json::to_vec(staged)?)?;
    std::fs::rename(&tmp, &target)?;

    remove_stale_journal(&journal_path(&dir, staged.name(), previous));
    Ok(())
}

/// Journals of older generations are ignored on open, so failing to delete
/// one only costs disk space
fn remove_stale_journal(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed journal {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove stale journal {:?}: {}", path, e),
    }
}

fn append_journal(path: &Path, documents: &[Document]) -> Result<(), StorageError> {
    if documents.is_empty() {
        return Ok(());
    }
    let mut buf = Vec::new();
    for doc in documents {
        serde_json::to_writer(&mut buf, doc)?;
        buf.push(b'\n');
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    if let Err(e) = file.write_all(&buf).and_then(|()| file.flush()) {
        if let Err(trim) = file.set_len(len) {
            warn!("Failed to trim journal {:?} after a failed append: {}", path, trim);
        }
        return Err(e.into());
    }
    Ok(())
}

fn replay_journal(collection: &mut Collection, path: &Path) -> Result<usize, StorageError> {
    let mut documents = Vec::new();
    for line in BufReader::new(File::open(path)?).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        documents.push(serde_json::from_str::<Document>(&line)?);
    }
    Ok(collection.insert_many(documents).inserted_count())
}

#[async_trait]
impl DocumentStore for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn clear_collection(&self, collection: &str) -> Result<u64, StorageError> {
        self.mutate(collection, |c| Ok(c.clear()))
    }

    async fn drop_indexes(&self, collection: &str) -> Result<(), StorageError> {
        self.mutate(collection, |c| {
            c.drop_indexes();
            Ok(())
        })
    }

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexDefinition],
    ) -> Result<(), StorageError> {
        self.mutate(collection, |c| c.create_indexes(indexes))
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyOutcome, StorageError> {
        self.append(collection, documents)
    }

    async fn count(&self, collection: &str) -> Result<u64, StorageError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, Collection::document_count))
    }

    async fn count_embedded(
        &self,
        collection: &str,
        array_field: &str,
    ) -> Result<u64, StorageError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, |c| c.count_embedded(array_field)))
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StorageError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.documents().to_vec())
            .unwrap_or_default())
    }

    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, StorageError> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.find_one(field, value).cloned()))
    }

    async fn upsert_by(
        &self,
        collection: &str,
        key_field: &str,
        document: Document,
    ) -> Result<(), StorageError> {
        self.mutate(collection, |c| c.upsert_by(key_field, document))
    }
}
