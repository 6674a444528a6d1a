use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::domain::{DayKey, generate_id};

/// A stored document: a flat JSON object of named fields.
pub type Document = Map<String, Value>;

/// Placeholder a writer puts in a field to have the store stamp the write time.
pub const SERVER_TIMESTAMP: &str = "$serverTimestamp";

const DOCUMENT_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse document {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode document {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no document to update: {0}")]
    NotFound(String),
    #[error("invalid document path: {0}")]
    InvalidPath(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed documents grouped in collections, addressed by slash paths such as
/// `users/{uid}/days/{date}`. Documents sit at even-length paths, collections
/// at odd-length ones.
pub trait DocumentStore {
    fn get(&self, path: &str) -> Result<Option<Document>, StorageError>;

    /// Writes `fields` over the document, creating it if needed. Fields not
    /// named in `fields` are left untouched.
    fn set_merge(&self, path: &str, fields: Document) -> Result<(), StorageError>;

    /// Creates a document with a store-assigned id and returns the id.
    fn add(&self, collection: &str, fields: Document) -> Result<String, StorageError>;

    /// Like `set_merge`, but fails with `NotFound` when the document is missing.
    fn update(&self, path: &str, fields: Document) -> Result<(), StorageError>;

    /// Deleting a missing document succeeds.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Every document of a collection, ascending by the numeric field
    /// `order_by`. Documents where the field is missing or not a number come
    /// last; ties are broken by id.
    fn query_ordered(
        &self,
        collection: &str,
        order_by: &str,
    ) -> Result<Vec<(String, Document)>, StorageError>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn get(&self, path: &str) -> Result<Option<Document>, StorageError> {
        (**self).get(path)
    }

    fn set_merge(&self, path: &str, fields: Document) -> Result<(), StorageError> {
        (**self).set_merge(path, fields)
    }

    fn add(&self, collection: &str, fields: Document) -> Result<String, StorageError> {
        (**self).add(collection, fields)
    }

    fn update(&self, path: &str, fields: Document) -> Result<(), StorageError> {
        (**self).update(path, fields)
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        (**self).delete(path)
    }

    fn query_ordered(
        &self,
        collection: &str,
        order_by: &str,
    ) -> Result<Vec<(String, Document)>, StorageError> {
        (**self).query_ordered(collection, order_by)
    }
}

pub fn days_path(user_id: &str) -> String {
    format!("users/{user_id}/days")
}

pub fn day_path(day: &DayKey) -> String {
    format!("{}/{}", days_path(&day.user_id), day.date_id())
}

pub fn activities_path(day: &DayKey) -> String {
    format!("{}/activities", day_path(day))
}

pub fn activity_path(day: &DayKey, activity_id: &str) -> String {
    format!("{}/{activity_id}", activities_path(day))
}

/// Replaces every `SERVER_TIMESTAMP` placeholder with the current UTC time.
pub fn resolve_server_timestamps(fields: &mut Document) {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    for value in fields.values_mut() {
        if value.as_str() == Some(SERVER_TIMESTAMP) {
            *value = Value::String(now.clone());
        }
    }
}

fn document_segments(path: &str) -> Result<Vec<&str>, StorageError> {
    let segments = path_segments(path)?;
    if segments.len() % 2 != 0 {
        return Err(StorageError::InvalidPath(format!("{path} is not a document path")));
    }
    Ok(segments)
}

fn collection_segments(path: &str) -> Result<Vec<&str>, StorageError> {
    let segments = path_segments(path)?;
    if segments.len() % 2 != 1 {
        return Err(StorageError::InvalidPath(format!("{path} is not a collection path")));
    }
    Ok(segments)
}

fn path_segments(path: &str) -> Result<Vec<&str>, StorageError> {
    let segments = path.split('/').collect::<Vec<_>>();
    let valid = segments.iter().all(|segment| {
        !segment.trim().is_empty()
            && !segment.contains(['\\', '.'])
            && !segment.chars().any(char::is_control)
    });
    if valid {
        Ok(segments)
    } else {
        Err(StorageError::InvalidPath(path.to_string()))
    }
}

fn sort_by_field(rows: &mut [(String, Document)], field: &str) {
    rows.sort_by(|left, right| {
        compare_field(left.1.get(field), right.1.get(field)).then_with(|| left.0.cmp(&right.0))
    });
}

fn compare_field(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left.and_then(Value::as_f64), right.and_then(Value::as_f64)) {
        (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn merge_into(target: &mut Document, fields: Document) {
    for (key, value) in fields {
        target.insert(key, value);
    }
}

/// Process-local store, used by tests and for embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<String, Document>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, path: &str) -> Result<Option<Document>, StorageError> {
        document_segments(path)?;
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(path).cloned())
    }

    fn set_merge(&self, path: &str, mut fields: Document) -> Result<(), StorageError> {
        document_segments(path)?;
        resolve_server_timestamps(&mut fields);
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        merge_into(documents.entry(path.to_string()).or_default(), fields);
        debug!(path, "document merged");
        Ok(())
    }

    fn add(&self, collection: &str, mut fields: Document) -> Result<String, StorageError> {
        collection_segments(collection)?;
        resolve_server_timestamps(&mut fields);
        let id = generate_id();
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.insert(format!("{collection}/{id}"), fields);
        debug!(collection, id = %id, "document added");
        Ok(id)
    }

    fn update(&self, path: &str, mut fields: Document) -> Result<(), StorageError> {
        document_segments(path)?;
        resolve_server_timestamps(&mut fields);
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let document = documents
            .get_mut(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        merge_into(document, fields);
        debug!(path, "document updated");
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        document_segments(path)?;
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        documents.remove(path);
        debug!(path, "document deleted");
        Ok(())
    }

    fn query_ordered(
        &self,
        collection: &str,
        order_by: &str,
    ) -> Result<Vec<(String, Document)>, StorageError> {
        collection_segments(collection)?;
        let prefix = format!("{collection}/");
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        let mut rows = documents
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, document)| {
                let id = &path[prefix.len()..];
                if id.contains('/') {
                    None
                } else {
                    Some((id.to_string(), document.clone()))
                }
            })
            .collect::<Vec<_>>();
        sort_by_field(&mut rows, order_by);
        Ok(rows)
    }
}

/// One JSON file per document under a root directory. A document at
/// `a/b` lives in `<root>/a/b.json`; its sub-collections are directories
/// at `<root>/a/b/<collection>/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_file(&self, path: &str) -> Result<PathBuf, StorageError> {
        let segments = document_segments(path)?;
        let mut file = self.root.clone();
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        for segment in parents {
            file.push(segment);
        }
        file.push(format!("{last}.{DOCUMENT_EXTENSION}"));
        Ok(file)
    }

    fn collection_dir(&self, collection: &str) -> Result<PathBuf, StorageError> {
        let segments = collection_segments(collection)?;
        let mut dir = self.root.clone();
        for segment in segments {
            dir.push(segment);
        }
        Ok(dir)
    }

    fn read_document(&self, path: &str, file: &Path) -> Result<Option<Document>, StorageError> {
        let raw = match fs::read_to_string(file) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::Io {
                    path: file.to_path_buf(),
                    source,
                });
            }
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Decode {
                path: path.to_string(),
                source,
            })
    }

    fn write_document(&self, path: &str, file: &Path, document: &Document) -> Result<(), StorageError> {
        let io_error = |source| StorageError::Io {
            path: file.to_path_buf(),
            source,
        };

        if self.root.exists() && !self.root.is_dir() {
            return Err(StorageError::Unavailable(format!(
                "data directory {} is not a directory",
                self.root.display()
            )));
        }
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        let encoded = serde_json::to_string_pretty(document).map_err(|source| StorageError::Encode {
            path: path.to_string(),
            source,
        })?;
        let temp = file.with_extension(format!("{DOCUMENT_EXTENSION}.tmp"));
        let mut handle = fs::File::create(&temp).map_err(io_error)?;
        handle.write_all(encoded.as_bytes()).map_err(io_error)?;
        handle.write_all(b"\n").map_err(io_error)?;
        drop(handle);
        fs::rename(&temp, file).map_err(io_error)
    }

    fn merge_document(&self, path: &str, mut fields: Document, must_exist: bool) -> Result<(), StorageError> {
        let file = self.document_file(path)?;
        let mut document = match self.read_document(path, &file)? {
            Some(document) => document,
            None if must_exist => return Err(StorageError::NotFound(path.to_string())),
            None => Document::new(),
        };
        resolve_server_timestamps(&mut fields);
        merge_into(&mut document, fields);
        self.write_document(path, &file, &document)
    }
}

impl DocumentStore for FileStore {
    fn get(&self, path: &str) -> Result<Option<Document>, StorageError> {
        let file = self.document_file(path)?;
        self.read_document(path, &file)
    }

    fn set_merge(&self, path: &str, fields: Document) -> Result<(), StorageError> {
        self.merge_document(path, fields, false)?;
        debug!(path, "document merged");
        Ok(())
    }

    fn add(&self, collection: &str, mut fields: Document) -> Result<String, StorageError> {
        collection_segments(collection)?;
        let id = generate_id();
        let path = format!("{collection}/{id}");
        let file = self.document_file(&path)?;
        resolve_server_timestamps(&mut fields);
        self.write_document(&path, &file, &fields)?;
        debug!(collection, id = %id, "document added");
        Ok(id)
    }

    fn update(&self, path: &str, fields: Document) -> Result<(), StorageError> {
        self.merge_document(path, fields, true)?;
        debug!(path, "document updated");
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), StorageError> {
        let file = self.document_file(path)?;
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(StorageError::Io { path: file, source }),
        }
        debug!(path, "document deleted");
        Ok(())
    }

    fn query_ordered(
        &self,
        collection: &str,
        order_by: &str,
    ) -> Result<Vec<(String, Document)>, StorageError> {
        let dir = self.collection_dir(collection)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StorageError::Io { path: dir, source }),
        };

        let mut rows = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                path: dir.clone(),
                source,
            })?;
            let file = entry.path();
            if !file.is_file() || file.extension().and_then(|ext| ext.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(id) = file.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let path = format!("{collection}/{id}");
            if let Some(document) = self.read_document(&path, &file)? {
                rows.push((id.to_string(), document));
            }
        }

        sort_by_field(&mut rows, order_by);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::{Value, json};

    use super::{
        Document, DocumentStore, FileStore, MemoryStore, SERVER_TIMESTAMP, StorageError,
        activities_path, activity_path, day_path,
    };
    use crate::domain::DayKey;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("test documents must be objects"),
        }
    }

    fn day() -> DayKey {
        DayKey::new("u1", NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date"))
    }

    fn exercise_store(store: &dyn DocumentStore) {
        let day = day();
        let collection = activities_path(&day);

        let late = store
            .add(&collection, doc(json!({ "title": "late", "startMin": 900 })))
            .expect("add should succeed");
        let untimed = store
            .add(&collection, doc(json!({ "title": "untimed", "startMin": null })))
            .expect("add should succeed");
        let early = store
            .add(&collection, doc(json!({ "title": "early", "startMin": 60 })))
            .expect("add should succeed");

        let ids = store
            .query_ordered(&collection, "startMin")
            .expect("query should succeed")
            .into_iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![early.clone(), late.clone(), untimed]);

        store
            .set_merge(&day_path(&day), doc(json!({ "totalMinutes": 30, "note": "kept" })))
            .expect("merge should succeed");
        store
            .set_merge(&day_path(&day), doc(json!({ "totalMinutes": 45 })))
            .expect("merge should succeed");
        let day_doc = store
            .get(&day_path(&day))
            .expect("get should succeed")
            .expect("day document should exist");
        assert_eq!(day_doc.get("totalMinutes"), Some(&json!(45)));
        assert_eq!(day_doc.get("note"), Some(&json!("kept")));

        store
            .update(
                &activity_path(&day, &early),
                doc(json!({ "startMin": 1000, "updatedAt": SERVER_TIMESTAMP })),
            )
            .expect("update should succeed");
        let updated = store
            .get(&activity_path(&day, &early))
            .expect("get should succeed")
            .expect("activity should exist");
        assert_eq!(updated.get("title"), Some(&json!("early")));
        let stamp = updated
            .get("updatedAt")
            .and_then(Value::as_str)
            .expect("timestamp should be resolved");
        assert_ne!(stamp, SERVER_TIMESTAMP);

        let err = store
            .update(&activity_path(&day, "missing"), doc(json!({ "minutes": 1 })))
            .expect_err("update of missing document should fail");
        assert!(matches!(err, StorageError::NotFound(_)));

        store
            .delete(&activity_path(&day, &late))
            .expect("delete should succeed");
        store
            .delete(&activity_path(&day, &late))
            .expect("second delete should be a no-op");
        assert!(store
            .get(&activity_path(&day, &late))
            .expect("get should succeed")
            .is_none());

        let remaining = store
            .query_ordered(&collection, "startMin")
            .expect("query should succeed");
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].0, early);
    }

    #[test]
    fn memory_store_behaves_like_a_document_store() {
        exercise_store(&MemoryStore::new());
    }

    #[test]
    fn file_store_behaves_like_a_document_store() {
        let dir = tempfile::tempdir().expect("temp dir");
        exercise_store(&FileStore::new(dir.path()));
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("temp dir");
        let day = day();
        FileStore::new(dir.path())
            .set_merge(&day_path(&day), doc(json!({ "totalMinutes": 90 })))
            .expect("merge should succeed");

        let reopened = FileStore::new(dir.path());
        let day_doc = reopened
            .get(&day_path(&day))
            .expect("get should succeed")
            .expect("document should exist");
        assert_eq!(day_doc.get("totalMinutes"), Some(&json!(90)));
        assert!(dir.path().join("users/u1/days/2026-01-01.json").is_file());
    }

    #[test]
    fn day_query_ignores_sub_collections() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::new(dir.path());
        let day = day();
        store
            .set_merge(&day_path(&day), doc(json!({ "totalMinutes": 10 })))
            .expect("merge should succeed");
        store
            .add(&activities_path(&day), doc(json!({ "title": "x" })))
            .expect("add should succeed");

        let days = store
            .query_ordered("users/u1/days", "totalMinutes")
            .expect("query should succeed");
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].0, "2026-01-01");
    }

    #[test]
    fn memory_query_ignores_nested_documents() {
        let store = MemoryStore::new();
        let day = day();
        store
            .set_merge(&day_path(&day), doc(json!({ "totalMinutes": 10 })))
            .expect("merge should succeed");
        store
            .add(&activities_path(&day), doc(json!({ "title": "x" })))
            .expect("add should succeed");

        let days = store
            .query_ordered("users/u1/days", "totalMinutes")
            .expect("query should succeed");
        assert_eq!(days.len(), 1);
    }

    #[test]
    fn file_store_reports_unusable_root() {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let store = FileStore::new(file.path());
        let err = store
            .set_merge(&day_path(&day()), doc(json!({ "totalMinutes": 1 })))
            .expect_err("a plain file cannot hold documents");
        assert!(matches!(err, StorageError::Unavailable(_)));
    }

    #[test]
    fn rejects_malformed_paths() {
        let store = MemoryStore::new();
        for path in ["users/u1/days", "users//days/x", "users/../days/x", "", "users/u1/days/a.b"] {
            let err = store.get(path).expect_err("path should be rejected");
            assert!(matches!(err, StorageError::InvalidPath(_)), "{path}");
        }
        let err = store
            .query_ordered("users/u1", "startMin")
            .expect_err("document path is not a collection");
        assert!(matches!(err, StorageError::InvalidPath(_)));
    }
}
