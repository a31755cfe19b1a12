//! Document store seam: JSON documents addressed by `(collection, id)`.
//!
//! [`DocumentStore`] is the only way the rest of the crate touches stored data.
//! Operations are single-document and non-transactional; callers that read then write
//! (the join routine) get no isolation from other writers.
//! [`InMemoryStore`] backs tests, the local server, and file persistence.

use crate::error::StoreError;
use crate::types::{GenderCounts, UserProfile, UsernameRecord, Uid, GENDER_COUNTS, STATS, USERNAMES, USERS};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// One stored document: a JSON object.
pub type Document = Map<String, Value>;

/// All documents, by collection then id. Used for snapshots.
pub type Collections = BTreeMap<String, BTreeMap<String, Document>>;

/// Request/response document store.
pub trait DocumentStore: Send + Sync {
    /// Reads one document. `Ok(None)` if it does not exist.
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Creates or overwrites a document.
    fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError>;

    /// Creates the document if missing, then overwrites only the given fields.
    fn merge(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError>;

    /// Overwrites the given fields of an existing document. Fails with `NotFound` if missing.
    fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError>;

    /// Adds `delta` to a numeric field, creating the document and field (as 0) if missing.
    /// Returns the new value.
    fn increment(&self, collection: &str, id: &str, field: &str, delta: i64) -> Result<i64, StoreError>;

    /// All documents in a collection, ordered by id.
    fn list(&self, collection: &str) -> Result<Vec<(String, Document)>, StoreError>;

    /// First document whose fields equal every filter value, ordered ascending by `order_by`
    /// (documents missing `order_by` are skipped), ties broken by id.
    fn query_first(
        &self,
        collection: &str,
        filters: &[(&str, Value)],
        order_by: &str,
    ) -> Result<Option<(String, Document)>, StoreError>;

    /// Copy of every document (for persistence).
    fn snapshot(&self) -> Result<Collections, StoreError>;

    /// Replaces all documents with `collections`.
    fn restore(&self, collections: Collections) -> Result<(), StoreError>;
}

/// Mutex-guarded in-process store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: Mutex<Collections>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Collections>, StoreError> {
        self.collections
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }
}

/// Orders JSON values of the same kind; numbers numerically, strings lexically.
fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

impl DocumentStore for InMemoryStore {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.get(collection).and_then(|c| c.get(id)).cloned())
    }

    fn set(&self, collection: &str, id: &str, doc: Document) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        guard
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    fn merge(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let doc = guard
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();
        for (k, v) in fields {
            doc.insert(k, v);
        }
        Ok(())
    }

    fn update(&self, collection: &str, id: &str, fields: Document) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let doc = guard
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        for (k, v) in fields {
            doc.insert(k, v);
        }
        Ok(())
    }

    fn increment(&self, collection: &str, id: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let mut guard = self.lock()?;
        let doc = guard
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();
        let current = match doc.get(field) {
            None | Some(Value::Null) => 0,
            Some(v) => v.as_i64().ok_or_else(|| StoreError::NotNumeric {
                collection: collection.to_string(),
                id: id.to_string(),
                field: field.to_string(),
            })?,
        };
        let next = current.checked_add(delta).ok_or_else(|| StoreError::Malformed {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: format!("{} overflows adding {}", field, delta),
        })?;
        doc.insert(field.to_string(), Value::from(next));
        Ok(next)
    }

    fn list(&self, collection: &str) -> Result<Vec<(String, Document)>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .get(collection)
            .map(|c| c.iter().map(|(id, d)| (id.clone(), d.clone())).collect())
            .unwrap_or_default())
    }

    fn query_first(
        &self,
        collection: &str,
        filters: &[(&str, Value)],
        order_by: &str,
    ) -> Result<Option<(String, Document)>, StoreError> {
        let guard = self.lock()?;
        let Some(docs) = guard.get(collection) else {
            return Ok(None);
        };
        // BTreeMap iteration is id-ordered, and min_by keeps the first minimum: ties go to the lower id.
        let best = docs
            .iter()
            .filter(|(_, d)| filters.iter().all(|(f, want)| d.get(*f) == Some(want)))
            .filter_map(|(id, d)| d.get(order_by).map(|key| (id, d, key)))
            .min_by(|a, b| compare_values(a.2, b.2));
        Ok(best.map(|(id, d, _)| (id.clone(), d.clone())))
    }

    fn snapshot(&self) -> Result<Collections, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn restore(&self, collections: Collections) -> Result<(), StoreError> {
        *self.lock()? = collections;
        Ok(())
    }
}

/// Converts a serializable value into a [`Document`].
pub fn to_document<T: serde::Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Malformed {
            collection: String::new(),
            id: String::new(),
            reason: "value is not an object".into(),
        }),
        Err(e) => Err(StoreError::Malformed {
            collection: String::new(),
            id: String::new(),
            reason: e.to_string(),
        }),
    }
}

fn from_document<T: serde::de::DeserializeOwned>(
    collection: &str,
    id: &str,
    doc: Document,
) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(doc)).map_err(|e| StoreError::Malformed {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// Builds a [`Document`] from `(field, value)` pairs.
pub fn fields<I, K>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Reads `users/{uid}`.
pub fn load_profile(store: &dyn DocumentStore, uid: &Uid) -> Result<Option<UserProfile>, StoreError> {
    match store.get(USERS, uid.as_str())? {
        Some(doc) => from_document(USERS, uid.as_str(), doc).map(Some),
        None => Ok(None),
    }
}

/// Reads `usernames/{username}`; `username` must already be lower-cased.
pub fn load_username(store: &dyn DocumentStore, username: &str) -> Result<Option<UsernameRecord>, StoreError> {
    match store.get(USERNAMES, username)? {
        Some(doc) => from_document(USERNAMES, username, doc).map(Some),
        None => Ok(None),
    }
}

/// Reads `stats/genderCounts`; a missing document is all zeros.
pub fn load_counts(store: &dyn DocumentStore) -> Result<GenderCounts, StoreError> {
    match store.get(STATS, GENDER_COUNTS)? {
        Some(doc) => from_document(STATS, GENDER_COUNTS, doc),
        None => Ok(GenderCounts::default()),
    }
}
