// ABOUTME: In-memory document store backed by a keyed index
// ABOUTME: Optionally decorated with CountingIndex for an O(1) live count

use std::collections::HashMap;
use std::sync::RwLock;

use super::index::{CountingIndex, KeyIndex};
use super::{merge_fields, with_identity, DocumentStore, Row, StoreError};

type DocIndex = Box<dyn KeyIndex<Value = Row> + Send + Sync>;

/// Process-local document store.
pub struct MemoryStore {
    docs: RwLock<DocIndex>,
}

impl MemoryStore {
    /// Create an empty store. With `fast_count` the index is wrapped in a
    /// [`CountingIndex`] so the delete gate never scans.
    pub fn new(fast_count: bool) -> Self {
        if fast_count {
            Self::with_index(CountingIndex::new(HashMap::<String, Row>::new()))
        } else {
            Self::with_index(HashMap::<String, Row>::new())
        }
    }

    /// Create a store over a caller-chosen index.
    pub fn with_index<I>(index: I) -> Self
    where
        I: KeyIndex<Value = Row> + Send + Sync + 'static,
    {
        Self {
            docs: RwLock::new(Box::new(index)),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Row>, StoreError> {
        let docs = self.docs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.get(key).cloned())
    }

    fn upsert(&self, key: &str, fields: &Row) -> Result<(), StoreError> {
        let mut docs = self.docs.write().map_err(|_| StoreError::Poisoned)?;
        match docs.get_mut(key) {
            Some(existing) => merge_fields(existing, key, fields),
            None => {
                docs.insert(key.to_string(), with_identity(key, fields));
            }
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut docs = self.docs.write().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let docs = self.docs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.keys())
    }

    fn count(&self) -> Result<usize, StoreError> {
        let docs = self.docs.read().map_err(|_| StoreError::Poisoned)?;
        Ok(docs.keys().len())
    }

    fn fast_count(&self) -> Option<usize> {
        self.docs.read().ok().and_then(|docs| docs.live_count())
    }
}
