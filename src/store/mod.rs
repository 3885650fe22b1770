// ABOUTME: Document store abstraction for mirrored collections
// ABOUTME: Defines rows, stored documents, the DocumentStore trait, and loose value coercion

pub mod index;
pub mod memory;
pub mod sqlite;

use serde_json::{Map, Value};
use thiserror::Error;

pub use index::{CountingIndex, KeyIndex};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A fetched row or a stored document: field name to JSON value.
pub type Row = Map<String, Value>;

/// Identity field every stored document carries, holding its key.
pub const ID_FIELD: &str = "_id";

/// Errors raised by a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to decode stored document {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

/// Keyed document storage that a source mirrors into.
///
/// Implementations must be safe to share between the scheduler task and
/// external callers writing out of band.
pub trait DocumentStore: Send + Sync {
    /// Look up the document stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Row>, StoreError>;

    /// Insert a document under `key`, or merge `fields` over the existing one.
    ///
    /// Fields already stored but absent from `fields` are left untouched.
    fn upsert(&self, key: &str, fields: &Row) -> Result<(), StoreError>;

    /// Remove the document under `key`. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Every key currently stored.
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Count every live document. May scan the whole store.
    fn count(&self) -> Result<usize, StoreError>;

    /// O(1) live count, when the store maintains one.
    fn fast_count(&self) -> Option<usize> {
        None
    }
}

/// Coerce a JSON value to the string form used for change detection.
///
/// Mirrors loose string concatenation: numbers `1` and `1.0` and the string
/// `"1"` all coerce to `"1"`, and every object coerces to the same text, so
/// nested differences are invisible.
pub fn coerce_to_string(value: Option<&Value>) -> String {
    match value {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => coerce_number(n),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => coerce_to_string(Some(other)),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Object(_)) => "[object Object]".to_string(),
    }
}

fn coerce_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => {
            format!("{}", f as i128)
        }
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Build the stored form of a document: the row's fields plus its identity.
pub(crate) fn with_identity(key: &str, fields: &Row) -> Row {
    let mut doc = fields.clone();
    doc.insert(ID_FIELD.to_string(), Value::String(key.to_string()));
    doc
}

/// Overlay a row's fields on a stored document. The identity field always
/// stays equal to the key, even if the row carries its own `_id` column.
pub(crate) fn merge_fields(doc: &mut Row, key: &str, fields: &Row) {
    for (field, value) in fields {
        if field != ID_FIELD {
            doc.insert(field.clone(), value.clone());
        }
    }
    doc.insert(ID_FIELD.to_string(), Value::String(key.to_string()));
}
