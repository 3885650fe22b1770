// ABOUTME: SQLite-backed document store for durable mirrors
// ABOUTME: Stores each document as JSON text keyed by its primary key; counts with COUNT(*)

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{merge_fields, with_identity, DocumentStore, Row, StoreError};

/// Document store persisted in a single SQLite table.
///
/// Has no fast count, so the delete gate falls back to a count-all query.
pub struct SqliteStore {
    table: String,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and ensure `table` exists.
    pub fn open(path: impl AsRef<Path>, table: &str) -> Result<Self, StoreError> {
        let path = path.as_ref();
        validate_table_name(table)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Backend(format!(
                        "failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.execute_batch(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (
                key  TEXT PRIMARY KEY,
                doc  TEXT NOT NULL
            )"#,
            table
        ))?;
        tracing::debug!("Opened SQLite store {} table {}", path.display(), table);
        Ok(Self {
            table: table.to_string(),
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database; mostly useful in tests.
    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{}" (key TEXT PRIMARY KEY, doc TEXT NOT NULL)"#,
            table
        ))?;
        Ok(Self {
            table: table.to_string(),
            conn: Mutex::new(conn),
        })
    }

    fn read_doc(&self, conn: &Connection, key: &str) -> Result<Option<Row>, StoreError> {
        let text: Option<String> = conn
            .query_row(
                &format!(r#"SELECT doc FROM "{}" WHERE key = ?1"#, self.table),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        text.map(|t| {
            serde_json::from_str::<Row>(&t).map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Row>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        self.read_doc(&conn, key)
    }

    fn upsert(&self, key: &str, fields: &Row) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let doc = match self.read_doc(&conn, key)? {
            Some(mut existing) => {
                merge_fields(&mut existing, key, fields);
                existing
            }
            None => with_identity(key, fields),
        };
        let text = serde_json::to_string(&doc).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })?;
        conn.execute(
            &format!(
                r#"INSERT INTO "{}"(key, doc) VALUES (?1, ?2)
                   ON CONFLICT(key) DO UPDATE SET doc = excluded.doc"#,
                self.table
            ),
            params![key, text],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let deleted = conn.execute(
            &format!(r#"DELETE FROM "{}" WHERE key = ?1"#, self.table),
            [key],
        )?;
        Ok(deleted > 0)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(&format!(r#"SELECT key FROM "{}""#, self.table))?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let count: i64 = conn.query_row(
            &format!(r#"SELECT COUNT(*) FROM "{}""#, self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let valid = !table.is_empty()
        && table.len() <= 63
        && table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::Backend(format!(
            "invalid table name '{}': use letters, digits and underscores",
            table
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("users").is_ok());
        assert!(validate_table_name("_mirror_2").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1users").is_err());
        assert!(validate_table_name("users; DROP TABLE x").is_err());
    }

    #[test]
    fn test_upsert_get_remove() {
        let store = SqliteStore::open_in_memory("docs").unwrap();
        store.upsert("1", &row(json!({"id": 1, "name": "a"}))).unwrap();
        store.upsert("1", &row(json!({"name": "b"}))).unwrap();

        let doc = store.get("1").unwrap().unwrap();
        assert_eq!(doc["name"], json!("b"));
        assert_eq!(doc["id"], json!(1));
        assert_eq!(doc["_id"], json!("1"));

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.keys().unwrap(), vec!["1".to_string()]);
        assert!(store.remove("1").unwrap());
        assert!(store.get("1").unwrap().is_none());
        assert!(store.fast_count().is_none());
    }

    #[test]
    fn test_row_id_column_does_not_replace_identity() {
        let store = SqliteStore::open_in_memory("docs").unwrap();
        store.upsert("7", &row(json!({"id": 7, "_id": "a"}))).unwrap();
        store.upsert("7", &row(json!({"id": 7, "_id": "b", "name": "n"}))).unwrap();
        let doc = store.get("7").unwrap().unwrap();
        assert_eq!(doc["_id"], json!("7"));
        assert_eq!(doc["name"], json!("n"));
    }
}
