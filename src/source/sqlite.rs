// ABOUTME: SQLite query fetcher - runs a SQL query and returns rows as JSON objects
// ABOUTME: Handles all SQLite types with lossless conversion and BLOB base64 encoding

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use futures::future::BoxFuture;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value as JsonValue;

use super::Fetcher;
use crate::store::Row;

/// Fetches snapshots by running a SQL query against a SQLite database.
///
/// Supports the `query` method: `args[0]` is the SQL text and the remaining
/// args are bound as positional parameters.
pub struct SqliteSource {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSource {
    /// Open a database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open SQLite source {}", path.display()))?;
        Ok(Self::from_connection(path, conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(path: impl AsRef<Path>, conn: Connection) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        }
    }

}

impl Fetcher for SqliteSource {
    fn fetch<'a>(
        &'a self,
        method: &'a str,
        args: &'a [JsonValue],
    ) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move {
            if method != "query" {
                bail!("SQLite source does not support method '{}'", method);
            }
            let (sql, params) = args
                .split_first()
                .ok_or_else(|| anyhow!("SQLite query requires the SQL text as first argument"))?;
            let sql = sql
                .as_str()
                .ok_or_else(|| anyhow!("SQLite query text must be a string, got {}", sql))?
                .to_string();
            let params = params
                .iter()
                .map(json_to_sqlite_value)
                .collect::<Result<Vec<SqlValue>>>()?;

            let conn = Arc::clone(&self.conn);
            tokio::task::spawn_blocking(move || {
                let conn = conn
                    .lock()
                    .map_err(|_| anyhow!("SQLite source connection lock poisoned"))?;
                run_query(&conn, &sql, &params)
            })
            .await
            .context("SQLite fetch task failed")?
            .with_context(|| format!("Query against {} failed", self.path.display()))
        })
    }
}

/// Run `sql` and convert every result row to a JSON object keyed by column name.
pub fn run_query(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("Failed to prepare source query: {}", sql))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .context("Failed to execute source query")?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().context("Failed to read source row")? {
        let mut obj = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            let value: SqlValue = row
                .get(idx)
                .with_context(|| format!("Failed to read column '{}'", name))?;
            let json = sqlite_value_to_json(&value)
                .with_context(|| format!("Failed to convert column '{}' to JSON", name))?;
            obj.insert(name.clone(), json);
        }
        out.push(obj);
    }

    tracing::debug!("SQLite source query returned {} rows", out.len());
    Ok(out)
}

/// Convert a single SQLite value to JSON
///
/// - INTEGER → number (i64)
/// - REAL → number (f64), non-finite values as strings
/// - TEXT → string
/// - BLOB → `{"_type": "blob", "data": "<base64>"}`
/// - NULL → null
pub fn sqlite_value_to_json(value: &SqlValue) -> Result<JsonValue> {
    match value {
        SqlValue::Null => Ok(JsonValue::Null),
        SqlValue::Integer(i) => Ok(JsonValue::Number((*i).into())),
        SqlValue::Real(f) => {
            if f.is_finite() {
                serde_json::Number::from_f64(*f)
                    .map(JsonValue::Number)
                    .ok_or_else(|| anyhow!("Failed to convert float {} to JSON number", f))
            } else {
                Ok(JsonValue::String(f.to_string()))
            }
        }
        SqlValue::Text(s) => Ok(JsonValue::String(s.clone())),
        SqlValue::Blob(b) => {
            let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b);
            Ok(serde_json::json!({
                "_type": "blob",
                "data": encoded
            }))
        }
    }
}

/// Convert a JSON query argument to a bindable SQLite value.
fn json_to_sqlite_value(value: &JsonValue) -> Result<SqlValue> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                bail!("Unsupported numeric query argument: {}", n)
            }
        }
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        other => bail!("Unsupported query argument: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source_with_rows() -> SqliteSource {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, avatar BLOB);
             INSERT INTO users VALUES (1, 'a', 1.5, NULL);
             INSERT INTO users VALUES (2, 'b', NULL, x'0102');",
        )
        .unwrap();
        SqliteSource::from_connection(":memory:", conn)
    }

    #[test]
    fn test_sqlite_value_to_json() {
        assert_eq!(sqlite_value_to_json(&SqlValue::Integer(42)).unwrap(), json!(42));
        assert_eq!(sqlite_value_to_json(&SqlValue::Real(1.5)).unwrap(), json!(1.5));
        assert_eq!(
            sqlite_value_to_json(&SqlValue::Real(f64::INFINITY)).unwrap(),
            json!("inf")
        );
        assert_eq!(sqlite_value_to_json(&SqlValue::Null).unwrap(), json!(null));
        assert_eq!(
            sqlite_value_to_json(&SqlValue::Blob(vec![1, 2])).unwrap(),
            json!({"_type": "blob", "data": "AQI="})
        );
    }

    #[tokio::test]
    async fn test_fetch_rows() {
        let source = source_with_rows();
        let args = vec![json!("SELECT id, name, avatar FROM users ORDER BY id")];
        let rows = source.fetch("query", &args).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["name"], json!("a"));
        assert_eq!(rows[1]["avatar"]["_type"], json!("blob"));
    }

    #[tokio::test]
    async fn test_fetch_binds_params() {
        let source = source_with_rows();
        let args = vec![json!("SELECT id FROM users WHERE name = ?1"), json!("b")];
        let rows = source.fetch("query", &args).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(2));
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_calls() {
        let source = source_with_rows();
        assert!(source.fetch("get", &[json!("SELECT 1")]).await.is_err());
        assert!(source.fetch("query", &[]).await.is_err());
        assert!(source.fetch("query", &[json!(1)]).await.is_err());
        assert!(source
            .fetch("query", &[json!("SELECT * FROM missing")])
            .await
            .is_err());
    }
}
