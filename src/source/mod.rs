// ABOUTME: External data sources that produce full row snapshots
// ABOUTME: Fetcher trait, closure-backed fetcher, and the DataSource builder

pub mod rest;
pub mod sqlite;

use std::sync::Arc;

use anyhow::Result;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::store::Row;

pub use rest::RestSource;
pub use sqlite::SqliteSource;

/// Default fetch method name.
pub const DEFAULT_METHOD: &str = "query";
/// Default primary key field.
pub const DEFAULT_PRIMARY_KEY: &str = "id";
/// Default poll delay in seconds.
pub const DEFAULT_DELAY_SECONDS: u64 = 10;

/// A connection that returns the full current snapshot of rows.
///
/// `method` selects the operation on the connection (e.g. `query`) and
/// `args` are the fixed arguments given at registration.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, method: &'a str, args: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>>;
}

/// Fetcher over a synchronous closure. Method and args are ignored; the
/// closure captures whatever it needs.
pub struct FnFetcher<F> {
    f: F,
}

impl<F> FnFetcher<F>
where
    F: Fn() -> Result<Vec<Row>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Fetcher for FnFetcher<F>
where
    F: Fn() -> Result<Vec<Row>> + Send + Sync,
{
    fn fetch<'a>(&'a self, _method: &'a str, _args: &'a [Value]) -> BoxFuture<'a, Result<Vec<Row>>> {
        Box::pin(async move { (self.f)() })
    }
}

/// Describes how to poll one external feed.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use collection_replicator::source::{DataSource, SqliteSource};
/// # fn example() -> anyhow::Result<()> {
/// let conn = Arc::new(SqliteSource::open("orders.db")?);
/// let ds = DataSource::with_method(conn, "query", 30)
///     .id("order_id")
///     .args(vec!["SELECT * FROM orders".into()]);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DataSource {
    pub connection: Arc<dyn Fetcher>,
    pub method: String,
    pub primary_key: String,
    pub delay_seconds: u64,
    pub args: Vec<Value>,
}

impl DataSource {
    /// Data source with method `query`, a 10 second delay and key field `id`.
    pub fn new(connection: Arc<dyn Fetcher>) -> Self {
        Self {
            connection,
            method: DEFAULT_METHOD.to_string(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            delay_seconds: DEFAULT_DELAY_SECONDS,
            args: Vec::new(),
        }
    }

    /// Data source with an explicit method and delay. An empty method or a
    /// zero delay falls back to the defaults.
    pub fn with_method(connection: Arc<dyn Fetcher>, method: &str, delay_seconds: u64) -> Self {
        let mut ds = Self::new(connection);
        if !method.is_empty() {
            ds.method = method.to_string();
        }
        if delay_seconds > 0 {
            ds.delay_seconds = delay_seconds;
        }
        ds
    }

    /// Override the primary key field name.
    pub fn id(mut self, field: &str) -> Self {
        self.primary_key = field.to_string();
        self
    }

    /// Fixed arguments passed to every fetch.
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("method", &self.method)
            .field("primary_key", &self.primary_key)
            .field("delay_seconds", &self.delay_seconds)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Collect JSON objects into rows, rejecting anything else.
pub(crate) fn rows_from_values(values: Vec<Value>) -> Result<Vec<Row>> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!("row {} is not a JSON object: {}", i, other),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn empty_fetcher() -> Arc<dyn Fetcher> {
        Arc::new(FnFetcher::new(|| Ok(Vec::new())))
    }

    #[test]
    fn test_data_source_defaults() {
        let ds = DataSource::new(empty_fetcher());
        assert_eq!(ds.method, "query");
        assert_eq!(ds.primary_key, "id");
        assert_eq!(ds.delay_seconds, 10);
        assert!(ds.args.is_empty());
    }

    #[test]
    fn test_data_source_with_method_falls_back() {
        let ds = DataSource::with_method(empty_fetcher(), "", 0);
        assert_eq!(ds.method, "query");
        assert_eq!(ds.delay_seconds, 10);

        let ds = DataSource::with_method(empty_fetcher(), "get", 60);
        assert_eq!(ds.method, "get");
        assert_eq!(ds.delay_seconds, 60);
    }

    #[test]
    fn test_data_source_id_override() {
        let ds = DataSource::new(empty_fetcher()).id("sku");
        assert_eq!(ds.primary_key, "sku");
    }

    #[tokio::test]
    async fn test_fn_fetcher_returns_rows() {
        let fetcher = FnFetcher::new(|| rows_from_values(vec![json!({"id": 1})]));
        let rows = fetcher.fetch("query", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!(1));
    }

    #[test]
    fn test_rows_from_values_rejects_scalars() {
        assert!(rows_from_values(vec![json!({"id": 1}), json!(2)]).is_err());
    }
}
