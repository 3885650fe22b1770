// ABOUTME: Reconciliation of one fetched snapshot into a document store
// ABOUTME: Upserts changed rows, gates delete detection on counts, and honors guarded keys

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::guard::SyncContext;
use crate::store::{coerce_to_string, DocumentStore, Row, StoreError, ID_FIELD};

/// Tunables for the sync engine's cooperative scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Yield after this many rows (upsert) or keys (delete)
    pub yield_every: usize,
    /// Pause at each yield point and after each source check
    pub yield_delay: Duration,
    /// Pause once per full round over all sources
    pub idle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            yield_every: 500,
            yield_delay: Duration::from_millis(10),
            idle_delay: Duration::from_millis(10),
        }
    }
}

impl EngineConfig {
    /// No pauses between yield points; used by tests and one-shot runs.
    pub fn immediate() -> Self {
        Self {
            yield_delay: Duration::ZERO,
            idle_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("row {index} has no primary key field '{field}'")]
    MissingPrimaryKey { index: usize, field: String },

    #[error("store write failed: {0}")]
    Store(#[from] StoreError),
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassOutcome {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Rows not written because the key was guarded
    pub skipped_guarded: usize,
    /// Whether the delete phase scanned the store's keys
    pub delete_scanned: bool,
    pub deleted: usize,
    pub duration_ms: u64,
}

impl PassOutcome {
    /// Number of writes the pass made.
    pub fn writes(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

/// Suspend the task so other work (e.g. out-of-band writes) can run.
pub(crate) async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

/// Whether any field of `row` differs from `stored` under string coercion.
///
/// Only the row's fields are compared; fields present only in the stored
/// document are ignored. The identity field is owned by the store and
/// never compared.
pub fn row_differs(row: &Row, stored: &Row) -> bool {
    row.iter()
        .filter(|(field, _)| field.as_str() != ID_FIELD)
        .any(|(field, value)| coerce_to_string(Some(value)) != coerce_to_string(stored.get(field)))
}

/// Converge `store` to match `rows`.
///
/// The caller must have opened a pass for `source` on `context`; keys guarded
/// on it are neither overwritten nor deleted. Any error aborts the rest of
/// the pass and leaves already committed writes in place.
pub async fn reconcile(
    source: &str,
    primary_key: &str,
    rows: &[Row],
    store: &dyn DocumentStore,
    context: &SyncContext,
    config: &EngineConfig,
) -> Result<PassOutcome, ReconcileError> {
    let yield_every = config.yield_every.max(1);
    let mut outcome = PassOutcome {
        fetched: rows.len(),
        ..PassOutcome::default()
    };
    let mut seen: HashSet<String> = HashSet::with_capacity(rows.len());

    for (index, row) in rows.iter().enumerate() {
        if index % yield_every == 0 {
            pause(config.yield_delay).await;
        }

        let key = row
            .get(primary_key)
            .map(|v| coerce_to_string(Some(v)))
            .ok_or_else(|| ReconcileError::MissingPrimaryKey {
                index,
                field: primary_key.to_string(),
            })?;

        if context.is_modified(&key) {
            // Modified out of band; the local edit wins for this pass
            outcome.skipped_guarded += 1;
            seen.insert(key);
            continue;
        }

        match store.get(&key)? {
            None => {
                store.upsert(&key, row)?;
                outcome.inserted += 1;
            }
            Some(stored) if row_differs(row, &stored) => {
                store.upsert(&key, row)?;
                outcome.updated += 1;
            }
            Some(_) => outcome.unchanged += 1,
        }
        seen.insert(key);
    }

    let upserts = outcome.inserted + outcome.updated;
    if upserts > 0 {
        tracing::info!(
            "{} updated records: {} ({} new, {} changed)",
            source,
            upserts,
            outcome.inserted,
            outcome.updated
        );
    }

    // Equal counts are taken to mean nothing was removed. A same-size set
    // with different keys slips through until the counts diverge.
    let live = match store.fast_count() {
        Some(count) => count,
        None => store.count()?,
    };
    if live == rows.len() {
        tracing::debug!("{}: {} live documents match snapshot, skipping delete scan", source, live);
        return Ok(outcome);
    }

    outcome.delete_scanned = true;
    let to_delete: Vec<String> = store
        .keys()?
        .into_iter()
        .filter(|key| !seen.contains(key) && !context.is_modified(key))
        .collect();

    for (index, key) in to_delete.iter().enumerate() {
        if index % yield_every == 0 {
            pause(config.yield_delay).await;
        }
        // Guarded while we were suspended
        if context.is_modified(key) {
            continue;
        }
        if store.remove(key)? {
            outcome.deleted += 1;
        }
    }

    if outcome.deleted > 0 {
        tracing::info!("{} deleted records: {}", source, outcome.deleted);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.yield_every, 500);
        assert_eq!(config.yield_delay, Duration::from_millis(10));
        assert_eq!(config.idle_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_row_differs_uses_string_coercion() {
        let stored = row(json!({"_id": "1", "id": "1", "n": "2", "extra": true}));
        assert!(!row_differs(&row(json!({"id": 1, "n": 2})), &stored));
        assert!(row_differs(&row(json!({"id": 1, "n": 3})), &stored));
        assert!(row_differs(&row(json!({"id": 1, "missing": null})), &stored));
    }

    #[test]
    fn test_row_differs_ignores_identity_column() {
        let stored = row(json!({"_id": "1", "id": 1}));
        assert!(!row_differs(&row(json!({"_id": "other", "id": 1})), &stored));
    }

    #[test]
    fn test_row_differs_misses_nested_changes() {
        let stored = row(json!({"id": 1, "meta": {"a": 1}}));
        assert!(!row_differs(&row(json!({"id": 1, "meta": {"a": 2}})), &stored));
    }

    #[test]
    fn test_pass_outcome_writes() {
        let outcome = PassOutcome {
            inserted: 2,
            updated: 1,
            deleted: 3,
            ..PassOutcome::default()
        };
        assert_eq!(outcome.writes(), 6);
    }

    #[tokio::test]
    async fn test_missing_primary_key_aborts() {
        let store = MemoryStore::new(true);
        let ctx = SyncContext::new();
        let _pass = ctx.begin_pass("s");
        let rows = vec![row(json!({"id": 1})), row(json!({"name": "no key"}))];
        let err = reconcile("s", "id", &rows, &store, &ctx, &EngineConfig::immediate())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::MissingPrimaryKey { index: 1, .. }));
        // The first row was committed before the failure
        assert!(store.get("1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_numeric_and_string_keys_collide() {
        let store = MemoryStore::new(true);
        let ctx = SyncContext::new();
        let _pass = ctx.begin_pass("s");
        let rows = vec![row(json!({"id": 7, "v": "a"}))];
        reconcile("s", "id", &rows, &store, &ctx, &EngineConfig::immediate())
            .await
            .unwrap();
        let rows = vec![row(json!({"id": "7", "v": "a"}))];
        let outcome = reconcile("s", "id", &rows, &store, &ctx, &EngineConfig::immediate())
            .await
            .unwrap();
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(outcome.writes(), 0);
    }
}
