// ABOUTME: Modification guard shared between the sync engine and out-of-band writers
// ABOUTME: Tracks which keys were touched externally during the active reconciliation pass

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SyncState {
    /// Source whose pass is running, if any
    active_source: Option<String>,
    /// Keys mutated out of band during that pass
    modified_keys: HashSet<String>,
}

/// Handle to the single "currently syncing" state.
///
/// The scheduler opens a pass with [`SyncContext::begin_pass`]; external
/// writers go through [`SyncContext::guarded_mutate`] (usually via
/// `Collection::modify`). Clones share the same state.
///
/// The lock is only held for set operations and never across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    state: Arc<Mutex<SyncState>>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        // The state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `source` as the active pass and start with an empty key set.
    ///
    /// The pass ends when the returned scope is dropped.
    pub fn begin_pass(&self, source: &str) -> PassScope {
        let mut state = self.lock();
        if let Some(previous) = state.active_source.as_deref() {
            tracing::warn!(
                "Starting pass for {} while pass for {} is still marked active",
                source,
                previous
            );
        }
        state.active_source = Some(source.to_string());
        state.modified_keys.clear();
        PassScope {
            context: self.clone(),
            source: source.to_string(),
        }
    }

    fn end_pass(&self) {
        let mut state = self.lock();
        state.active_source = None;
        state.modified_keys.clear();
    }

    /// Name of the source whose pass is running.
    pub fn active_source(&self) -> Option<String> {
        self.lock().active_source.clone()
    }

    /// Whether `key` was mutated out of band during the active pass.
    pub fn is_modified(&self, key: &str) -> bool {
        self.lock().modified_keys.contains(key)
    }

    /// Snapshot of the keys guarded during the active pass.
    pub fn modified_keys(&self) -> HashSet<String> {
        self.lock().modified_keys.clone()
    }

    /// Run `mutation`, first protecting `keys` from the active pass if it
    /// belongs to `source_name`.
    ///
    /// The mutation always runs; the guard never blocks or rejects it. It
    /// only decides whether the running pass treats the keys as externally
    /// owned.
    pub fn guarded_mutate<I, K, F, R>(&self, source_name: &str, keys: I, mutation: F) -> R
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: FnOnce() -> R,
    {
        {
            let mut state = self.lock();
            if state.active_source.as_deref() == Some(source_name) {
                for key in keys {
                    let key = key.into();
                    tracing::debug!("{}: guarding key {} for active pass", source_name, key);
                    state.modified_keys.insert(key);
                }
            }
        }
        mutation()
    }
}

/// Scope of one reconciliation pass. Dropping it clears the active source
/// and the guarded key set, whether the pass succeeded or not.
#[derive(Debug)]
pub struct PassScope {
    context: SyncContext,
    source: String,
}

impl PassScope {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Drop for PassScope {
    fn drop(&mut self) {
        self.context.end_pass();
    }
}
