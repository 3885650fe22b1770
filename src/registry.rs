// ABOUTME: Source registration - binds a fetcher to a target store with polling parameters
// ABOUTME: Validates names, clamps poll delays, and hands back guarded collection handles

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;

use crate::guard::SyncContext;
use crate::reconcile::PassOutcome;
use crate::source::{DataSource, Fetcher};
use crate::store::DocumentStore;

/// Shortest allowed poll interval; bounds load on the external source.
pub const MIN_POLL_DELAY: Duration = Duration::from_secs(10);

/// Configuration errors raised at registration time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("source '{0}' is already registered")]
    DuplicateSource(String),

    #[error("invalid source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },
}

/// One registered external feed.
pub struct Registration {
    pub(crate) name: String,
    pub(crate) primary_key: String,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) method: String,
    pub(crate) args: Vec<Value>,
    pub(crate) delay: Duration,
    pub(crate) store: Arc<dyn DocumentStore>,
    /// Written only by the scheduler
    pub(crate) last_run_at: Option<Instant>,
    pub(crate) last_run_wall: Option<chrono::DateTime<chrono::Utc>>,
    pub(crate) last_outcome: Option<Result<PassOutcome, String>>,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// A source is due when it never ran or its interval has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        is_due(self.last_run_at, now, self.delay)
    }
}

/// Due check shared by the scheduler and tests.
pub fn is_due(last_run_at: Option<Instant>, now: Instant, delay: Duration) -> bool {
    match last_run_at {
        None => true,
        Some(last) => now.saturating_duration_since(last) > delay,
    }
}

/// Clamp a requested poll delay to [`MIN_POLL_DELAY`].
pub fn clamp_delay(delay_seconds: u64) -> Duration {
    Duration::from_secs(delay_seconds).max(MIN_POLL_DELAY)
}

/// Store handle returned by registration, bound to its source name.
#[derive(Clone)]
pub struct Collection {
    name: String,
    store: Arc<dyn DocumentStore>,
    context: SyncContext,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying store, for reads or unguarded writes.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Mutate the store out of band, protecting `keys` from the pass that may
    /// be running for this source.
    ///
    /// ```no_run
    /// # use collection_replicator::{Collection, DocumentStore};
    /// # fn example(users: &Collection) -> anyhow::Result<()> {
    /// let mut fields = serde_json::Map::new();
    /// fields.insert("name".into(), "edited locally".into());
    /// users.modify(["42"], |store| store.upsert("42", &fields))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn modify<I, K, F, R>(&self, keys: I, mutation: F) -> R
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: FnOnce(&dyn DocumentStore) -> R,
    {
        self.context
            .guarded_mutate(&self.name, keys, || mutation(self.store.as_ref()))
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// All registered sources, in registration order.
#[derive(Default)]
pub struct Registry {
    registrations: Vec<Registration>,
    context: SyncContext,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry sharing an existing sync context.
    pub fn with_context(context: SyncContext) -> Self {
        Self {
            registrations: Vec::new(),
            context,
        }
    }

    /// Register a source that mirrors `data_source` into `store`.
    pub fn register(
        &mut self,
        name: &str,
        store: Arc<dyn DocumentStore>,
        data_source: DataSource,
    ) -> Result<Collection, RegistryError> {
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidSource {
                name: name.to_string(),
                reason: "name must not be empty".to_string(),
            });
        }
        if data_source.primary_key.trim().is_empty() {
            return Err(RegistryError::InvalidSource {
                name: name.to_string(),
                reason: "primary key field must not be empty".to_string(),
            });
        }
        if self.registrations.iter().any(|r| r.name == name) {
            return Err(RegistryError::DuplicateSource(name.to_string()));
        }

        let delay = clamp_delay(data_source.delay_seconds);
        if delay.as_secs() != data_source.delay_seconds {
            tracing::warn!(
                "{}: poll delay {}s raised to the {}s minimum",
                name,
                data_source.delay_seconds,
                MIN_POLL_DELAY.as_secs()
            );
        }

        tracing::info!(
            "Registered source {} (key: {}, method: {}, every {:?})",
            name,
            data_source.primary_key,
            data_source.method,
            delay
        );

        self.registrations.push(Registration {
            name: name.to_string(),
            primary_key: data_source.primary_key,
            fetcher: data_source.connection,
            method: data_source.method,
            args: data_source.args,
            delay,
            store: Arc::clone(&store),
            last_run_at: None,
            last_run_wall: None,
            last_outcome: None,
        });

        Ok(Collection {
            name: name.to_string(),
            store,
            context: self.context.clone(),
        })
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter()
    }

    pub(crate) fn registrations_mut(&mut self) -> &mut [Registration] {
        &mut self.registrations
    }
}
