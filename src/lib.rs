// ABOUTME: Library root for collection-replicator
// ABOUTME: Exposes stores, fetchers, the modification guard, and the sync scheduler

pub mod config;
pub mod guard;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod store;

pub use guard::{PassScope, SyncContext};
pub use reconcile::{reconcile, EngineConfig, PassOutcome, ReconcileError};
pub use registry::{Collection, Registration, Registry, RegistryError, MIN_POLL_DELAY};
pub use scheduler::{RoundStats, Scheduler, SourceStatus};
pub use source::{DataSource, Fetcher, FnFetcher};
pub use store::{DocumentStore, Row, StoreError};
