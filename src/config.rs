// ABOUTME: TOML configuration describing engine tunables and replicated sources
// ABOUTME: Builds fetchers, stores, and a ready-to-run Scheduler from the parsed file

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::reconcile::EngineConfig;
use crate::registry::{Collection, Registry};
use crate::scheduler::Scheduler;
use crate::source::{
    DataSource, Fetcher, RestSource, SqliteSource, DEFAULT_DELAY_SECONDS, DEFAULT_METHOD,
    DEFAULT_PRIMARY_KEY,
};
use crate::store::{DocumentStore, MemoryStore, SqliteStore};

/// Problems found while reading or checking a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config defines no sources")]
    NoSources,

    #[error("source '{0}' is defined more than once")]
    DuplicateSource(String),

    #[error("source '{name}': {reason}")]
    InvalidSource { name: String, reason: String },
}

/// Top-level config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// `[engine]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub yield_every: usize,
    pub yield_delay_ms: u64,
    pub idle_delay_ms: u64,
    /// Keep an O(1) live count on in-memory stores
    pub fast_count: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            yield_every: 500,
            yield_delay_ms: 10,
            idle_delay_ms: 10,
            fast_count: true,
        }
    }
}

impl EngineSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            yield_every: self.yield_every.max(1),
            yield_delay: Duration::from_millis(self.yield_delay_ms),
            idle_delay: Duration::from_millis(self.idle_delay_ms),
        }
    }
}

/// One `[[sources]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub fetch: FetchConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Where rows come from.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum FetchConfig {
    Sqlite {
        path: PathBuf,
    },
    Rest {
        base_url: String,
        #[serde(default)]
        rows_pointer: Option<String>,
        #[serde(default = "default_timeout_seconds")]
        timeout_seconds: u64,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Where mirrored documents live.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum StoreConfig {
    #[default]
    Memory,
    Sqlite {
        path: PathBuf,
        #[serde(default)]
        table: Option<String>,
    },
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn default_delay_seconds() -> u64 {
    DEFAULT_DELAY_SECONDS
}

fn default_method() -> String {
    DEFAULT_METHOD.to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

impl ReplicationConfig {
    /// Parse and check config text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ReplicationConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and check a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {:?}", path))
    }

    /// Catch configuration errors before anything is registered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::InvalidSource {
                    name: source.name.clone(),
                    reason: "name must not be empty".to_string(),
                });
            }
            if !names.insert(source.name.as_str()) {
                return Err(ConfigError::DuplicateSource(source.name.clone()));
            }
            if source.primary_key.trim().is_empty() {
                return Err(ConfigError::InvalidSource {
                    name: source.name.clone(),
                    reason: "primary_key must not be empty".to_string(),
                });
            }
            if let FetchConfig::Sqlite { .. } = source.fetch {
                if !matches!(source.args.first(), Some(Value::String(_))) {
                    return Err(ConfigError::InvalidSource {
                        name: source.name.clone(),
                        reason: "sqlite sources need the SQL query as the first arg".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Open every fetcher and store and register the sources in file order.
    ///
    /// `disable_fast_count` overrides `engine.fast_count` (the
    /// `DISABLE_FAST_COUNT` toggle).
    pub fn build(&self, disable_fast_count: bool) -> Result<(Scheduler, Vec<Collection>)> {
        let fast_count = self.engine.fast_count && !disable_fast_count;
        if fast_count {
            tracing::info!("Using fast count for in-memory stores");
        }

        let mut registry = Registry::new();
        let mut collections = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let fetcher = build_fetcher(&source.fetch)
                .with_context(|| format!("Failed to set up fetcher for {}", source.name))?;
            let store = build_store(&source.name, &source.store, fast_count)
                .with_context(|| format!("Failed to open store for {}", source.name))?;
            let data_source = DataSource::with_method(fetcher, &source.method, source.delay_seconds)
                .id(&source.primary_key)
                .args(source.args.clone());
            let collection = registry
                .register(&source.name, store, data_source)
                .context("Failed to register source")?;
            collections.push(collection);
        }

        Ok((
            Scheduler::new(registry, self.engine.engine_config()),
            collections,
        ))
    }
}

fn build_fetcher(config: &FetchConfig) -> Result<Arc<dyn Fetcher>> {
    match config {
        FetchConfig::Sqlite { path } => Ok(Arc::new(SqliteSource::open(path)?)),
        FetchConfig::Rest {
            base_url,
            rows_pointer,
            timeout_seconds,
            headers,
        } => {
            let mut source = RestSource::new(base_url, Duration::from_secs(*timeout_seconds))?
                .rows_pointer(rows_pointer.clone());
            for (name, value) in headers {
                source = source.header(name, value);
            }
            Ok(Arc::new(source))
        }
    }
}

fn build_store(
    source_name: &str,
    config: &StoreConfig,
    fast_count: bool,
) -> Result<Arc<dyn DocumentStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new(fast_count))),
        StoreConfig::Sqlite { path, table } => {
            let table = table.as_deref().unwrap_or(source_name);
            Ok(Arc::new(SqliteStore::open(path, table)?))
        }
    }
}
