// ABOUTME: Scheduler loop - round-robins registered sources and runs due reconciliation passes
// ABOUTME: Single cooperative task; failures are isolated per source and logged with its name

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::time::Instant;

use crate::guard::SyncContext;
use crate::reconcile::{pause, reconcile, EngineConfig, PassOutcome};
use crate::registry::{Registration, Registry};

/// Counters for one round over all sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub sources_checked: usize,
    pub passes: usize,
    pub failures: usize,
}

/// Point-in-time view of a registered source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub delay_seconds: u64,
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_outcome: Option<PassOutcome>,
    pub last_error: Option<String>,
}

/// Drives every registered source forever, honoring each poll interval.
///
/// There is exactly one scheduler per process and it runs passes one at a
/// time, which is what keeps the shared [`SyncContext`] to a single active
/// pass.
pub struct Scheduler {
    registry: Registry,
    config: EngineConfig,
}

impl Scheduler {
    pub fn new(registry: Registry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn context(&self) -> &SyncContext {
        self.registry.context()
    }

    /// Run rounds for the lifetime of the process.
    pub async fn run(&mut self) {
        tracing::info!(
            "Starting scheduler with {} sources (yield every {} rows, {:?} pause)",
            self.registry.len(),
            self.config.yield_every,
            self.config.yield_delay
        );
        let mut rounds = 0u64;
        loop {
            let stats = self.run_round().await;
            rounds += 1;
            if stats.passes > 0 {
                tracing::debug!(
                    "Round {}: {} passes, {} failed",
                    rounds,
                    stats.passes,
                    stats.failures
                );
            }
        }
    }

    /// Check every source once in registration order, running the due ones.
    pub async fn run_round(&mut self) -> RoundStats {
        let context = self.registry.context().clone();
        let config = self.config.clone();
        let mut stats = RoundStats::default();

        for registration in self.registry.registrations_mut() {
            stats.sources_checked += 1;
            let now = Instant::now();
            if registration.is_due(now) {
                stats.passes += 1;
                // Stamp first so a slow or failing pass does not re-fire at once
                registration.last_run_at = Some(now);
                registration.last_run_wall = Some(chrono::Utc::now());

                match run_pass(registration, &context, &config).await {
                    Ok(outcome) => {
                        tracing::debug!(
                            "{}: pass finished in {}ms ({} fetched, {} writes)",
                            registration.name,
                            outcome.duration_ms,
                            outcome.fetched,
                            outcome.writes()
                        );
                        registration.last_outcome = Some(Ok(outcome));
                    }
                    Err(e) => {
                        stats.failures += 1;
                        // Log with :? to show full error chain including root cause
                        tracing::error!("{}: {:?}", registration.name, e);
                        registration.last_outcome = Some(Err(format!("{:#}", e)));
                    }
                }
            }
            pause(config.yield_delay).await;
        }

        pause(config.idle_delay).await;
        stats
    }

    /// Status of every source, in registration order.
    pub fn status(&self) -> Vec<SourceStatus> {
        self.registry
            .iter()
            .map(|r| {
                let (last_outcome, last_error) = match &r.last_outcome {
                    Some(Ok(outcome)) => (Some(outcome.clone()), None),
                    Some(Err(message)) => (None, Some(message.clone())),
                    None => (None, None),
                };
                SourceStatus {
                    name: r.name.clone(),
                    delay_seconds: r.delay.as_secs(),
                    last_run_at: r.last_run_wall,
                    last_outcome,
                    last_error,
                }
            })
            .collect()
    }
}

/// One reconciliation pass for one source. The pass scope ends when this
/// returns, on success or failure.
async fn run_pass(
    registration: &Registration,
    context: &SyncContext,
    config: &EngineConfig,
) -> Result<PassOutcome> {
    let start = std::time::Instant::now();
    let _pass = context.begin_pass(&registration.name);

    let rows = registration
        .fetcher
        .fetch(&registration.method, &registration.args)
        .await
        .context("fetch failed")?;

    let mut outcome = reconcile(
        &registration.name,
        &registration.primary_key,
        &rows,
        registration.store.as_ref(),
        context,
        config,
    )
    .await
    .context("reconciliation failed")?;

    outcome.duration_ms = start.elapsed().as_millis() as u64;
    Ok(outcome)
}
