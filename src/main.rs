// ABOUTME: CLI entry point for collection-replicator
// ABOUTME: Parses commands, initializes logging, and runs the sync scheduler

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use collection_replicator::config::ReplicationConfig;

#[derive(Parser)]
#[command(name = "collection-replicator")]
#[command(about = "Mirror external query/REST snapshots into local collections", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every configured source and keep its collection in sync
    Run {
        /// Path to the replication config (TOML)
        #[arg(long, env = "REPLICATION_CONFIG")]
        config: PathBuf,
        /// Run a single round over all sources, print their status, and exit
        #[arg(long)]
        once: bool,
        /// Disable the O(1) live count on in-memory stores.
        /// Any env value other than 0, false, no or off disables it.
        #[arg(
            long,
            env = "DISABLE_FAST_COUNT",
            value_parser = clap::builder::FalseyValueParser::new()
        )]
        disable_fast_count: bool,
    },
    /// Validate a replication config without contacting any source
    Check {
        /// Path to the replication config (TOML)
        #[arg(long, env = "REPLICATION_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // We need to parse CLI args early to get the log level
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Run {
            config,
            once,
            disable_fast_count,
        } => {
            let parsed = ReplicationConfig::load(&config)?;
            let (mut scheduler, _collections) = parsed
                .build(disable_fast_count)
                .context("Failed to start replication")?;

            if once {
                let stats = scheduler.run_round().await;
                tracing::info!(
                    "Round completed: {} sources checked, {} passes, {} failed",
                    stats.sources_checked,
                    stats.passes,
                    stats.failures
                );
                println!(
                    "{}",
                    serde_json::to_string_pretty(&scheduler.status())
                        .context("Failed to serialize source status")?
                );
                if stats.failures > 0 {
                    anyhow::bail!("{} of {} passes failed", stats.failures, stats.passes);
                }
                return Ok(());
            }

            tokio::select! {
                _ = scheduler.run() => {}
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    tracing::info!("Shutdown signal received, stopping replication");
                }
            }
            Ok(())
        }
        Commands::Check { config } => {
            let parsed = ReplicationConfig::load(&config)?;
            println!("Config OK: {} sources", parsed.sources.len());
            for source in &parsed.sources {
                println!(
                    "  {} (key: {}, every {}s)",
                    source.name,
                    source.primary_key,
                    collection_replicator::registry::clamp_delay(source.delay_seconds).as_secs()
                );
            }
            Ok(())
        }
    }
}
