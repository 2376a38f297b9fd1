use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use masu::config::Config;
use masu::storage::telemetry::self_metrics_text;
use masu::CollectorRegistry;

/// Masu - operator tool for the metric storage backends
#[derive(Parser, Debug)]
#[command(name = "masu")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every stored metric in the text exposition format
    Render {
        /// Append the storage layer's own metrics
        #[arg(long)]
        self_metrics: bool,
    },
    /// Delete every metric written by this library from the backend
    Flush,
    /// Validate the configuration and connect to the backend
    Check,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .map_err(|e| anyhow!(e))
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    masu::logging::init_subscriber(&config.logging)
        .map_err(|e| anyhow!(e))
        .context("Failed to initialize logging subsystem")?;

    config
        .validate()
        .map_err(|e| anyhow!(e))
        .context("Invalid configuration")?;

    tracing::info!(
        config_file = %args.config.display(),
        backend = ?config.storage.backend,
        "Configuration loaded successfully"
    );

    let store = masu::storage::build_store(&config.storage).context("Failed to open storage")?;
    let registry = CollectorRegistry::new(store);

    match args.command {
        Command::Render { self_metrics } => {
            print!("{}", registry.render()?);
            if self_metrics {
                print!("{}", self_metrics_text()?);
            }
        }
        Command::Flush => {
            registry.wipe_storage()?;
            tracing::info!(backend = registry.storage().backend_name(), "Storage flushed");
        }
        Command::Check => {
            let families = registry.metric_family_samples()?;
            println!(
                "ok: {} backend reachable, {} metric families",
                registry.storage().backend_name(),
                families.len()
            );
        }
    }

    Ok(())
}
