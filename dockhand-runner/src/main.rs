//! Dockhand Runner
//!
//! Runs a single CI job inside Docker containers.
//!
//! Architecture:
//! - Configuration: engine endpoint and executor defaults from the environment
//! - Executors: prepare the job's containers, run each step, clean up
//! - Engine: Docker Engine API over TCP, via `dockhand-client`
//!
//! The job and the runner settings are read from JSON files. The process
//! exits with a code telling script failures, system failures and
//! cancellations apart.

mod cancel;
mod config;
mod container;
mod context;
mod error;
mod executor;
mod helper_image;
mod network;
mod pull;
mod services;
mod trace;
mod volumes;
mod wait;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use dockhand_client::{ContainerEngine, DockerClient};
use dockhand_core::config::{DockerSettings, RunnerSettings};
use dockhand_core::job::Job;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::error::ExecutorError;
use crate::executor::{EngineFactory, ExecutorCommand, ExecutorRegistry};
use crate::trace::StdoutTrace;

#[derive(Parser)]
#[command(name = "dockhand-runner")]
#[command(about = "Run a CI job in Docker containers", long_about = None)]
struct Cli {
    /// Job definition (JSON)
    #[arg(long)]
    job: PathBuf,

    /// Runner settings (JSON)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Executor to run the job with
    #[arg(long, env = "DOCKHAND_EXECUTOR")]
    executor: Option<String>,

    /// Engine endpoint
    #[arg(long, env = "DOCKER_HOST")]
    docker_host: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockhand_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = load_config()?;
    if let Some(host) = cli.docker_host {
        config.docker_host = host;
    }
    if let Some(executor) = cli.executor {
        config.executor = executor;
    }
    config.validate()?;
    info!(
        "Loaded configuration: docker_host={}, executor={}",
        config.docker_host, config.executor
    );

    let job: Job = read_json(&cli.job).context("Failed to load job")?;
    let settings: RunnerSettings = match &cli.settings {
        Some(path) => read_json(path).context("Failed to load runner settings")?,
        None => RunnerSettings::default(),
    };

    let registry = ExecutorRegistry::with_docker(
        engine_factory(&config),
        &config.helper_revision,
        config.cleanup_timeout,
        config.helper_images_dir.clone(),
    );
    let provider = registry.get(&config.executor).with_context(|| {
        format!(
            "Unknown executor {:?}, available: {}",
            config.executor,
            registry.names().join(", ")
        )
    })?;

    let cancel = CancellationToken::new();
    watch_cancellation(cancel.clone(), &job);

    info!("Running job {} ({})", job.id, job.url());
    let steps = job.steps.clone();
    let mut executor = provider.create(job, settings, Arc::new(StdoutTrace));

    let mut result = executor.prepare(&cancel).await;
    if result.is_ok() {
        for step in &steps {
            result = executor.run(&cancel, &ExecutorCommand::from(step)).await;
            if result.is_err() {
                break;
            }
        }
    }
    executor.cleanup().await;

    match result {
        Ok(()) => {
            info!("Job succeeded");
            Ok(())
        }
        Err(e) => {
            let kind = e.failure_kind();
            error!("Job failed ({:?}): {}", kind, e);
            std::process::exit(kind.exit_code());
        }
    }
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    match Config::from_env() {
        Ok(config) => Ok(config),
        Err(_) => {
            info!("Failed to load config from environment, using defaults");
            Ok(Config::default())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Connects to the engine named by the job's docker settings, or the runner's
fn engine_factory(config: &Config) -> EngineFactory {
    let default_host = config.docker_host.clone();
    let api_version = config.api_version.clone();

    Arc::new(move |docker: &DockerSettings| -> crate::error::Result<Arc<dyn ContainerEngine>> {
        let host = if docker.host.is_empty() {
            default_host.as_str()
        } else {
            docker.host.as_str()
        };
        let client = DockerClient::new(host, &api_version).map_err(|e| {
            ExecutorError::SystemFailure(format!("failed to create engine client: {}", e))
        })?;
        Ok(Arc::new(client))
    })
}

/// Cancels the job on Ctrl-C or when its timeout elapses
fn watch_cancellation(cancel: CancellationToken, job: &Job) {
    let timeout = job.timeout();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling job"),
            _ = tokio::time::sleep(timeout) => warn!("Job timed out after {:?}", timeout),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}
