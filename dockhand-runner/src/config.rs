//! Runner configuration
//!
//! Process-level settings of the runner binary: where the engine lives and
//! how executors are built. Per-job settings come from the settings file.

use dockhand_client::DEFAULT_API_VERSION;
use std::path::PathBuf;
use std::time::Duration;

use crate::executor::{DEFAULT_CLEANUP_TIMEOUT, DEFAULT_HELPER_REVISION};

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Engine endpoint (e.g., "tcp://localhost:2375")
    pub docker_host: String,

    /// Engine API version without the leading `v`
    pub api_version: String,

    /// Name of the executor jobs run with
    pub executor: String,

    /// Revision part of the helper image tag
    pub helper_revision: String,

    /// Directory with prebuilt helper image archives
    pub helper_images_dir: Option<PathBuf>,

    /// Upper bound for removing a job's containers, volumes and network
    pub cleanup_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(docker_host: String) -> Self {
        Self {
            docker_host,
            api_version: DEFAULT_API_VERSION.to_string(),
            executor: "docker".to_string(),
            helper_revision: DEFAULT_HELPER_REVISION.to_string(),
            helper_images_dir: None,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DOCKER_HOST (required)
    /// - DOCKER_API_VERSION (optional, default: 1.43)
    /// - DOCKHAND_EXECUTOR (optional, default: docker)
    /// - DOCKHAND_HELPER_REVISION (optional, default: latest)
    /// - DOCKHAND_HELPER_IMAGES_DIR (optional, default: next to the binary)
    /// - DOCKHAND_CLEANUP_TIMEOUT (optional, seconds, default: 300)
    pub fn from_env() -> anyhow::Result<Self> {
        let docker_host = std::env::var("DOCKER_HOST")
            .map_err(|_| anyhow::anyhow!("DOCKER_HOST environment variable not set"))?;

        let mut config = Self::new(docker_host);

        if let Ok(version) = std::env::var("DOCKER_API_VERSION") {
            config.api_version = version;
        }

        if let Ok(executor) = std::env::var("DOCKHAND_EXECUTOR") {
            config.executor = executor;
        }

        if let Ok(revision) = std::env::var("DOCKHAND_HELPER_REVISION") {
            config.helper_revision = revision;
        }

        config.helper_images_dir = std::env::var("DOCKHAND_HELPER_IMAGES_DIR")
            .ok()
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        config.cleanup_timeout = std::env::var("DOCKHAND_CLEANUP_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CLEANUP_TIMEOUT);

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.docker_host.is_empty() {
            anyhow::bail!("docker_host cannot be empty");
        }

        if !["tcp://", "http://", "https://"]
            .iter()
            .any(|scheme| self.docker_host.starts_with(scheme))
        {
            anyhow::bail!("docker_host must start with tcp://, http:// or https://");
        }

        if self.api_version.trim_start_matches('v').is_empty() {
            anyhow::bail!("api_version cannot be empty");
        }

        if self.executor.is_empty() {
            anyhow::bail!("executor cannot be empty");
        }

        if self.helper_revision.is_empty() {
            anyhow::bail!("helper_revision cannot be empty");
        }

        if self.cleanup_timeout.is_zero() {
            anyhow::bail!("cleanup_timeout must be greater than 0");
        }

        if let Some(dir) = &self.helper_images_dir {
            if !dir.is_dir() {
                anyhow::bail!("helper_images_dir {} is not a directory", dir.display());
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("tcp://localhost:2375".to_string())
    }
}
