//! Job volume management
//!
//! Turns volume specifications into bind strings for job containers:
//! - `host:container[:mode]` binds a host path directly
//! - `container` alone becomes a cache volume kept between jobs of the
//!   project, either a host directory under `cache_dir` or a named volume
//! - temporary volumes live only as long as the job
//!
//! Every container path can be claimed once per job.

use async_trait::async_trait;
use dockhand_client::types::VolumeCreate;
use dockhand_core::labels::ResourceKind;
use dockhand_core::volume::{Volume, VolumeParser};
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::cancel::with_cancel;
use crate::context::JobContext;
use crate::error::{ExecutorError, Result};

/// Settings of one job's volume manager
#[derive(Debug, Clone, Default)]
pub struct VolumeManagerConfig {
    /// Directory relative container paths are resolved against
    pub base_path: String,
    /// Host directory for cache volumes; named volumes when empty
    pub cache_dir: String,
    /// Prefix of persistent cache volumes
    pub unique_name: String,
    /// Prefix of temporary volumes
    pub temporary_name: String,
    pub disable_cache: bool,
    /// Cache volumes of protected refs are labeled as such
    pub protected: bool,
}

#[async_trait]
pub trait VolumeManager: Send + Sync {
    /// Adds a volume from a `[source:]destination[:mode]` specification
    ///
    /// # Returns
    /// `ExecutorError::VolumeAlreadyDefined` when the destination is taken,
    /// `ExecutorError::CacheVolumesDisabled` for a cache volume while the
    /// cache is disabled
    async fn create(&self, cancel: &CancellationToken, spec: &str) -> Result<()>;

    /// Adds a volume at `destination` that is removed at cleanup
    async fn create_temporary(&self, cancel: &CancellationToken, destination: &str) -> Result<()>;

    /// Bind strings for job containers
    fn binds(&self) -> Vec<String>;

    /// Removes every temporary volume
    async fn remove_temporary(&self) -> Result<()>;
}

#[derive(Default)]
struct State {
    destinations: HashSet<String>,
    binds: Vec<String>,
    temporary: Vec<String>,
}

/// Volume manager backed by the job's engine
pub struct DefaultVolumeManager {
    context: Arc<JobContext>,
    parser: Arc<dyn VolumeParser>,
    config: VolumeManagerConfig,
    state: Mutex<State>,
}

/// Hex md5 of a container path, keying cache volumes
pub fn path_hash(path: &str) -> String {
    hex::encode(Md5::digest(path.as_bytes()))
}

impl DefaultVolumeManager {
    pub fn new(
        context: Arc<JobContext>,
        parser: Arc<dyn VolumeParser>,
        config: VolumeManagerConfig,
    ) -> Self {
        Self {
            context,
            parser,
            config,
            state: Mutex::new(State::default()),
        }
    }

    fn absolute_path(&self, dir: &str) -> String {
        let path = self.parser.path();
        if path.is_abs(dir) {
            return path.join(&[dir]);
        }
        path.join(&[&self.config.base_path, dir])
    }

    /// Claims a destination, failing when it is already taken
    fn remember(&self, destination: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.destinations.insert(destination.to_string()) {
            return Err(ExecutorError::VolumeAlreadyDefined(destination.to_string()));
        }
        Ok(())
    }

    fn forget(&self, destination: &str) {
        self.state.lock().unwrap().destinations.remove(destination);
    }

    fn add_bind(&self, bind: String) {
        self.context.logger.debugln(&format!("Using bind {:?}...", bind));
        self.state.lock().unwrap().binds.push(bind);
    }

    fn add_host_volume(&self, volume: Volume) -> Result<()> {
        let destination = self.absolute_path(&volume.destination);
        self.remember(&destination)?;

        self.add_bind(
            Volume {
                destination,
                ..volume
            }
            .definition(),
        );
        Ok(())
    }

    async fn add_cache_volume(&self, cancel: &CancellationToken, volume: Volume) -> Result<()> {
        if self.config.disable_cache {
            return Err(ExecutorError::CacheVolumesDisabled);
        }

        let destination = self.absolute_path(&volume.destination);
        self.remember(&destination)?;

        let hash = path_hash(&destination);
        if !self.config.cache_dir.is_empty() {
            let host_path = self.parser.path().join(&[
                &self.config.cache_dir,
                &self.config.unique_name,
                &hash,
            ]);
            self.context.logger.debugln(&format!(
                "Using host-based {:?} for {:?}...",
                host_path, destination
            ));
            self.add_bind(
                Volume {
                    source: Some(host_path),
                    destination,
                    ..volume
                }
                .definition(),
            );
            return Ok(());
        }

        let name = format!("{}-cache-{}", self.config.unique_name, hash);
        let mut labels = vec![("cache.dir", destination.as_str())];
        if self.config.protected {
            labels.push(("protected", "true"));
        }
        if let Err(e) = self.create_named_volume(cancel, &name, &labels).await {
            self.forget(&destination);
            return Err(e);
        }
        self.add_bind(
            Volume {
                source: Some(name),
                destination,
                ..volume
            }
            .definition(),
        );
        Ok(())
    }

    async fn create_named_volume(
        &self,
        cancel: &CancellationToken,
        name: &str,
        labels: &[(&str, &str)],
    ) -> Result<()> {
        let docker = self.context.docker();
        let request = VolumeCreate {
            name: name.to_string(),
            driver: docker.volume_driver.clone(),
            driver_opts: docker.volume_driver_opts.clone(),
            labels: self
                .context
                .labeler
                .labels(ResourceKind::Cache, labels),
        };

        let volume = with_cancel(cancel, self.context.engine.volume_create(&request)).await?;
        self.context
            .logger
            .debugln(&format!("Using volume {:?}...", volume.name));
        Ok(())
    }
}

#[async_trait]
impl VolumeManager for DefaultVolumeManager {
    async fn create(&self, cancel: &CancellationToken, spec: &str) -> Result<()> {
        if spec.is_empty() {
            return Ok(());
        }

        let result = match self.parser.parse_volume(spec) {
            Ok(volume) if volume.has_source() => self.add_host_volume(volume),
            Ok(volume) => self.add_cache_volume(cancel, volume).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            if !matches!(e, ExecutorError::CacheVolumesDisabled) {
                self.context.logger.errorln(&format!(
                    "Failed to create container volume for {:?}: {}",
                    spec, e
                ));
            }
        }
        result
    }

    async fn create_temporary(&self, cancel: &CancellationToken, destination: &str) -> Result<()> {
        let destination = self.absolute_path(destination);
        self.remember(&destination)?;

        let name = format!("{}-{}", self.config.temporary_name, path_hash(&destination));
        let labels = [("cache.dir", destination.as_str())];
        if let Err(e) = self.create_named_volume(cancel, &name, &labels).await {
            self.forget(&destination);
            return Err(e);
        }

        let mut state = self.state.lock().unwrap();
        state.temporary.push(name.clone());
        state.binds.push(format!("{}:{}", name, destination));
        Ok(())
    }

    fn binds(&self) -> Vec<String> {
        self.state.lock().unwrap().binds.clone()
    }

    async fn remove_temporary(&self) -> Result<()> {
        let names = std::mem::take(&mut self.state.lock().unwrap().temporary);

        let mut failed = Vec::new();
        for name in names {
            match self.context.engine.volume_remove(&name, true).await {
                Ok(()) => debug!("Removed volume {}", name),
                Err(e) if e.is_not_found() => debug!("Volume {} already removed", name),
                Err(e) => {
                    error!("Failed to remove volume {}: {}", name, e);
                    failed.push(format!("{}: {}", name, e));
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ExecutorError::SystemFailure(format!(
                "removing temporary volumes: {}",
                failed.join(", ")
            )))
        }
    }
}
