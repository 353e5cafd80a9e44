//! Build and predefined container creation
//!
//! Containers get a name unique to the job, the job's full environment,
//! the job labels and a host configuration derived from the runner
//! settings. A container left over under the same name by a crashed job
//! is removed before creating the new one.

use async_trait::async_trait;
use dockhand_client::ContainerEngine;
use dockhand_client::types::{
    ContainerConfig, ContainerInspect, CreateContainer, DeviceMapping, DeviceRequest,
    EndpointSettings, NetworkingConfig, RemoveOptions,
};
use dockhand_core::image::ImageSpec;
use dockhand_core::labels::ResourceKind;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cancel::with_cancel;
use crate::container::host_config::{HostConfigOptions, build_host_config, is_privileged_allowed};
use crate::context::JobContext;
use crate::error::Result;
use crate::network::is_user_defined;
use crate::pull::{PullManager, expand_image_name};
use crate::trace::BuildLogger;

/// Role of a job container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Runs the user's script in the job image
    Build,
    /// Runs runner-provided steps in the helper image
    Predefined,
}

impl ContainerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerKind::Build => "build",
            ContainerKind::Predefined => "predefined",
        }
    }

    fn resource_kind(&self) -> ResourceKind {
        match self {
            ContainerKind::Build => ResourceKind::Build,
            ContainerKind::Predefined => ResourceKind::Predefined,
        }
    }
}

/// Everything prepared for the job that containers are created with
#[derive(Debug, Clone, Default)]
pub struct ContainerSetup {
    pub network_mode: String,
    pub binds: Vec<String>,
    /// Service links in `id:alias` form, build containers only
    pub links: Vec<String>,
    pub devices: Vec<DeviceMapping>,
    pub device_requests: Vec<DeviceRequest>,
}

/// A container to create
#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub kind: ContainerKind,
    pub image: ImageSpec,
    pub cmd: Vec<String>,
    /// Images accepted regardless of the allowlist
    pub allowed_internal_images: Vec<String>,
}

#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Pulls the image and creates the container without starting it
    async fn create(
        &self,
        cancel: &CancellationToken,
        request: ContainerRequest,
    ) -> Result<ContainerInspect>;

    /// Removes a container, disconnecting it from its networks first
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Container manager backed by the job's engine
pub struct DefaultContainerManager {
    context: Arc<JobContext>,
    pull: Arc<dyn PullManager>,
    setup: ContainerSetup,
    sequence: AtomicUsize,
}

impl DefaultContainerManager {
    pub fn new(context: Arc<JobContext>, pull: Arc<dyn PullManager>, setup: ContainerSetup) -> Self {
        Self {
            context,
            pull,
            setup,
            sequence: AtomicUsize::new(0),
        }
    }

    fn container_name(&self, kind: ContainerKind) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}-{}", self.context.randomized_name(), kind.as_str(), seq)
    }

    fn entrypoint(&self, image: &ImageSpec) -> Option<Vec<String>> {
        let entrypoint = image.entrypoint.as_ref().filter(|e| !e.is_empty())?;
        if self.context.docker().entrypoint_disable_overwrite {
            self.context.logger.warningln("Entrypoint override disabled");
            return None;
        }
        Some(entrypoint.clone())
    }

    fn labels(&self, kind: ContainerKind) -> HashMap<String, String> {
        let mut labels = self.context.labeler.labels(kind.resource_kind(), &[]);
        for (key, value) in &self.context.docker().container_labels {
            labels.insert(key.clone(), self.context.expand(value));
        }
        labels
    }

    fn networking_config(&self, aliases: Vec<String>) -> NetworkingConfig {
        let mode = &self.setup.network_mode;
        if !is_user_defined(mode) {
            return NetworkingConfig::default();
        }

        NetworkingConfig {
            endpoints_config: HashMap::from([(
                mode.clone(),
                EndpointSettings {
                    aliases,
                    ..Default::default()
                },
            )]),
        }
    }
}

#[async_trait]
impl ContainerManager for DefaultContainerManager {
    async fn create(
        &self,
        cancel: &CancellationToken,
        request: ContainerRequest,
    ) -> Result<ContainerInspect> {
        let name = expand_image_name(
            &self.context,
            &request.image.name,
            &request.allowed_internal_images,
        )?;
        let image = self
            .pull
            .get_image(cancel, &name, request.image.pull_policies.as_deref())
            .await?;

        let container_name = self.container_name(request.kind);
        let docker = self.context.docker();
        let hostname = if docker.hostname.is_empty() {
            self.context.project_unique_name()
        } else {
            docker.hostname.clone()
        };

        let config = ContainerConfig {
            hostname,
            image: image.id.clone(),
            env: self.context.job.variables.env_list(),
            cmd: Some(request.cmd.clone()),
            entrypoint: self.entrypoint(&request.image),
            labels: self.labels(request.kind),
            mac_address: docker.mac_address.clone(),
            tty: false,
            attach_stdin: true,
            attach_stdout: true,
            attach_stderr: true,
            open_stdin: true,
            stdin_once: true,
            ..Default::default()
        };

        let is_build = request.kind == ContainerKind::Build;
        let host_config = build_host_config(
            docker,
            HostConfigOptions {
                network_mode: self.setup.network_mode.clone(),
                binds: self.setup.binds.clone(),
                links: if is_build { self.setup.links.clone() } else { Vec::new() },
                devices: self.setup.devices.clone(),
                device_requests: self.setup.device_requests.clone(),
                image_privileged: is_privileged_allowed(&name, &docker.allowed_privileged_images),
            },
        )?;

        let aliases = if is_build {
            vec!["build".to_string(), container_name.clone()]
        } else {
            Vec::new()
        };
        let networking_config = self.networking_config(aliases);

        let engine = self.context.engine.as_ref();
        if let Err(e) = remove_container(engine, &self.context.logger, &container_name).await {
            debug!("Removing stale container {} failed: {}", container_name, e);
        }

        self.context
            .logger
            .debugln(&format!("Creating container {} ...", container_name));
        let create = CreateContainer {
            name: container_name,
            config,
            host_config,
            networking_config,
        };
        let response = with_cancel(cancel, engine.container_create(&create)).await?;
        for warning in response.warnings.iter().flatten() {
            self.context.logger.warningln(warning);
        }
        self.context.track_temporary(&response.id);

        with_cancel(cancel, engine.container_inspect(&response.id)).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        remove_container(self.context.engine.as_ref(), &self.context.logger, id).await
    }
}

/// Disconnects a container from every network that lists it
async fn disconnect_networks(engine: &dyn ContainerEngine, logger: &BuildLogger, id: &str) {
    logger.debugln(&format!("Disconnecting container {} from networks", id));

    let networks = match engine.network_list().await {
        Ok(networks) => networks,
        Err(e) => {
            logger.debugln(&format!(
                "Can't get network list. ListNetworks exited with {}",
                e
            ));
            return;
        }
    };

    for network in networks {
        let plugged = network
            .containers
            .iter()
            .find(|(key, container)| key.as_str() == id || container.name == id);
        let Some((_, container)) = plugged else {
            continue;
        };

        match engine.network_disconnect(&network.id, id, true).await {
            Ok(()) => logger.warningln(&format!(
                "Possibly zombie container {} is disconnected from network {}",
                container.name, network.name
            )),
            Err(e) => logger.warningln(&format!(
                "Can't disconnect possibly zombie container {} from network {} -> {}",
                container.name, network.name, e
            )),
        }
    }
}

/// Removes a container and its anonymous volumes
///
/// A container that is already gone counts as removed.
pub async fn remove_container(engine: &dyn ContainerEngine, logger: &BuildLogger, id: &str) -> Result<()> {
    logger.debugln(&format!("Removing container {}", id));
    disconnect_networks(engine, logger, id).await;

    let options = RemoveOptions {
        force: true,
        remove_volumes: true,
    };
    match engine.container_remove(id, options).await {
        Ok(()) => {
            logger.debugln(&format!("Removed container {}", id));
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => {
            logger.debugln(&format!("Removing container {} finished with error {}", id, e));
            Err(e.into())
        }
    }
}
