//! Service container management
//!
//! Services come from the runner settings first, then from the job. Each
//! one is pulled, created on the job network under its aliases and started.
//! Once all of them run, their health is checked and, on legacy bridge
//! networking, links for the build container are produced.

use async_trait::async_trait;
use dockhand_client::types::{
    ContainerConfig, ContainerInspect, CreateContainer, EndpointSettings, NetworkingConfig,
};
use dockhand_core::image::{ImageSpec, split_service_name};
use dockhand_core::labels::ResourceKind;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cancel::with_cancel;
use crate::container::host_config::{is_privileged_allowed, service_host_config};
use crate::container::remove_container;
use crate::context::JobContext;
use crate::error::{ExecutorError, Result};
use crate::network::{is_user_defined, supports_links};
use crate::pull::{PullManager, verify_allowed_image};
use crate::services::health::{DEFAULT_LOG_DRAIN_DELAY, HealthChecker};
use crate::services::logs::stream_service_logs;
use crate::wait::Waiter;

/// Interval between inspections of a starting service
const START_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lower bound of the time a service gets to leave the `created` state
const MIN_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Length of the short container id used as implicit alias
const SHORT_ID_LENGTH: usize = 12;

/// A started service container
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub id: String,
    /// Container name
    pub name: String,
    /// Every name the service is reachable under
    pub aliases: Vec<String>,
    /// State after start
    pub inspect: ContainerInspect,
}

impl ServiceInfo {
    /// First 12 characters of the container id
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(SHORT_ID_LENGTH)]
    }
}

/// Where service containers are created
#[derive(Debug, Clone, Default)]
pub struct ServiceSetup {
    pub network_mode: String,
    /// Volume binds shared with the build container
    pub binds: Vec<String>,
    /// Id of the helper image running health checks
    pub helper_image: String,
}

#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Creates and starts the job's services, then waits for them
    ///
    /// # Returns
    /// Links for the build container in `id:alias` form, empty unless the
    /// network mode supports legacy links
    async fn create_services(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Services started so far
    fn services(&self) -> Vec<ServiceInfo>;
}

/// Runner services with expanded names, followed by the job's services
///
/// Job services are checked against `allowed_services`, runner services
/// are always allowed. Fails when more services are requested than
/// `services_limit` allows.
pub fn service_definitions(context: &JobContext) -> Result<Vec<ImageSpec>> {
    let docker = context.docker();
    let mut definitions = Vec::new();
    let mut internal = Vec::new();

    for service in &docker.services {
        let name = context.expand(&service.name);
        internal.push(name.clone());
        definitions.push(ImageSpec {
            name,
            ..service.clone()
        });
    }

    for service in &context.job.services {
        let name = context.expand(&service.name);
        verify_allowed_image(
            &context.logger,
            &name,
            "services",
            &docker.allowed_services,
            &internal,
        )?;
        definitions.push(ImageSpec {
            name,
            ..service.clone()
        });
    }

    if let Some(allowed) = docker.services_limit() {
        if definitions.len() > allowed {
            return Err(ExecutorError::TooManyServicesRequested {
                requested: definitions.len(),
                allowed,
            });
        }
    }

    Ok(definitions)
}

/// Service manager backed by the job's engine
pub struct DefaultServiceManager {
    context: Arc<JobContext>,
    pull: Arc<dyn PullManager>,
    waiter: Arc<dyn Waiter>,
    setup: ServiceSetup,
    drain_delay: Duration,
    services: Mutex<Vec<ServiceInfo>>,
}

impl DefaultServiceManager {
    pub fn new(
        context: Arc<JobContext>,
        pull: Arc<dyn PullManager>,
        waiter: Arc<dyn Waiter>,
        setup: ServiceSetup,
    ) -> Self {
        Self {
            context,
            pull,
            waiter,
            setup,
            drain_delay: DEFAULT_LOG_DRAIN_DELAY,
            services: Mutex::new(Vec::new()),
        }
    }

    /// Pause before reading an unhealthy service's logs
    pub fn with_drain_delay(mut self, delay: Duration) -> Self {
        self.drain_delay = delay;
        self
    }

    /// Service definitions of the job, see [`service_definitions`]
    pub fn definitions(&self) -> Result<Vec<ImageSpec>> {
        service_definitions(&self.context)
    }

    fn labels(&self, service: &str, version: &str) -> HashMap<String, String> {
        let mut labels = self.context.labeler.labels(
            ResourceKind::Service,
            &[("service", service), ("service.version", version)],
        );
        for (key, value) in &self.context.docker().container_labels {
            labels.insert(key.clone(), self.context.expand(value));
        }
        labels
    }

    fn environment(&self, definition: &ImageSpec) -> Vec<String> {
        let mut env = self.context.job.variables.public_or_internal().env_list();
        env.extend(
            definition
                .variables
                .iter()
                .map(|(key, value)| format!("{}={}", key, self.context.expand(value))),
        );
        env
    }

    fn entrypoint(&self, definition: &ImageSpec) -> Option<Vec<String>> {
        let entrypoint = definition.entrypoint.as_ref().filter(|e| !e.is_empty())?;
        if self.context.docker().entrypoint_disable_overwrite {
            self.context.logger.warningln("Entrypoint override disabled");
            return None;
        }
        Some(entrypoint.clone())
    }

    fn networking_config(&self, aliases: &[String]) -> NetworkingConfig {
        let mode = &self.setup.network_mode;
        if !is_user_defined(mode) {
            return NetworkingConfig::default();
        }

        NetworkingConfig {
            endpoints_config: HashMap::from([(
                mode.clone(),
                EndpointSettings {
                    aliases: aliases.to_vec(),
                    ..Default::default()
                },
            )]),
        }
    }

    async fn create_service(
        &self,
        cancel: &CancellationToken,
        index: usize,
        definition: &ImageSpec,
        aliases: Vec<String>,
    ) -> Result<ServiceInfo> {
        let meta = split_service_name(&definition.name);
        let image = self
            .pull
            .get_image(cancel, &meta.image_name, definition.pull_policies.as_deref())
            .await?;

        let docker = self.context.docker();
        let name = format!(
            "{}-{}-{}",
            self.context.randomized_name(),
            meta.service.replace('/', "__"),
            index
        );

        let config = ContainerConfig {
            image: image.id.clone(),
            env: self.environment(definition),
            cmd: definition.command.clone().filter(|c| !c.is_empty()),
            entrypoint: self.entrypoint(definition),
            labels: self.labels(&meta.service, &meta.version),
            ..Default::default()
        };
        let host_config = service_host_config(
            docker,
            &self.setup.network_mode,
            self.setup.binds.clone(),
            is_privileged_allowed(&meta.image_name, &docker.allowed_privileged_services),
        );

        let engine = self.context.engine.as_ref();
        if let Err(e) = remove_container(engine, &self.context.logger, &name).await {
            debug!("Removing stale service container {} failed: {}", name, e);
        }

        self.context.logger.debugln(&format!(
            "Creating service container {}...",
            name
        ));
        let create = CreateContainer {
            name: name.clone(),
            config,
            host_config,
            networking_config: self.networking_config(&aliases),
        };
        let response = with_cancel(cancel, engine.container_create(&create)).await?;
        for warning in response.warnings.iter().flatten() {
            self.context.logger.warningln(warning);
        }
        self.context.track_temporary(&response.id);

        self.context.logger.debugln(&format!(
            "Starting service container {} ({})...",
            name, response.id
        ));
        with_cancel(cancel, engine.container_start(&response.id)).await?;

        let inspect = self.wait_until_started(cancel, &response.id).await?;
        let mut aliases = aliases;
        let short_id = response.id[..response.id.len().min(SHORT_ID_LENGTH)].to_string();
        aliases.push(short_id);

        Ok(ServiceInfo {
            id: response.id,
            name,
            aliases,
            inspect,
        })
    }

    /// Inspects a started service until it has left the `created` state
    async fn wait_until_started(&self, cancel: &CancellationToken, id: &str) -> Result<ContainerInspect> {
        let timeout = self
            .context
            .docker()
            .wait_for_services_timeout()
            .map_or(MIN_START_TIMEOUT, |t| t.max(MIN_START_TIMEOUT));
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let inspect = with_cancel(cancel, self.context.engine.container_inspect(id)).await?;
            if inspect.state.status != "created" || tokio::time::Instant::now() >= deadline {
                return Ok(inspect);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                _ = tokio::time::sleep(START_POLL_INTERVAL) => {}
            }
        }
    }

    /// Links to running services, sorted by alias
    async fn links(&self, links: &BTreeMap<String, usize>, services: &[ServiceInfo]) -> Vec<String> {
        let mut result = Vec::new();
        for (alias, index) in links {
            let service = &services[*index];
            match self.context.engine.container_inspect(&service.id).await {
                Ok(inspect) if inspect.state.running => {
                    result.push(format!("{}:{}", service.id, alias));
                }
                Ok(_) => debug!("Service {} is not running, not linking {}", service.name, alias),
                Err(e) => debug!("Inspecting service {} failed: {}", service.name, e),
            }
        }
        result
    }
}

#[async_trait]
impl ServiceManager for DefaultServiceManager {
    async fn create_services(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let definitions = self.definitions()?;
        if definitions.is_empty() {
            return Ok(Vec::new());
        }

        let mut services: Vec<ServiceInfo> = Vec::new();
        let mut links: BTreeMap<String, usize> = BTreeMap::new();

        for (index, definition) in definitions.iter().enumerate() {
            let mut aliases = split_service_name(&definition.name).aliases;
            aliases.extend(definition.aliases());

            let fresh: Vec<String> = aliases
                .iter()
                .filter(|alias| !links.contains_key(*alias))
                .cloned()
                .collect();
            if fresh.len() < aliases.len() {
                self.context.logger.warningln(&format!(
                    "Service {} is already created. Ignoring.",
                    definition.name
                ));
            }
            if fresh.is_empty() {
                continue;
            }

            let service = self.create_service(cancel, index, definition, aliases).await?;
            self.context.logger.debugln(&format!(
                "Created service {} as {}",
                definition.name, service.id
            ));
            info!("Started service {} ({})", service.name, service.id);

            let position = services.len();
            for alias in fresh {
                links.insert(alias, position);
            }
            links.insert(service.short_id().to_string(), position);
            self.services.lock().unwrap().push(service.clone());
            services.push(service);
        }

        if self.context.flags.debug_services {
            for service in &services {
                stream_service_logs(
                    self.context.engine.clone(),
                    self.context.logger.clone(),
                    cancel.clone(),
                    service.id.clone(),
                    service.name.clone(),
                    service.aliases.clone(),
                );
            }
        }

        if let Some(timeout) = self.context.docker().wait_for_services_timeout() {
            HealthChecker::new(
                self.context.clone(),
                self.waiter.clone(),
                self.setup.helper_image.clone(),
                self.setup.network_mode.clone(),
            )
            .with_drain_delay(self.drain_delay)
            .wait_for_services(cancel, &services, timeout)
            .await?;
        }

        if !supports_links(&self.setup.network_mode) {
            return Ok(Vec::new());
        }
        Ok(self.links(&links, &services).await)
    }

    fn services(&self) -> Vec<ServiceInfo> {
        self.services.lock().unwrap().clone()
    }
}
