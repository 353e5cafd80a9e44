//! Service health checks
//!
//! Every service gets a short-lived container from the helper image that
//! tries to connect to the service's TCP ports. A failing check never fails
//! the job: the trace gets a warning block with the check's error, its own
//! output and the service's logs, and the job carries on.

use dockhand_client::types::{ContainerConfig, CreateContainer};
use dockhand_core::labels::ResourceKind;
use futures_util::future::join_all;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cancel::with_cancel;
use crate::container::host_config::health_check_host_config;
use crate::container::remove_container;
use crate::context::JobContext;
use crate::error::{ExecutorError, Result};
use crate::services::logs::{SERVICE_LOG_LIMIT, read_container_logs};
use crate::services::manager::ServiceInfo;
use crate::services::ports::{health_check_env, health_check_ports};
use crate::trace::{ANSI_RESET, ANSI_YELLOW};
use crate::wait::Waiter;

/// Command of the helper image that probes the ports
const HEALTH_CHECK_COMMAND: [&str; 2] = ["gitlab-runner-helper", "health-check"];

/// Pause before reading a failed service's logs
pub const DEFAULT_LOG_DRAIN_DELAY: Duration = Duration::from_secs(1);

/// A failed check, with the output of the check container when it ran
#[derive(Debug, Error)]
#[error("{error}")]
pub struct HealthCheckFailure {
    pub error: ExecutorError,
    pub logs: Option<String>,
}

impl HealthCheckFailure {
    fn new(error: ExecutorError) -> Self {
        Self { error, logs: None }
    }
}

/// Runs health checks for the services of one job
pub struct HealthChecker {
    context: Arc<JobContext>,
    waiter: Arc<dyn Waiter>,
    /// Id of the helper image
    image: String,
    network_mode: String,
    drain_delay: Duration,
}

impl HealthChecker {
    pub fn new(
        context: Arc<JobContext>,
        waiter: Arc<dyn Waiter>,
        image: impl Into<String>,
        network_mode: impl Into<String>,
    ) -> Self {
        Self {
            context,
            waiter,
            image: image.into(),
            network_mode: network_mode.into(),
            drain_delay: DEFAULT_LOG_DRAIN_DELAY,
        }
    }

    pub fn with_drain_delay(mut self, delay: Duration) -> Self {
        self.drain_delay = delay;
        self
    }

    /// Checks every service concurrently
    ///
    /// Unhealthy services are reported in the trace. Only cancellation is
    /// returned as an error.
    pub async fn wait_for_services(
        &self,
        cancel: &CancellationToken,
        services: &[ServiceInfo],
        timeout: Duration,
    ) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }

        self.context.logger.println(&format!(
            "Waiting for services to be up and running (timeout {} seconds)...",
            timeout.as_secs()
        ));

        let results = join_all(
            services
                .iter()
                .map(|service| self.wait_for_service(cancel, service, timeout)),
        )
        .await;

        if results
            .iter()
            .any(|r| matches!(r, Err(ExecutorError::Cancelled)))
        {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }

    /// Checks one service, writing the warning block when it is unhealthy
    pub async fn wait_for_service(
        &self,
        cancel: &CancellationToken,
        service: &ServiceInfo,
        timeout: Duration,
    ) -> Result<()> {
        let failure = match self.run(cancel, service, timeout).await {
            Ok(()) => return Ok(()),
            Err(failure) => failure,
        };
        if matches!(failure.error, ExecutorError::Cancelled) {
            return Err(ExecutorError::Cancelled);
        }

        warn!("Service {} is unhealthy: {}", service.name, failure.error);
        self.report(service, &failure).await;
        Err(failure.error)
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        service: &ServiceInfo,
        timeout: Duration,
    ) -> std::result::Result<(), HealthCheckFailure> {
        let inspect = &service.inspect;
        let ports = health_check_ports(inspect.env(), &inspect.exposed_ports())
            .map_err(HealthCheckFailure::new)?;
        if ports.is_empty() {
            return Err(HealthCheckFailure::new(ExecutorError::ScriptFailure(
                format!("service {:?} has no exposed ports", service.name),
            )));
        }

        let short_id = service.short_id();
        let extra_hosts = inspect
            .network_settings
            .ip_addresses()
            .into_iter()
            .map(|ip| format!("{}:{}", short_id, ip))
            .collect();

        let name = format!("{}-wait-for-service", service.name);
        let create = CreateContainer {
            name: name.clone(),
            config: ContainerConfig {
                image: self.image.clone(),
                cmd: Some(HEALTH_CHECK_COMMAND.iter().map(|s| s.to_string()).collect()),
                env: health_check_env(short_id, &ports),
                labels: self
                    .context
                    .labeler
                    .labels(ResourceKind::Wait, &[("wait", service.id.as_str())]),
                ..Default::default()
            },
            host_config: health_check_host_config(
                self.context.docker(),
                &self.network_mode,
                extra_hosts,
            ),
            ..Default::default()
        };

        self.context
            .logger
            .debugln(&format!("Creating service healthcheck container {}...", name));
        let engine = self.context.engine.as_ref();
        let response = with_cancel(cancel, engine.container_create(&create))
            .await
            .map_err(|e| match e {
                ExecutorError::Cancelled => HealthCheckFailure::new(e),
                e => HealthCheckFailure::new(ExecutorError::SystemFailure(format!(
                    "create service container: {}",
                    e
                ))),
            })?;

        let result = self.start_and_wait(cancel, &response.id, &name, timeout).await;
        let result = match result {
            Ok(()) => Ok(()),
            Err(error @ ExecutorError::Cancelled) => Err(HealthCheckFailure::new(error)),
            Err(error) => Err(HealthCheckFailure {
                error,
                logs: Some(read_container_logs(engine, &response.id, SERVICE_LOG_LIMIT).await),
            }),
        };

        if let Err(e) = remove_container(engine, &self.context.logger, &response.id).await {
            debug!("Removing health check container {} failed: {}", name, e);
        }
        result
    }

    async fn start_and_wait(
        &self,
        cancel: &CancellationToken,
        id: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.context.logger.debugln(&format!(
            "Starting service healthcheck container {} ({})...",
            name, id
        ));
        match with_cancel(cancel, self.context.engine.container_start(id)).await {
            Ok(()) => {}
            Err(ExecutorError::Cancelled) => return Err(ExecutorError::Cancelled),
            Err(e) => {
                return Err(ExecutorError::SystemFailure(format!(
                    "start service container: {}",
                    e
                )));
            }
        }

        match tokio::time::timeout(timeout, self.waiter.wait(cancel, id)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(ExecutorError::Cancelled)) => Err(ExecutorError::Cancelled),
            Ok(Err(e)) => Err(ExecutorError::ScriptFailure(format!(
                "service {:?} health check: {}",
                name, e
            ))),
            Err(_) => Err(ExecutorError::ScriptFailure(format!(
                "service {:?} timeout",
                name
            ))),
        }
    }

    async fn report(&self, service: &ServiceInfo, failure: &HealthCheckFailure) {
        let mut buffer = String::new();
        let _ = writeln!(buffer);
        let _ = writeln!(
            buffer,
            "{}*** WARNING:{} Service {} probably didn't start properly.",
            ANSI_YELLOW, ANSI_RESET, service.name
        );
        let _ = writeln!(buffer);
        let _ = writeln!(buffer, "Health check error:");
        let _ = writeln!(buffer, "{}", failure.error.to_string().trim());

        if let Some(logs) = &failure.logs {
            let _ = writeln!(buffer);
            let _ = writeln!(buffer, "Health check container logs:");
            let _ = writeln!(buffer, "{}", logs);
        }

        if !self.drain_delay.is_zero() {
            tokio::time::sleep(self.drain_delay).await;
        }
        let service_logs =
            read_container_logs(self.context.engine.as_ref(), &service.id, SERVICE_LOG_LIMIT).await;

        let _ = writeln!(buffer);
        let _ = writeln!(buffer, "Service container logs:");
        let _ = writeln!(buffer, "{}", service_logs);
        let _ = writeln!(buffer);
        let _ = writeln!(buffer, "{}*********{}", ANSI_YELLOW, ANSI_RESET);
        let _ = writeln!(buffer);

        self.context.logger.write_raw(buffer.as_bytes());
    }
}
