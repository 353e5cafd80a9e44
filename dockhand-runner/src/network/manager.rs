//! Per-build network management
//!
//! With per-build networking each job gets its own user-defined bridge.
//! Service containers join it under their aliases and the build container
//! reaches them by name. A network mode configured on the runner always
//! wins over the per-build network.

use async_trait::async_trait;
use dockhand_client::types::{NetworkCreate, NetworkResource};
use dockhand_core::labels::ResourceKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::with_cancel;
use crate::context::JobContext;
use crate::error::{ExecutorError, Result};

const NETWORK_MTU_OPTION: &str = "com.docker.network.driver.mtu";

/// Network modes that are not user-defined networks
const BUILTIN_MODES: [&str; 5] = ["", "default", "bridge", "host", "none"];

/// Whether a network mode names a user-defined network
pub fn is_user_defined(mode: &str) -> bool {
    !BUILTIN_MODES.contains(&mode) && !mode.starts_with("container:")
}

/// Whether containers in this mode can be linked with legacy links
pub fn supports_links(mode: &str) -> bool {
    mode.is_empty() || mode == "bridge"
}

#[async_trait]
pub trait NetworkManager: Send + Sync {
    /// Decides the job's network mode, creating a per-build network when enabled
    ///
    /// # Arguments
    /// * `network_mode` - Mode configured on the runner, empty for none
    /// * `enable_ipv6` - Whether the per-build network gets IPv6
    ///
    /// # Returns
    /// The network mode containers are created with
    async fn create(
        &self,
        cancel: &CancellationToken,
        network_mode: &str,
        enable_ipv6: bool,
    ) -> Result<String>;

    /// Current state of the per-build network, `None` without one
    async fn inspect(&self) -> Result<Option<NetworkResource>>;

    /// Removes the per-build network
    ///
    /// Containers the job did not create are disconnected first. Failures
    /// are logged and never fail the job.
    async fn cleanup(&self) -> Result<()>;
}

/// Network manager backed by the job's engine
pub struct DefaultNetworkManager {
    context: Arc<JobContext>,

    /// The per-build network, once created
    network: Mutex<Option<NetworkResource>>,
}

impl DefaultNetworkManager {
    pub fn new(context: Arc<JobContext>) -> Self {
        Self {
            context,
            network: Mutex::new(None),
        }
    }

    /// Name of the per-build network
    pub fn network_name(&self) -> String {
        format!(
            "{}-{}",
            self.context.job.project_unique_short_name(&self.context.runner()),
            self.context.suffix()
        )
    }

    fn network_id(&self) -> Option<String> {
        self.network.lock().unwrap().as_ref().map(|n| n.id.clone())
    }

    fn network_options(&self) -> HashMap<String, String> {
        let mut options = HashMap::new();
        let mtu = self.context.docker().network_mtu;
        if mtu != 0 {
            options.insert(NETWORK_MTU_OPTION.to_string(), mtu.to_string());
        }
        options
    }
}

#[async_trait]
impl NetworkManager for DefaultNetworkManager {
    async fn create(
        &self,
        cancel: &CancellationToken,
        network_mode: &str,
        enable_ipv6: bool,
    ) -> Result<String> {
        if !network_mode.is_empty() || !self.context.flags.network_per_build {
            return Ok(network_mode.to_string());
        }

        if self.network_id().is_some() {
            return Err(ExecutorError::SystemFailure(
                "build network is not empty".to_string(),
            ));
        }

        let name = self.network_name();
        self.context
            .logger
            .debugln(&format!("Creating build network {}", name));

        let engine = &self.context.engine;
        let request = NetworkCreate {
            name: name.clone(),
            driver: "bridge".to_string(),
            enable_ipv6,
            labels: self.context.labeler.labels(ResourceKind::Network, &[]),
            options: self.network_options(),
        };
        let response = with_cancel(cancel, engine.network_create(&request)).await?;
        if !response.warning.is_empty() {
            self.context.logger.warningln(&response.warning);
        }

        let network = with_cancel(cancel, engine.network_inspect(&response.id)).await?;
        info!("Created network {} ({})", name, network.id);
        *self.network.lock().unwrap() = Some(network);

        Ok(name)
    }

    async fn inspect(&self) -> Result<Option<NetworkResource>> {
        let Some(id) = self.network_id() else {
            return Ok(None);
        };

        self.context
            .logger
            .debugln(&format!("Inspect docker network: {}", id));
        let network = self.context.engine.network_inspect(&id).await?;
        Ok(Some(network))
    }

    async fn cleanup(&self) -> Result<()> {
        let network = match self.inspect().await {
            Ok(Some(network)) => network,
            Ok(None) => return Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Network already removed");
                *self.network.lock().unwrap() = None;
                return Ok(());
            }
            Err(e) => {
                warn!("Failed to inspect network before removal: {}", e);
                self.context
                    .logger
                    .warningln(&format!("Failed to inspect build network: {}", e));
                return Ok(());
            }
        };

        let owned = self.context.temporary_containers();
        for (id, container) in &network.containers {
            if owned.contains(id) {
                continue;
            }
            match self
                .context
                .engine
                .network_disconnect(&network.id, id, true)
                .await
            {
                Ok(()) => debug!(
                    "Disconnected stray container {} from network {}",
                    container.name, network.name
                ),
                Err(e) => warn!(
                    "Failed to disconnect container {} from network {}: {}",
                    container.name, network.name, e
                ),
            }
        }

        self.context
            .logger
            .debugln(&format!("Removing network: {}", network.id));
        match self.context.engine.network_remove(&network.id).await {
            Ok(()) => info!("Removed network {}", network.name),
            Err(e) if e.is_not_found() => debug!("Network {} already removed", network.id),
            Err(e) => {
                warn!("Failed to remove network {}: {}", network.name, e);
                self.context
                    .logger
                    .warningln(&format!("docker remove network {}: {}", network.id, e));
                return Ok(());
            }
        }

        *self.network.lock().unwrap() = None;
        Ok(())
    }
}
