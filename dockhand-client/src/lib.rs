//! Dockhand engine client
//!
//! The container engine surface the executor depends on, and an HTTP
//! implementation of it for the Docker Engine API.
//!
//! - `ContainerEngine` is the trait the executor programs against
//! - `DockerClient` speaks the Engine API over TCP with reqwest
//! - `stdcopy` decodes multiplexed attach and log streams
//!
//! # Example
//!
//! ```no_run
//! use dockhand_client::{ContainerEngine, DockerClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = DockerClient::new("tcp://localhost:2375", "1.43")?;
//!     let info = client.info().await?;
//!     println!("Engine OS: {}", info.os_type);
//!     Ok(())
//! }
//! ```

mod containers;
pub mod engine;
pub mod error;
mod images;
mod networks;
pub mod stdcopy;
mod system;
pub mod types;
mod volumes;

// Re-export commonly used types
pub use engine::{AttachedStreams, ByteStream, ContainerEngine};
pub use error::{EngineError, Result};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::types::{
    AttachOptions, ContainerCreateResponse, ContainerInspect, ContainerWaitResponse,
    CreateContainer, ImageImport, ImageInspect, LogsOptions, NetworkCreate,
    NetworkCreateResponse, NetworkResource, RemoveOptions, SystemInfo, Volume, VolumeCreate,
};

/// Default engine API version
pub const DEFAULT_API_VERSION: &str = "1.43";

/// HTTP client for the Docker Engine API
///
/// Requests go to `{base_url}/v{api_version}/...`. Only TCP endpoints
/// (`tcp://`, `http://`, `https://`) are supported.
#[derive(Debug, Clone)]
pub struct DockerClient {
    /// Base URL of the engine (e.g., "http://localhost:2375")
    base_url: String,
    /// API version without the leading `v`
    api_version: String,
    /// HTTP client instance
    client: Client,
}

impl DockerClient {
    /// Create a new engine client
    ///
    /// # Arguments
    /// * `host` - Engine endpoint, e.g. `tcp://localhost:2375`
    /// * `api_version` - Engine API version, e.g. `1.43`
    pub fn new(host: &str, api_version: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Self::with_client(host, api_version, client)
    }

    /// Create a new engine client with a custom HTTP client
    pub fn with_client(host: &str, api_version: &str, client: Client) -> Result<Self> {
        Ok(Self {
            base_url: base_url_from_host(host)?,
            api_version: api_version.trim_start_matches('v').to_string(),
            client,
        })
    }

    /// Get the base URL of the engine
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Versioned URL for an API path starting with `/`
    fn url(&self, path: &str) -> String {
        format!("{}/v{}{}", self.base_url, self.api_version, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Turns an error status into an `EngineError`
    ///
    /// The engine reports errors as `{"message": "..."}`.
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() || status.is_informational() || status.as_u16() == 304 {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or(body);

        Err(EngineError::api_error(status.as_u16(), message.trim()))
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let response = self.check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| EngineError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.check_status(response).await?;
        Ok(())
    }
}

/// Maps a `DOCKER_HOST` value to an HTTP base URL
fn base_url_from_host(host: &str) -> Result<String> {
    let host = host.trim().trim_end_matches('/');
    if let Some(rest) = host.strip_prefix("tcp://") {
        return Ok(format!("http://{}", rest));
    }
    if host.starts_with("http://") || host.starts_with("https://") {
        return Ok(host.to_string());
    }
    if host.starts_with("unix://") || host.starts_with("npipe://") {
        return Err(EngineError::InvalidHost(format!(
            "{}: socket endpoints are not supported, expose the engine over tcp://",
            host
        )));
    }
    Err(EngineError::InvalidHost(host.to_string()))
}

#[async_trait]
impl ContainerEngine for DockerClient {
    async fn info(&self) -> Result<SystemInfo> {
        self.system_info().await
    }

    async fn image_inspect(&self, reference: &str) -> Result<ImageInspect> {
        self.inspect_image(reference).await
    }

    async fn image_pull(&self, reference: &str, registry_auth: Option<&str>) -> Result<()> {
        self.pull_image(reference, registry_auth).await
    }

    async fn image_import(&self, source: ByteStream, options: ImageImport) -> Result<()> {
        self.import_image(source, options).await
    }

    async fn container_create(&self, create: &CreateContainer) -> Result<ContainerCreateResponse> {
        self.create_container(create).await
    }

    async fn container_start(&self, id: &str) -> Result<()> {
        self.start_container(id).await
    }

    async fn container_inspect(&self, id: &str) -> Result<ContainerInspect> {
        self.inspect_container(id).await
    }

    async fn container_attach(&self, id: &str, options: AttachOptions) -> Result<AttachedStreams> {
        self.attach_container(id, options).await
    }

    async fn container_logs(&self, id: &str, options: &LogsOptions) -> Result<ByteStream> {
        self.container_log_stream(id, options).await
    }

    async fn container_wait(&self, id: &str) -> Result<ContainerWaitResponse> {
        self.wait_container(id).await
    }

    async fn container_kill(&self, id: &str, signal: &str) -> Result<()> {
        self.kill_container(id, signal).await
    }

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> Result<()> {
        self.remove_container(id, options).await
    }

    async fn network_list(&self) -> Result<Vec<NetworkResource>> {
        self.list_networks().await
    }

    async fn network_create(&self, create: &NetworkCreate) -> Result<NetworkCreateResponse> {
        self.create_network(create).await
    }

    async fn network_inspect(&self, id: &str) -> Result<NetworkResource> {
        self.inspect_network(id).await
    }

    async fn network_disconnect(&self, network: &str, container: &str, force: bool) -> Result<()> {
        self.disconnect_network(network, container, force).await
    }

    async fn network_remove(&self, id: &str) -> Result<()> {
        self.remove_network(id).await
    }

    async fn volume_create(&self, create: &VolumeCreate) -> Result<Volume> {
        self.create_volume(create).await
    }

    async fn volume_remove(&self, name: &str, force: bool) -> Result<()> {
        self.remove_volume(name, force).await
    }
}
