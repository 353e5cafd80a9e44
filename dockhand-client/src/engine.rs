//! The container engine surface used by the executor

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::types::{
    AttachOptions, ContainerCreateResponse, ContainerInspect, ContainerWaitResponse,
    CreateContainer, ImageImport, ImageInspect, LogsOptions, NetworkCreate,
    NetworkCreateResponse, NetworkResource, RemoveOptions, SystemInfo, Volume, VolumeCreate,
};

/// Readable side of an engine stream
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Both directions of an attached container
///
/// `output` is multiplexed (see `stdcopy`). Shutting down `input` closes
/// the container's stdin.
pub struct AttachedStreams {
    pub output: ByteStream,
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
}

/// Container engine operations
///
/// Calls are not cancellable themselves; callers race them against their
/// cancellation token and drop the future to abandon a call.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine and host information
    async fn info(&self) -> Result<SystemInfo>;

    /// Inspects a local image, `NotFound` when missing
    async fn image_inspect(&self, reference: &str) -> Result<ImageInspect>;

    /// Pulls an image and waits for the pull to finish
    ///
    /// # Arguments
    /// * `reference` - Fully qualified reference including tag or digest
    /// * `registry_auth` - Encoded `X-Registry-Auth` header value
    async fn image_pull(&self, reference: &str, registry_auth: Option<&str>) -> Result<()>;

    /// Imports a root filesystem tarball as an image
    async fn image_import(&self, source: ByteStream, options: ImageImport) -> Result<()>;

    async fn container_create(&self, create: &CreateContainer) -> Result<ContainerCreateResponse>;

    async fn container_start(&self, id: &str) -> Result<()>;

    async fn container_inspect(&self, id: &str) -> Result<ContainerInspect>;

    async fn container_attach(&self, id: &str, options: AttachOptions) -> Result<AttachedStreams>;

    /// Multiplexed log stream
    async fn container_logs(&self, id: &str, options: &LogsOptions) -> Result<ByteStream>;

    /// Blocks until the container stops
    async fn container_wait(&self, id: &str) -> Result<ContainerWaitResponse>;

    async fn container_kill(&self, id: &str, signal: &str) -> Result<()>;

    async fn container_remove(&self, id: &str, options: RemoveOptions) -> Result<()>;

    async fn network_list(&self) -> Result<Vec<NetworkResource>>;

    async fn network_create(&self, create: &NetworkCreate) -> Result<NetworkCreateResponse>;

    async fn network_inspect(&self, id: &str) -> Result<NetworkResource>;

    async fn network_disconnect(&self, network: &str, container: &str, force: bool) -> Result<()>;

    async fn network_remove(&self, id: &str) -> Result<()>;

    async fn volume_create(&self, create: &VolumeCreate) -> Result<Volume>;

    async fn volume_remove(&self, name: &str, force: bool) -> Result<()>;

    /// Releases client resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
