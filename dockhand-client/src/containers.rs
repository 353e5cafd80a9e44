//! Container endpoints

use futures_util::StreamExt;
use reqwest::header::{CONNECTION, UPGRADE};
use serde::Serialize;
use tokio_util::io::StreamReader;

use crate::DockerClient;
use crate::engine::{AttachedStreams, ByteStream};
use crate::error::Result;
use crate::types::{
    AttachOptions, ContainerConfig, ContainerCreateResponse, ContainerInspect,
    ContainerWaitResponse, CreateContainer, HostConfig, LogsOptions, NetworkingConfig,
    RemoveOptions,
};

#[derive(Serialize)]
struct CreateBody<'a> {
    #[serde(flatten)]
    config: &'a ContainerConfig,
    #[serde(rename = "HostConfig")]
    host_config: &'a HostConfig,
    #[serde(rename = "NetworkingConfig")]
    networking_config: &'a NetworkingConfig,
}

impl DockerClient {
    /// Create a container
    pub async fn create_container(&self, create: &CreateContainer) -> Result<ContainerCreateResponse> {
        let body = CreateBody {
            config: &create.config,
            host_config: &create.host_config,
            networking_config: &create.networking_config,
        };

        let mut request = self.client.post(self.url("/containers/create")).json(&body);
        if !create.name.is_empty() {
            request = request.query(&[("name", create.name.as_str())]);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    /// Start a container; starting a running container is not an error
    pub async fn start_container(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/start", id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Inspect a container
    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInspect> {
        let response = self
            .client
            .get(self.url(&format!("/containers/{}/json", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Attach to a container's standard streams
    ///
    /// The connection is upgraded to a raw TCP stream carrying stdin one
    /// way and the multiplexed output the other way.
    pub async fn attach_container(&self, id: &str, options: AttachOptions) -> Result<AttachedStreams> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/attach", id)))
            .query(&[
                ("stream", options.stream),
                ("stdin", options.stdin),
                ("stdout", options.stdout),
                ("stderr", options.stderr),
            ])
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, "tcp")
            .send()
            .await?;

        let response = self.check_status(response).await?;
        let upgraded = response.upgrade().await?;
        let (output, input) = tokio::io::split(upgraded);

        Ok(AttachedStreams {
            output: Box::new(output),
            input: Box::new(input),
        })
    }

    /// Stream container logs
    pub async fn container_log_stream(&self, id: &str, options: &LogsOptions) -> Result<ByteStream> {
        let tail = options
            .tail
            .map(|n| n.to_string())
            .unwrap_or_else(|| "all".to_string());

        let response = self
            .client
            .get(self.url(&format!("/containers/{}/logs", id)))
            .query(&[
                ("stdout", options.stdout.to_string()),
                ("stderr", options.stderr.to_string()),
                ("timestamps", options.timestamps.to_string()),
                ("follow", options.follow.to_string()),
                ("tail", tail),
            ])
            .send()
            .await?;

        let response = self.check_status(response).await?;
        let stream = response.bytes_stream().map(|r| r.map_err(std::io::Error::other));

        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    /// Wait for a container to stop
    pub async fn wait_container(&self, id: &str) -> Result<ContainerWaitResponse> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/wait", id)))
            .query(&[("condition", "not-running")])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Send a signal to a container
    pub async fn kill_container(&self, id: &str, signal: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/containers/{}/kill", id)))
            .query(&[("signal", signal)])
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Remove a container
    pub async fn remove_container(&self, id: &str, options: RemoveOptions) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/containers/{}", id)))
            .query(&[("force", options.force), ("v", options.remove_volumes)])
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
