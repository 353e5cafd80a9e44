//! Network endpoints

use serde_json::json;

use crate::DockerClient;
use crate::error::Result;
use crate::types::{NetworkCreate, NetworkCreateResponse, NetworkResource};

impl DockerClient {
    /// List all networks
    pub async fn list_networks(&self) -> Result<Vec<NetworkResource>> {
        let response = self.client.get(self.url("/networks")).send().await?;

        self.handle_response(response).await
    }

    /// Create a network
    pub async fn create_network(&self, create: &NetworkCreate) -> Result<NetworkCreateResponse> {
        let response = self
            .client
            .post(self.url("/networks/create"))
            .json(create)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Inspect a network, including its attached containers
    pub async fn inspect_network(&self, id: &str) -> Result<NetworkResource> {
        let response = self
            .client
            .get(self.url(&format!("/networks/{}", id)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Disconnect a container from a network
    pub async fn disconnect_network(&self, network: &str, container: &str, force: bool) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/networks/{}/disconnect", network)))
            .json(&json!({ "Container": container, "Force": force }))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    /// Remove a network
    pub async fn remove_network(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/networks/{}", id)))
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
