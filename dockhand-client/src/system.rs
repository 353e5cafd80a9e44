//! System endpoints

use crate::DockerClient;
use crate::error::Result;
use crate::types::SystemInfo;

impl DockerClient {
    /// Get engine and host information
    pub async fn system_info(&self) -> Result<SystemInfo> {
        let response = self.client.get(self.url("/info")).send().await?;

        self.handle_response(response).await
    }
}
