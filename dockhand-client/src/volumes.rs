//! Volume endpoints

use crate::DockerClient;
use crate::error::Result;
use crate::types::{Volume, VolumeCreate};

impl DockerClient {
    /// Create a named volume
    ///
    /// Creating a volume that already exists returns the existing one.
    pub async fn create_volume(&self, create: &VolumeCreate) -> Result<Volume> {
        let response = self
            .client
            .post(self.url("/volumes/create"))
            .json(create)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Remove a named volume
    pub async fn remove_volume(&self, name: &str, force: bool) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/volumes/{}", name)))
            .query(&[("force", force)])
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}
