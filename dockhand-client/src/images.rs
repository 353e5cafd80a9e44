//! Image endpoints

use futures_util::StreamExt;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::engine::ByteStream;
use crate::error::{EngineError, Result};
use crate::types::{ImageImport, ImageInspect};
use crate::DockerClient;

impl DockerClient {
    /// Inspect a local image
    ///
    /// # Returns
    /// `EngineError::NotFound` when the image is not present locally
    pub async fn inspect_image(&self, reference: &str) -> Result<ImageInspect> {
        let response = self
            .client
            .get(self.url(&format!("/images/{}/json", reference)))
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Pull an image, blocking until the engine reports completion
    ///
    /// # Arguments
    /// * `reference` - Reference with tag or digest
    /// * `registry_auth` - Value for the `X-Registry-Auth` header
    pub async fn pull_image(&self, reference: &str, registry_auth: Option<&str>) -> Result<()> {
        let mut request = self
            .client
            .post(self.url("/images/create"))
            .query(&[("fromImage", reference)]);
        if let Some(auth) = registry_auth {
            request = request.header("X-Registry-Auth", auth);
        }

        let response = self.check_status(request.send().await?).await?;
        self.consume_progress(response).await
    }

    /// Import a root filesystem tarball
    pub async fn import_image(&self, mut source: ByteStream, options: ImageImport) -> Result<()> {
        let mut body = Vec::new();
        source.read_to_end(&mut body).await?;

        let mut query: Vec<(&str, &str)> = vec![
            ("fromSrc", "-"),
            ("repo", options.repository.as_str()),
            ("tag", options.tag.as_str()),
        ];
        for change in &options.changes {
            query.push(("changes", change.as_str()));
        }

        let response = self
            .client
            .post(self.url("/images/create"))
            .query(&query)
            .header("Content-Type", "application/x-tar")
            .body(body)
            .send()
            .await?;

        let response = self.check_status(response).await?;
        self.consume_progress(response).await
    }

    /// Reads a JSON progress stream to its end
    ///
    /// The engine reports failures inside the stream with an `error` field
    /// after the status line was already sent.
    async fn consume_progress(&self, response: reqwest::Response) -> Result<()> {
        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                check_progress_line(&line)?;
            }
        }

        check_progress_line(&pending)
    }
}

fn check_progress_line(line: &[u8]) -> Result<()> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return Ok(());
    };

    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return Err(EngineError::api_error(500, error));
    }

    if let Some(status) = value.get("status").and_then(|s| s.as_str()) {
        debug!("Engine progress: {}", status);
    }

    Ok(())
}
