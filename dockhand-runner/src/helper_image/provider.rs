//! Making the helper image available on the engine

use async_trait::async_trait;
use dockhand_client::ContainerEngine;
use dockhand_client::types::ImageInspect;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::prebuilt::{default_search_paths, load};
use super::HelperImageInfo;
use crate::cancel::with_cancel;
use crate::context::JobContext;
use crate::error::{ExecutorError, Result};
use crate::pull::PullManager;

#[async_trait]
pub trait HelperImageProvider: Send + Sync {
    /// Puts the helper image on the engine
    ///
    /// # Returns
    /// The image as the engine reports it
    async fn provide(&self, cancel: &CancellationToken, info: &HelperImageInfo) -> Result<ImageInspect>;
}

/// Imports prebuilt archives from the local filesystem
pub struct LocalImportProvider {
    engine: Arc<dyn ContainerEngine>,
    search_paths: Vec<PathBuf>,
}

impl LocalImportProvider {
    pub fn new(engine: Arc<dyn ContainerEngine>, search_paths: Vec<PathBuf>) -> Self {
        Self {
            engine,
            search_paths,
        }
    }
}

#[async_trait]
impl HelperImageProvider for LocalImportProvider {
    async fn provide(&self, cancel: &CancellationToken, info: &HelperImageInfo) -> Result<ImageInspect> {
        if !info.supports_local_import {
            return Err(ExecutorError::SystemFailure(format!(
                "local import of helper images is not supported on {}",
                info.os
            )));
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutorError::Cancelled),
            loaded = load(self.engine.as_ref(), &self.search_paths, info) => loaded?,
        }
        with_cancel(cancel, self.engine.image_inspect(&info.reference())).await
    }
}

/// Pulls the helper image with the runner's pull policies
pub struct RegistryPullProvider {
    pull: Arc<dyn PullManager>,
}

impl RegistryPullProvider {
    pub fn new(pull: Arc<dyn PullManager>) -> Self {
        Self { pull }
    }
}

#[async_trait]
impl HelperImageProvider for RegistryPullProvider {
    async fn provide(&self, cancel: &CancellationToken, info: &HelperImageInfo) -> Result<ImageInspect> {
        self.pull.get_image(cancel, &info.reference(), None).await
    }
}

/// Resolves the helper image once per job
///
/// A `helper_image` from the runner settings wins. Otherwise an image
/// already on the engine is used, then a prebuilt archive, then the
/// registry.
pub struct DefaultHelperImageResolver {
    context: Arc<JobContext>,
    pull: Arc<dyn PullManager>,
    local: Arc<dyn HelperImageProvider>,
    registry: Arc<dyn HelperImageProvider>,
    resolved: Mutex<Option<ImageInspect>>,
}

impl DefaultHelperImageResolver {
    pub fn new(context: Arc<JobContext>, pull: Arc<dyn PullManager>) -> Self {
        let local = Arc::new(LocalImportProvider::new(
            context.engine.clone(),
            default_search_paths(),
        ));
        let registry = Arc::new(RegistryPullProvider::new(pull.clone()));
        Self {
            context,
            pull,
            local,
            registry,
            resolved: Mutex::new(None),
        }
    }

    /// Replaces the directories searched for prebuilt archives
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.local = Arc::new(LocalImportProvider::new(self.context.engine.clone(), paths));
        self
    }

    pub async fn resolve(&self, cancel: &CancellationToken, info: &HelperImageInfo) -> Result<ImageInspect> {
        if let Some(image) = self.resolved.lock().unwrap().clone() {
            return Ok(image);
        }

        let image = self.lookup(cancel, info).await?;
        *self.resolved.lock().unwrap() = Some(image.clone());
        Ok(image)
    }

    async fn lookup(&self, cancel: &CancellationToken, info: &HelperImageInfo) -> Result<ImageInspect> {
        let logger = &self.context.logger;
        let configured = self.context.expand(&self.context.docker().helper_image);
        if !configured.is_empty() {
            logger.debugln(&format!(
                "Pull configured helper_image for predefined container instead of import bundled image {} ...",
                configured
            ));
            return self.pull.get_image(cancel, &configured, None).await;
        }

        let reference = info.reference();
        match with_cancel(cancel, self.context.engine.image_inspect(&reference)).await {
            Ok(image) => return Ok(image),
            Err(ExecutorError::Cancelled) => return Err(ExecutorError::Cancelled),
            Err(e) => debug!("Helper image {} is not available locally: {}", reference, e),
        }

        if info.supports_local_import {
            logger.debugln(&format!("Loading prebuilt {:?} image", info.prebuilt));
            match self.local.provide(cancel, info).await {
                Ok(image) => return Ok(image),
                Err(ExecutorError::Cancelled) => return Err(ExecutorError::Cancelled),
                Err(e) => debug!("Loading prebuilt helper image failed: {}", e),
            }
        }

        logger.debugln(&format!("Getting image {:?} from registry", reference));
        self.registry.provide(cancel, info).await
    }
}
