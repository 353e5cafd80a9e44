//! Executor registry
//!
//! Maps executor names to providers. The registry is filled once at
//! startup and only read while jobs are dispatched.

use dockhand_core::config::RunnerSettings;
use dockhand_core::job::Job;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::docker::{DEFAULT_CLEANUP_TIMEOUT, DockerExecutor, EngineFactory, Executor};
use super::variant::ExecutorVariant;
use crate::trace::JobTrace;

/// Creates a fresh executor for every job
pub trait ExecutorProvider: Send + Sync {
    fn create(&self, job: Job, settings: RunnerSettings, trace: Arc<dyn JobTrace>) -> Box<dyn Executor>;
}

/// Provider of the docker executor variants
pub struct DockerExecutorProvider {
    variant: ExecutorVariant,
    connect: EngineFactory,
    helper_revision: String,
    helper_search_paths: Option<Vec<PathBuf>>,
    cleanup_timeout: Duration,
}

impl DockerExecutorProvider {
    pub fn new(variant: ExecutorVariant, connect: EngineFactory, helper_revision: &str) -> Self {
        Self {
            variant,
            connect,
            helper_revision: helper_revision.to_string(),
            helper_search_paths: None,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }

    /// Looks for prebuilt helper archives in `paths` instead of next to the binary
    pub fn with_helper_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.helper_search_paths = Some(paths);
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }
}

impl ExecutorProvider for DockerExecutorProvider {
    fn create(&self, job: Job, settings: RunnerSettings, trace: Arc<dyn JobTrace>) -> Box<dyn Executor> {
        let mut executor =
            DockerExecutor::new(self.variant.clone(), job, settings, trace, self.connect.clone())
                .with_helper_revision(self.helper_revision.clone())
                .with_cleanup_timeout(self.cleanup_timeout);
        if let Some(paths) = &self.helper_search_paths {
            executor = executor.with_helper_search_paths(paths.clone());
        }
        Box::new(executor)
    }
}

/// Executor providers by name
#[derive(Default)]
pub struct ExecutorRegistry {
    providers: BTreeMap<String, Arc<dyn ExecutorProvider>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `docker` and `docker-windows` executors
    ///
    /// # Arguments
    /// * `connect` - Engine connection shared by both variants
    /// * `helper_revision` - Revision part of the helper image tag
    /// * `cleanup_timeout` - Upper bound for removing a job's resources
    /// * `helper_images_dir` - Directory with prebuilt helper archives, the
    ///   binary's directory when `None`
    pub fn with_docker(
        connect: EngineFactory,
        helper_revision: &str,
        cleanup_timeout: Duration,
        helper_images_dir: Option<PathBuf>,
    ) -> Self {
        let mut registry = Self::new();
        for variant in [ExecutorVariant::linux(), ExecutorVariant::windows()] {
            let name = variant.name;
            let mut provider = DockerExecutorProvider::new(variant, connect.clone(), helper_revision)
                .with_cleanup_timeout(cleanup_timeout);
            if let Some(dir) = &helper_images_dir {
                provider = provider.with_helper_search_paths(vec![dir.clone()]);
            }
            registry.register(name, Arc::new(provider));
        }
        registry
    }

    pub fn register(&mut self, name: &str, provider: Arc<dyn ExecutorProvider>) {
        self.providers.insert(name.to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutorProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}
