//! Docker executor
//!
//! Runs one job through three phases:
//! - `prepare` connects to the engine, resolves images and creates the
//!   network, volumes and services of the job
//! - `run` executes each step, in a fresh helper container for predefined
//!   steps and in the job's single build container otherwise
//! - `cleanup` removes everything the job created, even after a failed or
//!   partial `prepare`

use async_trait::async_trait;
use dockhand_client::ContainerEngine;
use dockhand_client::types::{ContainerInspect, ImageInspect};
use dockhand_core::config::{DockerSettings, RunnerSettings};
use dockhand_core::image::ImageSpec;
use dockhand_core::job::{GitStrategy, Job, Step};
use dockhand_core::volume::{PathExpander, VolumeParser, is_host_mounted_volume, new_parser};
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::stage::{ExecutorStage, StageTracker};
use super::variant::ExecutorVariant;
use crate::cancel::with_cancel;
use crate::container::{
    ContainerKind, ContainerManager, ContainerRequest, ContainerSetup, DefaultContainerManager,
    DefaultExec, Exec, ExecStreams, bind_devices, gpu_requests, remove_container,
};
use crate::context::JobContext;
use crate::error::{ExecutorError, Result};
use crate::helper_image::{
    DefaultHelperImageResolver, HelperImageConfig, HelperImageInfo, helper_image_info,
};
use crate::network::{DefaultNetworkManager, NetworkManager};
use crate::pull::{DefaultPullManager, PullManager, expand_image_name};
use crate::services::{
    DEFAULT_LOG_DRAIN_DELAY, DefaultServiceManager, ServiceManager, ServiceSetup,
    service_definitions,
};
use crate::trace::JobTrace;
use crate::volumes::{DefaultVolumeManager, VolumeManager, VolumeManagerConfig};
use crate::wait::DefaultWaiter;

/// Job variable with the number of attempts of a step
pub const EXECUTOR_JOB_SECTION_ATTEMPTS: &str = "EXECUTOR_JOB_SECTION_ATTEMPTS";

const DEFAULT_SECTION_ATTEMPTS: usize = 1;
const MAX_SECTION_ATTEMPTS: usize = 10;

/// Upper bound of the time cleanup may take
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(300);

/// Revision of the helper image tag when none is configured
pub const DEFAULT_HELPER_REVISION: &str = "latest";

/// Connects to the engine described by the runner settings
pub type EngineFactory =
    Arc<dyn Fn(&DockerSettings) -> Result<Arc<dyn ContainerEngine>> + Send + Sync>;

/// Builds the collaborator that runs scripts in containers
pub type ExecFactory = Arc<dyn Fn(Arc<dyn ContainerEngine>) -> Arc<dyn Exec> + Send + Sync>;

/// One script to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorCommand {
    /// Step name, for retries and diagnostics
    pub stage: String,
    pub script: String,
    /// Runs in a fresh helper container
    pub predefined: bool,
}

impl From<&Step> for ExecutorCommand {
    fn from(step: &Step) -> Self {
        Self {
            stage: step.name.clone(),
            script: step.script_text(),
            predefined: step.predefined,
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Sets up everything the job's steps run in
    ///
    /// `cleanup` must run afterwards whether this succeeded or not.
    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()>;

    /// Runs one step
    ///
    /// # Returns
    /// `ExecutorError::Build` when the script exits non-zero,
    /// `ExecutorError::Cancelled` when the token fired
    async fn run(&self, cancel: &CancellationToken, command: &ExecutorCommand) -> Result<()>;

    /// Removes the job's resources, logging failures
    async fn cleanup(&mut self);

    fn stage(&self) -> ExecutorStage;
}

/// Directories of the job inside its containers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildsLayout {
    /// Root all projects are checked out under
    pub root_dir: String,
    /// Checkout of this job's project
    pub project_dir: String,
    /// Whether a user volume already mounts the builds directory
    pub shared: bool,
}

/// Number of attempts of a step, from `EXECUTOR_JOB_SECTION_ATTEMPTS`
///
/// Values outside 1 to 10 fall back to a single attempt.
pub fn section_attempts(context: &JobContext) -> usize {
    let Some(value) = context.job.variables.get(EXECUTOR_JOB_SECTION_ATTEMPTS) else {
        return DEFAULT_SECTION_ATTEMPTS;
    };

    match value.trim().parse::<usize>() {
        Ok(attempts) if (1..=MAX_SECTION_ATTEMPTS).contains(&attempts) => attempts,
        _ => {
            context.logger.warningln(&format!(
                "Invalid {} value {:?}, using {}",
                EXECUTOR_JOB_SECTION_ATTEMPTS, value, DEFAULT_SECTION_ATTEMPTS
            ));
            DEFAULT_SECTION_ATTEMPTS
        }
    }
}

fn parent_dir(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    match trimmed.rfind(['/', '\\']) {
        Some(0) => trimmed[..1].to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

fn default_exec(engine: Arc<dyn ContainerEngine>) -> Arc<dyn Exec> {
    let waiter = Arc::new(DefaultWaiter::new(engine.clone()));
    Arc::new(DefaultExec::new(engine, waiter))
}

/// Collaborators available once `prepare` succeeded
struct Runtime {
    containers: Arc<dyn ContainerManager>,
    exec: Arc<dyn Exec>,
    helper: HelperImageInfo,
    helper_image: ImageInspect,
}

/// Executor running job steps in containers of a Docker engine
pub struct DockerExecutor {
    variant: ExecutorVariant,
    job: Job,
    settings: RunnerSettings,
    trace: Arc<dyn JobTrace>,
    connect: EngineFactory,
    exec_factory: ExecFactory,
    stage: Arc<StageTracker>,

    helper_revision: String,
    helper_search_paths: Option<Vec<PathBuf>>,
    drain_delay: Duration,
    cleanup_timeout: Duration,

    // Filled in step by step during prepare; cleanup releases whatever exists
    context: Option<Arc<JobContext>>,
    network: Option<Arc<dyn NetworkManager>>,
    volumes: Option<Arc<dyn VolumeManager>>,
    runtime: Option<Runtime>,

    build_container: Mutex<Option<ContainerInspect>>,
}

impl DockerExecutor {
    /// Creates an executor for one job
    ///
    /// # Arguments
    /// * `variant` - Linux or Windows flavor
    /// * `job` - The job to run
    /// * `settings` - Settings of the runner
    /// * `trace` - Sink for the job's output
    /// * `connect` - Opens the engine connection during `prepare`
    pub fn new(
        variant: ExecutorVariant,
        job: Job,
        settings: RunnerSettings,
        trace: Arc<dyn JobTrace>,
        connect: EngineFactory,
    ) -> Self {
        Self {
            variant,
            job,
            settings,
            trace,
            connect,
            exec_factory: Arc::new(default_exec),
            stage: Arc::new(StageTracker::new()),
            helper_revision: DEFAULT_HELPER_REVISION.to_string(),
            helper_search_paths: None,
            drain_delay: DEFAULT_LOG_DRAIN_DELAY,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            context: None,
            network: None,
            volumes: None,
            runtime: None,
            build_container: Mutex::new(None),
        }
    }

    pub fn with_helper_revision(mut self, revision: impl Into<String>) -> Self {
        self.helper_revision = revision.into();
        self
    }

    /// Directories searched for prebuilt helper archives
    pub fn with_helper_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.helper_search_paths = Some(paths);
        self
    }

    /// Pause before reading logs of an unhealthy service
    pub fn with_drain_delay(mut self, delay: Duration) -> Self {
        self.drain_delay = delay;
        self
    }

    pub fn with_cleanup_timeout(mut self, timeout: Duration) -> Self {
        self.cleanup_timeout = timeout;
        self
    }

    #[cfg(test)]
    pub fn with_exec_factory(mut self, factory: ExecFactory) -> Self {
        self.exec_factory = factory;
        self
    }

    /// The job's context, once `prepare` reached the engine
    pub fn context(&self) -> Option<&Arc<JobContext>> {
        self.context.as_ref()
    }

    /// Connects to the engine and checks that it runs the expected OS
    async fn connect(&mut self, cancel: &CancellationToken) -> Result<(Arc<JobContext>, HelperImageInfo)> {
        self.settings.docker.validate()?;

        let engine = (self.connect)(&self.settings.docker)?;
        let context = JobContext::new(
            self.job.clone(),
            self.settings.clone(),
            engine.clone(),
            self.trace.clone(),
        );
        self.context = Some(context.clone());

        let info = with_cancel(cancel, engine.info()).await?;
        debug!(
            "Connected to {} ({}, {}, engine {})",
            info.name, info.operating_system, info.architecture, info.server_version
        );
        if info.os_type != self.variant.os_type {
            return Err(ExecutorError::ScriptFailure(format!(
                "executor requires OSType={}, but Docker Engine supports only OSType={}",
                self.variant.os_type, info.os_type
            )));
        }

        let helper = helper_image_info(&HelperImageConfig {
            os_type: info.os_type.clone(),
            architecture: info.architecture.clone(),
            kernel_version: info.kernel_version.clone(),
            shell: self.variant.shell.to_string(),
            flavor: context.expand(&context.docker().helper_image_flavor),
            revision: self.helper_revision.clone(),
        })?;

        Ok((context, helper))
    }

    fn volume_parser(&self, context: &Arc<JobContext>) -> Result<Arc<dyn VolumeParser>> {
        let expand_context = context.clone();
        let expander: PathExpander = Arc::new(move |value: &str| expand_context.expand(value));
        Ok(Arc::from(new_parser(self.variant.os_type, expander)?))
    }

    /// Decides where the project is checked out
    ///
    /// A builds directory that a user volume already mounts is shared
    /// between runners, so the checkout gets a runner specific prefix.
    fn builds_layout(&self, context: &JobContext, parser: &dyn VolumeParser) -> Result<BuildsLayout> {
        let builds_dir = if self.settings.builds_dir.is_empty() {
            self.variant.default_builds_dir().to_string()
        } else {
            self.settings.builds_dir.clone()
        };

        let shared = is_host_mounted_volume(parser, &builds_dir, &context.docker().volumes)?;
        let path = parser.path();
        let root_dir = if shared {
            let runner = context.runner().short_description();
            let slot = context.job.project_runner_id.to_string();
            path.join(&[builds_dir.as_str(), runner.as_str(), slot.as_str()])
        } else {
            path.join(&[builds_dir.as_str()])
        };
        let project = context.job.project_path();
        let project_dir = path.join(&[root_dir.as_str(), project.as_str()]);

        Ok(BuildsLayout {
            root_dir,
            project_dir,
            shared,
        })
    }

    async fn create_user_volumes(
        &self,
        cancel: &CancellationToken,
        context: &JobContext,
        volumes: &dyn VolumeManager,
    ) -> Result<()> {
        self.stage.set(ExecutorStage::CreatingUserVolumes);
        context.logger.debugln("Creating user-defined volumes...");

        for spec in &context.docker().volumes {
            match volumes.create(cancel, spec).await {
                Ok(()) => {}
                Err(ExecutorError::CacheVolumesDisabled) => {
                    context.logger.warningln(&format!(
                        "Container based cache volumes creation is disabled. Will not create volume for {:?}",
                        spec
                    ));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Backs the builds directory with a volume
    ///
    /// With the `fetch` strategy the checkout is kept between jobs in a
    /// cache volume, otherwise it lives in a temporary volume.
    async fn create_build_volume(
        &self,
        cancel: &CancellationToken,
        context: &JobContext,
        parser: &dyn VolumeParser,
        volumes: &dyn VolumeManager,
        layout: &BuildsLayout,
    ) -> Result<()> {
        self.stage.set(ExecutorStage::CreatingBuildVolumes);
        context.logger.debugln("Creating build volume...");

        let dir = if context.flags.legacy_builds_dir {
            parent_dir(&layout.project_dir)
        } else {
            layout.root_dir.clone()
        };

        if !parser.path().is_abs(&dir) || parser.path().is_root(&dir) {
            return Err(ExecutorError::ScriptFailure(
                "build directory needs to be absolute and non-root path".to_string(),
            ));
        }

        if layout.shared {
            debug!("Builds directory {} is mounted by a user volume", dir);
            return Ok(());
        }

        let result = if context.job.git_strategy() == GitStrategy::Fetch
            && !context.docker().disable_cache
        {
            match volumes.create(cancel, &dir).await {
                Err(ExecutorError::CacheVolumesDisabled) => {
                    volumes.create_temporary(cancel, &dir).await
                }
                other => other,
            }
        } else {
            volumes.create_temporary(cancel, &dir).await
        };

        match result {
            Err(ExecutorError::VolumeAlreadyDefined(dst)) => {
                debug!("Build volume {} is already defined", dst);
                Ok(())
            }
            other => other,
        }
    }

    async fn resolve_helper_image(
        &self,
        cancel: &CancellationToken,
        context: &Arc<JobContext>,
        pull: Arc<dyn PullManager>,
        helper: &HelperImageInfo,
    ) -> Result<ImageInspect> {
        let mut resolver = DefaultHelperImageResolver::new(context.clone(), pull);
        if let Some(paths) = &self.helper_search_paths {
            resolver = resolver.with_search_paths(paths.clone());
        }
        resolver.resolve(cancel, helper).await
    }

    async fn prepare_job(&mut self, cancel: &CancellationToken) -> Result<()> {
        let (context, helper) = self.connect(cancel).await?;
        let engine = context.engine.clone();
        let docker = context.docker();

        let parser = self.volume_parser(&context)?;
        let layout = self.builds_layout(&context, parser.as_ref())?;
        debug!("Project directory {} (shared: {})", layout.project_dir, layout.shared);

        let build_image = expand_image_name(&context, &context.job.image.name, &[])?;
        context
            .logger
            .println(&format!("Using Docker executor with image {} ...", build_image));

        // Services are validated before anything is pulled
        let definitions = service_definitions(&context)?;
        debug!("Job requests {} services", definitions.len());

        let network = Arc::new(DefaultNetworkManager::new(context.clone()));
        self.network = Some(network.clone());
        let network_mode = network
            .create(cancel, &context.expand(&docker.network_mode), docker.enable_ipv6)
            .await?;

        let pull: Arc<dyn PullManager> =
            Arc::new(DefaultPullManager::new(context.clone()).with_observer(self.stage.clone()));

        let devices = bind_devices(&docker.devices)?;
        let device_requests = gpu_requests(&docker.gpus)?;

        let volumes = Arc::new(DefaultVolumeManager::new(
            context.clone(),
            parser.clone(),
            VolumeManagerConfig {
                base_path: layout.project_dir.clone(),
                cache_dir: context.settings.cache_dir().to_string(),
                unique_name: context.project_unique_name(),
                temporary_name: context.randomized_name(),
                disable_cache: docker.disable_cache,
                protected: context.job.protected,
            },
        ));
        self.volumes = Some(volumes.clone());
        self.create_user_volumes(cancel, &context, volumes.as_ref())
            .await?;
        self.create_build_volume(cancel, &context, parser.as_ref(), volumes.as_ref(), &layout)
            .await?;

        let helper_image = self
            .resolve_helper_image(cancel, &context, pull.clone(), &helper)
            .await?;

        self.stage.set(ExecutorStage::CreatingServices);
        let services = DefaultServiceManager::new(
            context.clone(),
            pull.clone(),
            Arc::new(DefaultWaiter::new(engine.clone())),
            ServiceSetup {
                network_mode: network_mode.clone(),
                binds: volumes.binds(),
                helper_image: helper_image.id.clone(),
            },
        )
        .with_drain_delay(self.drain_delay);
        let links = services.create_services(cancel).await?;

        pull.get_image(cancel, &build_image, context.job.image.pull_policies.as_deref())
            .await?;

        let containers = DefaultContainerManager::new(
            context.clone(),
            pull,
            ContainerSetup {
                network_mode,
                binds: volumes.binds(),
                links,
                devices,
                device_requests,
            },
        );

        if self.umask_disabled(&context) {
            context
                .logger
                .println("Not using umask - FF_DISABLE_UMASK_FOR_DOCKER_EXECUTOR is set!");
        }

        self.runtime = Some(Runtime {
            containers: Arc::new(containers),
            exec: (self.exec_factory)(engine),
            helper,
            helper_image,
        });
        Ok(())
    }

    fn umask_disabled(&self, context: &JobContext) -> bool {
        !self.variant.is_windows() && context.flags.disable_umask
    }

    /// A fresh helper container for a predefined step
    async fn predefined_container(
        &self,
        cancel: &CancellationToken,
        context: &JobContext,
        runtime: &Runtime,
    ) -> Result<ContainerInspect> {
        let cmd = if self.umask_disabled(context) {
            vec!["/bin/bash".to_string()]
        } else {
            runtime.helper.cmd.clone()
        };

        let id = runtime.helper_image.id.clone();
        runtime
            .containers
            .create(
                cancel,
                ContainerRequest {
                    kind: ContainerKind::Predefined,
                    image: ImageSpec::new(id.clone()),
                    cmd,
                    allowed_internal_images: vec![id],
                },
            )
            .await
    }

    /// The job's build container, created on first use
    ///
    /// A container that disappeared since is created again.
    async fn build_container(
        &self,
        cancel: &CancellationToken,
        context: &JobContext,
        runtime: &Runtime,
    ) -> Result<ContainerInspect> {
        let mut build = self.build_container.lock().await;

        if let Some(existing) = build.as_ref() {
            match with_cancel(cancel, context.engine.container_inspect(&existing.id)).await {
                Ok(_) => return Ok(existing.clone()),
                Err(ExecutorError::Cancelled) => return Err(ExecutorError::Cancelled),
                Err(e) if e.is_not_found() => {}
                Err(e) => context.logger.warningln(&format!(
                    "Failed to inspect build container {} {}",
                    existing.id, e
                )),
            }
        }

        let created = runtime
            .containers
            .create(
                cancel,
                ContainerRequest {
                    kind: ContainerKind::Build,
                    image: context.job.image.clone(),
                    cmd: self.variant.docker_command(),
                    allowed_internal_images: Vec::new(),
                },
            )
            .await?;
        *build = Some(created.clone());
        Ok(created)
    }

    async fn cleanup_resources(&self, context: &JobContext) {
        let engine = context.engine.as_ref();
        let logger = &context.logger;

        let removals = context.temporary_containers().into_iter().map(|id| async move {
            if let Err(e) = remove_container(engine, logger, &id).await {
                error!(container = %id, error = %e, "Failed to remove container");
                logger.errorln(&format!("Failed to remove container {}: {}", id, e));
            }
        });
        join_all(removals).await;

        if let Some(volumes) = &self.volumes {
            if let Err(e) = volumes.remove_temporary().await {
                error!(error = %e, "Failed to cleanup volumes");
                logger.errorln(&format!("Failed to cleanup volumes: {}", e));
            }
        }

        if let Some(network) = &self.network {
            if let Err(e) = network.cleanup().await {
                error!(error = %e, "Failed to remove network for build");
                logger.errorln(&format!("Failed to remove network for build: {}", e));
            }
        }
    }
}

#[async_trait]
impl Executor for DockerExecutor {
    async fn prepare(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.stage.set(ExecutorStage::Prepare);
        info!("Preparing job {} with the {} executor", self.job.id, self.variant.name);

        let result = self.prepare_job(cancel).await;
        if let Err(e) = &result {
            warn!("Preparing job {} failed: {}", self.job.id, e);
        }
        result
    }

    async fn run(&self, cancel: &CancellationToken, command: &ExecutorCommand) -> Result<()> {
        let (Some(context), Some(runtime)) = (self.context.as_ref(), self.runtime.as_ref()) else {
            return Err(ExecutorError::SystemFailure(
                "executor is not prepared".to_string(),
            ));
        };

        let attempts = section_attempts(context);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                context.logger.infoln(&format!("Retrying {}", command.stage));
            }

            let container = if command.predefined {
                self.predefined_container(cancel, context, runtime).await?
            } else {
                self.build_container(cancel, context, runtime).await?
            };

            context.logger.debugln(&format!(
                "Executing on {} the {}",
                container.short_name(),
                command.stage
            ));
            self.stage.set(ExecutorStage::Run);

            let streams = ExecStreams {
                stdin: Box::new(std::io::Cursor::new(command.script.clone().into_bytes())),
                stdout: Box::new(context.logger.writer()),
                stderr: Box::new(context.logger.writer()),
            };
            match runtime.exec.exec(cancel, &container.id, streams).await {
                Err(e) if e.is_not_found() => {
                    context.logger.errorln(&format!(
                        "Container {:?} not found or removed. Will retry...",
                        container.id
                    ));
                    last_error = Some(e);
                }
                other => return other,
            }
        }

        if attempts > 1 {
            context.logger.errorln("Execution attempts exceeded");
        }
        Err(last_error.unwrap_or_else(|| {
            ExecutorError::SystemFailure(format!("no attempts left for {}", command.stage))
        }))
    }

    async fn cleanup(&mut self) {
        let Some(context) = self.context.clone() else {
            debug!("Nothing to clean up for job {}", self.job.id);
            return;
        };
        self.stage.set(ExecutorStage::Cleanup);

        if tokio::time::timeout(self.cleanup_timeout, self.cleanup_resources(&context))
            .await
            .is_err()
        {
            error!(
                "Cleanup of job {} did not finish within {:?}",
                self.job.id, self.cleanup_timeout
            );
        }

        if let Err(e) = context.engine.close().await {
            debug!(error = %e, "Failed to close the client");
        }
        info!("Cleaned up job {}", self.job.id);
    }

    fn stage(&self) -> ExecutorStage {
        self.stage.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{job, settings};
    use crate::testing::FakeEngine;
    use crate::trace::BufferTrace;
    use dockhand_client::types::SystemInfo;
    use dockhand_core::variables::JobVariable;

    fn executor_on(
        engine: &Arc<FakeEngine>,
        variant: ExecutorVariant,
        job: Job,
        settings: RunnerSettings,
    ) -> (DockerExecutor, Arc<BufferTrace>) {
        let trace = Arc::new(BufferTrace::new());
        let shared = engine.clone();
        let connect: EngineFactory = Arc::new(
            move |_: &DockerSettings| -> Result<Arc<dyn ContainerEngine>> { Ok(shared.clone()) },
        );
        let executor = DockerExecutor::new(variant, job, settings, trace.clone(), connect)
            .with_helper_search_paths(Vec::new())
            .with_drain_delay(Duration::ZERO);
        (executor, trace)
    }

    fn command(script: &str) -> ExecutorCommand {
        ExecutorCommand {
            stage: "build_script".to_string(),
            script: format!("{}\n", script),
            predefined: false,
        }
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/builds/group/project"), "/builds/group");
        assert_eq!(parent_dir("/builds/"), "/");
        assert_eq!(parent_dir(r"C:\builds\project"), r"C:\builds");
    }

    #[tokio::test]
    async fn test_os_type_mismatch() {
        let engine = Arc::new(FakeEngine::new());
        let (mut executor, _) = executor_on(&engine, ExecutorVariant::windows(), job(), settings());

        let err = executor.prepare(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "executor requires OSType=windows, but Docker Engine supports only OSType=linux"
        );
        assert_eq!(err.failure_kind(), crate::error::FailureKind::ScriptFailure);

        executor.cleanup().await;
        assert_eq!(engine.count_calls("close"), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_skips_cleanup() {
        let trace = Arc::new(BufferTrace::new());
        let connect: EngineFactory =
            Arc::new(|_: &DockerSettings| -> Result<Arc<dyn ContainerEngine>> {
                Err(ExecutorError::SystemFailure("cannot connect".to_string()))
            });
        let mut executor =
            DockerExecutor::new(ExecutorVariant::linux(), job(), settings(), trace, connect);

        assert!(executor.prepare(&CancellationToken::new()).await.is_err());
        executor.cleanup().await;
        assert!(executor.context().is_none());
        assert_eq!(executor.stage(), ExecutorStage::Prepare);
    }

    #[tokio::test]
    async fn test_run_before_prepare() {
        let engine = Arc::new(FakeEngine::new());
        let (executor, _) = executor_on(&engine, ExecutorVariant::linux(), job(), settings());
        let err = executor
            .run(&CancellationToken::new(), &command("echo hi"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "executor is not prepared");
    }

    #[tokio::test]
    async fn test_build_container_is_reused() {
        let engine = Arc::new(FakeEngine::new());
        let (mut executor, trace) = executor_on(&engine, ExecutorVariant::linux(), job(), settings());
        let cancel = CancellationToken::new();

        executor.prepare(&cancel).await.unwrap();
        executor.run(&cancel, &command("echo first")).await.unwrap();
        executor.run(&cancel, &command("echo second")).await.unwrap();

        assert_eq!(engine.containers_with_label("type", "build").len(), 1);
        let contents = trace.contents();
        assert!(contents.contains("first"));
        assert!(contents.contains("second"));
        assert_eq!(executor.stage(), ExecutorStage::Run);

        executor.cleanup().await;
        assert_eq!(executor.stage(), ExecutorStage::Cleanup);
        assert_eq!(engine.container_count(), 0);
    }

    #[tokio::test]
    async fn test_removed_build_container_is_recreated() {
        let engine = Arc::new(FakeEngine::new());
        let (mut executor, _) = executor_on(&engine, ExecutorVariant::linux(), job(), settings());
        let cancel = CancellationToken::new();

        executor.prepare(&cancel).await.unwrap();
        executor.run(&cancel, &command("echo first")).await.unwrap();
        let first = engine.containers_with_label("type", "build");
        engine
            .container_remove(&first[0], Default::default())
            .await
            .unwrap();

        executor.run(&cancel, &command("echo second")).await.unwrap();
        let second = engine.containers_with_label("type", "build");
        assert_eq!(second.len(), 1);
        assert_ne!(first, second);

        executor.cleanup().await;
    }

    #[tokio::test]
    async fn test_predefined_step_uses_helper_image() {
        let engine = Arc::new(FakeEngine::new());
        let (mut executor, _) = executor_on(&engine, ExecutorVariant::linux(), job(), settings());
        let cancel = CancellationToken::new();

        executor.prepare(&cancel).await.unwrap();
        let step = ExecutorCommand {
            stage: "get_sources".to_string(),
            script: "echo cloning\n".to_string(),
            predefined: true,
        };
        executor.run(&cancel, &step).await.unwrap();
        executor.run(&cancel, &step).await.unwrap();

        let predefined: Vec<_> = engine
            .created_containers()
            .into_iter()
            .filter(|c| c.name.contains("-predefined-"))
            .collect();
        assert_eq!(predefined.len(), 2);
        assert_eq!(
            predefined[0].config.cmd,
            Some(vec!["gitlab-runner-build".to_string()])
        );
        assert!(
            engine.count_calls(
                "pull registry.gitlab.com/gitlab-org/gitlab-runner/gitlab-runner-helper:x86_64-latest"
            ) == 1
        );

        executor.cleanup().await;
        assert_eq!(engine.container_count(), 0);
    }

    #[tokio::test]
    async fn test_umask_disabled() {
        let engine = Arc::new(FakeEngine::new());
        let mut job = job();
        job.variables
            .push(JobVariable::new("FF_DISABLE_UMASK_FOR_DOCKER_EXECUTOR", "true"));
        let (mut executor, trace) = executor_on(&engine, ExecutorVariant::linux(), job, settings());
        let cancel = CancellationToken::new();

        executor.prepare(&cancel).await.unwrap();
        let step = ExecutorCommand {
            stage: "get_sources".to_string(),
            script: "echo cloning\n".to_string(),
            predefined: true,
        };
        executor.run(&cancel, &step).await.unwrap();

        assert!(trace
            .contents()
            .contains("Not using umask - FF_DISABLE_UMASK_FOR_DOCKER_EXECUTOR is set!"));
        let created = engine.created_containers();
        let predefined = created
            .iter()
            .find(|c| c.name.contains("-predefined-"))
            .unwrap();
        assert_eq!(predefined.config.cmd, Some(vec!["/bin/bash".to_string()]));

        executor.cleanup().await;
    }

    #[tokio::test]
    async fn test_fetch_strategy_keeps_build_volume() {
        let engine = Arc::new(FakeEngine::new());
        let mut job = job();
        job.variables.push(JobVariable::new("GIT_STRATEGY", "fetch"));
        let (mut executor, _) = executor_on(&engine, ExecutorVariant::linux(), job, settings());

        executor.prepare(&CancellationToken::new()).await.unwrap();
        let volumes = engine.volume_names();
        assert_eq!(volumes.len(), 1);
        assert!(volumes[0].contains("-cache-"));

        executor.cleanup().await;
        assert_eq!(engine.volume_names(), volumes);
    }

    #[tokio::test]
    async fn test_host_mounted_builds_dir() {
        let engine = Arc::new(FakeEngine::new());
        let mut settings = settings();
        settings.docker.volumes = vec!["/srv/builds:/builds".to_string()];
        let (mut executor, _) = executor_on(&engine, ExecutorVariant::linux(), job(), settings);

        executor.prepare(&CancellationToken::new()).await.unwrap();
        assert!(engine.volume_names().is_empty());

        let context = executor.context().unwrap().clone();
        let layout = executor
            .builds_layout(&context, executor.volume_parser(&context).unwrap().as_ref())
            .unwrap();
        assert!(layout.shared);
        assert_eq!(layout.root_dir, "/builds/abcdefghi/0");
        assert_eq!(layout.project_dir, "/builds/abcdefghi/0/group/project");

        executor.cleanup().await;
    }

    #[tokio::test]
    async fn test_not_found_retries_step() {
        let engine = Arc::new(FakeEngine::new());
        let mut job = job();
        job.variables
            .push(JobVariable::new(EXECUTOR_JOB_SECTION_ATTEMPTS, "2"));

        struct VanishingExec {
            engine: Arc<FakeEngine>,
        }

        #[async_trait]
        impl Exec for VanishingExec {
            async fn exec(&self, _: &CancellationToken, id: &str, _: ExecStreams) -> Result<()> {
                self.engine.container_remove(id, Default::default()).await?;
                Err(dockhand_client::EngineError::api_error(404, "No such container").into())
            }
        }

        let (executor, trace) = executor_on(&engine, ExecutorVariant::linux(), job, settings());
        let vanishing = engine.clone();
        let mut executor = executor.with_exec_factory(Arc::new(move |_: Arc<dyn ContainerEngine>| {
            Arc::new(VanishingExec {
                engine: vanishing.clone(),
            }) as Arc<dyn Exec>
        }));
        let cancel = CancellationToken::new();

        executor.prepare(&cancel).await.unwrap();
        let err = executor.run(&cancel, &command("echo hi")).await.unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(engine.created_containers().iter().filter(|c| c.name.contains("-build-")).count(), 2);
        let contents = trace.contents();
        assert!(contents.contains("Retrying build_script"));
        assert!(contents.contains("Execution attempts exceeded"));

        executor.cleanup().await;
    }

    #[tokio::test]
    async fn test_windows_variant() {
        let engine = Arc::new(FakeEngine::new());
        engine.set_info(SystemInfo {
            os_type: "windows".to_string(),
            architecture: "x86_64".to_string(),
            kernel_version: "10.0 20348 (20348.1.amd64fre.fe_release.210507-1500)".to_string(),
            ..Default::default()
        });
        let mut job = job();
        job.image = ImageSpec::new("mcr.microsoft.com/windows/servercore:ltsc2022");
        let (mut executor, _) = executor_on(&engine, ExecutorVariant::windows(), job, settings());
        let cancel = CancellationToken::new();

        executor.prepare(&cancel).await.unwrap();
        executor.run(&cancel, &command("echo hi")).await.unwrap();

        assert_eq!(
            engine.count_calls(
                "pull registry.gitlab.com/gitlab-org/gitlab-runner/gitlab-runner-helper:x86_64-latest-servercore21H2"
            ),
            1
        );
        let created = engine.created_containers();
        let build = created.iter().find(|c| c.name.contains("-build-")).unwrap();
        assert_eq!(build.config.cmd.as_ref().unwrap()[0], "pwsh");
        assert!(engine.count_calls_with_prefix("import ") == 0);

        executor.cleanup().await;
    }
}
