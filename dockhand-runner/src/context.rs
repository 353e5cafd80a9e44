//! Per-job context
//!
//! Holds everything the managers share for one job:
//! - The job payload and the runner settings it runs under
//! - The engine connection and the job trace
//! - The labeler and the feature flags resolved for the job
//! - The random suffix that keeps resource names unique per job
//! - The containers created so far, for cleanup

use dockhand_client::ContainerEngine;
use dockhand_core::config::{CI_DEBUG_TRACE, DockerSettings, FeatureFlags, RunnerSettings};
use dockhand_core::job::{Job, RunnerInfo};
use dockhand_core::labels::Labeler;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::trace::{BuildLogger, JobTrace};

/// Execution context of one job
pub struct JobContext {
    pub job: Job,
    pub settings: RunnerSettings,
    pub engine: Arc<dyn ContainerEngine>,
    pub logger: BuildLogger,
    pub labeler: Labeler,
    pub flags: FeatureFlags,

    /// 8 hex characters, fresh for every job
    suffix: String,

    /// Containers removed at cleanup
    temporary: Mutex<Vec<String>>,
}

impl JobContext {
    /// Creates the context of a job
    ///
    /// # Arguments
    /// * `job` - The job payload
    /// * `settings` - Settings of the runner picking up the job
    /// * `engine` - Engine the job's resources are created on
    /// * `trace` - Sink for user-visible output
    pub fn new(
        job: Job,
        settings: RunnerSettings,
        engine: Arc<dyn ContainerEngine>,
        trace: Arc<dyn JobTrace>,
    ) -> Arc<Self> {
        let debug = job.variables.get_bool(CI_DEBUG_TRACE).unwrap_or(false);
        let labeler = Labeler::new(&job, &settings.runner_info());
        let flags = FeatureFlags::resolve(&settings.feature_flags, &job.variables);
        let suffix = Uuid::new_v4().simple().to_string()[..8].to_string();

        Arc::new(Self {
            job,
            settings,
            engine,
            logger: BuildLogger::new(trace).with_debug(debug),
            labeler,
            flags,
            suffix,
            temporary: Mutex::new(Vec::new()),
        })
    }

    pub fn docker(&self) -> &DockerSettings {
        &self.settings.docker
    }

    pub fn runner(&self) -> RunnerInfo {
        self.settings.runner_info()
    }

    /// Name shared by every job of the project on this runner slot
    pub fn project_unique_name(&self) -> String {
        self.job.project_unique_name(&self.runner())
    }

    /// `project_unique_name` plus the job's random suffix
    pub fn randomized_name(&self) -> String {
        format!("{}-{}", self.project_unique_name(), self.suffix)
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Expands `$VAR` references against the job variables
    pub fn expand(&self, value: &str) -> String {
        self.job.variables.expand(value)
    }

    pub fn track_temporary(&self, id: &str) {
        self.temporary.lock().unwrap().push(id.to_string());
    }

    pub fn temporary_containers(&self) -> Vec<String> {
        self.temporary.lock().unwrap().clone()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;

    #[test]
    fn test_names() {
        let (context, _, _) = context();
        assert_eq!(
            context.project_unique_name(),
            "runner-abcdefghi-project-42-concurrent-0"
        );
        let randomized = context.randomized_name();
        assert!(randomized.starts_with("runner-abcdefghi-project-42-concurrent-0-"));
        assert_eq!(context.suffix().len(), 8);
    }

    #[test]
    fn test_temporary_containers_in_creation_order() {
        let (context, _, _) = context();
        context.track_temporary("abc");
        context.track_temporary("svc");
        assert_eq!(context.temporary_containers(), vec!["abc", "svc"]);
    }
}
