//! Executor stages

use std::fmt;
use std::sync::Mutex;
use tracing::debug;

use crate::pull::PullObserver;

/// Where the executor is in the life of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutorStage {
    #[default]
    Created,
    Prepare,
    PullingImage,
    CreatingBuildVolumes,
    CreatingServices,
    CreatingUserVolumes,
    Run,
    Cleanup,
}

impl ExecutorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorStage::Created => "created",
            ExecutorStage::Prepare => "prepare",
            ExecutorStage::PullingImage => "pulling_image",
            ExecutorStage::CreatingBuildVolumes => "creating_build_volumes",
            ExecutorStage::CreatingServices => "creating_services",
            ExecutorStage::CreatingUserVolumes => "creating_user_volumes",
            ExecutorStage::Run => "run",
            ExecutorStage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for ExecutorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current stage of one executor
///
/// Only the executor writes it; the pull manager reaches it through
/// `PullObserver` without knowing about stages.
#[derive(Debug, Default)]
pub struct StageTracker {
    stage: Mutex<ExecutorStage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, stage: ExecutorStage) {
        let mut current = self.stage.lock().unwrap();
        if *current != stage {
            debug!("Executor stage {} -> {}", *current, stage);
            *current = stage;
        }
    }

    pub fn get(&self) -> ExecutorStage {
        *self.stage.lock().unwrap()
    }
}

impl PullObserver for StageTracker {
    fn on_pull_start(&self) {
        self.set(ExecutorStage::PullingImage);
    }
}
