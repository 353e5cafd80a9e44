//! Executor errors
//!
//! Every failure of a job maps to one of three outcomes reported to the
//! caller: the user's script or configuration failed, the runner or the
//! engine failed, or the job was cancelled.

use dockhand_client::EngineError;
use dockhand_core::allowlist::AllowlistError;
use dockhand_core::auth::AuthError;
use dockhand_core::config::ConfigError;
use dockhand_core::image::ImageRefError;
use dockhand_core::volume::VolumeError;
use thiserror::Error;

/// Errors produced while preparing, running or cleaning up a job
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The script exited with a non-zero code
    #[error("exit code {exit_code}")]
    Build { exit_code: i64 },

    #[error("{0}")]
    ScriptFailure(String),

    #[error("{0}")]
    SystemFailure(String),

    #[error(
        "pull_policy ({requested}) defined in {policy_source} is not one of the allowed_pull_policies ({allowed})"
    )]
    IncompatiblePullPolicy {
        requested: String,
        allowed: String,
        policy_source: String,
    },

    #[error("too many services requested: {requested}, only {allowed} allowed")]
    TooManyServicesRequested { requested: usize, allowed: usize },

    #[error("a volume for container path {0:?} is already defined")]
    VolumeAlreadyDefined(String),

    #[error("invalid volume specification: {0:?}")]
    InvalidVolumeSpec(String),

    #[error("cache volumes feature disabled")]
    CacheVolumesDisabled,

    #[error("unsupported Windows version: {0}")]
    UnsupportedWindowsVersion(String),

    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    NotAllowed(#[from] AllowlistError),

    #[error("invalid image reference: {0}")]
    ImageReference(#[from] ImageRefError),
}

/// Outcome category of a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ScriptFailure,
    SystemFailure,
    Cancelled,
}

impl FailureKind {
    /// Process exit code used by the runner binary
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureKind::SystemFailure => 1,
            FailureKind::ScriptFailure => 2,
            FailureKind::Cancelled => 3,
        }
    }
}

impl ExecutorError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ExecutorError::Cancelled => FailureKind::Cancelled,
            ExecutorError::SystemFailure(_)
            | ExecutorError::Engine(_)
            | ExecutorError::Auth(_)
            | ExecutorError::UnsupportedWindowsVersion(_) => FailureKind::SystemFailure,
            ExecutorError::Build { .. }
            | ExecutorError::ScriptFailure(_)
            | ExecutorError::IncompatiblePullPolicy { .. }
            | ExecutorError::TooManyServicesRequested { .. }
            | ExecutorError::VolumeAlreadyDefined(_)
            | ExecutorError::InvalidVolumeSpec(_)
            | ExecutorError::CacheVolumesDisabled
            | ExecutorError::Config(_)
            | ExecutorError::NotAllowed(_)
            | ExecutorError::ImageReference(_) => FailureKind::ScriptFailure,
        }
    }

    /// Whether the engine reported a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecutorError::Engine(e) if e.is_not_found())
    }
}

impl From<VolumeError> for ExecutorError {
    fn from(err: VolumeError) -> Self {
        match err {
            VolumeError::InvalidVolumeSpec(spec) => ExecutorError::InvalidVolumeSpec(spec),
            other => ExecutorError::SystemFailure(other.to_string()),
        }
    }
}

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            ExecutorError::Build { exit_code: 1 }.failure_kind(),
            FailureKind::ScriptFailure
        );
        assert_eq!(
            ExecutorError::Engine(EngineError::api_error(500, "boom")).failure_kind(),
            FailureKind::SystemFailure
        );
        assert_eq!(ExecutorError::Cancelled.failure_kind(), FailureKind::Cancelled);
        assert_eq!(FailureKind::ScriptFailure.exit_code(), 2);
    }

    #[test]
    fn test_volume_error_mapping() {
        let err: ExecutorError = VolumeError::InvalidVolumeSpec("a:b:c:d".to_string()).into();
        assert!(matches!(err, ExecutorError::InvalidVolumeSpec(ref s) if s == "a:b:c:d"));
    }

    #[test]
    fn test_not_found() {
        let err: ExecutorError = EngineError::api_error(404, "No such container: abc").into();
        assert!(err.is_not_found());
        assert!(!ExecutorError::Cancelled.is_not_found());
    }

    #[test]
    fn test_messages() {
        let err = ExecutorError::TooManyServicesRequested {
            requested: 3,
            allowed: 2,
        };
        assert_eq!(err.to_string(), "too many services requested: 3, only 2 allowed");

        let err = ExecutorError::IncompatiblePullPolicy {
            requested: "[always]".to_string(),
            allowed: "[if-not-present]".to_string(),
            policy_source: "GitLab pipeline config".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "pull_policy ([always]) defined in GitLab pipeline config is not one of the allowed_pull_policies ([if-not-present])"
        );
    }
}
