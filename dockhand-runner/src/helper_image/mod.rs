//! Helper image selection
//!
//! The helper image runs predefined steps and service health checks. Its
//! tag depends on the engine's OS and architecture:
//! - Linux images are picked by architecture and flavor and can be
//!   imported from prebuilt archives
//! - Windows images are picked by kernel build and always pulled

mod linux;
mod prebuilt;
mod provider;
mod windows;

use crate::error::{ExecutorError, Result};

// Re-export implementations
pub use provider::DefaultHelperImageResolver;

/// Repository of the helper images
pub const REGISTRY_NAME: &str = "registry.gitlab.com/gitlab-org/gitlab-runner/gitlab-runner-helper";

pub const PWSH_SHELL: &str = "pwsh";

/// What the helper image is selected for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperImageConfig {
    /// Engine OS type, `linux` or `windows`
    pub os_type: String,
    pub architecture: String,
    pub kernel_version: String,
    pub shell: String,
    pub flavor: String,
    pub revision: String,
}

/// A selected helper image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperImageInfo {
    pub os: String,
    pub architecture: String,
    pub name: String,
    pub tag: String,
    /// Command of predefined containers
    pub cmd: Vec<String>,
    /// Base name of the prebuilt archive, empty without one
    pub prebuilt: String,
    pub supports_local_import: bool,
}

impl HelperImageInfo {
    pub fn reference(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

/// PowerShell invocation reading the script from stdin
pub fn powershell_cmd(shell: &str) -> Vec<String> {
    [
        shell,
        "-NoProfile",
        "-NoLogo",
        "-InputFormat",
        "text",
        "-OutputFormat",
        "text",
        "-NonInteractive",
        "-ExecutionPolicy",
        "Bypass",
        "-Command",
        "-",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Selects the helper image for an engine
pub fn helper_image_info(config: &HelperImageConfig) -> Result<HelperImageInfo> {
    match config.os_type.as_str() {
        "linux" => Ok(linux::create(config)),
        "windows" => windows::create(config),
        other => Err(ExecutorError::SystemFailure(format!(
            "unsupported OSType {:?}",
            other
        ))),
    }
}
