//! Linux helper images

use super::{HelperImageConfig, HelperImageInfo, PWSH_SHELL, REGISTRY_NAME, powershell_cmd};

const DEFAULT_FLAVOR: &str = "alpine";

/// Normalizes an engine architecture to the helper image naming
///
/// An empty architecture falls back to the runner's own.
pub fn helper_architecture(architecture: &str) -> String {
    let architecture = if architecture.is_empty() {
        std::env::consts::ARCH
    } else {
        architecture
    };

    match architecture {
        "amd64" => "x86_64",
        "aarch64" => "arm64",
        "armv6l" | "armv7l" => "arm",
        other => other,
    }
    .to_string()
}

pub(super) fn create(config: &HelperImageConfig) -> HelperImageInfo {
    let architecture = helper_architecture(&config.architecture);
    let pwsh = config.shell == PWSH_SHELL;
    let suffix = if pwsh { "-pwsh" } else { "" };

    let mut tag = format!("{}-{}{}", architecture, config.revision, suffix);
    if !config.flavor.is_empty() {
        tag = format!("{}-{}", config.flavor, tag);
    }

    let flavor = if config.flavor.is_empty() {
        DEFAULT_FLAVOR
    } else {
        config.flavor.as_str()
    };

    HelperImageInfo {
        os: "linux".to_string(),
        architecture: architecture.clone(),
        name: REGISTRY_NAME.to_string(),
        tag,
        cmd: if pwsh {
            powershell_cmd(PWSH_SHELL)
        } else {
            vec!["gitlab-runner-build".to_string()]
        },
        prebuilt: format!("prebuilt-{}-{}{}", flavor, architecture, suffix),
        supports_local_import: true,
    }
}
