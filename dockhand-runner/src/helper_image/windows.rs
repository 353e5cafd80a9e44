//! Windows helper images
//!
//! The base image has to match the host's kernel build, so the tag is
//! derived from the engine's kernel version. Windows images are never
//! imported from local files.

use super::{HelperImageConfig, HelperImageInfo, REGISTRY_NAME, powershell_cmd};
use crate::error::{ExecutorError, Result};

const ARCHITECTURE: &str = "x86_64";
const DEFAULT_SHELL: &str = "powershell";

const BUILD_1809: u32 = 17763;
const BUILD_LTSC2022: u32 = 20348;

/// Build number out of `10.0 17763 (17763.1.amd64fre...)` or `10.0.20348`
fn kernel_build(kernel_version: &str) -> Option<u32> {
    kernel_version
        .split([' ', '.'])
        .filter(|part| !part.is_empty())
        .nth(2)?
        .parse()
        .ok()
}

/// Base image suffix for a kernel version
pub fn base_image(kernel_version: &str) -> Result<&'static str> {
    match kernel_build(kernel_version) {
        Some(BUILD_1809) => Ok("servercore1809"),
        Some(build) if build >= BUILD_LTSC2022 => Ok("servercore21H2"),
        _ => Err(ExecutorError::UnsupportedWindowsVersion(
            kernel_version.to_string(),
        )),
    }
}

pub(super) fn create(config: &HelperImageConfig) -> Result<HelperImageInfo> {
    let base = base_image(&config.kernel_version)?;
    let shell = if config.shell.is_empty() {
        DEFAULT_SHELL
    } else {
        config.shell.as_str()
    };

    Ok(HelperImageInfo {
        os: "windows".to_string(),
        architecture: ARCHITECTURE.to_string(),
        name: REGISTRY_NAME.to_string(),
        tag: format!("{}-{}-{}", ARCHITECTURE, config.revision, base),
        cmd: powershell_cmd(shell),
        prebuilt: String::new(),
        supports_local_import: false,
    })
}
