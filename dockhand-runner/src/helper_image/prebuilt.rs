//! Prebuilt helper image archives shipped next to the runner binary

use dockhand_client::ContainerEngine;
use dockhand_client::types::ImageImport;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::HelperImageInfo;
use crate::error::{ExecutorError, Result};

const ARCHIVE_EXTENSION: &str = ".tar.xz";

/// Metadata lost on export, reapplied on import
const IMPORT_CHANGES: &str = r#"ENTRYPOINT ["/usr/bin/dumb-init", "/entrypoint"]"#;

/// Directories searched for prebuilt archives, in order
///
/// # Arguments
/// * `exe_dir` - Directory of the runner binary
/// * `cwd` - Working directory, `None` when unknown
/// * `os` - Operating system of the runner, as in `std::env::consts::OS`
pub fn search_paths(exe_dir: &Path, cwd: Option<&Path>, os: &str) -> Vec<PathBuf> {
    let mut paths = vec![
        exe_dir.join("out/helper-images"),
        exe_dir.join("../helper-images"),
    ];
    if let Some(cwd) = cwd {
        paths.push(cwd.join("out/helper-images"));
    }
    if os == "linux" {
        paths.push(exe_dir.join("../lib/gitlab-runner/helper-images"));
    }
    paths
}

/// Search paths of the running process
pub fn default_search_paths() -> Vec<PathBuf> {
    let exe_dir = match std::env::current_exe() {
        Ok(exe) => exe.parent().map(Path::to_path_buf).unwrap_or_default(),
        Err(e) => {
            debug!(
                "Unable to detect the runner directory, prebuilt helper images will be pulled: {}",
                e
            );
            PathBuf::new()
        }
    };
    let cwd = std::env::current_dir().ok();
    search_paths(&exe_dir, cwd.as_deref(), std::env::consts::OS)
}

/// File names tried in each directory
pub fn archive_names(prebuilt: &str) -> Vec<String> {
    let mut names = vec![format!("{}{}", prebuilt, ARCHIVE_EXTENSION)];
    if prebuilt.contains("x86_64") {
        names.push(format!(
            "{}{}",
            prebuilt.replace("x86_64", "amd64"),
            ARCHIVE_EXTENSION
        ));
    }
    names
}

async fn import(engine: &dyn ContainerEngine, path: &Path, info: &HelperImageInfo) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ExecutorError::SystemFailure(e.to_string()))?;

    let options = ImageImport {
        repository: info.name.clone(),
        tag: info.tag.clone(),
        changes: vec![IMPORT_CHANGES.to_string()],
    };
    engine
        .image_import(Box::new(file), options)
        .await
        .map_err(|e| ExecutorError::SystemFailure(format!("failed to import image: {}", e)))
}

/// Imports the first prebuilt archive found
///
/// Every failed attempt is reported when no archive could be imported.
pub async fn load(engine: &dyn ContainerEngine, paths: &[PathBuf], info: &HelperImageInfo) -> Result<()> {
    let names = archive_names(&info.prebuilt);
    let mut errors = Vec::new();

    for dir in paths {
        for name in &names {
            let path = dir.join(name);
            match import(engine, &path, info).await {
                Ok(()) => {
                    debug!("Imported helper image from {}", path.display());
                    return Ok(());
                }
                Err(e) => errors.push(format!("importing {}: {}", path.display(), e)),
            }
        }
    }

    Err(ExecutorError::SystemFailure(errors.join("\n")))
}
