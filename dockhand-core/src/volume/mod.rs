//! Volume specifications
//!
//! Parses `[source:]destination[:mode]` strings into typed volumes. The
//! grammar depends on the OS the container engine reports:
//! - `linux` / `freebsd`: Unix paths, `ro|rw`, SELinux labels, bind propagation
//! - `windows`: drive letters, UNC shares and named pipes, `ro|rw`

mod linux;
mod path;
mod windows;

pub use linux::LinuxParser;
pub use path::{PathSemantics, UnixPath, WindowsPath, clean_unix, clean_windows};
pub use windows::WindowsParser;

use std::sync::Arc;
use thiserror::Error;

/// Errors produced by volume parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolumeError {
    #[error("invalid volume specification: {0:?}")]
    InvalidVolumeSpec(String),

    #[error("unsupported OS type {0:?} for volume parsing")]
    UnsupportedOsType(String),
}

/// Expands `$VAR` references in container paths
pub type PathExpander = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A parsed volume specification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Volume {
    /// Host path or named volume; `None` for container-managed volumes
    pub source: Option<String>,
    pub destination: String,
    pub mode: Option<String>,
    /// SELinux relabeling (`z` shared, `Z` private)
    pub label: Option<String>,
    pub bind_propagation: Option<String>,
}

impl Volume {
    /// Whether a host path or named volume backs this volume
    pub fn has_source(&self) -> bool {
        self.source.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Bind string in engine format: `source:destination[:options]`
    pub fn definition(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if let Some(source) = &self.source {
            parts.push(source.clone());
        }
        parts.push(self.destination.clone());

        let options: Vec<&str> = [&self.mode, &self.label, &self.bind_propagation]
            .into_iter()
            .filter_map(|o| o.as_deref())
            .collect();
        if !options.is_empty() {
            parts.push(options.join(","));
        }

        parts.join(":")
    }
}

/// Parser for one OS flavor of volume specifications
pub trait VolumeParser: Send + Sync {
    /// Parses a single volume specification
    fn parse_volume(&self, spec: &str) -> Result<Volume, VolumeError>;

    /// Path semantics of the parser's OS
    fn path(&self) -> &dyn PathSemantics;
}

/// Creates the parser matching the engine's OS type
///
/// # Arguments
/// * `os_type` - OS type reported by the engine info (`linux`, `windows`, `freebsd`)
/// * `expander` - Applied to destinations after parsing
pub fn new_parser(
    os_type: &str,
    expander: PathExpander,
) -> Result<Box<dyn VolumeParser>, VolumeError> {
    match os_type {
        "linux" | "freebsd" => Ok(Box::new(LinuxParser::new(expander))),
        "windows" => Ok(Box::new(WindowsParser::new(expander))),
        other => Err(VolumeError::UnsupportedOsType(other.to_string())),
    }
}

/// Whether any volume specification mounts over `dir`
///
/// True when some volume's destination is `dir` itself or one of its parents.
pub fn is_host_mounted_volume(
    parser: &dyn VolumeParser,
    dir: &str,
    specs: &[String],
) -> Result<bool, VolumeError> {
    for spec in specs {
        let volume = parser.parse_volume(spec)?;
        if parser.path().contains(&volume.destination, dir) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PathExpander {
        Arc::new(|s: &str| s.to_string())
    }

    #[test]
    fn test_new_parser_by_os_type() {
        assert!(new_parser("linux", identity()).is_ok());
        assert!(new_parser("freebsd", identity()).is_ok());
        assert!(new_parser("windows", identity()).is_ok());
        assert_eq!(
            new_parser("plan9", identity()).err(),
            Some(VolumeError::UnsupportedOsType("plan9".to_string()))
        );
    }

    #[test]
    fn test_definition() {
        let volume = Volume {
            source: Some("/host".to_string()),
            destination: "/ctr".to_string(),
            mode: Some("ro".to_string()),
            label: Some("z".to_string()),
            bind_propagation: None,
        };
        assert_eq!(volume.definition(), "/host:/ctr:ro,z");

        let cache = Volume {
            destination: "/cache".to_string(),
            ..Default::default()
        };
        assert_eq!(cache.definition(), "/cache");
        assert!(!cache.has_source());
    }

    #[test]
    fn test_is_host_mounted_volume() {
        let parser = LinuxParser::new(identity());
        let specs = vec!["/host/builds:/builds:rw".to_string(), "/cache".to_string()];

        assert!(is_host_mounted_volume(&parser, "/builds", &specs).unwrap());
        assert!(is_host_mounted_volume(&parser, "/builds/group/project", &specs).unwrap());
        assert!(!is_host_mounted_volume(&parser, "/build", &specs).unwrap());
        assert!(!is_host_mounted_volume(&parser, "/", &specs).unwrap());
        assert!(!is_host_mounted_volume(&parser, "/builds", &[]).unwrap());
    }

    #[test]
    fn test_is_host_mounted_volume_invalid_spec() {
        let parser = LinuxParser::new(identity());
        let specs = vec![":/builds".to_string()];
        assert_eq!(
            is_host_mounted_volume(&parser, "/builds", &specs),
            Err(VolumeError::InvalidVolumeSpec(":/builds".to_string()))
        );
    }

    #[test]
    fn test_is_host_mounted_volume_windows() {
        let parser = WindowsParser::new(identity());
        let specs = vec![r"c:\host:c:\builds".to_string()];
        assert!(is_host_mounted_volume(&parser, r"c:\builds\project", &specs).unwrap());
        assert!(!is_host_mounted_volume(&parser, r"d:\builds", &specs).unwrap());
    }
}
