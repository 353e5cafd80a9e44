use once_cell::sync::Lazy;
use regex::Regex;

use super::path::{PathSemantics, WindowsPath};
use super::{PathExpander, Volume, VolumeError, VolumeParser};

// Host directory with a drive letter, optionally with the `\\?\` prefix
const HOST_DIR: &str = r#"(?:\\\\\?\\)?[a-z]:[\\/](?:[^\\/:*?"<>|\r\n]+[\\/]?)*"#;
// Named volume
const VOLUME_NAME: &str = r#"[^\\/:*?"<>|\r\n]+"#;
// \\.\pipe\name, forward slashes allowed
const NAMED_PIPE: &str = r#"[/\\]{2}\.[/\\]pipe[/\\][^:*?"<>|\r\n]+"#;
const DESTINATION: &str = r#"(?:\\\\\?\\)?(?:[a-z]):(?:(?:[\\/][^\\/:*?"<>\r\n]+)*[\\/]?)"#;

static WINDOWS_SPEC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:(?P<source>(?:{HOST_DIR})|(?:{VOLUME_NAME})|(?:{NAMED_PIPE})):)?(?P<destination>(?:{DESTINATION})|(?:{NAMED_PIPE}))(?::(?P<mode>ro|rw))?$"
    ))
    .expect("windows volume regex")
});

/// Volume parser for Windows engines
pub struct WindowsParser {
    path: WindowsPath,
    expander: PathExpander,
}

impl WindowsParser {
    pub fn new(expander: PathExpander) -> Self {
        Self {
            path: WindowsPath::new(),
            expander,
        }
    }
}

impl VolumeParser for WindowsParser {
    fn parse_volume(&self, spec: &str) -> Result<Volume, VolumeError> {
        let invalid = || VolumeError::InvalidVolumeSpec(spec.to_string());

        let caps = WINDOWS_SPEC_RE.captures(spec).ok_or_else(invalid)?;
        let destination = caps
            .name("destination")
            .map(|m| m.as_str())
            .ok_or_else(invalid)?;

        Ok(Volume {
            source: caps.name("source").map(|m| m.as_str().to_string()),
            destination: (self.expander)(destination),
            mode: caps.name("mode").map(|m| m.as_str().to_string()),
            label: None,
            bind_propagation: None,
        })
    }

    fn path(&self) -> &dyn PathSemantics {
        &self.path
    }
}
