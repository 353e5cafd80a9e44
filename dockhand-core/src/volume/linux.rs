use once_cell::sync::Lazy;
use regex::Regex;

use super::path::{PathSemantics, UnixPath};
use super::{PathExpander, Volume, VolumeError, VolumeParser};

// [source:]destination[:options[:propagation]]
// The source is an absolute host directory or a volume name, the destination
// must start with `/` (variables may follow).
static LINUX_SPEC_RE: Lazy<Regex> = Lazy::new(|| {
    let dir = r#"/(?:[^\\/:*?"<>|\r\n]+/?)*"#;
    let name = r#"[^\\/:*?"<>|\r\n]+"#;
    let destination = r#"/(?:[^\\/:*?"<>\r\n]+/?)*"#;
    Regex::new(&format!(
        r"^(?:(?P<source>(?:{dir})|(?:{name})):)?(?P<destination>{destination})(?::(?P<options>[^:]+)(?::(?P<propagation>[^:]+))?)?$"
    ))
    .expect("linux volume regex")
});

const BIND_PROPAGATIONS: [&str; 6] = ["shared", "slave", "private", "rshared", "rslave", "rprivate"];

/// Volume parser for Linux (and other Unix) engines
pub struct LinuxParser {
    path: UnixPath,
    expander: PathExpander,
}

impl LinuxParser {
    pub fn new(expander: PathExpander) -> Self {
        Self {
            path: UnixPath::new(),
            expander,
        }
    }
}

impl VolumeParser for LinuxParser {
    fn parse_volume(&self, spec: &str) -> Result<Volume, VolumeError> {
        let invalid = || VolumeError::InvalidVolumeSpec(spec.to_string());

        let caps = LINUX_SPEC_RE.captures(spec).ok_or_else(invalid)?;

        let mut volume = Volume {
            source: caps.name("source").map(|m| m.as_str().to_string()),
            destination: caps
                .name("destination")
                .map(|m| m.as_str().to_string())
                .ok_or_else(invalid)?,
            ..Default::default()
        };

        if let Some(options) = caps.name("options") {
            apply_options(&mut volume, options.as_str()).ok_or_else(invalid)?;
        }

        if let Some(propagation) = caps.name("propagation") {
            let propagation = propagation.as_str();
            if volume.bind_propagation.is_some() || !BIND_PROPAGATIONS.contains(&propagation) {
                return Err(invalid());
            }
            volume.bind_propagation = Some(propagation.to_string());
        }

        volume.destination = (self.expander)(&volume.destination);

        Ok(volume)
    }

    fn path(&self) -> &dyn PathSemantics {
        &self.path
    }
}

/// Sorts the comma separated options into mode, label and propagation
///
/// Returns `None` when an option is unknown, empty or repeated.
fn apply_options(volume: &mut Volume, options: &str) -> Option<()> {
    for option in options.split(',') {
        let slot = match option {
            "" => return None,
            o if o.eq_ignore_ascii_case("ro") || o.eq_ignore_ascii_case("rw") => &mut volume.mode,
            "z" | "Z" => &mut volume.label,
            o if BIND_PROPAGATIONS.contains(&o) => &mut volume.bind_propagation,
            _ => return None,
        };
        if slot.is_some() {
            return None;
        }
        *slot = Some(option.to_string());
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn parser() -> LinuxParser {
        LinuxParser::new(Arc::new(|s: &str| s.to_string()))
    }

    fn volume(source: Option<&str>, destination: &str) -> Volume {
        Volume {
            source: source.map(str::to_string),
            destination: destination.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_valid_specs() {
        let p = parser();

        assert_eq!(p.parse_volume("/destination").unwrap(), volume(None, "/destination"));
        assert_eq!(
            p.parse_volume("/source:/destination").unwrap(),
            volume(Some("/source"), "/destination")
        );
        assert_eq!(
            p.parse_volume("volume_name:/destination").unwrap(),
            volume(Some("volume_name"), "/destination")
        );

        let v = p.parse_volume("/destination:rw").unwrap();
        assert_eq!(v.source, None);
        assert_eq!(v.mode.as_deref(), Some("rw"));

        let v = p.parse_volume("/Source:/Destination:ro").unwrap();
        assert_eq!(v.source.as_deref(), Some("/Source"));
        assert_eq!(v.destination, "/Destination");
        assert_eq!(v.mode.as_deref(), Some("ro"));
    }

    #[test]
    fn test_parse_labels_and_propagation() {
        let p = parser();

        let v = p.parse_volume("/source:/destination:ro,Z").unwrap();
        assert_eq!(v.mode.as_deref(), Some("ro"));
        assert_eq!(v.label.as_deref(), Some("Z"));

        let v = p.parse_volume("/source:/destination:z").unwrap();
        assert_eq!(v.mode, None);
        assert_eq!(v.label.as_deref(), Some("z"));

        let v = p.parse_volume("/source:/destination:rslave").unwrap();
        assert_eq!(v.bind_propagation.as_deref(), Some("rslave"));

        let v = p.parse_volume("/source:/destination:ro,rslave").unwrap();
        assert_eq!(v.mode.as_deref(), Some("ro"));
        assert_eq!(v.bind_propagation.as_deref(), Some("rslave"));

        // Not valid for the engine CLI, but accepted
        let v = p.parse_volume("/source:/destination:rw:rslave").unwrap();
        assert_eq!(v.mode.as_deref(), Some("rw"));
        assert_eq!(v.bind_propagation.as_deref(), Some("rslave"));
    }

    #[test]
    fn test_parse_invalid_specs() {
        let p = parser();
        for spec in [
            "",
            "/source:/destination:T",
            "/source:/destination:rw:something",
            ":/destination",
            "/source:/destination:unknown",
            "/source:/destination:ro,unknown",
            "/source:/destination:,rslave",
            "/source:/destination:ro,rw",
            "/source:blipp",
            "/source:$VAR/blipp",
            "/source:${VAR}/blipp",
        ] {
            assert_eq!(
                p.parse_volume(spec),
                Err(VolumeError::InvalidVolumeSpec(spec.to_string())),
                "{}",
                spec
            );
        }
    }

    #[test]
    fn test_variables_inside_destination() {
        let p = parser();
        for (spec, destination) in [
            ("/source:/some/$VAR/blipp", "/some/$VAR/blipp"),
            ("/source:/some/${VAR}/blipp", "/some/${VAR}/blipp"),
            ("/source:/${root}/$sub-test/dir", "/${root}/$sub-test/dir"),
            ("/source:/${r/$$-test/dir", "/${r/$$-test/dir"),
        ] {
            let v = p.parse_volume(spec).unwrap();
            assert_eq!(v.source.as_deref(), Some("/source"));
            assert_eq!(v.destination, destination);
        }
    }

    #[test]
    fn test_destination_expansion() {
        let p = LinuxParser::new(Arc::new(|s: &str| {
            s.replace("foo", "REPLACED(bar)").replace("blipp", "REPLACED(zark)")
        }));

        let v = p.parse_volume("/source:/foo:ro").unwrap();
        assert_eq!(v.destination, "/REPLACED(bar)");

        let v = p.parse_volume("/foo:/foo/some-blipp-ref/blapp").unwrap();
        // Only the destination is expanded
        assert_eq!(v.source.as_deref(), Some("/foo"));
        assert_eq!(v.destination, "/REPLACED(bar)/some-REPLACED(zark)-ref/blapp");
    }
}
