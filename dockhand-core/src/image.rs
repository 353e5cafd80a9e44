//! Image references
//!
//! Parses `[registry/][namespace/]name[:tag|@digest]` and derives the
//! names used for service containers:
//! - `ImageReference` keeps the reference exactly as written
//! - `split_service_name` produces the service name, version and DNS aliases

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Registry used when a reference names none
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag appended to untagged references before pulling
pub const DEFAULT_TAG: &str = "latest";

static COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("component regex"));

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag regex"));

static DIGEST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}$")
        .expect("digest regex")
});

static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?$")
        .expect("host regex")
});

/// Errors produced while parsing an image reference
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageRefError {
    #[error("image reference is empty")]
    Empty,

    #[error("invalid registry host in image reference {0:?}")]
    InvalidRegistry(String),

    #[error("invalid repository name in image reference {0:?}")]
    InvalidRepository(String),

    #[error("invalid tag in image reference {0:?}")]
    InvalidTag(String),

    #[error("invalid digest in image reference {0:?}")]
    InvalidDigest(String),
}

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host (with optional port) when the reference names one
    pub registry: Option<String>,
    /// Repository path below the registry (e.g. "library/alpine")
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses an image reference
    ///
    /// The first path segment is treated as a registry host when it contains
    /// a `.` or a `:` or equals `localhost`, and more segments follow it.
    pub fn parse(reference: &str) -> Result<Self, ImageRefError> {
        if reference.is_empty() {
            return Err(ImageRefError::Empty);
        }

        let (remainder, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST_RE.is_match(digest) {
                    return Err(ImageRefError::InvalidDigest(reference.to_string()));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = match remainder.rfind(':') {
            Some(idx) if !remainder[idx + 1..].contains('/') => {
                let tag = &remainder[idx + 1..];
                if !TAG_RE.is_match(tag) {
                    return Err(ImageRefError::InvalidTag(reference.to_string()));
                }
                (&remainder[..idx], Some(tag.to_string()))
            }
            _ => (remainder, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest)) if is_registry_segment(first) => {
                if !HOST_RE.is_match(first) {
                    return Err(ImageRefError::InvalidRegistry(reference.to_string()));
                }
                (Some(first.to_string()), rest)
            }
            _ => (None, name),
        };

        if repository.is_empty() || !repository.split('/').all(|c| COMPONENT_RE.is_match(c)) {
            return Err(ImageRefError::InvalidRepository(reference.to_string()));
        }

        Ok(Self {
            registry,
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Registry host the reference resolves to
    pub fn hostname(&self) -> &str {
        self.registry.as_deref().unwrap_or(DEFAULT_REGISTRY)
    }

    /// Name without tag or digest, registry included when present
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// Reference to pull: `:latest` is appended when neither tag nor digest is set
    pub fn with_default_tag(&self) -> String {
        if self.tag.is_none() && self.digest.is_none() {
            format!("{}:{}", self, DEFAULT_TAG)
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn is_registry_segment(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// Appends `:latest` to untagged references
///
/// Strings that don't parse as references (e.g. raw image ids) are returned
/// unchanged.
pub fn with_default_tag(image: &str) -> String {
    match ImageReference::parse(image) {
        Ok(reference) => reference.with_default_tag(),
        Err(_) => image.to_string(),
    }
}

/// Image description as it appears in job payloads and runner settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policies: Option<Vec<String>>,
    /// Extra environment for service containers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

impl ImageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// User supplied aliases
    ///
    /// The `alias` field may carry several names separated by commas or spaces.
    pub fn aliases(&self) -> Vec<String> {
        self.alias
            .as_deref()
            .unwrap_or_default()
            .split([',', ' '])
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Names derived from a service image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceName {
    /// Image path with the registry port stripped
    pub service: String,
    /// Tag, digest, or "latest"
    pub version: String,
    /// Reference to pull
    pub image_name: String,
    /// DNS aliases: `/` replaced by `__`, plus the `-` variant when different
    pub aliases: Vec<String>,
}

/// Splits a service image into name, version and aliases
pub fn split_service_name(description: &str) -> ServiceName {
    let mut service = description.to_string();
    let mut version = DEFAULT_TAG.to_string();
    let mut image_name = description.to_string();

    if let Ok(reference) = ImageReference::parse(description) {
        match (&reference.tag, &reference.digest) {
            (Some(tag), _) => version = tag.clone(),
            (None, Some(digest)) => version = digest.clone(),
            (None, None) => image_name = format!("{}:{}", reference.name(), DEFAULT_TAG),
        }

        service = match &reference.registry {
            Some(registry) => {
                let host = registry.split(':').next().unwrap_or(registry);
                format!("{}/{}", host, reference.repository)
            }
            None => reference.repository.clone(),
        };
    }

    let alias = service.replace('/', "__");
    let alternative = service.replace('/', "-");
    let mut aliases = vec![alias.clone()];
    if alias != alternative {
        aliases.push(alternative);
    }

    ServiceName {
        service,
        version,
        image_name,
        aliases,
    }
}
