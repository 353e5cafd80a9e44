//! Registry authentication
//!
//! Collects registry credentials from, in order of precedence:
//! 1. The `DOCKER_AUTH_CONFIG` job variable
//! 2. The docker config file in the runner user's home directory
//!    (including credential stores and per-registry credential helpers)
//! 3. `registry` credentials sent in the job payload
//!
//! The first source to provide credentials for a registry path wins.

mod config_file;
mod helper;
mod resolver;

pub use config_file::DockerConfigFile;
pub use helper::{CommandCredentialHelper, CredentialHelper};
pub use resolver::AuthResolver;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::image::DEFAULT_REGISTRY;

/// Errors produced while resolving registry credentials
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("path traversal is not allowed: {0:?}")]
    PathTraversal(String),

    #[error("invalid docker config: {0}")]
    InvalidConfig(String),

    #[error("credential helper {helper:?} failed: {message}")]
    Helper { helper: String, message: String },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoding auth config: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Credentials for one registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(rename = "serveraddress", default, skip_serializing_if = "String::is_empty")]
    pub server_address: String,
    #[serde(rename = "identitytoken", default, skip_serializing_if = "String::is_empty")]
    pub identity_token: String,
}

/// Where a set of credentials came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSource {
    /// The `DOCKER_AUTH_CONFIG` job variable
    UserVariable,
    /// A docker config file in the home directory
    HomeFile(PathBuf),
    /// `registry` credentials of the job payload
    JobPayload,
    /// A native credential store or credential helper
    CredentialHelper(String),
}

impl fmt::Display for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthSource::UserVariable => write!(f, "$DOCKER_AUTH_CONFIG"),
            AuthSource::HomeFile(path) => write!(f, "{}", path.display()),
            AuthSource::JobPayload => write!(f, "job payload (GitLab Registry)"),
            AuthSource::CredentialHelper(name) => write!(f, "credential helper {}", name),
        }
    }
}

/// Credentials bound to a normalized registry path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInfo {
    pub registry_path: String,
    pub source: AuthSource,
    pub auth: AuthConfig,
}

/// Registry credentials in discovery order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryInfos(Vec<RegistryInfo>);

impl RegistryInfos {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Finds the credentials registered for exactly `path`
    pub fn get(&self, path: &str) -> Option<&RegistryInfo> {
        self.0.iter().find(|i| i.registry_path == path)
    }

    /// Registers credentials unless the registry path is already known
    ///
    /// # Returns
    /// A description of the conflict when the credentials were ignored
    pub fn add(&mut self, info: RegistryInfo) -> Result<(), String> {
        if let Some(existing) = self.get(&info.registry_path) {
            return Err(format!(
                "credentials for {:?} already set from {:?}, ignoring credentials from {:?}",
                existing.registry_path,
                existing.source.to_string(),
                info.source.to_string()
            ));
        }
        self.0.push(info);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryInfo> {
        self.0.iter()
    }
}

/// Encodes credentials for the engine's `X-Registry-Auth` header
///
/// The header value is base64url (padded) of the JSON credentials.
pub fn encode_auth_header(auth: &AuthConfig) -> Result<String, AuthError> {
    let json = serde_json::to_vec(auth)?;
    Ok(URL_SAFE.encode(json))
}

/// Normalizes an image reference to a registry path
///
/// - the tag is cut off
/// - Docker Hub images get an explicit `docker.io` prefix
/// - `index.docker.io` becomes `docker.io`
/// - the hostname is lower-cased
pub fn normalize_image_ref(image: &str) -> String {
    let (dir, name) = match image.rfind('/') {
        Some(idx) => (&image[..=idx], &image[idx + 1..]),
        None => ("", image),
    };
    let name = name.split(':').next().unwrap_or(name);
    let normalized = format!("{}{}", dir, name);

    let first = normalized.split('/').next().unwrap_or_default();
    let is_docker_io = !normalized.contains('/')
        || (!first.contains('.') && !first.contains(':') && !first.eq_ignore_ascii_case("localhost"));

    let normalized = if is_docker_io {
        format!("{}/{}", DEFAULT_REGISTRY, normalized)
    } else if first.eq_ignore_ascii_case(&format!("index.{}", DEFAULT_REGISTRY)) {
        normalized["index.".len()..].to_string()
    } else {
        normalized
    };

    lowercase_hostname(&normalized)
}

/// Normalizes a credential server address to a registry path
///
/// Addresses with an `http(s)://` scheme keep only their hostname. Other
/// addresses drop a trailing `/` and any tag.
pub fn registry_path(server_address: &str) -> String {
    let lower = server_address.to_ascii_lowercase();
    let without_scheme = if lower.starts_with("https://") {
        Some(&server_address["https://".len()..])
    } else if lower.starts_with("http://") {
        Some(&server_address["http://".len()..])
    } else {
        None
    };

    if let Some(rest) = without_scheme {
        let host = rest.split('/').next().unwrap_or_default().to_ascii_lowercase();
        return canonical_registry_host(host);
    }

    let mut path = server_address.trim_end_matches('/').to_string();
    if let (Some(tag_idx), Some(path_idx)) = (path.rfind(':'), path.rfind('/')) {
        if tag_idx > path_idx {
            path.truncate(tag_idx);
        }
    }

    let path = lowercase_hostname(&path);
    match path.split_once('/') {
        Some((host, rest)) => format!("{}/{}", canonical_registry_host(host.to_string()), rest),
        None => canonical_registry_host(path),
    }
}

fn canonical_registry_host(host: String) -> String {
    if host == format!("index.{}", DEFAULT_REGISTRY) {
        DEFAULT_REGISTRY.to_string()
    } else {
        host
    }
}

fn lowercase_hostname(path: &str) -> String {
    match path.split_once('/') {
        Some((host, rest)) => format!("{}/{}", host.to_ascii_lowercase(), rest),
        None => path.to_ascii_lowercase(),
    }
}

/// Parent of a registry path, or `None` at the hostname
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|idx| &path[..idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_image_ref() {
        let cases = [
            ("nginx", "docker.io/nginx"),
            ("nginx:1.25", "docker.io/nginx"),
            ("library/nginx:latest", "docker.io/library/nginx"),
            ("index.docker.io/library/nginx", "docker.io/library/nginx"),
            ("Registry.Example.COM/Group/App:1", "registry.example.com/Group/App"),
            ("localhost/app", "localhost/app"),
            ("localhost:5000/app:tag", "localhost:5000/app"),
        ];
        for (image, expected) in cases {
            assert_eq!(normalize_image_ref(image), expected, "{}", image);
        }
    }

    #[test]
    fn test_registry_path() {
        let cases = [
            ("https://index.docker.io/v1/", "docker.io"),
            ("http://Registry.Example.com/v2/", "registry.example.com"),
            ("index.docker.io", "docker.io"),
            ("registry.example.com/", "registry.example.com"),
            ("registry.example.com:5000", "registry.example.com:5000"),
            ("Registry.Example.com/group/image:tag", "registry.example.com/group/image"),
        ];
        for (address, expected) in cases {
            assert_eq!(registry_path(address), expected, "{}", address);
        }
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("docker.io/library/nginx"), Some("docker.io/library"));
        assert_eq!(parent_path("docker.io"), None);
    }

    #[test]
    fn test_encode_auth_header() {
        let auth = AuthConfig {
            username: "user".to_string(),
            password: "pass".to_string(),
            server_address: "registry.example.com".to_string(),
            ..Default::default()
        };
        let encoded = encode_auth_header(&auth).unwrap();
        let decoded = URL_SAFE.decode(encoded).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["username"], "user");
        assert_eq!(value["password"], "pass");
        assert_eq!(value["serveraddress"], "registry.example.com");
        assert!(value.get("identitytoken").is_none());
    }

    #[test]
    fn test_registry_infos_first_wins() {
        let mut infos = RegistryInfos::new();
        let first = RegistryInfo {
            registry_path: "docker.io".to_string(),
            source: AuthSource::UserVariable,
            auth: AuthConfig::default(),
        };
        let second = RegistryInfo {
            source: AuthSource::JobPayload,
            ..first.clone()
        };

        assert!(infos.add(first).is_ok());
        let err = infos.add(second).unwrap_err();
        assert!(err.contains("already set from \"$DOCKER_AUTH_CONFIG\""));
        assert_eq!(infos.len(), 1);
        assert_eq!(infos.get("docker.io").unwrap().source, AuthSource::UserVariable);
    }
}
