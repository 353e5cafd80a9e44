//! Docker client config files
//!
//! Supports the current `config.json` layout (`auths`, `credsStore`,
//! `credHelpers`) and the legacy `.dockercfg` layout, where the top-level
//! object maps registries to entries directly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{AuthConfig, AuthError};

#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(rename = "identitytoken", default)]
    identity_token: String,
}

/// Parsed docker config
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DockerConfigFile {
    /// Inline credentials keyed by server address
    pub auths: BTreeMap<String, AuthConfig>,
    /// Native credential store used for every registry
    pub creds_store: Option<String>,
    /// Credential helper per registry
    pub cred_helpers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    auths: BTreeMap<String, AuthEntry>,
    #[serde(rename = "credsStore", default)]
    creds_store: Option<String>,
    #[serde(rename = "credHelpers", default)]
    cred_helpers: BTreeMap<String, String>,
}

impl DockerConfigFile {
    /// Parses a docker config document
    pub fn parse(content: &str) -> Result<Self, AuthError> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| AuthError::InvalidConfig(e.to_string()))?;

        let is_current = value
            .as_object()
            .is_some_and(|o| o.contains_key("auths") || o.contains_key("credsStore") || o.contains_key("credHelpers"));

        let raw = if is_current {
            serde_json::from_value::<RawConfig>(value)
                .map_err(|e| AuthError::InvalidConfig(e.to_string()))?
        } else {
            let auths = serde_json::from_value::<BTreeMap<String, AuthEntry>>(value)
                .map_err(|e| AuthError::InvalidConfig(e.to_string()))?;
            RawConfig {
                auths,
                creds_store: None,
                cred_helpers: BTreeMap::new(),
            }
        };

        let mut auths = BTreeMap::new();
        for (server, entry) in raw.auths {
            let auth = decode_entry(&server, entry)?;
            auths.insert(server, auth);
        }

        Ok(Self {
            auths,
            creds_store: raw.creds_store.filter(|s| !s.is_empty()),
            cred_helpers: raw.cred_helpers,
        })
    }

    /// Whether the config provides any credentials at all
    pub fn contains_auth(&self) -> bool {
        !self.auths.is_empty() || self.creds_store.is_some() || !self.cred_helpers.is_empty()
    }
}

fn decode_entry(server: &str, entry: AuthEntry) -> Result<AuthConfig, AuthError> {
    let mut auth = AuthConfig {
        username: entry.username,
        password: entry.password,
        server_address: server.to_string(),
        identity_token: entry.identity_token,
    };

    if !entry.auth.is_empty() {
        let decoded = STANDARD
            .decode(entry.auth.trim())
            .map_err(|e| AuthError::InvalidConfig(format!("auth for {}: {}", server, e)))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| AuthError::InvalidConfig(format!("auth for {}: {}", server, e)))?;
        let (username, password) = decoded.split_once(':').ok_or_else(|| {
            AuthError::InvalidConfig(format!("auth for {}: missing ':' separator", server))
        })?;
        auth.username = username.to_string();
        auth.password = password.trim_end_matches('\0').to_string();
    }

    Ok(auth)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_current_layout() {
        let content = r#"{
            "auths": {
                "https://index.docker.io/v1/": {"auth": "dXNlcjpwYXNz"},
                "registry.example.com": {"username": "bot", "password": "secret"}
            },
            "credsStore": "desktop",
            "credHelpers": {"gcr.io": "gcloud"}
        }"#;

        let config = DockerConfigFile::parse(content).unwrap();
        let hub = &config.auths["https://index.docker.io/v1/"];
        assert_eq!(hub.username, "user");
        assert_eq!(hub.password, "pass");
        assert_eq!(hub.server_address, "https://index.docker.io/v1/");
        assert_eq!(config.auths["registry.example.com"].username, "bot");
        assert_eq!(config.creds_store.as_deref(), Some("desktop"));
        assert_eq!(config.cred_helpers["gcr.io"], "gcloud");
        assert!(config.contains_auth());
    }

    #[test]
    fn test_parse_legacy_layout() {
        let content = r#"{"registry.example.com": {"auth": "dXNlcjpwYXNz", "email": "a@b.c"}}"#;
        let config = DockerConfigFile::parse(content).unwrap();
        assert_eq!(config.auths["registry.example.com"].password, "pass");
        assert!(config.creds_store.is_none());
    }

    #[test]
    fn test_parse_without_auth() {
        let config = DockerConfigFile::parse(r#"{"auths": {}}"#).unwrap();
        assert!(!config.contains_auth());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(matches!(
            DockerConfigFile::parse("not json"),
            Err(AuthError::InvalidConfig(_))
        ));
        assert!(matches!(
            DockerConfigFile::parse(r#"{"auths": {"r": {"auth": "bm9jb2xvbg=="}}}"#),
            Err(AuthError::InvalidConfig(_))
        ));
    }
}
