//! Credential resolution across all sources

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::config_file::DockerConfigFile;
use super::helper::{CommandCredentialHelper, CredentialHelper};
use super::{
    AuthConfig, AuthError, AuthSource, RegistryInfo, RegistryInfos, normalize_image_ref,
    parent_path, registry_path,
};
use crate::job::Credentials;

/// Resolves registry credentials for a job
#[derive(Clone)]
pub struct AuthResolver {
    home_dir: Option<PathBuf>,
    docker_config_dir: Option<PathBuf>,
    helper: Arc<dyn CredentialHelper>,
}

impl AuthResolver {
    /// Creates a resolver reading the current user's home directory
    ///
    /// `$DOCKER_CONFIG` takes precedence over `~/.docker` when set.
    pub fn new() -> Self {
        Self {
            home_dir: dirs::home_dir(),
            docker_config_dir: std::env::var_os("DOCKER_CONFIG").map(PathBuf::from),
            helper: Arc::new(CommandCredentialHelper::new()),
        }
    }

    /// Overrides the home directory (`None` disables home configs)
    pub fn with_home_dir(mut self, home_dir: Option<PathBuf>) -> Self {
        self.home_dir = home_dir;
        self.docker_config_dir = None;
        self
    }

    /// Overrides how credential helpers are invoked
    pub fn with_credential_helper(mut self, helper: Arc<dyn CredentialHelper>) -> Self {
        self.helper = helper;
        self
    }

    /// Credentials for one image
    ///
    /// Picks the registry path with the longest match against the
    /// normalized image reference.
    ///
    /// # Arguments
    /// * `image` - Image reference as it will be pulled
    /// * `docker_auth_config` - Value of the `DOCKER_AUTH_CONFIG` job variable
    /// * `credentials` - Credentials sent with the job
    pub fn config_for_image(
        &self,
        image: &str,
        docker_auth_config: Option<&str>,
        credentials: &[Credentials],
    ) -> Result<Option<RegistryInfo>, AuthError> {
        let configs = self.all_configs(docker_auth_config, credentials)?;
        if configs.is_empty() {
            return Ok(None);
        }

        let normalized = normalize_image_ref(image);
        let mut path = Some(normalized.as_str());
        while let Some(p) = path {
            if let Some(info) = configs.get(p) {
                return Ok(Some(info.clone()));
            }
            path = parent_path(p);
        }

        Ok(None)
    }

    /// All known registry credentials in precedence order
    ///
    /// A failing source is logged and skipped; only path traversal in a
    /// credential helper name aborts resolution.
    pub fn all_configs(
        &self,
        docker_auth_config: Option<&str>,
        credentials: &[Credentials],
    ) -> Result<RegistryInfos, AuthError> {
        let mut infos = RegistryInfos::new();

        let sources = [
            self.user_variable_configs(docker_auth_config),
            self.home_dir_configs(),
            Ok(job_payload_configs(credentials)),
        ];

        for source in sources {
            let configs = match source {
                Ok(configs) => configs,
                Err(e @ AuthError::PathTraversal(_)) => return Err(e),
                Err(e) => {
                    debug!("Skipping Docker credentials source: {}", e);
                    continue;
                }
            };

            let mut hostnames = Vec::new();
            for (source, auth) in configs {
                let path = registry_path(&auth.server_address);
                hostnames.push(path.clone());
                if let Err(conflict) = infos.add(RegistryInfo {
                    registry_path: path,
                    source,
                    auth,
                }) {
                    debug!("Not adding Docker credentials: {}", conflict);
                }
            }

            if !hostnames.is_empty() {
                debug!("Loaded Docker credentials, hostnames = {:?}", hostnames);
            }
        }

        Ok(infos)
    }

    fn user_variable_configs(
        &self,
        docker_auth_config: Option<&str>,
    ) -> Result<Vec<(AuthSource, AuthConfig)>, AuthError> {
        let Some(content) = docker_auth_config.filter(|c| !c.trim().is_empty()) else {
            return Ok(Vec::new());
        };
        let config = DockerConfigFile::parse(content)?;
        self.expand_config(&config, AuthSource::UserVariable)
    }

    fn home_dir_configs(&self) -> Result<Vec<(AuthSource, AuthConfig)>, AuthError> {
        let mut candidates = Vec::new();
        if let Some(dir) = &self.docker_config_dir {
            candidates.push(dir.join("config.json"));
        }
        if let Some(home) = &self.home_dir {
            candidates.push(home.join(".docker").join("config.json"));
            candidates.push(home.join(".dockercfg"));
        }

        for path in candidates {
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    let config = DockerConfigFile::parse(&content)?;
                    return self.expand_config(&config, AuthSource::HomeFile(path));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(AuthError::Io { path, source }),
            }
        }

        Ok(Vec::new())
    }

    /// Flattens a config into credentials, consulting stores and helpers
    ///
    /// Helper results override inline entries for the same server. The
    /// result is ordered by server address.
    fn expand_config(
        &self,
        config: &DockerConfigFile,
        source: AuthSource,
    ) -> Result<Vec<(AuthSource, AuthConfig)>, AuthError> {
        if !config.contains_auth() {
            return Ok(Vec::new());
        }

        let mut auths: std::collections::BTreeMap<String, (AuthSource, AuthConfig)> = config
            .auths
            .iter()
            .map(|(server, auth)| (server.clone(), (source.clone(), auth.clone())))
            .collect();

        if let Some(store) = &config.creds_store {
            check_helper_name(store)?;
            for server in self.helper.list(store)? {
                if let Some(auth) = self.helper.get(store, &server)? {
                    auths.insert(server, (AuthSource::CredentialHelper(store.clone()), auth));
                }
            }
        }

        for (server, helper) in &config.cred_helpers {
            check_helper_name(helper)?;
            if let Some(auth) = self.helper.get(helper, server)? {
                auths.insert(server.clone(), (AuthSource::CredentialHelper(helper.clone()), auth));
            }
        }

        Ok(auths.into_values().collect())
    }
}

impl Default for AuthResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn job_payload_configs(credentials: &[Credentials]) -> Vec<(AuthSource, AuthConfig)> {
    credentials
        .iter()
        .filter(|c| c.kind == "registry")
        .map(|c| {
            (
                AuthSource::JobPayload,
                AuthConfig {
                    username: c.username.clone(),
                    password: c.password.clone(),
                    server_address: c.url.clone(),
                    ..Default::default()
                },
            )
        })
        .collect()
}

/// Rejects helper names that would escape the `docker-credential-` prefix
fn check_helper_name(name: &str) -> Result<(), AuthError> {
    let base = Path::new(name).file_name().and_then(|n| n.to_str());
    if base != Some(name) {
        return Err(AuthError::PathTraversal(name.to_string()));
    }
    Ok(())
}
