//! Native credential stores and credential helpers
//!
//! Both are external `docker-credential-<name>` programs speaking the
//! docker credential helper protocol over stdin/stdout.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

use super::{AuthConfig, AuthError};

const NOT_FOUND_MESSAGE: &str = "credentials not found in native keychain";

/// Access to credential helper programs
pub trait CredentialHelper: Send + Sync {
    /// Fetches the credentials `helper` stores for `server`
    ///
    /// # Returns
    /// `None` when the helper has no credentials for the server
    fn get(&self, helper: &str, server: &str) -> Result<Option<AuthConfig>, AuthError>;

    /// Lists the server addresses `helper` stores credentials for
    fn list(&self, helper: &str) -> Result<Vec<String>, AuthError>;
}

/// Runs `docker-credential-<name>` binaries found on `PATH`
#[derive(Debug, Default, Clone)]
pub struct CommandCredentialHelper;

#[derive(Debug, Deserialize)]
struct HelperCredentials {
    #[serde(rename = "ServerURL", default)]
    server_url: String,
    #[serde(rename = "Username", default)]
    username: String,
    #[serde(rename = "Secret", default)]
    secret: String,
}

impl CommandCredentialHelper {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, helper: &str, action: &str, input: &str) -> Result<String, AuthError> {
        let program = format!("docker-credential-{}", helper);
        debug!("Running credential helper {} {}", program, action);

        let failed = |message: String| AuthError::Helper {
            helper: helper.to_string(),
            message,
        };

        let mut child = Command::new(&program)
            .arg(action)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| failed(format!("failed to execute {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .map_err(|e| failed(format!("writing to {}: {}", program, e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| failed(format!("waiting for {}: {}", program, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stdout.is_empty() {
                stderr.trim().to_string()
            } else {
                stdout
            };
            return Err(failed(message));
        }

        Ok(stdout)
    }
}

impl CredentialHelper for CommandCredentialHelper {
    fn get(&self, helper: &str, server: &str) -> Result<Option<AuthConfig>, AuthError> {
        let output = match self.run(helper, "get", server) {
            Ok(output) => output,
            Err(AuthError::Helper { message, .. }) if message.contains(NOT_FOUND_MESSAGE) => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let credentials: HelperCredentials =
            serde_json::from_str(&output).map_err(|e| AuthError::Helper {
                helper: helper.to_string(),
                message: format!("invalid response: {}", e),
            })?;

        let server_address = if credentials.server_url.is_empty() {
            server.to_string()
        } else {
            credentials.server_url
        };

        // Helpers signal identity tokens with the "<token>" username
        let auth = if credentials.username == "<token>" {
            AuthConfig {
                identity_token: credentials.secret,
                server_address,
                ..Default::default()
            }
        } else {
            AuthConfig {
                username: credentials.username,
                password: credentials.secret,
                server_address,
                ..Default::default()
            }
        };

        Ok(Some(auth))
    }

    fn list(&self, helper: &str) -> Result<Vec<String>, AuthError> {
        let output = self.run(helper, "list", "")?;
        let servers: BTreeMap<String, String> =
            serde_json::from_str(&output).map_err(|e| AuthError::Helper {
                helper: helper.to_string(),
                message: format!("invalid response: {}", e),
            })?;
        Ok(servers.into_keys().collect())
    }
}
