//! Job payload and identity
//!
//! A job arrives as a JSON document (see the `dockhand-runner` binary) and
//! carries everything the executor needs: identifiers for labels and
//! resource names, images, variables, registry credentials and the ordered
//! list of steps to run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::image::ImageSpec;
use crate::variables::JobVariables;

/// Default root of the builds directory inside containers
pub const DEFAULT_BUILDS_DIR: &str = "/builds";

/// Default job timeout (two hours)
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 7200;

/// How sources are brought into the build directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitStrategy {
    #[default]
    Clone,
    Fetch,
    None,
    Empty,
}

impl GitStrategy {
    /// Parses `GIT_STRATEGY`; unknown values fall back to `clone`
    pub fn from_variable(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "fetch" => GitStrategy::Fetch,
            "none" => GitStrategy::None,
            "empty" => GitStrategy::Empty,
            _ => GitStrategy::Clone,
        }
    }
}

/// Credentials sent along with the job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Identity of the runner executing the job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerInfo {
    /// Full runner token
    #[serde(default)]
    pub token: String,
    /// Unique id of the runner installation
    #[serde(default)]
    pub system_id: String,
    /// Index of the runner in the local configuration
    #[serde(default)]
    pub local_id: i64,
}

impl RunnerInfo {
    /// Human readable, truncated form of the token
    pub fn short_description(&self) -> String {
        shorten_token(&self.token)
    }
}

/// One script invocation of a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub script: Vec<String>,
    /// Runs in a fresh helper container instead of the build container
    #[serde(default)]
    pub predefined: bool,
}

impl Step {
    /// Script text fed to the shell on stdin
    pub fn script_text(&self) -> String {
        let mut text = self.script.join("\n");
        text.push('\n');
        text
    }
}

/// A single CI job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub project_id: i64,
    #[serde(default)]
    pub pipeline_id: Option<i64>,
    /// Concurrency slot of the runner for this project
    #[serde(default)]
    pub project_runner_id: i64,
    /// Web URL of the project, e.g. `https://gitlab.example.com/group/project`
    #[serde(default)]
    pub project_url: String,
    #[serde(default)]
    pub sha: String,
    #[serde(default)]
    pub before_sha: String,
    #[serde(rename = "ref", default)]
    pub ref_name: String,
    /// Whether `ref_name` is a protected branch or tag
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub timeout: Option<u64>,
    pub image: ImageSpec,
    #[serde(default)]
    pub services: Vec<ImageSpec>,
    #[serde(default)]
    pub variables: JobVariables,
    #[serde(default)]
    pub credentials: Vec<Credentials>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Job {
    /// Unique name for the runner and project pair
    ///
    /// Stable across jobs of the same project on the same concurrency
    /// slot, so it keys persistent caches.
    pub fn project_unique_name(&self, runner: &RunnerInfo) -> String {
        make_rfc1123_compatible(&format!(
            "runner-{}-project-{}-concurrent-{}",
            runner.short_description(),
            self.project_id,
            self.project_runner_id
        ))
    }

    /// Like `project_unique_name` but also unique per job
    pub fn project_unique_short_name(&self, runner: &RunnerInfo) -> String {
        make_rfc1123_compatible(&format!(
            "runner-{}-{}-{}-{}",
            runner.short_description(),
            self.project_id,
            self.project_runner_id,
            self.id
        ))
    }

    /// Job page URL
    pub fn url(&self) -> String {
        format!("{}/-/jobs/{}", self.project_url.trim_end_matches('/'), self.id)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_JOB_TIMEOUT_SECS))
    }

    /// `GIT_STRATEGY` from the job variables
    pub fn git_strategy(&self) -> GitStrategy {
        self.variables
            .get("GIT_STRATEGY")
            .map(GitStrategy::from_variable)
            .unwrap_or_default()
    }

    /// `group/project` part of the project URL
    pub fn project_path(&self) -> String {
        let without_scheme = self
            .project_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.project_url);

        match without_scheme.split_once('/') {
            Some((_, path)) if !path.trim_matches('/').is_empty() => {
                path.trim_matches('/').trim_end_matches(".git").to_string()
            }
            _ => format!("project-{}", self.project_id),
        }
    }

    /// Values for the identifying labels of created resources
    pub fn label_values(&self, runner: &RunnerInfo) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("job.id", self.id.to_string()),
            ("job.url", self.url()),
            ("job.sha", self.sha.clone()),
            ("job.before_sha", self.before_sha.clone()),
            ("job.ref", self.ref_name.clone()),
            ("job.timeout", format_duration(self.timeout())),
            ("project.id", self.project_id.to_string()),
            ("project.runner_id", self.project_runner_id.to_string()),
            (
                "pipeline.id",
                self.pipeline_id.map(|id| id.to_string()).unwrap_or_default(),
            ),
            ("runner.id", runner.short_description()),
            ("runner.local_id", runner.local_id.to_string()),
            ("runner.system_id", runner.system_id.clone()),
        ])
    }
}

const TOKEN_PREFIXES: [&str; 2] = ["glrt-", "GR1348941"];
const SHORT_TOKEN_LEN: usize = 9;

/// Truncates a runner token to its human readable form
pub fn shorten_token(token: &str) -> String {
    let token = TOKEN_PREFIXES
        .iter()
        .find_map(|p| token.strip_prefix(p))
        .unwrap_or(token);
    token.chars().take(SHORT_TOKEN_LEN).collect()
}

/// Lower-cases and strips everything a DNS label cannot hold
///
/// The result contains only `[a-z0-9-]`, does not start or end with `-`
/// and is at most 63 characters long.
pub fn make_rfc1123_compatible(name: &str) -> String {
    let cleaned: String = name
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();

    let truncated: String = cleaned.trim_matches('-').chars().take(63).collect();
    truncated.trim_end_matches('-').to_string()
}

/// Formats a duration like `2h0m0s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
