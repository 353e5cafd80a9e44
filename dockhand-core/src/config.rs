//! Runner settings
//!
//! `RunnerSettings` is the per-runner document (JSON on disk) and
//! `DockerSettings` its `docker` section, listing every option the
//! executor understands. Feature flags are resolved per job from the job
//! variables and the runner's `feature_flags` map.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::image::ImageSpec;
use crate::job::RunnerInfo;
use crate::variables::JobVariables;

/// Health check timeout when none is configured
pub const DEFAULT_WAIT_FOR_SERVICES_TIMEOUT: Duration = Duration::from_secs(30);

const ALLOWED_LOG_OPTIONS: [&str; 2] = ["env", "labels"];
const ALLOWED_ISOLATIONS: [&str; 4] = ["process", "hyperv", "default", ""];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unsupported docker-pull-policy: {0:?}")]
    UnsupportedPullPolicy(String),

    #[error("the {0:?} isolation level is not supported; allowed values are: process, hyperv, default")]
    InvalidIsolation(String),

    #[error("unsupported log_options {keys:?}, only \"env\" and \"labels\" are supported")]
    UnsupportedLogOptions { keys: Vec<String> },

    #[error("invalid {option} value {value:?}")]
    InvalidValue { option: &'static str, value: String },
}

/// Whether and when an image is fetched from its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullPolicy {
    Always,
    Never,
    IfNotPresent,
}

impl PullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "always",
            PullPolicy::Never => "never",
            PullPolicy::IfNotPresent => "if-not-present",
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "always" => Ok(PullPolicy::Always),
            "never" => Ok(PullPolicy::Never),
            "if-not-present" => Ok(PullPolicy::IfNotPresent),
            other => Err(ConfigError::UnsupportedPullPolicy(other.to_string())),
        }
    }
}

/// Parses a list of policy names
pub fn parse_pull_policies(names: &[String]) -> Result<Vec<PullPolicy>, ConfigError> {
    names.iter().map(|n| n.parse()).collect()
}

/// Accepts either `"always"` or `["always", "if-not-present"]`
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<StringOrList>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(StringOrList::One(s)) if s.is_empty() => Vec::new(),
        Some(StringOrList::One(s)) => vec![s],
        Some(StringOrList::Many(list)) => list,
    })
}

/// The `docker` section of the runner settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSettings {
    /// Engine endpoint, overrides the process-wide `DOCKER_HOST`
    pub host: String,
    pub tls_cert_path: String,
    pub tls_verify: bool,

    pub image: String,
    pub allowed_images: Vec<String>,
    pub services: Vec<ImageSpec>,
    pub allowed_services: Vec<String>,
    pub allowed_privileged_images: Vec<String>,
    pub allowed_privileged_services: Vec<String>,
    /// Negative means unlimited
    pub services_limit: Option<i64>,

    #[serde(deserialize_with = "string_or_list")]
    pub pull_policy: Vec<String>,
    pub allowed_pull_policies: Vec<String>,

    pub cache_dir: String,
    pub volumes: Vec<String>,
    pub volume_driver: String,
    pub volume_driver_opts: HashMap<String, String>,
    pub disable_cache: bool,

    pub helper_image: String,
    pub helper_image_flavor: String,
    #[serde(alias = "disable_entrypoint_overwrite")]
    pub entrypoint_disable_overwrite: bool,

    pub network_mode: String,
    /// MTU of per-build networks, 0 for the engine default
    pub network_mtu: i64,
    pub enable_ipv6: bool,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub links: Vec<String>,
    pub hostname: String,
    pub mac_address: String,

    pub privileged: bool,
    pub services_privileged: Option<bool>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    pub services_security_opt: Vec<String>,
    pub runtime: String,
    pub isolation: String,
    pub userns_mode: String,
    pub ipc_mode: String,

    pub cpus: String,
    pub cpuset_cpus: String,
    pub cpu_shares: i64,
    pub memory: String,
    pub memory_swap: String,
    pub memory_reservation: String,
    pub oom_kill_disable: bool,
    pub oom_score_adjust: i64,
    pub shm_size: i64,
    pub tmpfs: HashMap<String, String>,
    pub services_tmpfs: HashMap<String, String>,
    pub sysctls: HashMap<String, String>,
    pub devices: Vec<String>,
    pub device_cgroup_rules: Vec<String>,
    pub gpus: String,

    pub volumes_from: Vec<String>,
    pub container_labels: HashMap<String, String>,
    /// Seconds; unset or zero means the default, negative skips health checks
    pub wait_for_services_timeout: Option<i64>,
    pub log_options: HashMap<String, String>,
}

impl DockerSettings {
    /// Checks option values that can be verified without an engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_pull_policies(&self.pull_policy)?;
        parse_pull_policies(&self.allowed_pull_policies)?;
        validate_isolation(&self.isolation)?;
        validate_log_options(&self.log_options)?;

        self.memory_bytes()?;
        self.memory_swap_bytes()?;
        self.memory_reservation_bytes()?;
        self.nano_cpus()?;

        Ok(())
    }

    /// Configured pull policies, `[always]` when unset
    pub fn pull_policies(&self) -> Result<Vec<PullPolicy>, ConfigError> {
        let policies = parse_pull_policies(&self.pull_policy)?;
        if policies.is_empty() {
            return Ok(vec![PullPolicy::Always]);
        }
        Ok(policies)
    }

    /// Policies a job may request
    ///
    /// Without `allowed_pull_policies` only the configured pull policies
    /// are allowed.
    pub fn allowed_pull_policies(&self) -> Result<Vec<PullPolicy>, ConfigError> {
        let allowed = parse_pull_policies(&self.allowed_pull_policies)?;
        if allowed.is_empty() {
            return self.pull_policies();
        }
        Ok(allowed)
    }

    /// Health check timeout, `None` when checks are disabled
    pub fn wait_for_services_timeout(&self) -> Option<Duration> {
        match self.wait_for_services_timeout {
            None | Some(0) => Some(DEFAULT_WAIT_FOR_SERVICES_TIMEOUT),
            Some(secs) if secs < 0 => None,
            Some(secs) => Some(Duration::from_secs(secs as u64)),
        }
    }

    /// Maximum number of services, `None` for unlimited
    pub fn services_limit(&self) -> Option<usize> {
        self.services_limit
            .filter(|limit| *limit >= 0)
            .map(|limit| limit as usize)
    }

    /// Whether service containers run privileged
    pub fn services_privileged(&self) -> bool {
        self.services_privileged.unwrap_or(self.privileged)
    }

    pub fn memory_bytes(&self) -> Result<i64, ConfigError> {
        parse_memory("memory", &self.memory)
    }

    pub fn memory_swap_bytes(&self) -> Result<i64, ConfigError> {
        parse_memory("memory_swap", &self.memory_swap)
    }

    pub fn memory_reservation_bytes(&self) -> Result<i64, ConfigError> {
        parse_memory("memory_reservation", &self.memory_reservation)
    }

    /// `cpus` in units of 1e-9 CPUs
    pub fn nano_cpus(&self) -> Result<i64, ConfigError> {
        if self.cpus.trim().is_empty() {
            return Ok(0);
        }
        let invalid = || ConfigError::InvalidValue {
            option: "cpus",
            value: self.cpus.clone(),
        };
        let cpus: f64 = self.cpus.trim().parse().map_err(|_| invalid())?;
        if cpus < 0.0 {
            return Err(invalid());
        }
        Ok((cpus * 1e9).round() as i64)
    }
}

/// Checks the Windows isolation level
pub fn validate_isolation(isolation: &str) -> Result<(), ConfigError> {
    if ALLOWED_ISOLATIONS.contains(&isolation) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIsolation(isolation.to_string()))
    }
}

/// Only the `env` and `labels` json-file options may be set
pub fn validate_log_options(options: &HashMap<String, String>) -> Result<(), ConfigError> {
    let mut keys: Vec<String> = options
        .keys()
        .filter(|k| !ALLOWED_LOG_OPTIONS.contains(&k.as_str()))
        .cloned()
        .collect();

    if keys.is_empty() {
        return Ok(());
    }
    keys.sort();
    Err(ConfigError::UnsupportedLogOptions { keys })
}

/// Parses `<number>[b|k|m|g]` into bytes; empty means unset (0)
pub fn parse_memory(option: &'static str, value: &str) -> Result<i64, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0);
    }

    let invalid = || ConfigError::InvalidValue {
        option,
        value: value.to_string(),
    };

    let lower = value.to_ascii_lowercase();
    let lower = lower.strip_suffix('b').filter(|s| !s.is_empty()).map_or(lower.as_str(), |s| s);
    let (digits, multiplier) = match lower.chars().last() {
        Some('k') => (&lower[..lower.len() - 1], 1i64 << 10),
        Some('m') => (&lower[..lower.len() - 1], 1 << 20),
        Some('g') => (&lower[..lower.len() - 1], 1 << 30),
        Some('t') => (&lower[..lower.len() - 1], 1 << 40),
        _ => (lower, 1),
    };

    let number: f64 = digits.trim().parse().map_err(|_| invalid())?;
    if number < 0.0 {
        return Err(invalid());
    }
    Ok((number * multiplier as f64) as i64)
}

/// Settings of one runner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub name: String,
    pub token: String,
    pub system_id: String,
    pub local_id: i64,
    /// Root of the builds directory inside containers
    pub builds_dir: String,
    /// Host directory for host-based caches
    pub cache_dir: String,
    pub feature_flags: HashMap<String, bool>,
    pub docker: DockerSettings,
}

impl RunnerSettings {
    pub fn runner_info(&self) -> RunnerInfo {
        RunnerInfo {
            token: self.token.clone(),
            system_id: self.system_id.clone(),
            local_id: self.local_id,
        }
    }

    /// Host cache root: the docker section wins over the runner setting
    pub fn cache_dir(&self) -> &str {
        if self.docker.cache_dir.is_empty() {
            &self.cache_dir
        } else {
            &self.docker.cache_dir
        }
    }
}

pub const FF_NETWORK_PER_BUILD: &str = "FF_NETWORK_PER_BUILD";
pub const CI_DEBUG_SERVICES: &str = "CI_DEBUG_SERVICES";
pub const FF_USE_LEGACY_BUILDS_DIR_FOR_DOCKER: &str = "FF_USE_LEGACY_BUILDS_DIR_FOR_DOCKER";
pub const FF_DISABLE_UMASK_FOR_DOCKER_EXECUTOR: &str = "FF_DISABLE_UMASK_FOR_DOCKER_EXECUTOR";
pub const CI_DEBUG_TRACE: &str = "CI_DEBUG_TRACE";

/// Feature flags in effect for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    pub network_per_build: bool,
    pub debug_services: bool,
    pub legacy_builds_dir: bool,
    pub disable_umask: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            network_per_build: true,
            debug_services: false,
            legacy_builds_dir: false,
            disable_umask: false,
        }
    }
}

impl FeatureFlags {
    /// Resolves every flag: job variable, then runner setting, then default
    pub fn resolve(runner: &HashMap<String, bool>, variables: &JobVariables) -> Self {
        let defaults = Self::default();
        let flag = |name: &str, default: bool| {
            variables
                .get_bool(name)
                .or_else(|| runner.get(name).copied())
                .unwrap_or(default)
        };

        Self {
            network_per_build: flag(FF_NETWORK_PER_BUILD, defaults.network_per_build),
            debug_services: flag(CI_DEBUG_SERVICES, defaults.debug_services),
            legacy_builds_dir: flag(FF_USE_LEGACY_BUILDS_DIR_FOR_DOCKER, defaults.legacy_builds_dir),
            disable_umask: flag(FF_DISABLE_UMASK_FOR_DOCKER_EXECUTOR, defaults.disable_umask),
        }
    }
}
