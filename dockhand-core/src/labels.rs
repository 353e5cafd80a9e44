//! Resource labeling
//!
//! Every container, volume and network the executor creates carries the
//! same identifying label set, so ownership can be decided from labels
//! alone.

use std::collections::HashMap;
use std::fmt;

use crate::job::{Job, RunnerInfo};

/// Prefix of every label key
pub const LABEL_PREFIX: &str = "com.gitlab.gitlab-runner";

/// What a labeled resource is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Build,
    Predefined,
    Service,
    Wait,
    Cache,
    Network,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Build => "build",
            ResourceKind::Predefined => "predefined",
            ResourceKind::Service => "service",
            ResourceKind::Wait => "wait",
            ResourceKind::Cache => "cache",
            ResourceKind::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces label sets for one job
#[derive(Debug, Clone)]
pub struct Labeler {
    base: HashMap<String, String>,
}

impl Labeler {
    pub fn new(job: &Job, runner: &RunnerInfo) -> Self {
        let mut base: HashMap<String, String> = job
            .label_values(runner)
            .into_iter()
            .map(|(key, value)| (label_key(key), value))
            .collect();
        base.insert(label_key("managed"), "true".to_string());

        Self { base }
    }

    /// Full label set for a resource
    ///
    /// # Arguments
    /// * `kind` - Stored under `type`
    /// * `extra` - Additional `(key, value)` pairs, keys without the prefix
    pub fn labels(&self, kind: ResourceKind, extra: &[(&str, &str)]) -> HashMap<String, String> {
        let mut labels = self.base.clone();
        labels.insert(label_key("type"), kind.to_string());
        for (key, value) in extra {
            labels.insert(label_key(key), value.to_string());
        }
        labels
    }
}

/// Prefixed label key
pub fn label_key(key: &str) -> String {
    format!("{}.{}", LABEL_PREFIX, key)
}
