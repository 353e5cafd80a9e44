//! Job variables and `$VAR` expansion

use serde::{Deserialize, Serialize};

/// A single job variable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobVariable {
    pub key: String,
    pub value: String,
    /// Visible to services and helper containers
    #[serde(default)]
    pub public: bool,
    /// Set by the runner itself
    #[serde(default)]
    pub internal: bool,
    /// Value is the content of a file rather than a plain string
    #[serde(default)]
    pub file: bool,
    /// Value is never expanded
    #[serde(default)]
    pub raw: bool,
    #[serde(default)]
    pub masked: bool,
}

impl JobVariable {
    /// Creates a public variable
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            public: true,
            ..Default::default()
        }
    }

    /// `KEY=value` as passed to container environments
    pub fn env_entry(&self) -> String {
        format!("{}={}", self.key, self.value)
    }
}

/// Ordered job variables; later definitions override earlier ones
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobVariables(Vec<JobVariable>);

impl JobVariables {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, variable: JobVariable) {
        self.0.push(variable);
    }

    /// Value of the last variable named `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|v| v.key == key)
            .map(|v| v.value.as_str())
    }

    /// Interprets `key` as a boolean flag
    ///
    /// # Returns
    /// `None` when unset or not a recognizable boolean
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(parse_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobVariable> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Variables exposed to services and helper containers
    pub fn public_or_internal(&self) -> JobVariables {
        JobVariables(
            self.0
                .iter()
                .filter(|v| v.public || v.internal)
                .cloned()
                .collect(),
        )
    }

    /// `KEY=value` entries with expanded values
    pub fn env_list(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|v| {
                if v.raw {
                    v.env_entry()
                } else {
                    format!("{}={}", v.key, self.expand(&v.value))
                }
            })
            .collect()
    }

    /// Expands `$VAR` and `${VAR}` references
    ///
    /// Unknown variables expand to an empty string. `$` not followed by a
    /// variable name is kept as is.
    pub fn expand(&self, value: &str) -> String {
        expand_with(value, |name| self.get(name).map(str::to_string))
    }
}

impl FromIterator<JobVariable> for JobVariables {
    fn from_iter<I: IntoIterator<Item = JobVariable>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<JobVariable> for JobVariables {
    fn extend<I: IntoIterator<Item = JobVariable>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

/// Parses `true/1/yes` and `false/0/no` (case-insensitive)
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Shell-style expansion with a custom lookup
pub fn expand_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                if !name.is_empty() && name.chars().all(is_name_char) {
                    out.push_str(&lookup(name).unwrap_or_default());
                    rest = &braced[end + 1..];
                    continue;
                }
            }
            out.push('$');
            rest = after;
            continue;
        }

        let len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        if len == 0 {
            out.push('$');
            rest = after;
            continue;
        }

        out.push_str(&lookup(&after[..len]).unwrap_or_default());
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}
