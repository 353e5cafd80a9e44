//! Image allowlists
//!
//! Patterns use doublestar glob syntax:
//! - `*` matches within one path segment
//! - `**/` matches any number of leading segments, including none
//! - `?` matches one character other than `/`
//! - `[...]` and `{a,b}` work as in shell globs

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllowlistError {
    #[error("the {image:?} image is not present on list of allowed {option}")]
    NotAllowed {
        image: String,
        option: String,
        allowed: Vec<String>,
    },

    #[error("invalid pattern {0:?}")]
    InvalidPattern(String),
}

/// Compiles a glob into an anchored regex
fn glob_to_regex(pattern: &str) -> Result<Regex, AllowlistError> {
    let invalid = || AllowlistError::InvalidPattern(pattern.to_string());

    let mut re = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    let mut in_alternation = false;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                if at_segment_start && chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                    continue;
                }
                re.push_str(".*");
                i += 2;
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            '[' => {
                let end = chars[i + 1..].iter().position(|&c| c == ']').ok_or_else(invalid)?;
                let class: String = chars[i + 1..i + 1 + end].iter().collect();
                let class = match class.strip_prefix(['!', '^']) {
                    Some(negated) => format!("^{}", negated),
                    None => class,
                };
                re.push('[');
                re.push_str(&class.replace('\\', "\\\\"));
                re.push(']');
                i += end + 2;
                continue;
            }
            '{' if !in_alternation => {
                in_alternation = true;
                re.push_str("(?:");
            }
            '}' if in_alternation => {
                in_alternation = false;
                re.push(')');
            }
            ',' if in_alternation => re.push('|'),
            '\\' => {
                i += 1;
                let escaped = chars.get(i).ok_or_else(invalid)?;
                re.push_str(&regex::escape(&escaped.to_string()));
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    if in_alternation {
        return Err(invalid());
    }

    re.push('$');
    Regex::new(&re).map_err(|_| invalid())
}

/// Whether `name` matches the glob `pattern`
///
/// Invalid patterns never match.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    glob_to_regex(pattern).is_ok_and(|re| re.is_match(name))
}

/// Whether `image` matches any pattern; an empty list allows everything
pub fn is_allowed(image: &str, allowed: &[String]) -> bool {
    allowed.is_empty() || allowed.iter().any(|pattern| glob_match(pattern, image))
}

/// Checks an expanded image name against an allowlist
///
/// Internal images (the runner's own helper image, the configured default
/// image) are always accepted.
///
/// # Arguments
/// * `image` - Expanded image name
/// * `option` - Setting name reported in errors, e.g. `images` or `services`
/// * `allowed` - Glob patterns; empty allows every image
/// * `internal` - Exact names that bypass the patterns
pub fn verify_allowed_image(
    image: &str,
    option: &str,
    allowed: &[String],
    internal: &[String],
) -> Result<(), AllowlistError> {
    if is_allowed(image, allowed) || internal.iter().any(|i| i == image) {
        return Ok(());
    }

    Err(AllowlistError::NotAllowed {
        image: image.to_string(),
        option: option.to_string(),
        allowed: allowed.to_vec(),
    })
}
