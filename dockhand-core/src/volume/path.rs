//! OS path semantics used by volume handling
//!
//! Container paths are interpreted with the rules of the engine's OS, not
//! the OS the runner itself runs on.

/// Path operations for one OS flavor
pub trait PathSemantics: Send + Sync {
    /// Joins path elements and cleans the result
    fn join(&self, elems: &[&str]) -> String;

    /// Whether the path is absolute
    fn is_abs(&self, path: &str) -> bool;

    /// Whether the path, once cleaned, is a root directory
    fn is_root(&self, path: &str) -> bool;

    /// Whether `target` is `base` or lies below it
    fn contains(&self, base: &str, target: &str) -> bool;
}

/// Unix path rules (`/` separator, single root)
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPath;

impl UnixPath {
    pub fn new() -> Self {
        Self
    }
}

impl PathSemantics for UnixPath {
    fn join(&self, elems: &[&str]) -> String {
        let joined = elems
            .iter()
            .filter(|e| !e.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        if joined.is_empty() {
            return String::new();
        }
        clean_unix(&joined)
    }

    fn is_abs(&self, path: &str) -> bool {
        path.starts_with('/')
    }

    fn is_root(&self, path: &str) -> bool {
        clean_unix(path) == "/"
    }

    fn contains(&self, base: &str, target: &str) -> bool {
        if self.is_abs(base) != self.is_abs(target) {
            return false;
        }
        let base = clean_unix(base);
        let target = clean_unix(target);
        is_component_prefix(&components(&base, '/'), &components(&target, '/'), false)
    }
}

/// Windows path rules (drive letters, UNC shares and named pipes)
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsPath;

impl WindowsPath {
    pub fn new() -> Self {
        Self
    }

    /// Whether the path names a pipe (`\\.\pipe\name` or `//./pipe/name`)
    pub fn is_named_pipe(&self, path: &str) -> bool {
        let normalized = path.replace('/', "\\");
        let lower = normalized.to_ascii_lowercase();
        lower.starts_with(r"\\.\pipe\") && lower.len() > r"\\.\pipe\".len()
    }
}

impl PathSemantics for WindowsPath {
    fn join(&self, elems: &[&str]) -> String {
        let joined = elems
            .iter()
            .filter(|e| !e.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\\");
        if joined.is_empty() {
            return String::new();
        }
        clean_windows(&joined)
    }

    fn is_abs(&self, path: &str) -> bool {
        let path = path.replace('/', "\\");
        let volume_len = windows_volume_len(&path);
        if volume_len == 0 {
            return false;
        }
        if path.starts_with("\\\\") {
            return true;
        }
        path[volume_len..].starts_with('\\')
    }

    fn is_root(&self, path: &str) -> bool {
        if self.is_named_pipe(path) {
            return false;
        }
        let cleaned = clean_windows(path);
        let volume_len = windows_volume_len(&cleaned);
        volume_len > 0 && cleaned.len() == volume_len + 1 && cleaned.ends_with('\\')
    }

    fn contains(&self, base: &str, target: &str) -> bool {
        if self.is_abs(base) != self.is_abs(target) {
            return false;
        }

        let base = clean_windows(base);
        let target = clean_windows(target);
        let (base_volume, base_rest) = base.split_at(windows_volume_len(&base));
        let (target_volume, target_rest) = target.split_at(windows_volume_len(&target));
        if !base_volume.eq_ignore_ascii_case(target_volume) {
            return false;
        }
        if base_rest.starts_with('\\') != target_rest.starts_with('\\') {
            return false;
        }

        is_component_prefix(
            &components(base_rest, '\\'),
            &components(target_rest, '\\'),
            true,
        )
    }
}

fn components(path: &str, separator: char) -> Vec<&str> {
    path.split(separator)
        .filter(|c| !c.is_empty() && *c != ".")
        .collect()
}

fn is_component_prefix(base: &[&str], target: &[&str], ignore_case: bool) -> bool {
    if base.len() > target.len() {
        return false;
    }
    base.iter().zip(target).all(|(b, t)| {
        if ignore_case {
            b.eq_ignore_ascii_case(t)
        } else {
            b == t
        }
    })
}

/// Lexically cleans a `/` separated path
///
/// Repeated separators collapse, `.` elements drop, and `..` removes the
/// preceding element (or is dropped at the root). An empty result is `.`.
pub fn clean_unix(path: &str) -> String {
    let rooted = path.starts_with('/');
    let cleaned = clean_elements(path.split('/'), rooted);
    match (rooted, cleaned.is_empty()) {
        (true, _) => format!("/{}", cleaned.join("/")),
        (false, true) => ".".to_string(),
        (false, false) => cleaned.join("/"),
    }
}

/// Lexically cleans a Windows path, normalizing separators to `\`
pub fn clean_windows(path: &str) -> String {
    let path = path.replace('/', "\\");
    let volume_len = windows_volume_len(&path);
    let (volume, rest) = path.split_at(volume_len);

    if rest.is_empty() {
        if volume.starts_with("\\\\") {
            return volume.to_string();
        }
        return format!("{}.", volume);
    }

    let rooted = rest.starts_with('\\');
    let cleaned = clean_elements(rest.split('\\'), rooted);
    match (rooted, cleaned.is_empty()) {
        (true, _) => format!("{}\\{}", volume, cleaned.join("\\")),
        (false, true) => format!("{}.", volume),
        (false, false) => format!("{}{}", volume, cleaned.join("\\")),
    }
}

fn clean_elements<'a>(elements: impl Iterator<Item = &'a str>, rooted: bool) -> Vec<&'a str> {
    let mut out: Vec<&str> = Vec::new();
    for element in elements {
        match element {
            "" | "." => {}
            ".." => match out.last() {
                Some(last) if *last != ".." => {
                    out.pop();
                }
                _ if rooted => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

/// Length of the leading volume name of a `\` separated path
///
/// `c:` for drive paths, `\\server\share` for UNC paths (the `\\.\pipe`
/// prefix of named pipes is a UNC volume too), zero otherwise.
fn windows_volume_len(path: &str) -> usize {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return 2;
    }

    if bytes.len() >= 5
        && bytes[0] == b'\\'
        && bytes[1] == b'\\'
        && bytes[2] != b'\\'
        && bytes[2] != b'.'
        || path.starts_with("\\\\.\\")
    {
        // \\server\share: skip the server, then the share
        let Some(server_end) = path[2..].find('\\').map(|i| i + 2) else {
            return 0;
        };
        if server_end == 2 {
            return 0;
        }
        let share_start = server_end + 1;
        if share_start >= path.len() || bytes[share_start] == b'\\' {
            return 0;
        }
        return match path[share_start..].find('\\') {
            Some(i) => share_start + i,
            None => path.len(),
        };
    }

    0
}
