// Absolute tree-path handling: separator unification, traversal rejection,
// parent/name splitting.
//
// Tree paths are absolute, `/`-separated strings. They are the unique key of
// every node, so the daemon and every mirror must derive them identically.

use thiserror::Error;

/// Maximum allowed path length in characters.
const MAX_PATH_CHARS: usize = 4096;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path is not absolute: {0}")]
    Relative(String),

    #[error("path exceeds maximum length of {MAX_PATH_CHARS} characters")]
    TooLong,

    #[error("path contains directory traversal component: {0}")]
    Traversal(String),

    #[error("path contains null byte")]
    NullByte,
}

/// Normalize an absolute path into tree-key form.
///
/// Rules:
/// - Convert all separators to `/`
/// - Collapse consecutive `/` into one
/// - Strip the trailing `/` (except for the filesystem root itself)
/// - Reject `.` and `..` components
/// - Reject null bytes and relative paths
pub fn normalize_path(input: &str) -> Result<String, PathError> {
    if input.is_empty() {
        return Err(PathError::Empty);
    }

    if input.contains('\0') {
        return Err(PathError::NullByte);
    }

    let unified = input.replace('\\', "/");
    let (prefix, rest) = split_prefix(&unified).ok_or_else(|| PathError::Relative(input.to_string()))?;

    let mut components = Vec::new();
    for component in rest.split('/').filter(|s| !s.is_empty()) {
        if component == "." || component == ".." {
            return Err(PathError::Traversal(component.to_string()));
        }
        components.push(component);
    }

    let result = if components.is_empty() {
        format!("{prefix}/")
    } else {
        format!("{prefix}/{}", components.join("/"))
    };

    if result.chars().count() > MAX_PATH_CHARS {
        return Err(PathError::TooLong);
    }

    Ok(result)
}

/// Splits `C:/x` into (`C:`, `/x`) and `/x` into (``, `/x`).
fn split_prefix(path: &str) -> Option<(&str, &str)> {
    if path.starts_with('/') {
        return Some(("", path));
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        let rest = &path[2..];
        if rest.is_empty() || rest.starts_with('/') {
            return Some((&path[..2], rest));
        }
    }
    None
}

/// Containing directory of `path`, or `None` for a filesystem root.
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    if parent.is_empty() {
        return Some("/");
    }
    if parent.len() == 2 && parent.ends_with(':') {
        // `C:/x` -> `C:/`
        return Some(&path[..3]);
    }
    Some(parent)
}

/// Last component of `path`.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Extension of the last component, lower-cased, without the dot.
pub fn extension(path: &str) -> String {
    let name = file_name(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// True when `path` is `root` or lies below it.
pub fn is_within(path: &str, root: &str) -> bool {
    if path == root {
        return true;
    }
    let root = root.trim_end_matches('/');
    path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/'
}
