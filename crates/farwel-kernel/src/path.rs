//! Path canonicalization.
//!
//! Routing and backends only ever see absolute, lexically normalized paths:
//! a leading `/`, no `.` or `..` components, no repeated or trailing
//! slashes. Symlinks are not resolved.

use std::path::Path;

/// Make `path` absolute against the process working directory.
///
/// Falls back to `/` as the base if the working directory is unavailable.
pub fn absolute(path: &str) -> String {
    if path.starts_with('/') {
        return normalize(path);
    }
    let cwd = std::env::current_dir()
        .ok()
        .and_then(|p| p.to_str().map(str::to_owned))
        .unwrap_or_else(|| "/".to_string());
    absolute_from(&cwd, path)
}

/// Make `path` absolute against `base`.
pub fn absolute_from(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{base}/{path}"))
    }
}

/// Lexically normalize an absolute path.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Parent directory of a canonical path. The root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Final component of a canonical path; empty for the root.
pub fn file_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
}

/// Join a canonical directory and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Move `path`, which is `from` or lies below it, under `to`.
pub fn rebase(path: &str, from: &str, to: &str) -> String {
    match path.strip_prefix(from) {
        Some("") => to.to_string(),
        Some(rest) if from == "/" => join(to, rest),
        Some(rest) => format!("{to}{rest}"),
        None => path.to_string(),
    }
}

/// Whether `path` lies strictly below `dir`.
pub fn is_descendant(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path != "/";
    }
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}
