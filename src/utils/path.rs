//! Path normalization utilities.
//!
//! Pure functions for path manipulation. No side effects.

use std::path::{Path, PathBuf};

/// Normalize a file system path to absolute form.
///
/// Tries `canonicalize()` first (resolves symlinks, `.`, `..`).
/// Falls back to:
/// - Return as-is if already absolute
/// - Join with current directory if relative
#[inline]
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

/// Resolve `.` and `..` segments in a slash-separated virtual path.
///
/// Module ids are rooted virtual paths (`/pages/index.js`), not filesystem
/// paths, so this never touches the filesystem. Leading `..` segments that
/// would escape the root are dropped.
pub fn clean_virtual_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Join a relative specifier onto the directory of a referrer id.
///
/// `join_virtual("/pages/index.js", "../components/logo.tsx")`
/// → `/components/logo.tsx`.
pub fn join_virtual(referrer: &str, specifier: &str) -> String {
    let dir = match referrer.rfind('/') {
        Some(idx) => &referrer[..idx],
        None => "",
    };
    clean_virtual_path(&format!("{dir}/{specifier}"))
}

/// Convert a rooted virtual path into a relative filesystem path.
///
/// Strips the leading `/` so the result can be joined onto a real directory.
pub fn virtual_to_relative(id: &str) -> &Path {
    Path::new(id.trim_start_matches('/'))
}

/// Extension of a virtual path, if any.
pub fn virtual_extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next()?;
    let idx = name.rfind('.')?;
    if idx == 0 {
        return None;
    }
    Some(&name[idx + 1..])
}
