#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern, glob_with};
use url::form_urlencoded::byte_serialize;
use which::which;

/// Finds and returns the path to the git binary
pub fn git_path() -> Result<OsString> {
    which("git")
        .map(PathBuf::into_os_string)
        .context("Cannot find git on path (git)")
}

/// A glob utility function to find paths to files with certain extensions,
/// anywhere beneath `root_dir`.
///
/// * `extensions`: the file extensions to find paths for (case-insensitive)
/// * `root_dir`: the root directory where search starts
///
/// Anything under a hidden or system entry (`.git/`, `__MACOSX/`, `._x.html`)
/// is left out. Results are sorted component-wise so the order is stable
/// across runs.
pub fn find_files(extensions: &[&str], root_dir: &Path) -> Result<Vec<PathBuf>> {
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };

    let root = Pattern::escape(
        root_dir
            .to_str()
            .context("Could not convert root_dir to string")?,
    );

    let mut found = Vec::new();
    for extension in extensions {
        let pattern = format!("{}/**/*.{extension}", root.trim_end_matches('/'));

        found.extend(
            glob_with(&pattern, options)
                .context("Could not create glob")?
                .filter_map(Result::ok)
                .filter(|p| p.is_file() && !under_hidden_entry(p, root_dir)),
        );
    }

    found.sort();
    found.dedup();
    Ok(found)
}

/// Whether any component of `path` below `root_dir` is hidden or a system
/// entry. The root itself may live anywhere.
fn under_hidden_entry(path: &Path, root_dir: &Path) -> bool {
    path.strip_prefix(root_dir)
        .unwrap_or(path)
        .components()
        .any(|c| is_hidden_or_system(&c.as_os_str().to_string_lossy()))
}

/// Returns true for entries that are hidden or belong to the operating system
/// rather than a student (`.git`, `__MACOSX`, ...).
pub fn is_hidden_or_system(name: &str) -> bool {
    name.starts_with('.') || name.starts_with("__") || name.eq_ignore_ascii_case("Thumbs.db")
}

/// Turns a submission name into a flat, filesystem-safe key.
///
/// The key is the name's form-urlencoding, so distinct names never share a
/// key. Names made only of dots have each dot escaped so they cannot address
/// `.` or `..`.
pub fn artifact_key(name: &str) -> String {
    if name.is_empty() {
        // Never produced by a non-empty name: a literal `%` encodes as `%25`.
        return "%".to_string();
    }
    if name.chars().all(|c| c == '.') {
        return "%2E".repeat(name.len());
    }
    byte_serialize(name.as_bytes()).collect()
}
