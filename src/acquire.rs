#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Materializes a remote submissions repository on local disk before
//! discovery. Any failure here ends the run.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};

use crate::{process::run_collect, util::git_path};

/// A unique directory under the system temp dir, deleted with everything in
/// it when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    /// Location of the directory; it need not exist yet.
    path: PathBuf,
}

impl ScratchDir {
    /// Reserves a fresh location. Nothing is created on disk.
    pub fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("pagegrade-{}", uuid::Uuid::new_v4())),
        }
    }

    /// Returns the directory's location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ScratchDir {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!("Removed scratch directory {}", self.path.display()),
            Err(e) => tracing::warn!(
                "Could not remove scratch directory {}: {e}",
                self.path.display()
            ),
        }
    }
}

/// Shallow-clones `repository` into `dest` and returns `dest`.
///
/// * `repository`: anything `git clone` accepts (URL or local path)
/// * `dest`: must not exist yet, or be an empty directory
/// * `deadline`: how long the clone may take
pub async fn clone_repository(repository: &str, dest: &Path, deadline: Duration) -> Result<PathBuf> {
    let repository = repository.trim();
    if repository.is_empty() {
        bail!("No repository to clone was given");
    }
    if dest.exists()
        && std::fs::read_dir(dest)
            .with_context(|| format!("Could not read {}", dest.display()))?
            .next()
            .is_some()
    {
        bail!("Clone destination {} is not empty", dest.display());
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Could not create {}", parent.display()))?;
    }

    let git = git_path()?;
    let args: Vec<OsString> = vec![
        "clone".into(),
        "--depth".into(),
        "1".into(),
        "--quiet".into(),
        repository.into(),
        dest.as_os_str().to_os_string(),
    ];

    tracing::info!("Cloning {repository} into {}", dest.display());
    let collected = run_collect(
        git,
        &args,
        None,
        &[("GIT_TERMINAL_PROMPT", "0")],
        Some(deadline),
    )
    .await
    .with_context(|| format!("Could not clone {repository}"))?;

    if !collected.success() {
        bail!(
            "git clone of {repository} failed ({}): {}",
            collected.status,
            collected.stderr_text()
        );
    }

    Ok(dest.to_path_buf())
}
