#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{MARKUP_EXTENSIONS, STYLESHEET_EXTENSIONS},
    util::{find_files, is_hidden_or_system},
};

/// Structural problems found while discovering a submission. Any flag makes
/// the submission non-renderable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionFlag {
    /// No markup (`.html`/`.htm`) file anywhere in the submission.
    MissingMarkup,
    /// No stylesheet (`.css`) file anywhere in the submission.
    MissingStyling,
}

impl SubmissionFlag {
    /// Human readable artifact kind the flag refers to.
    pub fn artifact_kind(&self) -> &'static str {
        match self {
            SubmissionFlag::MissingMarkup => "HTML",
            SubmissionFlag::MissingStyling => "CSS",
        }
    }
}

impl fmt::Display for SubmissionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionFlag::MissingMarkup => write!(f, "missing markup"),
            SubmissionFlag::MissingStyling => write!(f, "missing styling"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One student's folder of web assets, as found on disk.
pub struct Submission {
    /// Directory name, used as the submission's identity.
    name:        String,
    /// Root directory of the submission.
    root:        PathBuf,
    /// Markup files in stable traversal order; the first is the entry point.
    markup:      Vec<PathBuf>,
    /// Every stylesheet found beneath the root.
    stylesheets: Vec<PathBuf>,
    /// Ordered, de-duplicated discovery flags.
    flags:       Vec<SubmissionFlag>,
}

impl Submission {
    /// Inspects a single submission directory.
    ///
    /// * `root`: directory holding the submission's files
    pub fn from_dir(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let name = root
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Submission path {} has no usable name", root.display()))?
            .to_string();

        let markup = find_files(MARKUP_EXTENSIONS, &root)
            .with_context(|| format!("Could not search {} for markup", root.display()))?;
        let stylesheets = find_files(STYLESHEET_EXTENSIONS, &root)
            .with_context(|| format!("Could not search {} for stylesheets", root.display()))?;

        let mut flags = Vec::new();
        if markup.is_empty() {
            flags.push(SubmissionFlag::MissingMarkup);
        }
        if stylesheets.is_empty() {
            flags.push(SubmissionFlag::MissingStyling);
        }

        Ok(Self {
            name,
            root,
            markup,
            stylesheets,
            flags,
        })
    }

    /// Returns the submission's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the submission's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the entry markup file, if any was found.
    pub fn entry_point(&self) -> Option<&Path> {
        self.markup.first().map(PathBuf::as_path)
    }

    /// Returns all markup files found.
    pub fn markup_files(&self) -> &[PathBuf] {
        &self.markup
    }

    /// Returns all stylesheet files found.
    pub fn stylesheets(&self) -> &[PathBuf] {
        &self.stylesheets
    }

    /// Returns the discovery flags.
    pub fn flags(&self) -> &[SubmissionFlag] {
        &self.flags
    }

    /// A flagged submission never enters the browser.
    pub fn is_renderable(&self) -> bool {
        self.flags.is_empty()
    }

    /// Error text naming the missing artifact kinds, if the submission is
    /// flagged.
    pub fn missing_summary(&self) -> Option<String> {
        if self.flags.is_empty() {
            return None;
        }
        let kinds = self
            .flags
            .iter()
            .map(SubmissionFlag::artifact_kind)
            .join(" and ");
        Some(format!("Submission is missing {kinds} file(s)"))
    }
}

/// Enumerates every immediate subdirectory of `root` as a submission, in
/// name order. Hidden/system entries and plain files are skipped.
///
/// Fails as a whole when `root` cannot be read: this is a configuration
/// error, never a per-submission one.
pub fn discover(root: &Path) -> Result<Vec<Submission>> {
    if !root.is_dir() {
        bail!("Submissions root {} does not exist or is not a directory", root.display());
    }

    let entries = std::fs::read_dir(root)
        .with_context(|| format!("Could not read submissions root {}", root.display()))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("Could not read an entry of {}", root.display()))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            tracing::warn!("Skipping non UTF-8 entry {:?}", file_name);
            continue;
        };
        if is_hidden_or_system(name) {
            continue;
        }
        let is_dir = entry
            .file_type()
            .map(|t| t.is_dir())
            .with_context(|| format!("Could not stat {}", entry.path().display()))?;
        if is_dir {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let submissions = dirs
        .into_iter()
        .map(Submission::from_dir)
        .collect::<Result<Vec<_>>>()?;

    for submission in &submissions {
        if submission.is_renderable() {
            tracing::debug!(
                "Discovered {} ({} markup, {} stylesheet files)",
                submission.name(),
                submission.markup_files().len(),
                submission.stylesheets().len()
            );
        } else {
            tracing::warn!(
                "Submission {} is flagged: {}",
                submission.name(),
                submission.flags().iter().join(", ")
            );
        }
    }

    tracing::info!("Discovered {} submissions in {}", submissions.len(), root.display());
    Ok(submissions)
}
