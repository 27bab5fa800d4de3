#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{oracle::ImageAttachment, util::artifact_key};

/// A captured full-page PNG tied to one submission or to the reference design.
#[derive(Debug, Clone)]
pub struct RenderArtifact {
    /// Location in the content store.
    path:  PathBuf,
    /// PNG bytes.
    bytes: Vec<u8>,
}

impl RenderArtifact {
    /// Returns the on-disk location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Converts the artifact into an oracle image attachment.
    pub fn to_attachment(&self) -> ImageAttachment {
        ImageAttachment::png(self.bytes.clone())
    }
}

/// Directory-backed store keyed by submission name. Entries are overwritten by
/// later runs.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    /// Directory holding the captures.
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Could not create artifact directory {}", root.display()))?;
        Ok(Self { root })
    }

    /// Location an artifact named `name` is stored at.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.png", artifact_key(name)))
    }

    /// Stores `bytes` under `name`, replacing any previous capture.
    pub async fn write(&self, name: &str, bytes: Vec<u8>) -> Result<RenderArtifact> {
        let path = self.path_for(name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("Could not write capture to {}", path.display()))?;
        tracing::debug!("Stored {} byte capture for {} at {}", bytes.len(), name, path.display());
        Ok(RenderArtifact { path, bytes })
    }
}
