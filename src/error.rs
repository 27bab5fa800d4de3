#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::time::Duration;

/// Per-submission recoverable failures. These are captured into the
/// submission's result and never abort the batch.
#[derive(thiserror::Error, Debug)]
pub enum EvaluationError {
    /// A fresh page could not be opened in the shared browser.
    #[error("Could not open a browser page: {0}")]
    PageOpen(String),
    /// Navigation did not reach the load event in time.
    #[error("Navigation to {url} timed out after {}s", .timeout.as_secs())]
    NavigationTimeout {
        /// The URL being loaded.
        url:     String,
        /// The bounded wait that was exceeded.
        timeout: Duration,
    },
    /// Navigation failed outright.
    #[error("Navigation to {url} failed: {reason}")]
    Navigation {
        /// The URL being loaded.
        url:    String,
        /// Browser-reported reason.
        reason: String,
    },
    /// The full-page capture failed.
    #[error("Could not capture a screenshot: {0}")]
    Capture(String),
    /// Writing or reading a render artifact failed.
    #[error("Artifact I/O failed: {0}")]
    Artifact(String),
    /// The oracle call failed.
    #[error("Oracle call failed: {0}")]
    Oracle(String),
    /// The submission could not be mapped to a URL.
    #[error("Could not build a URL for the submission: {0}")]
    Url(String),
}

impl EvaluationError {
    /// Wraps an artifact I/O error, keeping its context chain.
    pub fn artifact(err: anyhow::Error) -> Self {
        Self::Artifact(format!("{err:#}"))
    }

    /// Wraps an oracle error, keeping its context chain.
    pub fn oracle(err: anyhow::Error) -> Self {
        Self::Oracle(format!("{err:#}"))
    }
}
