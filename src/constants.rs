#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// File extensions treated as markup entry points, in priority order.
pub const MARKUP_EXTENSIONS: &[&str] = &["html", "htm"];

/// File extensions treated as stylesheets.
pub const STYLESHEET_EXTENSIONS: &[&str] = &["css"];

/// Prompt truncation length for structural summaries sent to the oracle.
pub const PROMPT_TRUNCATE: usize = 15000;

/// Artifact key reserved for the reference design capture.
pub const REFERENCE_ARTIFACT_KEY: &str = "__reference__";

/// File name of the ordered results array inside the report directory.
pub const RESULTS_FILE: &str = "results.json";

/// File name of the run metadata inside the report directory.
pub const RUN_METADATA_FILE: &str = "run.json";

/// Case-insensitive markers that signal a recommendation for human review.
pub const MANUAL_REVIEW_MARKERS: &[&str] = &["manual correction", "different"];

/// CSS property compared by hover probes when none is given.
pub const DEFAULT_HOVER_PROPERTY: &str = "background-color";

/// Default bounded wait for page navigation, in seconds.
pub const DEFAULT_NAV_TIMEOUT_SECS: u64 = 30;

/// Default browser viewport used for captures.
pub const DEFAULT_VIEWPORT: (u32, u32) = (1280, 800);

/// Default time allowed for cloning a remote submission set, in seconds.
pub const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 300;

/// Default bounded wait for one oracle answer, in seconds.
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 180;

/// How long a hover check keeps re-reading the watched property, so CSS
/// transitions have time to move it.
pub const HOVER_SETTLE: std::time::Duration = std::time::Duration::from_millis(600);

/// Pause between reads while a hover check waits for a change.
pub const HOVER_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);
