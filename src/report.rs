#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabled::{
    Table, Tabled,
    settings::{Modify, Style, Width, object::Rows},
};

use crate::{
    constants::{RESULTS_FILE, RUN_METADATA_FILE},
    discovery::Submission,
    error::EvaluationError,
    judge::Judgment,
};

#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[builder(on(String, into))]
/// The single outcome recorded for one submission.
pub struct EvaluationResult {
    /// Submission name.
    name:              String,
    /// Total score.
    #[builder(default)]
    score:             f64,
    /// Narrative feedback, verbatim from the oracle when judged.
    #[builder(default)]
    feedback:          String,
    /// Why the submission could not be graded normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error:             Option<String>,
    /// Whether a human should re-review the submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    manual_correction: Option<bool>,
}

impl EvaluationResult {
    /// Result for a submission that was rendered and judged.
    pub fn judged(name: impl Into<String>, judgment: Judgment) -> Self {
        let (score, feedback, manual_correction) = judgment.into_parts();
        Self::builder()
            .name(name)
            .score(score)
            .feedback(feedback)
            .maybe_manual_correction(manual_correction)
            .build()
    }

    /// Zero-score result for a submission missing required files.
    pub fn flagged(submission: &Submission) -> Self {
        let error = submission
            .missing_summary()
            .unwrap_or_else(|| "Submission is missing required files".to_string());
        Self::builder()
            .name(submission.name())
            .score(0.0)
            .feedback(format!("{error}; the page was not rendered."))
            .error(error)
            .manual_correction(false)
            .build()
    }

    /// Result for a submission whose render or judgment failed.
    pub fn failed(name: impl Into<String>, err: &EvaluationError) -> Self {
        Self::builder()
            .name(name)
            .score(0.0)
            .feedback("Automated grading failed; this submission needs manual review.")
            .error(err.to_string())
            .manual_correction(true)
            .build()
    }

    /// Returns the submission name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the score.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Returns the feedback.
    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    /// Returns the error, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns the manual-review flag, if set.
    pub fn manual_correction(&self) -> Option<bool> {
        self.manual_correction
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Facts about one grading run.
pub struct RunMetadata {
    /// Unique id of the run.
    pub run_id:           String,
    /// When the run started.
    pub started_at:       DateTime<Utc>,
    /// When the last result was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at:      Option<DateTime<Utc>>,
    /// Directory the submissions were discovered in.
    pub submissions_root: PathBuf,
    /// Number of structured criteria used.
    pub criteria_count:   usize,
    /// Sum of the criteria weights.
    pub max_score:        f64,
    /// Whether a reference design was compared against.
    pub reference_used:   bool,
    /// Why rubric normalization failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_failure:   Option<String>,
}

impl RunMetadata {
    /// Starts metadata for a run over `submissions_root`.
    pub fn start(submissions_root: impl Into<PathBuf>) -> Self {
        Self {
            run_id:           uuid::Uuid::new_v4().to_string(),
            started_at:       Utc::now(),
            finished_at:      None,
            submissions_root: submissions_root.into(),
            criteria_count:   0,
            max_score:        0.0,
            reference_used:   false,
            rubric_failure:   None,
        }
    }
}

/// Row shown in the terminal summary.
#[derive(Tabled)]
struct ReportRow {
    /// Submission name.
    #[tabled(rename = "Submission")]
    name:   String,
    /// Formatted score.
    #[tabled(rename = "Score")]
    score:  String,
    /// Manual review marker.
    #[tabled(rename = "Review")]
    review: String,
    /// Error text, if any.
    #[tabled(rename = "Error")]
    error:  String,
}

/// Every result of one run, in discovery order, plus run metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchReport {
    /// Facts about the run.
    metadata: RunMetadata,
    /// One result per discovered submission.
    results:  Vec<EvaluationResult>,
}

impl BatchReport {
    /// Creates an empty report.
    pub fn new(metadata: RunMetadata) -> Self {
        Self {
            metadata,
            results: Vec::new(),
        }
    }

    /// Appends the next submission's result.
    pub fn push(&mut self, result: EvaluationResult) {
        self.results.push(result);
    }

    /// Stamps the finish time.
    pub fn finish(&mut self) {
        self.metadata.finished_at = Some(Utc::now());
    }

    /// Returns the run metadata.
    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Returns the results in discovery order.
    pub fn results(&self) -> &[EvaluationResult] {
        &self.results
    }

    /// Writes `results.json` (the ordered results array) and `run.json` into
    /// `dir`.
    pub async fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Could not create report directory {}", dir.display()))?;

        let results_path = dir.join(RESULTS_FILE);
        let results = serde_json::to_string_pretty(&self.results)
            .context("Could not serialize evaluation results")?;
        tokio::fs::write(&results_path, results)
            .await
            .with_context(|| format!("Could not write {}", results_path.display()))?;

        let metadata_path = dir.join(RUN_METADATA_FILE);
        let metadata = serde_json::to_string_pretty(&self.metadata)
            .context("Could not serialize run metadata")?;
        tokio::fs::write(&metadata_path, metadata)
            .await
            .with_context(|| format!("Could not write {}", metadata_path.display()))?;

        tracing::info!("Wrote {} results to {}", self.results.len(), results_path.display());
        Ok(results_path)
    }

    /// Reads a report previously written with [`BatchReport::write_to`].
    pub async fn read_from(dir: &Path) -> Result<Self> {
        let results_path = dir.join(RESULTS_FILE);
        let results = tokio::fs::read_to_string(&results_path)
            .await
            .with_context(|| format!("Could not read {}", results_path.display()))?;
        let results: Vec<EvaluationResult> = serde_json::from_str(&results)
            .with_context(|| format!("{} is not a results array", results_path.display()))?;

        let metadata_path = dir.join(RUN_METADATA_FILE);
        let metadata = tokio::fs::read_to_string(&metadata_path)
            .await
            .with_context(|| format!("Could not read {}", metadata_path.display()))?;
        let metadata: RunMetadata = serde_json::from_str(&metadata)
            .with_context(|| format!("{} is not run metadata", metadata_path.display()))?;

        Ok(Self { metadata, results })
    }

    /// Renders a terminal summary table.
    pub fn summary_table(&self) -> String {
        let rows = self.results.iter().map(|r| ReportRow {
            name:   r.name().to_string(),
            score:  format!("{:.2}", r.score()),
            review: match r.manual_correction() {
                Some(true) => "yes".to_string(),
                Some(false) => "no".to_string(),
                None => "-".to_string(),
            },
            error:  r.error().unwrap_or_default().to_string(),
        });

        Table::new(rows)
            .with(Style::modern())
            .with(Modify::new(Rows::new(1..)).with(Width::wrap(60).keep_words(true)))
            .to_string()
    }
}
