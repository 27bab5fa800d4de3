#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Sequences discovery, one rubric normalization, and the per-submission
//! render → inspect → judge state machine, then writes the batch report.

use std::{fmt, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use bon::Builder;
use url::Url;

use crate::{
    artifacts::{ArtifactStore, RenderArtifact},
    config::Prompts,
    constants::{DEFAULT_NAV_TIMEOUT_SECS, DEFAULT_ORACLE_TIMEOUT_SECS, REFERENCE_ARTIFACT_KEY},
    discovery::{Submission, discover},
    error::EvaluationError,
    judge::{Judgment, judge},
    oracle::{BoundedOracle, Oracle},
    render::{BrowserSession, capture_page, render_and_inspect},
    report::{BatchReport, EvaluationResult, RunMetadata},
    rubric::{NormalizedRubric, normalize},
    serve::{self, ServeHandle, SubmissionRoutes, submission_url},
};

/// Where a submission is in its grading lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    /// Found on disk, nothing attempted yet.
    Discovered,
    /// Missing required files; terminal, never rendered.
    Flagged,
    /// A page is open and the submission is loading.
    Rendering,
    /// Capture stored and checks evaluated.
    Rendered,
    /// The grading request is in flight.
    Judging,
    /// Scored; terminal.
    Judged,
    /// Rendering or judging failed; terminal.
    Failed,
}

impl SubmissionState {
    /// Whether the state ends the submission's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Flagged | Self::Judged | Self::Failed)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: Self) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Discovered, Flagged)
                | (Discovered, Rendering)
                | (Rendering, Rendered)
                | (Rendered, Judging)
                | (Judging, Judged)
                | (Rendering, Failed)
                | (Judging, Failed)
        )
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discovered => "discovered",
            Self::Flagged => "flagged",
            Self::Rendering => "rendering",
            Self::Rendered => "rendered",
            Self::Judging => "judging",
            Self::Judged => "judged",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Tracks one submission's state and logs every transition.
struct Lifecycle<'a> {
    /// Submission name, for logs.
    name:  &'a str,
    /// Current state.
    state: SubmissionState,
}

impl<'a> Lifecycle<'a> {
    /// Starts in [`SubmissionState::Discovered`].
    fn new(name: &'a str) -> Self {
        Self {
            name,
            state: SubmissionState::Discovered,
        }
    }

    /// Moves to `next`.
    fn advance(&mut self, next: SubmissionState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        tracing::info!("{}: {} -> {next}", self.name, self.state);
        self.state = next;
    }

    /// Moves to [`SubmissionState::Failed`] from a non-terminal state.
    fn fail(&mut self, err: &EvaluationError) {
        tracing::error!("{}: {} failed: {err}", self.name, self.state);
        self.advance(SubmissionState::Failed);
    }
}

/// Everything shared, read-only, by every submission of one batch.
#[derive(Builder)]
pub struct Grader<'a> {
    /// Oracle used for judgment.
    oracle:      &'a dyn Oracle,
    /// The shared browser session.
    browser:     &'a dyn BrowserSession,
    /// The rubric, normalized once.
    rubric:      &'a NormalizedRubric,
    /// Prompt templates.
    prompts:     &'a Prompts,
    /// Where captures are stored.
    store:       &'a ArtifactStore,
    /// Base URL submissions are served under.
    base_url:    &'a Url,
    /// The reference design capture, if one was taken.
    reference:   Option<RenderArtifact>,
    /// Bounded wait for each navigation.
    #[builder(default = Duration::from_secs(DEFAULT_NAV_TIMEOUT_SECS))]
    nav_timeout: Duration,
}

impl Grader<'_> {
    /// Grades one submission to a terminal state. Never fails: errors become
    /// part of the returned result.
    pub async fn evaluate(&self, submission: &Submission) -> EvaluationResult {
        let mut lifecycle = Lifecycle::new(submission.name());

        if !submission.is_renderable() {
            lifecycle.advance(SubmissionState::Flagged);
            return EvaluationResult::flagged(submission);
        }

        match self.render_and_judge(submission, &mut lifecycle).await {
            Ok(judgment) => {
                lifecycle.advance(SubmissionState::Judged);
                tracing::info!("{}: scored {}", submission.name(), judgment.score());
                EvaluationResult::judged(submission.name(), judgment)
            }
            Err(err) => {
                lifecycle.fail(&err);
                EvaluationResult::failed(submission.name(), &err)
            }
        }
    }

    /// The non-terminal part of the lifecycle.
    async fn render_and_judge(
        &self,
        submission: &Submission,
        lifecycle: &mut Lifecycle<'_>,
    ) -> Result<Judgment, EvaluationError> {
        let name = submission.name();
        lifecycle.advance(SubmissionState::Rendering);

        let url = submission_url(self.base_url, name)
            .map_err(|e| EvaluationError::Url(format!("{e:#}")))?;
        let (capture, checks) =
            render_and_inspect(self.browser, url.as_str(), self.rubric.criteria(), self.nav_timeout)
                .await?
                .into_parts();
        let artifact = self
            .store
            .write(name, capture)
            .await
            .map_err(EvaluationError::artifact)?;
        lifecycle.advance(SubmissionState::Rendered);

        if !checks.is_empty() {
            tracing::info!("{name}: {}/{} checks passed", checks.passed_count(), checks.len());
        }

        lifecycle.advance(SubmissionState::Judging);
        judge(
            self.oracle,
            self.prompts,
            self.rubric,
            &checks,
            &artifact,
            self.reference.as_ref(),
        )
        .await
    }

    /// Grades every submission in order, one at a time, appending each result
    /// to `report`.
    pub async fn grade_all(&self, submissions: &[Submission], report: &mut BatchReport) {
        let total = submissions.len();
        for (i, submission) in submissions.iter().enumerate() {
            tracing::info!("[{}/{total}] {}", i + 1, submission.name());
            report.push(self.evaluate(submission).await);
        }
    }
}

/// Renders the reference design once and stores it under the reserved key.
/// A failure is logged and the run continues without a reference.
pub async fn capture_reference(
    browser: &dyn BrowserSession,
    store: &ArtifactStore,
    url: &str,
    nav_timeout: Duration,
) -> Option<RenderArtifact> {
    let bytes = match capture_page(browser, url, nav_timeout).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Could not capture reference design at {url}: {e}");
            return None;
        }
    };
    match store.write(REFERENCE_ARTIFACT_KEY, bytes).await {
        Ok(artifact) => {
            tracing::info!(
                "Captured reference design from {url} into {}",
                artifact.path().display()
            );
            Some(artifact)
        }
        Err(e) => {
            tracing::warn!("Could not store reference design: {e:#}");
            None
        }
    }
}

/// Inputs of one grading run.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into), on(PathBuf, into))]
pub struct RunOptions {
    /// Directory whose immediate subdirectories are submissions.
    submissions_root: PathBuf,
    /// Facilitator-authored rubric text.
    rubric_text:      String,
    /// URL of the reference design, if any.
    reference_url:    Option<String>,
    /// Serve submissions from here instead of the built-in server.
    base_url:         Option<Url>,
    /// Where captures are stored.
    artifact_dir:     PathBuf,
    /// Where the batch report is written.
    report_dir:       PathBuf,
    /// Bounded wait for each navigation.
    #[builder(default = Duration::from_secs(DEFAULT_NAV_TIMEOUT_SECS))]
    nav_timeout:      Duration,
    /// Bounded wait for each oracle answer.
    #[builder(default = Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS))]
    oracle_timeout:   Duration,
}

impl RunOptions {
    /// Returns the submissions root.
    pub fn submissions_root(&self) -> &std::path::Path {
        &self.submissions_root
    }

    /// Returns the report directory.
    pub fn report_dir(&self) -> &std::path::Path {
        &self.report_dir
    }
}

/// Performs a full run and writes its report.
///
/// Only setup problems (unreadable submissions root, artifact or report
/// directories, server bind) fail the run. Every discovered submission gets
/// exactly one result.
pub async fn run(
    options: &RunOptions,
    oracle: &dyn Oracle,
    browser: &dyn BrowserSession,
    prompts: &Prompts,
) -> Result<BatchReport> {
    let submissions = discover(&options.submissions_root)?;

    let oracle = BoundedOracle::new(oracle, options.oracle_timeout);
    let rubric = normalize(&oracle, &options.rubric_text, prompts).await;

    let mut metadata = RunMetadata::start(&options.submissions_root);
    metadata.criteria_count = rubric.criteria().len();
    metadata.max_score = rubric.max_score();
    metadata.rubric_failure = rubric.failure().map(str::to_string);

    let store = ArtifactStore::open(&options.artifact_dir).await?;

    let (server, base_url): (Option<ServeHandle>, Url) = match &options.base_url {
        Some(url) => (None, url.clone()),
        None => {
            let handle = serve::start(SubmissionRoutes::from_submissions(&submissions)).await?;
            let url = handle.base_url().clone();
            (Some(handle), url)
        }
    };

    let reference = match &options.reference_url {
        Some(url) => capture_reference(browser, &store, url, options.nav_timeout).await,
        None => None,
    };
    metadata.reference_used = reference.is_some();

    let grader = Grader::builder()
        .oracle(&oracle)
        .browser(browser)
        .rubric(&rubric)
        .prompts(prompts)
        .store(&store)
        .base_url(&base_url)
        .maybe_reference(reference)
        .nav_timeout(options.nav_timeout)
        .build();

    let mut report = BatchReport::new(metadata);
    grader.grade_all(&submissions, &mut report).await;
    report.finish();

    if let Some(server) = server {
        server.stop().await;
    }

    report
        .write_to(&options.report_dir)
        .await
        .context("Could not write the batch report")?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_only_follows_rendering_or_judging() {
        use SubmissionState::*;
        assert!(Rendering.can_advance_to(Failed));
        assert!(Judging.can_advance_to(Failed));
        assert!(!Discovered.can_advance_to(Failed));
        assert!(!Flagged.can_advance_to(Rendering));
        assert!(!Judged.can_advance_to(Failed));
    }

    #[test]
    fn terminal_states() {
        use SubmissionState::*;
        for state in [Flagged, Judged, Failed] {
            assert!(state.is_terminal());
        }
        for state in [Discovered, Rendering, Rendered, Judging] {
            assert!(!state.is_terminal());
        }
    }
}
