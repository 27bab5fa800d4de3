#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Builds the grading request sent to the oracle and reads a score and
//! feedback back out of its free-form answer.

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    artifacts::RenderArtifact,
    config::Prompts,
    constants::{MANUAL_REVIEW_MARKERS, PROMPT_TRUNCATE},
    error::EvaluationError,
    oracle::{Oracle, OracleRequest},
    render::StructuralCheckResults,
    rubric::NormalizedRubric,
};

/// First number on the same line as a case-insensitive `score`, with at most
/// 24 non-digit characters in between.
static SCORE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)score[^0-9\n]{0,24}(\d+(?:\.\d+)?)").expect("score pattern is valid")
});

/// Extracts the total score from an oracle response.
///
/// Never fails: a response without a score marker, or with an unreadable
/// number, scores 0.
pub fn parse_score(response: &str) -> f64 {
    SCORE_PATTERN
        .captures(response)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|score| score.is_finite())
        .unwrap_or(0.0)
}

/// Whether the response asks for a human to re-review the submission.
pub fn recommends_manual_review(response: &str) -> bool {
    let lowered = response.to_lowercase();
    MANUAL_REVIEW_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// A parsed oracle judgment.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    /// Total score; 0 when none could be read.
    score:         f64,
    /// The oracle's response, verbatim.
    feedback:      String,
    /// Manual-review signal; only present when a reference was compared.
    manual_review: Option<bool>,
}

impl Judgment {
    /// Parses a response. The text is kept verbatim as feedback whatever the
    /// outcome of score extraction.
    pub fn from_response(response: String, reference_supplied: bool) -> Self {
        let score = parse_score(&response);
        if score == 0.0 && !SCORE_PATTERN.is_match(&response) {
            tracing::warn!("Oracle response carried no score marker; scoring 0");
        }
        let manual_review = reference_supplied.then(|| recommends_manual_review(&response));
        Self {
            score,
            feedback: response,
            manual_review,
        }
    }

    /// Returns the total score.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Returns the verbatim feedback.
    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    /// Returns the manual-review signal, if a reference was compared.
    pub fn manual_review(&self) -> Option<bool> {
        self.manual_review
    }

    /// Splits the judgment into score, feedback and manual-review signal.
    pub fn into_parts(self) -> (f64, String, Option<bool>) {
        (self.score, self.feedback, self.manual_review)
    }
}

/// Renders the rubric and the structural findings as the grading request text.
pub fn grading_prompt(rubric: &NormalizedRubric, checks: &StructuralCheckResults) -> String {
    let mut lines = Vec::new();

    if rubric.criteria().is_empty() {
        lines.push("# Rubric".to_string());
        lines.push(
            "The rubric could not be broken into criteria. Grade the page against it as written, \
             using the screenshot:"
                .to_string(),
        );
        lines.push(format!("```\n{}\n```", rubric.source()));
    } else {
        lines.push(format!("# Rubric (maximum score: {})", format_points(rubric.max_score())));
        for (i, criterion) in rubric.criteria().iter().enumerate() {
            lines.push(format!(
                "{}. {} (weight: {}, {})",
                i + 1,
                criterion.description(),
                format_points(criterion.weight()),
                criterion.kind()
            ));
        }
    }

    lines.push(String::new());
    lines.push("# Structural check results".to_string());
    if checks.is_empty() {
        lines.push("No automated checks were run against this page.".to_string());
    } else {
        for outcome in checks.outcomes() {
            lines.push(format!(
                "- {}: {}",
                if outcome.passed() { "PASS" } else { "FAIL" },
                outcome.key()
            ));
        }
    }

    let mut prompt = lines.join("\n");
    if prompt.len() > PROMPT_TRUNCATE {
        let mut cut = PROMPT_TRUNCATE;
        while !prompt.is_char_boundary(cut) {
            cut -= 1;
        }
        prompt.truncate(cut);
        prompt.push_str("...[TRUNCATED]");
    }
    prompt
}

/// Formats a weight without a trailing `.0`.
fn format_points(points: f64) -> String {
    if points.fract() == 0.0 {
        format!("{points:.0}")
    } else {
        format!("{points}")
    }
}

/// Assembles the image-bearing grading request. The submission's capture
/// always comes first; the reference design, when given, second.
pub fn grading_request(
    prompts: &Prompts,
    rubric: &NormalizedRubric,
    checks: &StructuralCheckResults,
    capture: &RenderArtifact,
    reference: Option<&RenderArtifact>,
) -> OracleRequest {
    let mut system = prompts.judge_system().to_string();
    let mut images = vec![capture.to_attachment()];

    if let Some(reference) = reference {
        system.push_str("\n\n");
        system.push_str(prompts.judge_reference());
        images.push(reference.to_attachment());
    }

    OracleRequest::builder()
        .system(system)
        .text(grading_prompt(rubric, checks))
        .images(images)
        .build()
}

/// Sends the grading request and parses the response.
pub async fn judge(
    oracle: &dyn Oracle,
    prompts: &Prompts,
    rubric: &NormalizedRubric,
    checks: &StructuralCheckResults,
    capture: &RenderArtifact,
    reference: Option<&RenderArtifact>,
) -> Result<Judgment, EvaluationError> {
    let request = grading_request(prompts, rubric, checks, capture, reference);
    let response = oracle
        .complete(request)
        .await
        .map_err(EvaluationError::oracle)?;
    Ok(Judgment::from_response(response, reference.is_some()))
}
