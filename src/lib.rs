//! # pagegrade
//!
//! Grades a batch of student web-page submissions against a free-text rubric
//! by rendering each page in a headless browser, running automated DOM
//! checks, and asking a vision-capable model for a score and feedback.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Cloning a remote submissions repository
pub mod acquire;
/// Captured page images and the directory they are stored in
pub mod artifacts;
/// Environment-driven configuration and prompt templates
pub mod config;
/// A module defining a bunch of constant values to be used throughout
pub mod constants;
/// Finding submissions on disk
pub mod discovery;
/// Per-submission recoverable errors
pub mod error;
/// Building the grading request and reading its answer
pub mod judge;
/// The generative-language service behind rubric structuring and judgment
pub mod oracle;
/// The per-submission state machine and the full run
pub mod pipeline;
/// Async subprocess helper
pub mod process;
/// Rendering pages and running DOM checks
pub mod render;
/// Evaluation results and the durable batch report
pub mod report;
/// Turning rubric text into weighted criteria
pub mod rubric;
/// Serving submissions over HTTP for the browser
pub mod serve;
/// Utility functions for convenience
pub mod util;

pub use discovery::{Submission, SubmissionFlag, discover};
pub use error::EvaluationError;
pub use pipeline::{Grader, RunOptions, SubmissionState, run};
pub use report::{BatchReport, EvaluationResult, RunMetadata};
