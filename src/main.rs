#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # pagegrade
//!
//! Command line entry point: grade a batch of web-page submissions, or list
//! what would be graded.
//!
//! The oracle is configured through `OPENAI_ENDPOINT`, `OPENAI_API_KEY` and
//! `OPENAI_MODEL` (a `.env` file is read if present).

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use bpaf::*;
use dotenvy::dotenv;
use pagegrade::{
    acquire, config,
    constants::DEFAULT_CLONE_TIMEOUT_SECS,
    discover,
    oracle::OpenAiOracle,
    pipeline::{self, RunOptions},
    render::{ChromeSession, LaunchOptions},
};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};
use url::Url;

/// Where the submissions come from.
#[derive(Debug, Clone)]
enum Source {
    /// An existing local directory.
    Local(PathBuf),
    /// A repository to clone first.
    Repo(String),
}

/// Arguments of `pagegrade grade`.
#[derive(Debug, Clone)]
struct GradeArgs {
    /// Rubric text file.
    rubric:       PathBuf,
    /// Submissions to grade.
    source:       Source,
    /// Reference design URL.
    reference:    Option<String>,
    /// Externally served submissions.
    base_url:     Option<Url>,
    /// Report directory override.
    report_dir:   Option<PathBuf>,
    /// Artifact directory override.
    artifact_dir: Option<PathBuf>,
    /// Navigation timeout override, in seconds.
    timeout:      Option<u64>,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade a batch of submissions
    Grade(GradeArgs),
    /// Print discovered submissions as JSON
    Discover(PathBuf),
}

/// Parsed command line.
#[derive(Debug, Clone)]
struct Options {
    /// Log at debug level.
    verbose: bool,
    /// The command to run.
    cmd:     Cmd,
}

/// Parse the command line arguments
fn options() -> Options {
    let rubric = long("rubric")
        .help("Text file holding the rubric")
        .argument::<PathBuf>("FILE");

    let local = long("submissions")
        .help("Directory whose subdirectories are submissions")
        .argument::<PathBuf>("DIR")
        .map(Source::Local);
    let repo = long("repo")
        .help("Repository to clone the submissions from")
        .argument::<String>("URL")
        .map(Source::Repo);
    let source = construct!([local, repo]);

    let reference = long("reference")
        .help("URL of the reference design to compare against")
        .argument::<String>("URL")
        .optional();
    let base_url = long("base-url")
        .help("Use submissions already served under this URL")
        .argument::<String>("URL")
        .parse(|s| Url::parse(&s))
        .optional();
    let report_dir = long("report-dir")
        .help("Where to write results.json and run.json")
        .argument::<PathBuf>("DIR")
        .optional();
    let artifact_dir = long("artifact-dir")
        .help("Where to store page captures")
        .argument::<PathBuf>("DIR")
        .optional();
    let timeout = long("timeout")
        .help("Seconds to wait for each page to load")
        .argument::<u64>("SECS")
        .optional();

    let grade = construct!(GradeArgs {
        rubric,
        source,
        reference,
        base_url,
        report_dir,
        artifact_dir,
        timeout,
    })
    .map(Cmd::Grade)
    .to_options()
    .command("grade")
    .help("Grade every submission and write the batch report");

    let discover = positional::<PathBuf>("DIR")
        .help("Directory whose subdirectories are submissions")
        .map(Cmd::Discover)
        .to_options()
        .command("discover")
        .help("Print the submissions that would be graded, as JSON");

    let verbose = short('v')
        .long("verbose")
        .help("Log at debug level")
        .switch();
    let cmd = construct!([grade, discover]);

    construct!(Options { verbose, cmd })
        .to_options()
        .descr("Grades web-page submissions against a rubric")
        .run()
}

/// Runs `pagegrade grade`.
async fn grade(args: GradeArgs) -> Result<()> {
    let cfg = config::get()?;
    let env = cfg.openai().cloned().context(
        "OPENAI_ENDPOINT, OPENAI_API_KEY and OPENAI_MODEL must be set to grade submissions",
    )?;

    let rubric_text = std::fs::read_to_string(&args.rubric)
        .with_context(|| format!("Could not read rubric {}", args.rubric.display()))?;

    // A cloned repository is deleted when `scratch` drops, after the report
    // is written.
    let mut scratch = None;
    let submissions_root = match args.source {
        Source::Local(dir) => dir,
        Source::Repo(repo) => {
            let dest = scratch.insert(acquire::ScratchDir::new());
            acquire::clone_repository(
                &repo,
                dest.path(),
                Duration::from_secs(DEFAULT_CLONE_TIMEOUT_SECS),
            )
            .await?
        }
    };

    let options = RunOptions::builder()
        .submissions_root(submissions_root)
        .rubric_text(rubric_text)
        .maybe_reference_url(args.reference)
        .maybe_base_url(args.base_url)
        .artifact_dir(
            args.artifact_dir
                .unwrap_or_else(|| cfg.artifact_dir().to_path_buf()),
        )
        .report_dir(args.report_dir.unwrap_or_else(|| cfg.report_dir().to_path_buf()))
        .nav_timeout(
            args.timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| cfg.nav_timeout()),
        )
        .oracle_timeout(cfg.oracle_timeout())
        .build();

    let oracle = OpenAiOracle::new(env);
    let browser = ChromeSession::launch(&LaunchOptions {
        executable: cfg.chrome_path().map(|p| p.to_path_buf()),
        viewport:   cfg.viewport(),
    })
    .await?;

    let outcome = pipeline::run(&options, &oracle, &browser, cfg.prompts()).await;
    if let Err(e) = browser.shutdown().await {
        tracing::warn!("{e:#}");
    }
    let report = outcome?;

    eprintln!("{}", report.summary_table());
    eprintln!("Report written to {}", options.report_dir().display());
    drop(scratch);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let opts = options();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);
    let level = if opts.verbose { Level::DEBUG } else { Level::INFO };
    let filter_layer = LevelFilter::from_level(level);
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    match opts.cmd {
        Cmd::Grade(args) => grade(args).await?,
        Cmd::Discover(dir) => {
            let submissions = discover(&dir)?;
            println!("{}", serde_json::to_string_pretty(&submissions)?);
        }
    };

    Ok(())
}
