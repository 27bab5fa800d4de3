#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::{Context, Result};
use async_openai::types::chat::ReasoningEffort;

use crate::constants::{DEFAULT_NAV_TIMEOUT_SECS, DEFAULT_ORACLE_TIMEOUT_SECS, DEFAULT_VIEWPORT};

/// Parses the optional reasoning-effort environment value into the OpenAI enum,
/// defaulting to `ReasoningEffort::Medium` when unset or unrecognised.
fn parse_reasoning_effort(val: Option<String>) -> ReasoningEffort {
    match val
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
        .unwrap_or("medium")
    {
        "low" => ReasoningEffort::Low,
        "high" => ReasoningEffort::High,
        _ => ReasoningEffort::Medium,
    }
}

/// OpenAI-compatible credentials and optional tuning parameters sourced from
/// the environment.
pub struct OpenAiEnv {
    /// Base URL for the OpenAI-compatible API endpoint.
    api_base:         String,
    /// API key used to authenticate requests.
    api_key:          String,
    /// Model identifier for chat completions. Must accept image input.
    model:            String,
    /// Optional temperature override, if provided.
    temperature:      Option<f32>,
    /// Optional top-p override, if provided.
    top_p:            Option<f32>,
    /// Reasoning effort hint to send with requests.
    reasoning_effort: ReasoningEffort,
}

impl OpenAiEnv {
    /// Construct an `OpenAiEnv` from environment variables; returns `None` if
    /// any required field is missing.
    fn from_env() -> Option<Self> {
        let api_base = std::env::var("OPENAI_ENDPOINT").ok()?.trim().to_owned();
        let api_key = std::env::var("OPENAI_API_KEY").ok()?.trim().to_owned();
        let model = std::env::var("OPENAI_MODEL").ok()?.trim().to_owned();

        if api_base.is_empty() || api_key.is_empty() || model.is_empty() {
            return None;
        }

        let temperature = std::env::var("OPENAI_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse::<f32>().ok());
        let top_p = std::env::var("OPENAI_TOP_P")
            .ok()
            .and_then(|s| s.parse::<f32>().ok());
        let reasoning_effort =
            parse_reasoning_effort(std::env::var("OPENAI_REASONING_EFFORT").ok());

        Some(Self {
            api_base,
            api_key,
            model,
            temperature,
            top_p,
            reasoning_effort,
        })
    }

    /// Returns the API base URL used for requests.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Returns the API key used for requests.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Returns the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns the configured temperature, if any.
    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    /// Returns the configured top_p, if any.
    pub fn top_p(&self) -> Option<f32> {
        self.top_p
    }

    /// Returns the reasoning effort level (defaults to Medium when
    /// unspecified).
    pub fn reasoning_effort(&self) -> ReasoningEffort {
        self.reasoning_effort.clone()
    }
}

impl Clone for OpenAiEnv {
    fn clone(&self) -> Self {
        Self {
            api_base:         self.api_base.clone(),
            api_key:          self.api_key.clone(),
            model:            self.model.clone(),
            temperature:      self.temperature,
            top_p:            self.top_p,
            reasoning_effort: self.reasoning_effort.clone(),
        }
    }
}

/// Prompt templates embedded in the binary.
#[derive(Debug, Clone)]
pub struct Prompts {
    /// System prompt for turning free-text rubrics into criteria.
    rubric_system:   String,
    /// System prompt for grading a rendered page.
    judge_system:    String,
    /// Extra instructions appended when a reference design is supplied.
    judge_reference: String,
}

impl Prompts {
    /// Load prompt templates embedded in the binary.
    pub fn load() -> Self {
        Self {
            rubric_system:   include_str!("prompts/rubric_system.md").to_string(),
            judge_system:    include_str!("prompts/judge_system.md").to_string(),
            judge_reference: include_str!("prompts/judge_reference.md").to_string(),
        }
    }

    /// Returns the rubric normalization system prompt.
    pub fn rubric_system(&self) -> &str {
        &self.rubric_system
    }

    /// Returns the grading system prompt.
    pub fn judge_system(&self) -> &str {
        &self.judge_system
    }

    /// Returns the reference comparison instructions.
    pub fn judge_reference(&self) -> &str {
        &self.judge_reference
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self::load()
    }
}

/// Runtime and prompt configuration shared across the crate.
pub struct ConfigState {
    /// Cached OpenAI configuration, if available.
    openai:         Option<OpenAiEnv>,
    /// Prompt templates.
    prompts:        Prompts,
    /// Bounded wait for each page navigation.
    nav_timeout:    Duration,
    /// Bounded wait for each oracle answer.
    oracle_timeout: Duration,
    /// Directory where rendered captures are stored.
    artifact_dir:   PathBuf,
    /// Directory where the batch report is written.
    report_dir:     PathBuf,
    /// Browser executable override.
    chrome_path:    Option<PathBuf>,
    /// Viewport width and height used for captures.
    viewport:       (u32, u32),
}

impl ConfigState {
    /// Construct a new configuration instance by reading the environment and
    /// prompt assets.
    fn new() -> Result<Self> {
        let nav_timeout = read_timeout_secs("PAGEGRADE_NAV_TIMEOUT_SECS", DEFAULT_NAV_TIMEOUT_SECS);
        let oracle_timeout =
            read_timeout_secs("PAGEGRADE_ORACLE_TIMEOUT_SECS", DEFAULT_ORACLE_TIMEOUT_SECS);
        let artifact_dir = std::env::var("PAGEGRADE_ARTIFACT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".pagegrade").join("artifacts"));
        let report_dir = std::env::var("PAGEGRADE_REPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".pagegrade").join("reports"));
        let chrome_path = std::env::var("PAGEGRADE_CHROME")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let viewport = match std::env::var("PAGEGRADE_VIEWPORT") {
            Ok(value) => parse_viewport(&value)
                .with_context(|| format!("PAGEGRADE_VIEWPORT `{value}` is not WIDTHxHEIGHT"))?,
            Err(_) => DEFAULT_VIEWPORT,
        };

        Ok(Self {
            openai: OpenAiEnv::from_env(),
            prompts: Prompts::load(),
            nav_timeout,
            oracle_timeout,
            artifact_dir,
            report_dir,
            chrome_path,
            viewport,
        })
    }

    /// Returns the OpenAI configuration, if all required environment variables
    /// are present.
    pub fn openai(&self) -> Option<&OpenAiEnv> {
        self.openai.as_ref()
    }

    /// Returns the embedded prompt templates.
    pub fn prompts(&self) -> &Prompts {
        &self.prompts
    }

    /// Returns the configured navigation timeout.
    pub fn nav_timeout(&self) -> Duration {
        self.nav_timeout
    }

    /// Returns the configured wait for one oracle answer.
    pub fn oracle_timeout(&self) -> Duration {
        self.oracle_timeout
    }

    /// Returns the configured artifact directory.
    pub fn artifact_dir(&self) -> &std::path::Path {
        &self.artifact_dir
    }

    /// Returns the configured report directory.
    pub fn report_dir(&self) -> &std::path::Path {
        &self.report_dir
    }

    /// Returns the browser executable override, if any.
    pub fn chrome_path(&self) -> Option<&std::path::Path> {
        self.chrome_path.as_deref()
    }

    /// Returns the capture viewport.
    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }
}

/// Shared configuration handle used throughout the crate.
#[derive(Clone)]
pub struct ConfigHandle(Arc<ConfigState>);

impl std::ops::Deref for ConfigHandle {
    type Target = ConfigState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Global storage for the lazily constructed configuration state.
static CONFIG_SLOT: OnceLock<Mutex<Option<Arc<ConfigState>>>> = OnceLock::new();

/// Returns the mutex guarding the global configuration slot.
fn slot() -> &'static Mutex<Option<Arc<ConfigState>>> {
    CONFIG_SLOT.get_or_init(|| Mutex::new(None))
}

/// Ensure the global configuration has been initialized and return a handle.
pub fn ensure_initialized() -> Result<ConfigHandle> {
    let slot = slot();
    let mut guard = slot
        .lock()
        .map_err(|_| anyhow::anyhow!("config slot poisoned"))?;
    if let Some(cfg) = guard.as_ref() {
        return Ok(ConfigHandle(Arc::clone(cfg)));
    }

    let cfg = Arc::new(ConfigState::new()?);
    *guard = Some(Arc::clone(&cfg));
    Ok(ConfigHandle(cfg))
}

/// Returns the active configuration, initializing it on demand.
pub fn get() -> Result<ConfigHandle> {
    ensure_initialized()
}

/// Parses `WIDTHxHEIGHT` into a viewport.
pub fn parse_viewport(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.trim().split_once(['x', 'X'])?;
    let w = w.trim().parse::<u32>().ok().filter(|w| *w > 0)?;
    let h = h.trim().parse::<u32>().ok().filter(|h| *h > 0)?;
    Some((w, h))
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    std::env::var(env)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}
