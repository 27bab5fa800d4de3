#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Drives a browser page per submission: navigation, full-page capture and
//! DOM/behavior probes.

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::page::CaptureScreenshotFormat,
    handler::viewport::Viewport,
    page::ScreenshotParams,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::{
    constants::{DEFAULT_HOVER_PROPERTY, HOVER_POLL_INTERVAL, HOVER_SETTLE},
    error::EvaluationError,
    rubric::{CriterionKind, RubricCriterion, StructuralCheck},
};

/// One open, isolated page.
///
/// Every method may fail; the inspection logic turns probe failures into
/// `false` results.
#[async_trait]
pub trait InspectPage: Send + Sync {
    /// Navigates and waits for the load event.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Captures the whole scrollable page as PNG bytes.
    async fn capture_full_page(&self) -> Result<Vec<u8>>;

    /// Whether `selector` matches at least one element.
    async fn selector_matches(&self, selector: &str) -> Result<bool>;

    /// Computed value of `property` on the first element matching `selector`.
    async fn computed_style(&self, selector: &str, property: &str) -> Result<String>;

    /// Moves the pointer over the first element matching `selector`.
    async fn hover(&self, selector: &str) -> Result<()>;

    /// Releases the page.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A browser shared by every submission in a run.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Opens a fresh page.
    async fn open_page(&self) -> Result<Box<dyn InspectPage>>;
}

/// Result of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// Description of the criterion the check belongs to.
    criterion: String,
    /// Selector that was probed.
    selector:  String,
    /// Whether the probe passed.
    passed:    bool,
}

impl CheckOutcome {
    /// Creates an outcome.
    pub fn new(criterion: impl Into<String>, selector: impl Into<String>, passed: bool) -> Self {
        Self {
            criterion: criterion.into(),
            selector: selector.into(),
            passed,
        }
    }

    /// Returns the criterion description.
    pub fn criterion(&self) -> &str {
        &self.criterion
    }

    /// Returns the selector.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Returns whether the probe passed.
    pub fn passed(&self) -> bool {
        self.passed
    }

    /// Key combining the criterion and the check.
    pub fn key(&self) -> String {
        format!("{} :: {}", self.criterion, self.selector)
    }
}

/// Pass/fail per criterion+check, in rubric order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralCheckResults {
    /// Outcomes in evaluation order.
    outcomes: Vec<CheckOutcome>,
}

impl StructuralCheckResults {
    /// Appends an outcome.
    pub fn record(&mut self, outcome: CheckOutcome) {
        self.outcomes.push(outcome);
    }

    /// Returns all outcomes.
    pub fn outcomes(&self) -> &[CheckOutcome] {
        &self.outcomes
    }

    /// Looks up the outcome for a criterion+selector pair.
    pub fn get(&self, criterion: &str, selector: &str) -> Option<bool> {
        self.outcomes
            .iter()
            .find(|o| o.criterion() == criterion && o.selector() == selector)
            .map(CheckOutcome::passed)
    }

    /// Number of probes that passed.
    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.passed).count()
    }

    /// Number of probes run.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether no probes were run.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// What a successful render of one submission produced.
#[derive(Debug, Clone)]
pub struct Inspection {
    /// Full-page PNG.
    capture: Vec<u8>,
    /// Probe results.
    checks:  StructuralCheckResults,
}

impl Inspection {
    /// Splits the inspection into its parts.
    pub fn into_parts(self) -> (Vec<u8>, StructuralCheckResults) {
        (self.capture, self.checks)
    }
}

/// Opens a page, loads `url` within `nav_timeout`, captures it and runs every
/// structural and behavioral check. The page is closed on every path.
pub async fn render_and_inspect(
    session: &dyn BrowserSession,
    url: &str,
    criteria: &[RubricCriterion],
    nav_timeout: Duration,
) -> Result<Inspection, EvaluationError> {
    let page = session
        .open_page()
        .await
        .map_err(|e| EvaluationError::PageOpen(format!("{e:#}")))?;

    let outcome = async {
        let capture = load_and_capture(page.as_ref(), url, nav_timeout).await?;
        let checks = run_checks(page.as_ref(), criteria).await;
        Ok::<_, EvaluationError>(Inspection { capture, checks })
    }
    .await;

    release(page).await;
    outcome
}

/// Renders a page without running checks, e.g. the reference design.
pub async fn capture_page(
    session: &dyn BrowserSession,
    url: &str,
    nav_timeout: Duration,
) -> Result<Vec<u8>, EvaluationError> {
    let page = session
        .open_page()
        .await
        .map_err(|e| EvaluationError::PageOpen(format!("{e:#}")))?;
    let outcome = load_and_capture(page.as_ref(), url, nav_timeout).await;
    release(page).await;
    outcome
}

/// Closes a page, logging rather than failing.
async fn release(page: Box<dyn InspectPage>) {
    if let Err(e) = page.close().await {
        tracing::warn!("Could not close browser page: {e:#}");
    }
}

/// Navigation with a bounded wait, then a capture bounded by the same wait.
async fn load_and_capture(
    page: &dyn InspectPage,
    url: &str,
    nav_timeout: Duration,
) -> Result<Vec<u8>, EvaluationError> {
    match tokio::time::timeout(nav_timeout, page.navigate(url)).await {
        Err(_) => {
            return Err(EvaluationError::NavigationTimeout {
                url:     url.to_string(),
                timeout: nav_timeout,
            });
        }
        Ok(Err(e)) => {
            return Err(EvaluationError::Navigation {
                url:    url.to_string(),
                reason: format!("{e:#}"),
            });
        }
        Ok(Ok(())) => {}
    }

    match tokio::time::timeout(nav_timeout, page.capture_full_page()).await {
        Err(_) => Err(EvaluationError::Capture(format!(
            "no screenshot of {url} within {}s",
            nav_timeout.as_secs_f64()
        ))),
        Ok(result) => result.map_err(|e| EvaluationError::Capture(format!("{e:#}"))),
    }
}

/// Evaluates the checks of every structural and behavioral criterion.
pub async fn run_checks(
    page: &dyn InspectPage,
    criteria: &[RubricCriterion],
) -> StructuralCheckResults {
    let mut results = StructuralCheckResults::default();

    for criterion in criteria {
        for check in criterion.checks() {
            let passed = match criterion.kind() {
                CriterionKind::Structural => probe_presence(page, check).await,
                CriterionKind::Behavioral => probe_hover(page, check).await,
                CriterionKind::Visual => continue,
            };
            let passed = match passed {
                Ok(passed) => passed,
                Err(e) => {
                    tracing::debug!(
                        "Check `{}` for `{}` failed: {e:#}",
                        check.selector(),
                        criterion.description()
                    );
                    false
                }
            };
            results.record(CheckOutcome::new(criterion.description(), check.selector(), passed));
        }
    }

    results
}

/// Selector presence.
async fn probe_presence(page: &dyn InspectPage, check: &StructuralCheck) -> Result<bool> {
    page.selector_matches(check.selector()).await
}

/// Passes when hovering the element changes the watched style property
/// within [`HOVER_SETTLE`].
async fn probe_hover(page: &dyn InspectPage, check: &StructuralCheck) -> Result<bool> {
    let property = check.property().unwrap_or(DEFAULT_HOVER_PROPERTY);
    let before = page.computed_style(check.selector(), property).await?;
    page.hover(check.selector()).await?;

    let deadline = tokio::time::Instant::now() + HOVER_SETTLE;
    loop {
        let after = page.computed_style(check.selector(), property).await?;
        if after != before {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(HOVER_POLL_INTERVAL).await;
    }
}

/// Options for launching the headless browser.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Browser executable override.
    pub executable: Option<PathBuf>,
    /// Viewport width and height.
    pub viewport:   (u32, u32),
}

/// Headless Chromium shared across a run.
pub struct ChromeSession {
    /// The browser connection.
    browser: Browser,
    /// Task pumping the DevTools event loop.
    handler: JoinHandle<()>,
}

impl ChromeSession {
    /// Launches the browser and starts its event loop.
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let (width, height) = options.viewport;
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(width, height)
            .viewport(Viewport {
                width,
                height,
                ..Viewport::default()
            });
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Invalid browser configuration: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Could not launch a headless browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler stopped: {e}");
                    break;
                }
            }
        });

        tracing::info!("Launched headless browser ({width}x{height})");
        Ok(Self { browser, handler })
    }

    /// Closes the browser and waits for its event loop to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .context("Could not close the browser")?;
        let _ = self.browser.wait().await;
        let _ = self.handler.await;
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn open_page(&self) -> Result<Box<dyn InspectPage>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .context("Could not open a new tab")?;
        Ok(Box::new(ChromePage { page }))
    }
}

/// A Chromium tab.
struct ChromePage {
    /// The underlying tab.
    page: Page,
}

impl ChromePage {
    /// Evaluates `expr` and deserializes its value.
    async fn eval<T: serde::de::DeserializeOwned>(&self, expr: String) -> Result<T> {
        self.page
            .evaluate(expr)
            .await
            .context("Script evaluation failed")?
            .into_value::<T>()
            .context("Unexpected script result")
    }
}

/// Quotes a string as a JavaScript literal.
fn js_string(value: &str) -> Result<String> {
    serde_json::to_string(value).context("Could not quote script argument")
}

#[async_trait]
impl InspectPage for ChromePage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page.goto(url).await.context("Navigation failed")?;
        Ok(())
    }

    async fn capture_full_page(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .context("Screenshot failed")
    }

    async fn selector_matches(&self, selector: &str) -> Result<bool> {
        let expr = format!("document.querySelector({}) !== null", js_string(selector)?);
        self.eval(expr).await
    }

    async fn computed_style(&self, selector: &str, property: &str) -> Result<String> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({sel}); \
             if (!el) {{ throw new Error('no element matches'); }} \
             return getComputedStyle(el).getPropertyValue({prop}); }})()",
            sel = js_string(selector)?,
            prop = js_string(property)?,
        );
        self.eval(expr).await
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        let element = self
            .page
            .find_element(selector)
            .await
            .with_context(|| format!("No element matches `{selector}`"))?;
        element.hover().await.context("Hover failed")?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromePage { page } = *self;
        page.close().await.context("Could not close tab")?;
        Ok(())
    }
}
