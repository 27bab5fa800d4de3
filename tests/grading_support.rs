#![allow(dead_code)]

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use pagegrade::{
    oracle::{Oracle, OracleRequest},
    render::{BrowserSession, InspectPage},
};
use uuid::Uuid;

/// A fresh, empty directory under the system temp dir.
pub fn temp_root(label: &str) -> PathBuf {
    let root = std::env::temp_dir().join(format!("pagegrade-{label}-{}", Uuid::new_v4()));
    fs::create_dir_all(&root).expect("create temp root");
    root
}

/// Writes `files` (relative path, contents) beneath `root/name`.
pub fn write_submission(root: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(name);
    fs::create_dir_all(&dir).expect("create submission dir");
    for (rel, contents) in files {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(path, contents).expect("write submission file");
    }
    dir
}

/// A minimal page with markup and styling.
pub fn complete_page(root: &Path, name: &str) -> PathBuf {
    write_submission(root, name, &[
        ("index.html", "<html><body><input type=\"checkbox\"></body></html>"),
        ("style.css", "body { color: black; }"),
    ])
}

/// Oracle that answers with a closure and remembers every request.
pub struct StubOracle {
    answer:   Box<dyn Fn(&OracleRequest) -> Result<String> + Send + Sync>,
    requests: Mutex<Vec<OracleRequest>>,
}

impl StubOracle {
    pub fn new(answer: impl Fn(&OracleRequest) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            answer:   Box::new(answer),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers rubric requests with `rubric` and grading requests with
    /// `judgment`. Grading requests are the ones carrying images.
    pub fn scripted(rubric: &str, judgment: &str) -> Self {
        let rubric = rubric.to_string();
        let judgment = judgment.to_string();
        Self::new(move |request| {
            if request.attachments().is_empty() {
                Ok(rubric.clone())
            } else {
                Ok(judgment.clone())
            }
        })
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Requests that carried at least one image.
    pub fn grading_requests(&self) -> Vec<OracleRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !r.attachments().is_empty())
            .collect()
    }
}

#[async_trait]
impl Oracle for StubOracle {
    async fn complete(&self, request: OracleRequest) -> Result<String> {
        let answer = (self.answer)(&request);
        self.requests.lock().expect("requests lock").push(request);
        answer
    }
}

/// What a stub page does, shared by every page of a [`StubBrowser`].
#[derive(Default)]
pub struct PageScript {
    /// URLs containing any of these never finish loading.
    pub hang_on:       Vec<String>,
    /// URLs containing any of these fail to load.
    pub fail_on:       Vec<String>,
    /// Selectors that match an element.
    pub present:       HashSet<String>,
    /// Selectors that make the page throw.
    pub invalid:       HashSet<String>,
    /// Whether hovering changes computed styles.
    pub hover_changes: bool,
    /// Style reads after a hover that still see the old value, like a CSS
    /// transition that has not moved yet.
    pub hover_lag:     usize,
    /// Whether screenshots never finish.
    pub hang_capture:  bool,
    /// Whether opening a page fails.
    pub refuse_pages:  bool,
}

/// Counters and logs recorded by a [`StubBrowser`].
#[derive(Default)]
pub struct BrowserLog {
    pub opened:      AtomicUsize,
    pub closed:      AtomicUsize,
    pub navigations: Mutex<Vec<String>>,
    pub selectors:   Mutex<Vec<String>>,
}

impl BrowserLog {
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().expect("navigations lock").clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Browser that never launches anything.
pub struct StubBrowser {
    script: Arc<PageScript>,
    log:    Arc<BrowserLog>,
}

impl StubBrowser {
    pub fn new(script: PageScript) -> Self {
        Self {
            script: Arc::new(script),
            log:    Arc::new(BrowserLog::default()),
        }
    }

    pub fn log(&self) -> Arc<BrowserLog> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl BrowserSession for StubBrowser {
    async fn open_page(&self) -> Result<Box<dyn InspectPage>> {
        if self.script.refuse_pages {
            bail!("browser is gone");
        }
        self.log.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubPage {
            script:  Arc::clone(&self.script),
            log:     Arc::clone(&self.log),
            hovered: AtomicBool::new(false),
            reads:   AtomicUsize::new(0),
        }))
    }
}

struct StubPage {
    script:  Arc<PageScript>,
    log:     Arc<BrowserLog>,
    hovered: AtomicBool,
    /// Style reads since the hover.
    reads:   AtomicUsize,
}

impl StubPage {
    fn check_selector(&self, selector: &str) -> Result<()> {
        self.log
            .selectors
            .lock()
            .expect("selectors lock")
            .push(selector.to_string());
        if self.script.invalid.contains(selector) {
            return Err(anyhow!("SyntaxError: '{selector}' is not a valid selector"));
        }
        Ok(())
    }
}

#[async_trait]
impl InspectPage for StubPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.log
            .navigations
            .lock()
            .expect("navigations lock")
            .push(url.to_string());
        if self.script.hang_on.iter().any(|s| url.contains(s.as_str())) {
            std::future::pending::<()>().await;
        }
        if self.script.fail_on.iter().any(|s| url.contains(s.as_str())) {
            bail!("net::ERR_CONNECTION_REFUSED");
        }
        Ok(())
    }

    async fn capture_full_page(&self) -> Result<Vec<u8>> {
        if self.script.hang_capture {
            std::future::pending::<()>().await;
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn selector_matches(&self, selector: &str) -> Result<bool> {
        self.check_selector(selector)?;
        Ok(self.script.present.contains(selector))
    }

    async fn computed_style(&self, selector: &str, _property: &str) -> Result<String> {
        self.check_selector(selector)?;
        if !self.script.present.contains(selector) {
            bail!("no element matches {selector}");
        }
        if self.script.hover_changes
            && self.hovered.load(Ordering::SeqCst)
            && self.reads.fetch_add(1, Ordering::SeqCst) >= self.script.hover_lag
        {
            Ok("rgb(255, 0, 0)".to_string())
        } else {
            Ok("rgb(0, 0, 0)".to_string())
        }
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        self.check_selector(selector)?;
        self.hovered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.log.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
