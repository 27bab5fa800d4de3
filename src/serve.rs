#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Exposes each renderable submission at `<base>/<url-encoded-name>/`.

use std::{
    collections::HashMap,
    net::SocketAddr,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    extract::{Path as UrlPath, State},
    http::{StatusCode, Uri, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use url::Url;

use crate::discovery::Submission;

/// Where one submission's files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRoute {
    /// Submission root directory.
    root:  PathBuf,
    /// Entry markup file.
    entry: PathBuf,
}

impl SubmissionRoute {
    /// Returns the entry markup file.
    pub fn entry(&self) -> &Path {
        &self.entry
    }

    /// Resolves a request path against the entry file's directory first and
    /// the submission root second. `..` and absolute paths never resolve.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let relative = Path::new(request_path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }

        let entry_dir = self.entry.parent().unwrap_or(&self.root);
        [entry_dir, self.root.as_path()]
            .into_iter()
            .map(|base| base.join(relative))
            .find_map(|candidate| {
                if candidate.is_file() {
                    Some(candidate)
                } else if candidate.is_dir() && candidate.join("index.html").is_file() {
                    Some(candidate.join("index.html"))
                } else {
                    None
                }
            })
    }
}

/// Read-only name → location table, built once per run.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRoutes {
    /// Routes keyed by submission name.
    routes: HashMap<String, SubmissionRoute>,
}

impl SubmissionRoutes {
    /// Builds the table from the renderable submissions.
    pub fn from_submissions(submissions: &[Submission]) -> Self {
        let routes = submissions
            .iter()
            .filter_map(|s| {
                let entry = s.entry_point()?.to_path_buf();
                s.is_renderable().then(|| {
                    (
                        s.name().to_string(),
                        SubmissionRoute {
                            root: s.root().to_path_buf(),
                            entry,
                        },
                    )
                })
            })
            .collect();
        Self { routes }
    }

    /// Looks up a submission by name.
    pub fn get(&self, name: &str) -> Option<&SubmissionRoute> {
        self.routes.get(name)
    }

    /// Number of routable submissions.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no submission is routable.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// URL of a submission's entry page under `base`, with the name
/// percent-encoded as a single path segment and a trailing slash.
pub fn submission_url(base: &Url, name: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("{base} cannot be used as a base URL"))?
        .pop_if_empty()
        .push(name)
        .push("");
    Ok(url)
}

/// Guesses a content type from a file extension.
fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Reads a file into a response.
async fn file_response(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type(path))], bytes).into_response(),
        Err(e) => {
            tracing::warn!("Could not read {}: {e}", path.display());
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// `/{name}` → `/{name}/` so relative asset links resolve.
async fn redirect_to_entry(uri: Uri) -> Response {
    Redirect::permanent(&format!("{}/", uri.path())).into_response()
}

/// `/{name}/` → the entry markup file.
async fn serve_entry(
    State(routes): State<Arc<SubmissionRoutes>>,
    UrlPath(name): UrlPath<String>,
) -> Response {
    match routes.get(&name) {
        Some(route) => file_response(route.entry()).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `/{name}/{*path}` → a co-located asset.
async fn serve_asset(
    State(routes): State<Arc<SubmissionRoutes>>,
    UrlPath((name, path)): UrlPath<(String, String)>,
) -> Response {
    let path = path.trim_start_matches('/');
    match routes.get(&name).and_then(|route| route.resolve(path)) {
        Some(file) => file_response(&file).await,
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Router serving the given table.
pub fn router(routes: Arc<SubmissionRoutes>) -> Router {
    Router::new()
        .route("/{name}", get(redirect_to_entry))
        .route("/{name}/", get(serve_entry))
        .route("/{name}/{*path}", get(serve_asset))
        .with_state(routes)
}

/// A running local server.
pub struct ServeHandle {
    /// Base URL submissions are served under.
    base_url: Url,
    /// Signals graceful shutdown.
    shutdown: Option<oneshot::Sender<()>>,
    /// The server task.
    task:     JoinHandle<()>,
}

impl ServeHandle {
    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Stops the server and waits for it.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Serves `routes` on an ephemeral loopback port.
pub async fn start(routes: SubmissionRoutes) -> Result<ServeHandle> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .context("Could not bind the submission server")?;
    let addr = listener
        .local_addr()
        .context("Could not read the submission server address")?;
    let base_url = Url::parse(&format!("http://{addr}/"))
        .with_context(|| format!("Invalid server address {addr}"))?;

    let count = routes.len();
    let app = router(Arc::new(routes));
    let (tx, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = rx.await;
        });
        if let Err(e) = server.await {
            tracing::error!("Submission server stopped: {e}");
        }
    });

    tracing::info!("Serving {count} submissions at {base_url}");
    Ok(ServeHandle {
        base_url,
        shutdown: Some(tx),
        task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_encoded_as_one_segment() {
        let base = Url::parse("http://127.0.0.1:9000/").expect("url");
        let url = submission_url(&base, "jane doe/#1").expect("submission url");
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/jane%20doe%2F%231/");
    }

    #[test]
    fn nested_base_paths_are_kept() {
        let base = Url::parse("http://host/grading").expect("url");
        let url = submission_url(&base, "alice").expect("submission url");
        assert_eq!(url.as_str(), "http://host/grading/alice/");
    }

    #[test]
    fn parent_segments_never_resolve() {
        let route = SubmissionRoute {
            root:  PathBuf::from("/tmp/none"),
            entry: PathBuf::from("/tmp/none/index.html"),
        };
        assert_eq!(route.resolve("../secret.txt"), None);
        assert_eq!(route.resolve("/etc/passwd"), None);
    }
}
