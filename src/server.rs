//! HTTP surface: routes, handlers and server startup

use crate::config::{MetricsFormat, QrserveConfig};
use crate::error::{Error, Result};
use crate::metrics::{self, GenerateMode, RevealOutcome};
use crate::paths;
use crate::qr::QrEncoder;
use crate::reveal::{Revealer, SystemRevealer};
use crate::storage::{self, DirectoryStore, QrStore};
use axum::extract::{FromRequest, Multipart, Path as UrlPath, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use bytes::Bytes;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn QrStore>,
    revealer: Arc<dyn Revealer>,
    encoder: QrEncoder,
    metrics_format: Option<MetricsFormat>,
}

impl AppState {
    /// State using `store` for saved images and `revealer` for open-folder requests
    pub fn new(store: Arc<dyn QrStore>, revealer: Arc<dyn Revealer>) -> Self {
        Self {
            store,
            revealer,
            encoder: QrEncoder::new(),
            metrics_format: None,
        }
    }

    /// Expose `/metrics` in the given format
    pub fn with_metrics(mut self, format: MetricsFormat) -> Self {
        self.metrics_format = Some(format);
        self
    }
}

/// Fields of `POST /generate`
///
/// Read from a urlencoded or multipart form. The first occurrence of a
/// repeated field wins; bodies of any other content type carry no fields.
#[derive(Debug, Default)]
pub struct GenerateForm {
    /// Text to encode; surrounding whitespace is ignored
    pub qr_text: Option<String>,
    /// `"true"` (any case) saves the image instead of returning it
    pub save: Option<String>,
}

impl GenerateForm {
    fn set(&mut self, name: &str, value: String) {
        let slot = match name {
            "qr_text" => &mut self.qr_text,
            "save" => &mut self.save,
            _ => return,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    fn text(&self) -> Option<&str> {
        self.qr_text
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    fn mode(&self) -> GenerateMode {
        match self.save.as_deref() {
            Some(flag) if flag.eq_ignore_ascii_case("true") => GenerateMode::Saved,
            _ => GenerateMode::Direct,
        }
    }
}

enum FormEncoding {
    UrlEncoded,
    Multipart,
    None,
}

fn form_encoding(headers: &HeaderMap) -> FormEncoding {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return FormEncoding::None;
    };

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/x-www-form-urlencoded" => FormEncoding::UrlEncoded,
        "multipart/form-data" => FormEncoding::Multipart,
        _ => FormEncoding::None,
    }
}

impl<S> FromRequest<S> for GenerateForm
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let mut form = Self::default();

        match form_encoding(req.headers()) {
            FormEncoding::UrlEncoded => {
                let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                    .await
                    .map_err(|rejection| Error::BadRequest(rejection.body_text()))?;
                for (name, value) in pairs {
                    form.set(&name, value);
                }
            }
            FormEncoding::Multipart => {
                let mut multipart = Multipart::from_request(req, state)
                    .await
                    .map_err(|rejection| Error::BadRequest(rejection.body_text()))?;
                while let Some(field) = multipart
                    .next_field()
                    .await
                    .map_err(|e| Error::BadRequest(e.body_text()))?
                {
                    // Uploaded files are not form fields.
                    if field.file_name().is_some() {
                        continue;
                    }
                    let Some(name) = field.name().map(str::to_owned) else {
                        continue;
                    };
                    let value = field
                        .text()
                        .await
                        .map_err(|e| Error::BadRequest(e.body_text()))?;
                    form.set(&name, value);
                }
            }
            FormEncoding::None => {}
        }

        Ok(form)
    }
}

/// Descriptor returned for a saved image
#[derive(Debug, Serialize, Deserialize)]
pub struct SavedQr {
    /// Always `true`
    pub saved: bool,
    /// Absolute filesystem path of the written file
    pub path: String,
    /// Route serving the file back
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct OpenFolderRequest {
    #[serde(default)]
    path: Option<String>,
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/generate", post(generate))
        .route("/qrcodes/{filename}", get(serve_saved))
        .route("/open_folder", post(open_folder));

    if state.metrics_format.is_some() {
        app = app.route("/metrics", get(metrics_report));
    }

    app.with_state(state).layer(TraceLayer::new_for_http())
}

/// Open the save directory, bind the listener and serve until shutdown
pub async fn start(config: QrserveConfig) -> Result<()> {
    let store = DirectoryStore::open(config.storage.resolved_save_dir()?)?;
    info!(save_dir = %store.root().display(), "Using save directory");

    let mut state = AppState::new(Arc::new(store), Arc::new(SystemRevealer));

    if config.logging.metrics {
        metrics::enable(config.logging.metrics_interval_secs);
        state = state.with_metrics(config.logging.metrics_format);
    }

    let listener = TcpListener::bind(config.server.socket_address()).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn generate(State(state): State<AppState>, form: GenerateForm) -> Result<Response> {
    let Some(text) = form.text() else {
        return Err(Error::BadRequest("No text provided".to_string()));
    };

    let mode = form.mode();
    let started = Instant::now();
    let result = render(&state, text, mode).await;

    match &result {
        Ok((bytes, _)) => metrics::record_generate(started.elapsed(), mode, true, *bytes),
        Err(_) => metrics::record_generate(started.elapsed(), mode, false, 0),
    }

    result.map(|(_, response)| response)
}

async fn render(state: &AppState, text: &str, mode: GenerateMode) -> Result<(usize, Response)> {
    let encoder = state.encoder;
    let owned = text.to_owned();
    let png = tokio::task::spawn_blocking(move || encoder.encode_png(&owned))
        .await
        .map_err(|e| Error::Other(format!("QR encoding task failed: {e}")))??;
    let size = png.len();

    let response = match mode {
        GenerateMode::Direct => ([(header::CONTENT_TYPE, "image/png")], png).into_response(),
        GenerateMode::Saved => {
            let name = storage::saved_file_name(&Local::now());
            let path = state.store.put(&name, &png).await?;
            Json(SavedQr {
                saved: true,
                path: path.display().to_string(),
                url: format!("/qrcodes/{name}"),
            })
            .into_response()
        }
    };

    Ok((size, response))
}

async fn serve_saved(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response> {
    let bytes = state.store.get(&filename).await?;

    let content_type = if filename.to_ascii_lowercase().ends_with(".png") {
        "image/png"
    } else {
        "application/octet-stream"
    };
    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn open_folder(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let result = reveal_saved_folder(&state, &body).await;

    metrics::record_reveal(match &result {
        Ok(()) => RevealOutcome::Opened,
        Err(Error::Reveal(_)) => RevealOutcome::Failed,
        Err(_) => RevealOutcome::Rejected,
    });

    result.map(|()| Json(json!({ "opened": true })))
}

async fn reveal_saved_folder(state: &AppState, body: &[u8]) -> Result<()> {
    let request: OpenFolderRequest = serde_json::from_slice(body)
        .map_err(|_| Error::BadRequest("invalid JSON body".to_string()))?;

    let Some(path) = request.path.filter(|path| !path.is_empty()) else {
        return Err(Error::BadRequest("missing path".to_string()));
    };

    let root = state.store.root();
    let Some(file) = paths::contained_file(root, Path::new(&path)) else {
        return Err(Error::Forbidden("path not allowed".to_string()));
    };

    let folder = file.parent().unwrap_or(root);
    state.revealer.reveal(folder).await
}

async fn metrics_report(State(state): State<AppState>) -> Result<Response> {
    let format = state.metrics_format.unwrap_or(MetricsFormat::Json);

    Ok(match metrics::export(format)? {
        Some((content_type, body)) => (
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, "no-store"),
            ],
            body,
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Shutting down the server"),
        () = terminate => info!("Shutting down the server due to termination signal"),
    }
}
