//! # whisper-relay: HTTP front door for an external speech-recognition program
//!
//! `whisper-relay` accepts an audio file over `multipart/form-data`, stages it on disk, runs an
//! external transcriber program against it, and answers with the transcript as JSON. The
//! speech-recognition model itself (Whisper, via a Python script in the default setup) is not part
//! of this crate; it is a child process with a small contract:
//!
//! ```text
//! <program> <script> <audio-file> [--language <code>]
//! ```
//!
//! On success the program exits 0 and prints `{"transcription": "..."}` on stdout. On failure it
//! exits non-zero, ideally with `{"error": "..."}` on stderr.
//!
//! ## Request Flow
//!
//! 1. [`upload::receive`] streams the `audioFile` part into the upload directory under a unique
//!    name, enforcing the size limit as bytes arrive, and reads the optional `language` part.
//! 2. [`limits::Limiters`] optionally queues the request for a transcriber slot.
//! 3. [`transcriber::transcribe_upload`] runs the [`transcriber::Transcriber`] and deletes the
//!    staged file once it has returned, on every path.
//! 4. [`errors::Error`] maps every failure to a status code and a JSON body with a
//!    Spanish, user-facing `error` and optional raw `details`.
//!
//! ## Endpoints
//!
//! - `GET /api/status`: liveness
//! - `POST /api/transcribe`: upload and transcribe
//! - `GET /api/openapi.json`, `GET /api/docs`: API reference
//!
//! Anything else falls through to `static_dir` when one is configured.

pub mod api;
pub mod config;
pub mod errors;
pub mod limits;
mod openapi;
pub mod telemetry;
pub mod transcriber;
pub mod upload;

#[cfg(test)]
mod test_utils;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;

use crate::{
    config::CorsOrigin,
    limits::Limiters,
    openapi::ApiDoc,
    transcriber::{ProcessTranscriber, Transcriber},
    upload::UploadDir,
};

/// Room for multipart boundaries and the `language` part on top of the file itself.
const MULTIPART_OVERHEAD: u64 = 1024 * 1024;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .transcriber(Arc::new(ProcessTranscriber::new(config.transcriber.clone())))
///     .uploads(UploadDir::create(&config.uploads.dir).await?)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub transcriber: Arc<dyn Transcriber>,
    pub uploads: UploadDir,
    #[builder(default)]
    pub limiters: Limiters,
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = &config.cors.allowed_origins;

    let allow_origin = if origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::from(Any)
    } else {
        let mut values = Vec::with_capacity(origins.len());
        for origin in origins {
            if let CorsOrigin::Url(url) = origin {
                // Browsers send the bare origin, without the trailing slash `Url` adds
                values.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(values)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any))
}

/// Build the router: `/api/*` endpoints, API docs, optional static fallback, CORS and tracing.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let body_limit = usize::try_from(state.config.uploads.max_file_size.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        .route("/status", get(api::handlers::status::status))
        .route(
            "/transcribe",
            post(api::handlers::transcribe::transcribe).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone());

    let mut router = Router::new()
        .nest("/api", api_routes)
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()));

    if let Some(static_dir) = &state.config.static_dir {
        debug!(dir = %static_dir.display(), "Serving static files");
        router = router.fallback_service(ServeDir::new(static_dir));
    }

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// A configured server, ready to bind.
///
/// [`Application::new`] creates the upload directory and wires in the process-backed transcriber;
/// [`Application::serve`] binds and runs until the shutdown future resolves.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create an application that runs `config.transcriber` as a child process per request
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let transcriber = ProcessTranscriber::new(config.transcriber.clone());

        // Requests will fail with a configuration error until this is fixed; the server still starts
        match transcriber.check() {
            Ok(executable) => info!(
                executable = %executable.display(),
                script = %config.transcriber.script.display(),
                "Transcriber resolved"
            ),
            Err(e) => warn!(error = %e, "Transcriber is not usable yet"),
        }

        Self::with_transcriber(config, Arc::new(transcriber)).await
    }

    /// Create an application around any [`Transcriber`]
    pub async fn with_transcriber(config: Config, transcriber: Arc<dyn Transcriber>) -> anyhow::Result<Self> {
        debug!("Starting whisper-relay with configuration: {:#?}", config);

        let uploads = UploadDir::create(&config.uploads.dir)
            .await
            .with_context(|| format!("Failed to create upload directory {}", config.uploads.dir.display()))?;
        info!(dir = %uploads.path().display(), "Upload directory ready");

        let app_state = AppState::builder()
            .limiters(Limiters::new(&config.limits))
            .config(config.clone())
            .transcriber(transcriber)
            .uploads(uploads)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("Failed to bind {bind_addr}"))?;
        info!(
            "whisper-relay listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
