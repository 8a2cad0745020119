//! Helpers shared by handler and relay tests.

use crate::config::{Config, UploadsConfig};
use crate::transcriber::{Transcriber, Transcript, TranscriptionError};
use crate::upload::{LanguageHint, Upload, UploadDir};
use crate::{AppState, build_router, limits::Limiters};
use async_trait::async_trait;
use axum_test::TestServer;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One recorded `transcribe` invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub path: PathBuf,
    pub language: LanguageHint,
    /// Whether the audio file was on disk when the transcriber was called
    pub existed: bool,
}

type Outcome = Box<dyn Fn() -> Result<Transcript, TranscriptionError> + Send + Sync>;

/// Transcriber that answers from a canned outcome and records what it was asked.
pub struct FakeTranscriber {
    outcome: Outcome,
    calls: Mutex<Vec<Call>>,
}

impl FakeTranscriber {
    pub fn succeeding(text: &str) -> Self {
        let text = text.to_string();
        Self {
            outcome: Box::new(move || Ok(Transcript::new(text.clone()))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: impl Fn() -> TranscriptionError + Send + Sync + 'static) -> Self {
        Self {
            outcome: Box::new(move || Err(error())),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio: &Path, language: &LanguageHint) -> Result<Transcript, TranscriptionError> {
        self.calls.lock().unwrap().push(Call {
            path: audio.to_path_buf(),
            language: language.clone(),
            existed: audio.is_file(),
        });
        (self.outcome)()
    }
}

/// Write `bytes` into `dir` and hand back the owning [`Upload`].
pub async fn stage_upload(dir: &Path, bytes: &[u8]) -> Upload {
    let uploads = UploadDir::create(dir).await.unwrap();
    let path = uploads.allocate(Some("clip.wav"));
    tokio::fs::write(&path, bytes).await.unwrap();
    Upload::existing(path, bytes.len() as u64)
}

pub fn create_test_config(upload_dir: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        uploads: UploadsConfig {
            dir: upload_dir.to_path_buf(),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn create_test_state(config: Config, transcriber: Arc<dyn Transcriber>) -> AppState {
    let uploads = UploadDir::create(&config.uploads.dir).await.expect("Failed to create upload dir");
    AppState::builder()
        .limiters(Limiters::new(&config.limits))
        .config(config)
        .transcriber(transcriber)
        .uploads(uploads)
        .build()
}

pub fn create_test_server(state: &AppState) -> TestServer {
    let router = build_router(state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}

pub async fn create_test_app_with(config: Config, transcriber: Arc<dyn Transcriber>) -> TestServer {
    create_test_server(&create_test_state(config, transcriber).await)
}

/// Server over `upload_dir` backed by `fake`. The returned handle reads back the recorded calls.
pub async fn create_test_app(upload_dir: &Path, fake: FakeTranscriber) -> (TestServer, Arc<FakeTranscriber>) {
    let fake = Arc::new(fake);
    let server = create_test_app_with(create_test_config(upload_dir), fake.clone()).await;
    (server, fake)
}
