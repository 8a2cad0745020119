//! Transcription invoker.
//!
//! The speech-recognition model is an external program. [`Transcriber`] is the seam between the
//! HTTP layer and that program: [`ProcessTranscriber`] runs it as a child process, tests swap in a
//! fake. [`transcribe_upload`] wraps any transcriber with the cleanup guarantee: the staged upload
//! is deleted exactly once after the transcriber returns, whatever it returned.

mod process;

pub use process::{ProcessOutcome, ProcessTranscriber, build_args, interpret_outcome, resolve_executable};

use async_trait::async_trait;
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::upload::{LanguageHint, Upload};

/// Text produced by a successful transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript(String);

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn into_text(self) -> String {
        self.0
    }
}

/// Every way an invocation can fail to produce a transcript.
#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    /// Executable or entry script could not be resolved; nothing was spawned
    #[error("transcriber is not configured: {reason}")]
    NotConfigured { reason: String },

    /// The OS refused to start the process
    #[error("failed to start transcriber `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the child's output or waiting for it failed
    #[error("failed to collect transcriber output: {0}")]
    Collect(#[source] std::io::Error),

    /// The process exited unsuccessfully. `message` is the `error` field of its JSON stderr, when
    /// there was one.
    #[error("transcriber exited unsuccessfully (exit code {exit_code:?})")]
    Failed {
        message: Option<String>,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The process exited with 0 but stdout held no transcript
    #[error("transcriber succeeded but produced no usable transcript")]
    InvalidOutput { stdout: String },
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `audio`. The file is only read, never removed.
    async fn transcribe(&self, audio: &Path, language: &LanguageHint) -> Result<Transcript, TranscriptionError>;
}

/// Run `transcriber` over `upload`, then delete the upload.
///
/// Deletion happens once, after the transcriber has returned on every path. A failed deletion is
/// logged and does not change the returned result.
#[instrument(skip_all, fields(upload = %upload.path().display(), size = upload.size(), language = ?language.code()))]
pub async fn transcribe_upload(
    transcriber: &dyn Transcriber,
    upload: Upload,
    language: &LanguageHint,
) -> Result<Transcript, TranscriptionError> {
    let result = transcriber.transcribe(upload.path(), language).await;

    match &result {
        Ok(transcript) => info!(chars = transcript.text().chars().count(), "Transcription completed"),
        Err(e) => warn!(error = %e, "Transcription failed"),
    }

    let path = upload.path().to_path_buf();
    if let Err(e) = upload.discard().await {
        warn!(path = %path.display(), error = %e, "Failed to remove uploaded file");
    }

    result
}
