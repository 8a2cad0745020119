//! Upload receiver.
//!
//! Streams the `audioFile` part of a multipart request into the upload directory under a
//! collision-resistant name, enforcing the size limit chunk by chunk, and picks up the optional
//! `language` part. The staged file is owned by an [`Upload`]; whoever holds it is responsible
//! for it, and dropping it removes the file.

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{Error, Result};

/// Multipart field carrying the audio payload.
pub const AUDIO_FIELD: &str = "audioFile";
/// Multipart field carrying the optional language code.
pub const LANGUAGE_FIELD: &str = "language";

const MAX_EXTENSION_LEN: usize = 16;

/// The directory uploads are staged in, resolved to an absolute path at startup.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    /// Create the directory if it is missing. Safe to call on an existing directory.
    pub async fn create(path: &Path) -> io::Result<Self> {
        tokio::fs::create_dir_all(path).await?;
        let root = tokio::fs::canonicalize(path).await?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// A fresh path inside the directory for a file originally called `original_name`.
    pub fn allocate(&self, original_name: Option<&str>) -> PathBuf {
        self.root.join(unique_file_name(original_name))
    }
}

/// `<unix millis>-<random>[.<ext>]`, keeping the original extension when it looks sane.
pub fn unique_file_name(original_name: Option<&str>) -> String {
    let stem = format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple());

    let extension = original_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= MAX_EXTENSION_LEN && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match extension {
        Some(ext) => format!("{stem}.{}", ext.to_ascii_lowercase()),
        None => stem,
    }
}

/// Optional language code forwarded to the transcriber. Empty means auto-detect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LanguageHint(Option<String>);

impl LanguageHint {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn from_field(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() { Self(None) } else { Self(Some(value.to_string())) }
    }

    pub fn code(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// An audio file staged on disk for the duration of one request.
#[derive(Debug)]
pub struct Upload {
    path: PathBuf,
    original_name: Option<String>,
    size: u64,
    removed: bool,
}

impl Upload {
    fn new(path: PathBuf, original_name: Option<String>) -> Self {
        Self {
            path,
            original_name,
            size: 0,
            removed: false,
        }
    }

    /// Take ownership of a file that is already on disk.
    pub(crate) fn existing(path: PathBuf, size: u64) -> Self {
        Self {
            path,
            original_name: None,
            size,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn original_name(&self) -> Option<&str> {
        self.original_name.as_deref()
    }

    /// Delete the staged file. Consumes the upload so it can only happen once.
    pub async fn discard(mut self) -> io::Result<()> {
        self.removed = true;
        tokio::fs::remove_file(&self.path).await?;
        debug!(path = %self.path.display(), "Removed uploaded file");
        Ok(())
    }
}

impl Drop for Upload {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Only reached when a request is abandoned or rejected mid-upload; a single blocking unlink
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove abandoned upload");
        }
    }
}

/// Read one transcription request: exactly one non-empty `audioFile`, optionally `language`.
///
/// Nothing is left on disk when this returns an error.
pub async fn receive(multipart: &mut Multipart, dir: &UploadDir, max_file_size: u64) -> Result<(Upload, LanguageHint)> {
    let mut upload: Option<Upload> = None;
    let mut language = LanguageHint::none();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max_file_size))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            AUDIO_FIELD => {
                if upload.is_some() {
                    return Err(Error::BadRequest {
                        message: "Solo se permite un archivo de audio por solicitud.".to_string(),
                    });
                }

                let original_name = field.file_name().map(str::to_string);
                let mut staged = Upload::new(dir.allocate(original_name.as_deref()), original_name);

                let mut file = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(staged.path())
                    .await
                    .map_err(|e| Error::Internal {
                        operation: format!("create upload file {}: {e}", staged.path().display()),
                    })?;

                while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max_file_size))? {
                    staged.size += chunk.len() as u64;

                    // Fail fast rather than spooling the rest of an oversize body to disk
                    if staged.size > max_file_size {
                        warn!(
                            path = %staged.path().display(),
                            received = staged.size,
                            max_file_size,
                            "Upload exceeds size limit, aborting"
                        );
                        return Err(too_large(max_file_size));
                    }

                    file.write_all(&chunk).await.map_err(|e| Error::Internal {
                        operation: format!("write upload file {}: {e}", staged.path().display()),
                    })?;
                }

                file.flush().await.map_err(|e| Error::Internal {
                    operation: format!("flush upload file {}: {e}", staged.path().display()),
                })?;

                upload = Some(staged);
            }
            LANGUAGE_FIELD => {
                let value = field.text().await.map_err(|e| multipart_error(e, max_file_size))?;
                language = LanguageHint::from_field(&value);
            }
            other => {
                debug!(field = other, "Ignoring unexpected multipart field");
            }
        }
    }

    // A browser submits an empty, unnamed part when no file was chosen
    let upload = upload.filter(|u| u.size() > 0).ok_or_else(missing_file)?;

    info!(
        path = %upload.path().display(),
        original_name = ?upload.original_name(),
        size = upload.size(),
        language = ?language.code(),
        "Upload received"
    );

    Ok((upload, language))
}

pub fn missing_file() -> Error {
    Error::BadRequest {
        message: "No se recibió ningún archivo de audio.".to_string(),
    }
}

fn too_large(max_file_size: u64) -> Error {
    const MIB: u64 = 1024 * 1024;
    let limit = if max_file_size >= MIB {
        format!("{} MB", max_file_size / MIB)
    } else {
        format!("{max_file_size} bytes")
    };

    Error::PayloadTooLarge {
        message: format!("El archivo supera el tamaño máximo permitido de {limit}."),
    }
}

fn multipart_error(err: MultipartError, max_file_size: u64) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return too_large(max_file_size);
    }
    Error::BadRequest {
        message: format!("Solicitud multipart inválida: {}", err.body_text()),
    }
}
