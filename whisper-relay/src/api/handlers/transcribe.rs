use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
};
use tracing::{debug, instrument};

use crate::{
    AppState,
    api::models::{ErrorResponse, TranscriptionResponse},
    errors::{Error, Result},
    transcriber::transcribe_upload,
    upload,
};

#[utoipa::path(
    post,
    path = "/transcribe",
    tag = "transcription",
    summary = "Transcribe audio",
    description = "Upload one audio file in the `audioFile` field and get its transcript back.

An optional `language` field carries a language code (for example `es`). When it is absent or empty the
transcriber detects the language itself.

The uploaded file is deleted once the transcriber has finished, whatever the outcome.",
    request_body(
        content_type = "multipart/form-data",
        description = "`audioFile` (binary, required) and `language` (text, optional)"
    ),
    responses(
        (status = 200, description = "Transcription completed", body = TranscriptionResponse),
        (status = 400, description = "No audio file, file too large, or malformed form data", body = ErrorResponse),
        (status = 429, description = "Too many transcriptions in progress (only when a concurrency limit is configured)", body = ErrorResponse),
        (status = 500, description = "The transcriber is not available or failed. `details` carries its raw output when there is some.", body = ErrorResponse),
    )
)]
#[instrument(skip_all)]
pub async fn transcribe(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<TranscriptionResponse>> {
    let mut multipart = multipart.map_err(|rejection| {
        debug!(%rejection, "Request is not multipart");
        upload::missing_file()
    })?;

    let permit = state.limiters.admit_transcription().await?;

    let (upload, language) = upload::receive(&mut multipart, &state.uploads, state.config.uploads.max_file_size).await?;

    // Detached from the request future: a client hanging up must not skip cleanup
    let transcriber = state.transcriber.clone();
    let transcript = tokio::spawn(async move {
        let _permit = permit;
        transcribe_upload(transcriber.as_ref(), upload, &language).await
    })
    .await
    .map_err(|e| Error::Internal {
        operation: format!("join transcription task: {e}"),
    })??;

    Ok(Json(TranscriptionResponse {
        transcription: transcript.into_text(),
    }))
}
