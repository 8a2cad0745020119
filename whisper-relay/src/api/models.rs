//! Response bodies. Every endpoint answers with JSON, failures included.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Liveness answer for `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub message: String,
}

/// A completed transcription.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TranscriptionResponse {
    /// Text produced by the speech-recognition program
    pub transcription: String,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable message, suitable for showing to the user as is
    pub error: String,
    /// Raw diagnostic output from the transcriber, when there is some
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
