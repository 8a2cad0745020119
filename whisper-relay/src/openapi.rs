//! OpenAPI document for the `/api/*` endpoints, served at `/api/openapi.json` and rendered by
//! Scalar at `/api/docs`.

use utoipa::OpenApi;

use crate::api::{self, models};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "whisper-relay",
        description = "Uploads audio files and transcribes them with an external speech-recognition program."
    ),
    servers(
        (url = "/api", description = "Transcription API")
    ),
    paths(
        api::handlers::status::status,
        api::handlers::transcribe::transcribe,
    ),
    components(schemas(
        models::StatusResponse,
        models::TranscriptionResponse,
        models::ErrorResponse,
    )),
    tags(
        (name = "status", description = "Server liveness"),
        (name = "transcription", description = "Audio upload and transcription"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_both_endpoints() {
        let doc = ApiDoc::openapi();

        assert!(doc.paths.paths.contains_key("/status"));
        assert!(doc.paths.paths.contains_key("/transcribe"));

        let schemas = doc.components.expect("components").schemas;
        assert!(schemas.contains_key("ErrorResponse"));
        assert!(schemas.contains_key("TranscriptionResponse"));
    }
}
