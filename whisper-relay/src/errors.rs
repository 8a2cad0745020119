use crate::api::models::ErrorResponse;
use crate::transcriber::TranscriptionError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

/// Placeholder detail when the transcriber failed without writing anything to stderr.
pub const NO_ERROR_OUTPUT: &str = "No se capturó salida de error del proceso de transcripción.";

const FAILURE_PREFIX: &str = "Falló la transcripción";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data (missing file, malformed multipart)
    #[error("{message}")]
    BadRequest { message: String },

    /// Upload exceeded the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Admission control rejected the request
    #[error("{message}")]
    TooManyRequests { message: String },

    /// The external transcriber did not produce a transcript
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            // Oversize uploads are a plain client error for the browser form
            Error::BadRequest { .. } | Error::PayloadTooLarge { .. } => StatusCode::BAD_REQUEST,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Transcription(_) | Error::Internal { .. } | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the message shown to the user, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } | Error::PayloadTooLarge { message } | Error::TooManyRequests { message } => {
                message.clone()
            }
            Error::Transcription(err) => match err {
                TranscriptionError::NotConfigured { .. } => {
                    "El entorno de transcripción no está configurado correctamente en el servidor.".to_string()
                }
                TranscriptionError::Spawn { .. } => "No se pudo iniciar el proceso de transcripción.".to_string(),
                TranscriptionError::Collect(_) => "Error al leer la salida del proceso de transcripción.".to_string(),
                TranscriptionError::Failed {
                    message: Some(message), ..
                } => format!("{FAILURE_PREFIX}: {message}"),
                TranscriptionError::Failed {
                    message: None,
                    exit_code: Some(code),
                    ..
                } => format!("{FAILURE_PREFIX}: el proceso terminó con código {code}"),
                TranscriptionError::Failed {
                    message: None, exit_code: None, ..
                } => format!("{FAILURE_PREFIX}: el proceso terminó sin código de salida"),
                TranscriptionError::InvalidOutput { .. } => {
                    "La transcripción finalizó pero no produjo un resultado utilizable.".to_string()
                }
            },
            Error::Internal { .. } | Error::Other(_) => "Error interno del servidor.".to_string(),
        }
    }

    /// Raw diagnostic detail attached to the response body, if any
    pub fn details(&self) -> Option<String> {
        let Error::Transcription(err) = self else {
            return None;
        };

        match err {
            TranscriptionError::NotConfigured { reason } => Some(reason.clone()),
            TranscriptionError::Spawn { source, .. } => Some(source.to_string()),
            TranscriptionError::Collect(source) => Some(source.to_string()),
            TranscriptionError::Failed { message: Some(_), .. } => None,
            TranscriptionError::Failed { stderr, .. } => {
                if stderr.trim().is_empty() {
                    Some(NO_ERROR_OUTPUT.to_string())
                } else {
                    Some(stderr.clone())
                }
            }
            TranscriptionError::InvalidOutput { stdout } => Some(stdout.clone()),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Transcription(_) => {
                tracing::error!("Transcription error: {}", self);
            }
            Error::TooManyRequests { .. } => {
                tracing::warn!("Request rejected: {}", self);
            }
            Error::BadRequest { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = ErrorResponse {
            error: self.user_message(),
            details: self.details(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: Error) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_bad_request_has_no_details() {
        let (status, body) = body_json(Error::BadRequest {
            message: "No se recibió ningún archivo de audio.".to_string(),
        })
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No se recibió ningún archivo de audio.");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_payload_too_large_is_400() {
        let (status, _) = body_json(Error::PayloadTooLarge {
            message: "too big".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upstream_message_is_prefixed() {
        let err = Error::Transcription(TranscriptionError::Failed {
            message: Some("bad audio".to_string()),
            exit_code: Some(1),
            stderr: r#"{"error":"bad audio"}"#.to_string(),
        });
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Falló la transcripción: bad audio");
        assert!(body.get("details").is_none());
    }

    #[tokio::test]
    async fn test_raw_stderr_becomes_details() {
        let err = Error::Transcription(TranscriptionError::Failed {
            message: None,
            exit_code: Some(2),
            stderr: "Traceback (most recent call last):".to_string(),
        });
        let (_, body) = body_json(err).await;

        assert_eq!(body["error"], "Falló la transcripción: el proceso terminó con código 2");
        assert_eq!(body["details"], "Traceback (most recent call last):");
    }

    #[tokio::test]
    async fn test_empty_stderr_uses_placeholder() {
        let err = Error::Transcription(TranscriptionError::Failed {
            message: None,
            exit_code: None,
            stderr: String::new(),
        });
        let (_, body) = body_json(err).await;

        assert_eq!(body["details"], NO_ERROR_OUTPUT);
        assert!(body["error"].as_str().unwrap().contains("sin código de salida"));
    }

    #[tokio::test]
    async fn test_invalid_output_carries_stdout() {
        let err = Error::Transcription(TranscriptionError::InvalidOutput {
            stdout: "loading model...".to_string(),
        });
        let (status, body) = body_json(err).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["details"], "loading model...");
    }

    #[tokio::test]
    async fn test_internal_error_hides_operation() {
        let (status, body) = body_json(Error::Internal {
            operation: "join transcription task".to_string(),
        })
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Error interno del servidor.");
    }

    #[tokio::test]
    async fn test_too_many_requests() {
        let (status, _) = body_json(Error::TooManyRequests {
            message: "busy".to_string(),
        })
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
