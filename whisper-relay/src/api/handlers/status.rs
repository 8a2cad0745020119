use axum::Json;

use crate::api::models::StatusResponse;

pub const STATUS_MESSAGE: &str = "El servidor de transcripción está funcionando.";

#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    summary = "Server status",
    description = "Reports that the server is up. Does not check the transcriber.",
    responses(
        (status = 200, description = "Server is running", body = StatusResponse),
    )
)]
pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        message: STATUS_MESSAGE.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeTranscriber, create_test_app};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_status_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _) = create_test_app(dir.path(), FakeTranscriber::succeeding("unused")).await;

        let response = server.get("/api/status").await;

        response.assert_status(StatusCode::OK);
        let body: StatusResponse = response.json();
        assert_eq!(body.message, STATUS_MESSAGE);
    }
}
