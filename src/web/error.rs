//! JSON error responses of the HTTP API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::analysis::AnalyzeError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Analyze(#[from] AnalyzeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
            ApiError::Analyze(err) => {
                let status = match err {
                    AnalyzeError::BackendUnavailable
                    | AnalyzeError::FrameUnavailable
                    | AnalyzeError::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    AnalyzeError::CameraNotRunning => StatusCode::CONFLICT,
                    AnalyzeError::Prepare(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    AnalyzeError::Malformed { .. } => StatusCode::BAD_GATEWAY,
                    AnalyzeError::Quota { .. } => StatusCode::TOO_MANY_REQUESTS,
                };
                let key = match err {
                    AnalyzeError::Quota { .. } => "quota_error",
                    _ => "error",
                };
                let mut body = json!({ key: err.to_string() });
                if let Some(raw) = err.raw_response() {
                    body["raw_response"] = raw.into();
                }
                (status, body)
            }
        };

        tracing::debug!(status = %status, "Request error: {}", self);
        (status, Json(body)).into_response()
    }
}
