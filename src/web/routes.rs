use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::{ApiError, AppState};
use crate::analysis::{self, AnalysisResult};
use crate::pipeline::{encoder::BOUNDARY, MjpegStream, StreamVariant};
use crate::session::StartOutcome;
use crate::settings::AnalysisSettings;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Streams
        .route("/video_feed", get(video_feed))
        .route("/video_feed_full", get(video_feed_full))
        // Camera lifecycle
        .route("/api/camera/start", post(start_camera))
        .route("/api/camera/stop", post(stop_camera))
        // Settings
        .route("/api/settings", get(get_settings).post(update_settings))
        // Analysis
        .route("/api/analyze", post(analyze))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

const NO_CACHE: &str = "no-store, no-cache, must-revalidate, pre-check=0, post-check=0, max-age=0";

fn mjpeg_response(state: AppState, variant: StreamVariant) -> Response {
    debug!(%variant, "Client connection request for video stream");
    let shutdown = state.shutdown_requested();
    let feed = MjpegStream::new(
        state.session,
        state.settings,
        state.placeholder,
        variant,
        state.stream.frame_interval(),
        state.stream.jpeg_quality,
    );

    let content_type = format!("multipart/x-mixed-replace; boundary={BOUNDARY}");
    let body = Body::from_stream(feed.into_stream().take_until(shutdown));
    let mut response = body.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("-1"));
    response
}

async fn video_feed(State(state): State<AppState>) -> Response {
    mjpeg_response(state, StreamVariant::Cropped)
}

async fn video_feed_full(State(state): State<AppState>) -> Response {
    mjpeg_response(state, StreamVariant::Full)
}

async fn start_camera(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let resolution = state.settings.load().resolution.size();
    match state.session.start(resolution).await {
        Ok(StartOutcome::Started { index, resolution }) => {
            info!(index, %resolution, "Camera started via API");
            Ok(Json(json!({ "message": "Camera process started successfully." })))
        }
        Ok(StartOutcome::AlreadyRunning) => {
            Ok(Json(json!({ "message": "Camera process started successfully." })))
        }
        Err(e) => {
            error!("Camera start failed: {}", e);
            Err(ApiError::Internal(
                "Failed to initialize or start camera device.".into(),
            ))
        }
    }
}

async fn stop_camera(State(state): State<AppState>) -> Json<Value> {
    state.session.stop().await;
    Json(json!({ "message": "Camera process stopped successfully." }))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let settings = state.settings.load();
    let mut body = serde_json::to_value(&*settings).map_err(|e| {
        error!("Failed to serialize settings: {}", e);
        ApiError::Internal("Failed retrieve settings.".into())
    })?;

    if let Some(obj) = body.as_object_mut() {
        obj.insert("isCameraRunning".into(), state.session.is_running().into());
        obj.insert("aiBackendMode".into(), state.ai_backend_mode().into());
        obj.insert("aiModelName".into(), state.ai_model_name().into());
    }
    Ok(Json(body))
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

async fn update_settings(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) if !is_empty_json(&value) => value,
        _ => return Err(ApiError::BadRequest("No JSON data received.".into())),
    };

    let settings = AnalysisSettings::from_update(&value).map_err(|e| {
        warn!("Invalid settings received: {}", e);
        ApiError::BadRequest(format!("Invalid settings data: {e}"))
    })?;

    info!(?settings, "Settings updated via API");
    state.settings.replace(settings);
    Ok((
        StatusCode::OK,
        Json(json!({ "message": "Settings updated successfully." })),
    ))
}

async fn analyze(State(state): State<AppState>) -> Result<Json<AnalysisResult>, ApiError> {
    let result =
        analysis::analyze(&state.session, &state.settings, state.vision.as_deref()).await?;
    Ok(Json(result))
}
