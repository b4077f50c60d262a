mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use trafficcam::analysis::{AiBackend, UpstreamError, VisionClient};
use trafficcam::session::CameraSession;
use trafficcam::settings::SettingsStore;
use trafficcam::web::{create_router, AppState};
use trafficcam::Config;

use common::*;

enum Reply {
    Text(&'static str),
    Quota,
    Fail,
}

/// Scripted vision model that records the image it was sent.
struct FakeVision {
    reply: Reply,
    seen: Mutex<Option<Vec<u8>>>,
}

impl FakeVision {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            seen: Mutex::new(None),
        })
    }
}

#[async_trait]
impl VisionClient for FakeVision {
    fn backend(&self) -> AiBackend {
        AiBackend::Studio
    }

    fn model_name(&self) -> &str {
        "fake-vision"
    }

    async fn generate(&self, _prompt: &str, jpeg: &[u8]) -> Result<String, UpstreamError> {
        *self.seen.lock().unwrap() = Some(jpeg.to_vec());
        match self.reply {
            Reply::Text(text) => Ok(text.to_string()),
            Reply::Quota => Err(UpstreamError::QuotaExhausted("429 quota".into())),
            Reply::Fail => Err(UpstreamError::Status {
                status: 500,
                message: "backend exploded".into(),
            }),
        }
    }
}

fn app(session: Arc<CameraSession>, vision: Option<Arc<dyn VisionClient>>) -> Router {
    create_router(AppState::new(
        session,
        Arc::new(SettingsStore::default()),
        vision,
        placeholder(),
        Config::default().stream,
    ))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn settings_update() -> Value {
    json!({
        "mode": "Image",
        "apiCallsPerMinute": 10,
        "resolution": "default",
        "cropArea": {"x": 0.5, "y": 0.5, "w": 0.5, "h": 0.5},
        "greenLightDurationSec": 3,
        "yellowLightDurationSec": 1,
        "maxTimeSmartA_Sec": 10
    })
}

#[tokio::test]
async fn camera_start_and_stop() {
    let provider = provider();
    let app = app(session_with(provider.clone()), None);

    let (status, body) = send(&app, "POST", "/api/camera/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Camera process started successfully.");

    let (status, _) = send(&app, "POST", "/api/camera/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(provider.opens(), 1);

    for _ in 0..2 {
        let (status, body) = send(&app, "POST", "/api/camera/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Camera process stopped successfully.");
    }
    assert_eq!(provider.open_devices(), 0);
}

#[tokio::test]
async fn camera_start_without_device_is_500() {
    let app = app(session_with(provider().with_indices(vec![])), None);
    let (status, body) = send(&app, "POST", "/api/camera/start", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to initialize or start camera device.");
}

#[tokio::test]
async fn settings_round_trip() {
    let app = app(session_with(provider()), None);

    let (status, body) = send(&app, "GET", "/api/settings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["apiCallsPerMinute"], 6);
    assert_eq!(body["isCameraRunning"], false);
    assert_eq!(body["aiBackendMode"], "NONE");
    assert_eq!(body["aiModelName"], "N/A");

    let (status, body) = send(&app, "POST", "/api/settings", Some(settings_update())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Settings updated successfully.");

    let (_, body) = send(&app, "GET", "/api/settings", None).await;
    assert_eq!(body["apiCallsPerMinute"], 10);
    assert_eq!(body["greenLightDurationMs"], 3000);
    assert_eq!(body["maxTimeSmartA_Ms"], 10_000);
    assert_eq!(body["cropArea"]["x"], 0.5);
}

#[tokio::test]
async fn settings_rejections_are_400() {
    let app = app(session_with(provider()), None);

    let (status, body) = send(&app, "POST", "/api/settings", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No JSON data received.");

    let mut bad = settings_update();
    bad["apiCallsPerMinute"] = json!(61);
    let (status, body) = send(&app, "POST", "/api/settings", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Invalid settings data: 'API Calls per Minute' must be between 1 and 60."
    );

    // Nothing was stored
    let (_, body) = send(&app, "GET", "/api/settings", None).await;
    assert_eq!(body["apiCallsPerMinute"], 6);
}

#[tokio::test]
async fn video_feed_headers_and_first_part() {
    let session = session_with(provider());
    let app = app(Arc::clone(&session), None);

    let response = app
        .oneshot(Request::get("/video_feed_full").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert_eq!(
        headers[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );
    assert_eq!(
        headers[header::CACHE_CONTROL],
        "no-store, no-cache, must-revalidate, pre-check=0, post-check=0, max-age=0"
    );
    assert_eq!(headers[header::PRAGMA], "no-cache");
    assert_eq!(headers[header::EXPIRES], "-1");

    let mut body = response.into_body();
    let first: Bytes = body
        .frame()
        .await
        .expect("stream ended")
        .unwrap()
        .into_data()
        .unwrap();
    assert_eq!(first, placeholder().part());
}

#[tokio::test]
async fn analyze_check_order() {
    let session = session_with(provider());

    let (status, body) = send(&app(Arc::clone(&session), None), "POST", "/api/analyze", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "AI backend not available.");

    let vision: Arc<dyn VisionClient> = FakeVision::new(Reply::Text("{}"));
    let (status, body) = send(&app(session, Some(vision)), "POST", "/api/analyze", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Analysis stopped: Camera not running.");
}

#[tokio::test]
async fn analyze_success_uses_the_cropped_frame() {
    let session = session_with(provider());
    let fake = FakeVision::new(Reply::Text(
        "```json\n{\"Vehicles_Present\": \"true\", \"Cars\": 2, \"Bikes\": 0, \"Trucks\": 1, \"Buses\": 0, \"Unknown\": 0}\n```",
    ));
    let app = app(Arc::clone(&session), Some(fake.clone()));

    send(&app, "POST", "/api/settings", Some(settings_update())).await;
    send(&app, "POST", "/api/camera/start", None).await;
    wait_for_frame(&session).await;

    let (status, body) = send(&app, "POST", "/api/analyze", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Vehicles_Present"], "True");
    assert_eq!(body["Cars"], 2);
    assert_eq!(body["Trucks"], 1);
    assert!(body["raw_response"].as_str().unwrap().starts_with("```json"));

    let sent = fake.seen.lock().unwrap().clone().expect("no image sent");
    let image = image::load_from_memory(&sent).unwrap();
    assert_eq!((image.width(), image.height()), (WIDTH / 2, HEIGHT / 2));

    session.stop().await;
}

#[tokio::test]
async fn analyze_upstream_failures() {
    let session = session_with(provider());
    session.start(None).await.unwrap();
    wait_for_frame(&session).await;

    let cases = [
        (Reply::Text("no vehicles here"), StatusCode::BAD_GATEWAY, "error"),
        (Reply::Quota, StatusCode::TOO_MANY_REQUESTS, "quota_error"),
        (Reply::Fail, StatusCode::SERVICE_UNAVAILABLE, "error"),
    ];
    for (reply, expected, key) in cases {
        let vision: Arc<dyn VisionClient> = FakeVision::new(reply);
        let (status, body) =
            send(&app(Arc::clone(&session), Some(vision)), "POST", "/api/analyze", None).await;
        assert_eq!(status, expected);
        assert!(body[key].is_string(), "missing {key} in {body}");
        assert!(body["raw_response"].is_string());
    }

    session.stop().await;
}
