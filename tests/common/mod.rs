#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use trafficcam::capture::{Frame, Resolution, SyntheticProvider};
use trafficcam::pipeline::Placeholder;
use trafficcam::session::CameraSession;
use trafficcam::{CameraBackend, CameraConfig, Config};

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
pub const COLOR: [u8; 3] = [200, 30, 30];

pub fn camera_config() -> CameraConfig {
    let mut config = Config::default().camera;
    config.backend = CameraBackend::Synthetic;
    config.capture_interval_ms = 5;
    config.settle_ms = 0;
    config.stop_timeout_ms = 1000;
    config.cleanup_lock_timeout_ms = 200;
    config
}

pub fn provider() -> SyntheticProvider {
    SyntheticProvider::new(Resolution::new(WIDTH, HEIGHT), COLOR).with_indices(vec![0, 1])
}

pub fn session_with(provider: SyntheticProvider) -> Arc<CameraSession> {
    Arc::new(CameraSession::new(Arc::new(provider), camera_config()))
}

pub fn placeholder() -> Placeholder {
    Placeholder::render(WIDTH, HEIGHT)
}

/// Poll until the capture thread published a frame.
pub async fn wait_for_frame(session: &CameraSession) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(frame) = session.current_frame() {
                return frame;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no frame captured within 5s")
}

/// Split one multipart part into its content type and body.
pub fn split_part(part: &[u8]) -> (String, Bytes) {
    let text_end = part
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("part has no header terminator");
    let header = std::str::from_utf8(&part[..text_end]).expect("header is not UTF-8");
    assert!(header.starts_with("--frame\r\n"), "bad boundary: {header}");

    let content_type = header
        .lines()
        .find_map(|line| line.strip_prefix("Content-Type: "))
        .expect("missing Content-Type")
        .to_string();
    let length: usize = header
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length: "))
        .expect("missing Content-Length")
        .parse()
        .expect("bad Content-Length");

    let body = &part[text_end + 4..];
    assert_eq!(body.len(), length + 2, "body does not match Content-Length");
    assert!(body.ends_with(b"\r\n"));
    (content_type, Bytes::copy_from_slice(&body[..length]))
}
