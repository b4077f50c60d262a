//! On-demand vehicle counting on the latest camera frame.

pub mod client;
pub mod parse;

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

pub use client::{build_client, AiBackend, StudioClient, UpstreamError, VertexClient, VisionClient};
pub use parse::{parse_vehicle_counts, ParseError, VehicleCounts};

use crate::error::EncodeError;
use crate::pipeline::{crop_frame, encode_jpeg};
use crate::session::CameraSession;
use crate::settings::SettingsStore;

/// JPEG quality of the image sent to the model.
pub const ANALYSIS_JPEG_QUALITY: u8 = 75;

pub const PROMPT: &str = r#"Analyze the provided image, which shows a view of a road intersection, potentially containing vehicles like cars, bikes (bicycles or motorcycles), trucks, and buses. Your goal is to identify the presence and count of each vehicle type within the specified crop area ONLY.

Respond ONLY with a JSON object adhering strictly to the following format:
{
  "Vehicles_Present": "True" or "False" (string, based on whether ANY vehicles are visible within the crop),
  "Cars": count (integer, number of cars visible),
  "Bikes": count (integer, number of bikes/motorcycles visible),
  "Trucks": count (integer, number of trucks visible),
  "Buses": count (integer, number of buses visible),
  "Unknown": count (integer, number of objects that might be vehicles but cannot be confidently classified into the above categories)
}

IMPORTANT RULES:
- Output ONLY the JSON object. No introductory text, explanations, markdown formatting (like ```json), or concluding remarks.
- If no vehicles of any type are visible within the relevant area, "Vehicles_Present" MUST be "False" and all counts MUST be 0.
- Only count vehicles clearly visible within the image bounds or specified crop area. Do not infer vehicles outside the frame.
- If the image quality is too poor or the view is obstructed, making analysis impossible, respond with "Vehicles_Present": "False" and all counts as 0."#;

/// Successful analysis: the counts plus the model's verbatim answer.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub counts: VehicleCounts,
    pub raw_response: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("AI backend not available.")]
    BackendUnavailable,

    #[error("Analysis stopped: Camera not running.")]
    CameraNotRunning,

    #[error("Frame not available yet. Try again shortly.")]
    FrameUnavailable,

    #[error("Error processing frame before analysis.")]
    Prepare(#[source] EncodeError),

    #[error("{error}")]
    Malformed {
        error: ParseError,
        raw_response: String,
    },

    #[error("Error: You exceeded your current API Quota, please check your plan and billing details.")]
    Quota { raw_response: String },

    #[error("AI analysis failed using {backend} backend.")]
    Upstream {
        backend: AiBackend,
        raw_response: String,
    },
}

impl AnalyzeError {
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            AnalyzeError::Malformed { raw_response, .. }
            | AnalyzeError::Quota { raw_response }
            | AnalyzeError::Upstream { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

/// Crop the current frame to the configured area and encode it for upload.
async fn prepare_image(
    session: &CameraSession,
    settings: &SettingsStore,
) -> Result<Bytes, AnalyzeError> {
    if !session.is_running() {
        warn!("Analysis request ignored: camera is not running");
        return Err(AnalyzeError::CameraNotRunning);
    }
    let Some(frame) = session.current_frame() else {
        warn!("Analysis request failed: no frame from the capture thread yet");
        return Err(AnalyzeError::FrameUnavailable);
    };

    let rect = settings.load().crop_area;
    tokio::task::spawn_blocking(move || {
        let cropped = crop_frame(frame, &rect);
        info!(size = %cropped.resolution(), "Analysis image prepared");
        encode_jpeg(&cropped, ANALYSIS_JPEG_QUALITY)
    })
    .await
    .map_err(|e| AnalyzeError::Prepare(EncodeError::Task(e.to_string())))?
    .map_err(|e| {
        error!("Frame processing failed before analysis: {}", e);
        AnalyzeError::Prepare(e)
    })
}

/// Run one analysis round trip. Check order: backend, camera, frame.
#[instrument(skip_all)]
pub async fn analyze(
    session: &CameraSession,
    settings: &SettingsStore,
    client: Option<&dyn VisionClient>,
) -> Result<AnalysisResult, AnalyzeError> {
    let Some(client) = client else {
        warn!("Analysis request ignored: AI backend is not configured");
        return Err(AnalyzeError::BackendUnavailable);
    };

    let jpeg = prepare_image(session, settings).await?;
    let backend = client.backend();

    info!(%backend, bytes = jpeg.len(), "Sending analysis request");
    let started = Instant::now();
    let outcome = client.generate(PROMPT, &jpeg).await;
    let elapsed = started.elapsed();
    metrics::histogram!("analysis_duration_ms").record(elapsed.as_secs_f64() * 1000.0);

    let text = match outcome {
        Ok(text) => text,
        Err(UpstreamError::QuotaExhausted(detail)) => {
            error!(%backend, "API quota exceeded: {}", detail);
            metrics::counter!("analysis_requests_total", "outcome" => "quota").increment(1);
            return Err(AnalyzeError::Quota {
                raw_response: format!("Quota Error: {detail}"),
            });
        }
        Err(e) => {
            error!(%backend, "API call failed: {}", e);
            metrics::counter!("analysis_requests_total", "outcome" => "upstream_error").increment(1);
            return Err(AnalyzeError::Upstream {
                backend,
                raw_response: format!("AI Error: {e}"),
            });
        }
    };
    info!(%backend, "Analysis completed in {:.3} seconds", elapsed.as_secs_f64());

    match parse_vehicle_counts(&text) {
        Ok(counts) => {
            metrics::counter!("analysis_requests_total", "outcome" => "ok").increment(1);
            Ok(AnalysisResult {
                counts,
                raw_response: text,
            })
        }
        Err(error) => {
            warn!("{}", error);
            metrics::counter!("analysis_requests_total", "outcome" => "malformed").increment(1);
            Err(AnalyzeError::Malformed {
                error,
                raw_response: text,
            })
        }
    }
}
