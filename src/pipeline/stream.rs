//! Paced MJPEG part generator behind the two video feed endpoints.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::crop::crop_frame;
use super::encoder::{encode_jpeg, multipart_part, Placeholder, JPEG_CONTENT_TYPE};
use crate::capture::Frame;
use crate::error::EncodeError;
use crate::session::CameraSession;
use crate::settings::SettingsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamVariant {
    /// Whole camera frame.
    Full,
    /// Frame cut to the crop area of the current settings.
    Cropped,
}

impl fmt::Display for StreamVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamVariant::Full => f.write_str("full"),
            StreamVariant::Cropped => f.write_str("cropped"),
        }
    }
}

/// Pull-based, infinite sequence of multipart parts.
///
/// Each call to [`next_part`](Self::next_part) waits until one frame
/// interval has passed since the previous emission, then encodes the latest
/// frame or falls back to the placeholder. Dropping the stream (the client
/// went away) simply ends it.
pub struct MjpegStream {
    session: Arc<CameraSession>,
    settings: Arc<SettingsStore>,
    placeholder: Placeholder,
    variant: StreamVariant,
    interval: Duration,
    quality: u8,
    last_emit: Option<Instant>,
    emitted: u64,
}

impl MjpegStream {
    pub fn new(
        session: Arc<CameraSession>,
        settings: Arc<SettingsStore>,
        placeholder: Placeholder,
        variant: StreamVariant,
        interval: Duration,
        quality: u8,
    ) -> Self {
        debug!(%variant, "MJPEG stream opened");
        Self {
            session,
            settings,
            placeholder,
            variant,
            interval,
            quality,
            last_emit: None,
            emitted: 0,
        }
    }

    pub fn variant(&self) -> StreamVariant {
        self.variant
    }

    /// Next framed part. An error means the stream must end.
    pub async fn next_part(&mut self) -> Result<Bytes, EncodeError> {
        self.pace().await;

        let frame = if self.session.is_running() {
            self.session.frames().snapshot()
        } else {
            None
        };

        let part = match frame {
            Some(frame) => match self.encode(frame).await {
                Ok(jpeg) => multipart_part(JPEG_CONTENT_TYPE, &jpeg),
                Err(EncodeError::Jpeg(e)) => {
                    warn!(variant = %self.variant, "MJPEG encode failed: {}", e);
                    self.placeholder.part()
                }
                Err(e) => return Err(e),
            },
            None => self.placeholder.part(),
        };

        self.emitted += 1;
        metrics::counter!("stream_chunks_total", "variant" => self.variant.to_string())
            .increment(1);
        Ok(part)
    }

    /// Sleep out the rest of the frame interval. A slow iteration is never
    /// made up for: the next emission is just immediate.
    async fn pace(&mut self) {
        if let Some(last) = self.last_emit {
            tokio::time::sleep_until(last + self.interval).await;
        }
        self.last_emit = Some(Instant::now());
    }

    async fn encode(&self, frame: Frame) -> Result<Bytes, EncodeError> {
        let crop = match self.variant {
            StreamVariant::Full => None,
            StreamVariant::Cropped => Some(self.settings.load().crop_area),
        };
        let quality = self.quality;

        tokio::task::spawn_blocking(move || {
            let frame = match crop {
                Some(rect) => crop_frame(frame, &rect),
                None => frame,
            };
            encode_jpeg(&frame, quality)
        })
        .await
        .map_err(|e| EncodeError::Task(e.to_string()))?
    }

    /// Adapt into a body stream for the HTTP layer.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        stream::unfold(self, |mut feed| async move {
            match feed.next_part().await {
                Ok(part) => Some((Ok(part), feed)),
                Err(e) => {
                    error!(variant = %feed.variant, "MJPEG stream ended: {}", e);
                    None
                }
            }
        })
    }
}

impl Drop for MjpegStream {
    fn drop(&mut self) {
        debug!(
            variant = %self.variant,
            parts = self.emitted,
            "MJPEG stream closed"
        );
    }
}
