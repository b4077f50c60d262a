use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::CameraError;
use crate::pipeline::crop::PixelBox;

/// One captured image as tightly packed RGB24 rows.
///
/// The pixel data is reference counted and never mutated after
/// construction, so clones handed to readers are independent snapshots.
#[derive(Clone)]
pub struct Frame {
    pub data: Bytes,

    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

/// Pixel formats a camera may deliver before decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Yuyv4,
    Mjpeg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl Frame {
    pub fn from_rgb(
        width: u32,
        height: u32,
        data: impl Into<Bytes>,
        sequence: u64,
    ) -> Result<Self, CameraError> {
        let data = data.into();
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(CameraError::FrameSize {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * 3,
            }),
            timestamp: Instant::now(),
        })
    }

    /// Solid colour frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = BytesMut::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }

        Self {
            data: data.freeze(),
            meta: Arc::new(FrameMetadata {
                sequence,
                width,
                height,
                stride: width * 3,
            }),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.meta.width, self.meta.height)
    }

    /// Copy the pixels inside `region` into a new frame. The region must lie
    /// within the frame; the crop calculator guarantees that.
    pub fn crop(&self, region: PixelBox) -> Frame {
        let stride = self.meta.stride as usize;
        let row_bytes = region.width() as usize * 3;
        let mut data = BytesMut::with_capacity(row_bytes * region.height() as usize);

        for row in region.top..region.bottom {
            let start = row as usize * stride + region.left as usize * 3;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Frame {
            data: data.freeze(),
            meta: Arc::new(FrameMetadata {
                sequence: self.meta.sequence,
                width: region.width(),
                height: region.height(),
                stride: region.width() * 3,
            }),
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.meta.sequence)
            .field("resolution", &self.resolution())
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffers() {
        let err = Frame::from_rgb(4, 4, vec![0u8; 10], 0).unwrap_err();
        assert!(matches!(err, CameraError::FrameSize { expected: 48, actual: 10, .. }));
    }

    #[test]
    fn crop_copies_the_selected_rows() {
        // 3x2 frame, each pixel's red channel is its index
        let data: Vec<u8> = (0..6u8).flat_map(|i| [i, 0, 0]).collect();
        let frame = Frame::from_rgb(3, 2, data, 7).unwrap();

        let cropped = frame.crop(PixelBox {
            left: 1,
            top: 1,
            right: 3,
            bottom: 2,
        });

        assert_eq!(cropped.resolution(), Resolution::new(2, 1));
        assert_eq!(&cropped.data[..], &[4, 0, 0, 5, 0, 0]);
        assert_eq!(cropped.meta.sequence, 7);
    }
}
