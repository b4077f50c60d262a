//! Normalized crop rectangle -> pixel box.
//!
//! Any doubt about the rectangle or the frame degrades to the full frame:
//! an uncropped image is preferred over an error or an empty image.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::Frame;

/// Slack allowed on `x + w` and `y + h` for float rounding from the UI.
pub const BOUNDS_TOLERANCE: f64 = 1e-3;

/// Rectangles this close to `{0, 0, 1, 1}` mean "no crop".
pub const IDENTITY_TOLERANCE: f64 = 1e-6;

/// Normalized sub-region of a frame, all fields in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl CropRect {
    pub const FULL: CropRect = CropRect {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    pub fn is_valid(&self) -> bool {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        let positive = |v: f64| v > 0.0 && v <= 1.0;

        in_unit(self.x)
            && in_unit(self.y)
            && positive(self.w)
            && positive(self.h)
            && self.x + self.w <= 1.0 + BOUNDS_TOLERANCE
            && self.y + self.h <= 1.0 + BOUNDS_TOLERANCE
    }

    pub fn is_full_frame(&self) -> bool {
        (self.x - 0.0).abs() < IDENTITY_TOLERANCE
            && (self.y - 0.0).abs() < IDENTITY_TOLERANCE
            && (self.w - 1.0).abs() < IDENTITY_TOLERANCE
            && (self.h - 1.0).abs() < IDENTITY_TOLERANCE
    }
}

impl Default for CropRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Pixel rectangle, `right` and `bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropRegion {
    FullFrame,
    Box(PixelBox),
}

pub fn crop_box(width: u32, height: u32, rect: &CropRect) -> CropRegion {
    if width == 0 || height == 0 || !rect.is_valid() || rect.is_full_frame() {
        return CropRegion::FullFrame;
    }

    let (w, h) = (f64::from(width), f64::from(height));
    let left = (rect.x * w).floor() as u32;
    let top = (rect.y * h).floor() as u32;
    let right = (((rect.x + rect.w) * w).floor() as u32).min(width);
    let bottom = (((rect.y + rect.h) * h).floor() as u32).min(height);

    if right <= left || bottom <= top {
        return CropRegion::FullFrame;
    }

    CropRegion::Box(PixelBox {
        left,
        top,
        right,
        bottom,
    })
}

/// Apply `rect` to `frame`, returning the frame itself when no crop applies.
pub fn crop_frame(frame: Frame, rect: &CropRect) -> Frame {
    match crop_box(frame.width(), frame.height(), rect) {
        CropRegion::FullFrame => {
            if !rect.is_valid() {
                debug!(?rect, "Invalid crop values, using full frame");
            }
            frame
        }
        CropRegion::Box(region) => frame.crop(region),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f64, y: f64, w: f64, h: f64) -> CropRect {
        CropRect { x, y, w, h }
    }

    #[test]
    fn identity_is_full_frame() {
        assert_eq!(crop_box(640, 480, &CropRect::FULL), CropRegion::FullFrame);
        assert_eq!(crop_box(1, 1, &rect(0.0, 0.0, 1.0, 1.0)), CropRegion::FullFrame);
        assert_eq!(
            crop_box(640, 480, &rect(0.0, 0.0, 1.0 - 1e-7, 1.0)),
            CropRegion::FullFrame
        );
    }

    #[test]
    fn quarter_crop() {
        assert_eq!(
            crop_box(640, 480, &rect(0.25, 0.5, 0.5, 0.5)),
            CropRegion::Box(PixelBox {
                left: 160,
                top: 240,
                right: 480,
                bottom: 480,
            })
        );
    }

    #[test]
    fn tolerance_is_clamped_to_the_frame() {
        match crop_box(100, 100, &rect(0.5, 0.5, 0.5005, 0.5005)) {
            CropRegion::Box(b) => {
                assert_eq!((b.right, b.bottom), (100, 100));
            }
            other => panic!("expected a box, got {other:?}"),
        }
    }

    #[test]
    fn invalid_rects_fall_back() {
        assert_eq!(crop_box(640, 480, &rect(0.9, 0.0, 0.5, 1.0)), CropRegion::FullFrame);
        assert_eq!(crop_box(640, 480, &rect(0.0, 0.0, 0.0, 1.0)), CropRegion::FullFrame);
        assert_eq!(crop_box(640, 480, &rect(-0.1, 0.0, 0.5, 0.5)), CropRegion::FullFrame);
        assert_eq!(crop_box(640, 480, &rect(f64::NAN, 0.0, 0.5, 0.5)), CropRegion::FullFrame);
    }

    #[test]
    fn degenerate_frames_fall_back() {
        let quarter = rect(0.0, 0.0, 0.5, 0.5);
        assert_eq!(crop_box(0, 480, &quarter), CropRegion::FullFrame);
        assert_eq!(crop_box(640, 0, &quarter), CropRegion::FullFrame);
    }

    #[test]
    fn zero_area_falls_back() {
        // 0.001 of a 10px frame floors to nothing
        assert_eq!(crop_box(10, 10, &rect(0.5, 0.5, 0.001, 0.5)), CropRegion::FullFrame);
        assert_eq!(crop_box(10, 10, &rect(1.0, 0.0, 0.001, 1.0)), CropRegion::FullFrame);
    }

    #[test]
    fn crop_frame_keeps_full_frame_untouched() {
        let frame = Frame::filled(4, 4, [1, 1, 1], 3);
        let same = crop_frame(frame.clone(), &CropRect::FULL);
        assert_eq!(same.resolution(), frame.resolution());

        let half = crop_frame(frame, &rect(0.0, 0.0, 0.5, 1.0));
        assert_eq!((half.width(), half.height()), (2, 4));
    }
}
