//! JPEG encoding, multipart framing and the "camera stopped" placeholder.

use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{error, info};

use crate::capture::Frame;
use crate::error::EncodeError;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Content type of the empty part sent when not even a placeholder exists.
pub const EMPTY_CONTENT_TYPE: &str = "image/gif";

/// Multipart boundary used by both stream endpoints.
pub const BOUNDARY: &str = "frame";

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Bytes, EncodeError> {
    let started = Instant::now();
    let mut out = Vec::with_capacity(frame.data.len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode(
        &frame.data,
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    metrics::histogram!("encode_time_us").record(started.elapsed().as_micros() as f64);
    Ok(Bytes::from(out))
}

/// One `multipart/x-mixed-replace` part.
pub fn multipart_part(content_type: &str, body: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + body.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(body);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Static image shown while no live frame exists. `None` when it could not
/// be generated, in which case streams emit an empty part.
#[derive(Debug, Clone)]
pub struct Placeholder {
    jpeg: Option<Bytes>,
}

impl Placeholder {
    const TEXT: &'static str = "CAMERA STOPPED";

    /// Black frame with the centred text in white.
    pub fn render(width: u32, height: u32) -> Self {
        let frame = Frame::filled(width, height, [0, 0, 0], 0);
        let mut pixels = frame.data.to_vec();
        draw_text(&mut pixels, width, height, Self::TEXT);

        let jpeg = Frame::from_rgb(width, height, pixels, 0)
            .map_err(|e| e.to_string())
            .and_then(|frame| encode_jpeg(&frame, 80).map_err(|e| e.to_string()));

        match jpeg {
            Ok(jpeg) => {
                info!("Placeholder frame created ({}x{})", width, height);
                Self { jpeg: Some(jpeg) }
            }
            Err(e) => {
                error!("Could not create placeholder frame: {}", e);
                Self::empty()
            }
        }
    }

    pub fn empty() -> Self {
        Self { jpeg: None }
    }

    pub fn jpeg(&self) -> Option<&Bytes> {
        self.jpeg.as_ref()
    }

    pub fn part(&self) -> Bytes {
        match &self.jpeg {
            Some(jpeg) => multipart_part(JPEG_CONTENT_TYPE, jpeg),
            None => multipart_part(EMPTY_CONTENT_TYPE, &[]),
        }
    }
}

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

/// 5x7 rows, most significant of the low five bits is the leftmost pixel.
fn glyph(c: char) -> [u8; 7] {
    match c {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        _ => [0; 7],
    }
}

fn draw_text(pixels: &mut [u8], width: u32, height: u32, text: &str) {
    let chars = text.chars().count() as u32;
    if chars == 0 {
        return;
    }

    // One column of spacing after each glyph
    let advance = GLYPH_WIDTH + 1;
    let scale = (width / (chars * advance + 2))
        .min(height / (GLYPH_HEIGHT + 2))
        .clamp(1, 4);
    let text_width = (chars * advance - 1) * scale;
    let text_height = GLYPH_HEIGHT * scale;
    let origin_x = width.saturating_sub(text_width) / 2;
    let origin_y = height.saturating_sub(text_height) / 2;

    for (i, c) in text.chars().enumerate() {
        let glyph_x = origin_x + i as u32 * advance * scale;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (0x10 >> col) == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        let x = glyph_x + col * scale + dx;
                        let y = origin_y + row as u32 * scale + dy;
                        if x < width && y < height {
                            let offset = (y as usize * width as usize + x as usize) * 3;
                            pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_framing() {
        let part = multipart_part(JPEG_CONTENT_TYPE, b"abc");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n"
        );
    }

    #[test]
    fn empty_placeholder_is_an_empty_gif_part() {
        let part = Placeholder::empty().part();
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/gif\r\nContent-Length: 0\r\n\r\n\r\n"
        );
    }

    #[test]
    fn placeholder_decodes_with_text() {
        let placeholder = Placeholder::render(640, 480);
        let jpeg = placeholder.jpeg().expect("placeholder");
        let img = image::load_from_memory(jpeg).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (640, 480));

        // Corner stays black, the text band has bright pixels
        assert!(img.get_pixel(0, 0).0.iter().all(|&c| c < 40));
        let bright = (200..280)
            .flat_map(|y| (0..640).map(move |x| (x, y)))
            .filter(|&(x, y)| img.get_pixel(x, y).0[0] > 200)
            .count();
        assert!(bright > 100, "only {bright} bright pixels");
    }

    #[test]
    fn encodes_frames() {
        let frame = Frame::filled(32, 16, [10, 200, 30], 1);
        let jpeg = encode_jpeg(&frame, 80).unwrap();
        let img = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((img.width(), img.height()), (32, 16));
    }
}
