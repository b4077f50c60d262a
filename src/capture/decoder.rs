use jpeg_decoder::Decoder;

use super::frame::PixelFormat;
use crate::error::CameraError;

/// Convert a raw camera buffer into packed RGB24.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, CameraError> {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Mjpeg => decode_mjpeg(data),
        PixelFormat::Rgb24 => {
            // Already in RGB format
            expect_len(data, pixels * 3, format)?;
            Ok(data[..pixels * 3].to_vec())
        }
        PixelFormat::Bgr24 => {
            expect_len(data, pixels * 3, format)?;
            Ok(data[..pixels * 3]
                .chunks_exact(3)
                .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
                .collect())
        }
        PixelFormat::Yuyv4 => {
            expect_len(data, pixels * 2, format)?;
            Ok(yuyv_to_rgb(&data[..pixels * 2]))
        }
    }
}

fn expect_len(data: &[u8], needed: usize, format: PixelFormat) -> Result<(), CameraError> {
    if data.len() < needed {
        return Err(CameraError::Decode(format!(
            "{format:?} buffer too short: {} < {needed}",
            data.len()
        )));
    }
    Ok(())
}

fn decode_mjpeg(data: &[u8]) -> Result<Vec<u8>, CameraError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder
        .decode()
        .map_err(|e| CameraError::Decode(e.to_string()))?;
    let info = decoder
        .info()
        .ok_or_else(|| CameraError::Decode("missing JPEG header".into()))?;

    match info.pixel_format {
        jpeg_decoder::PixelFormat::RGB24 => Ok(pixels),
        jpeg_decoder::PixelFormat::L8 => Ok(pixels.iter().flat_map(|&l| [l, l, l]).collect()),
        other => Err(CameraError::Unsupported(format!("JPEG {other:?}"))),
    }
}

/// BT.601 limited range, two pixels per Y0 U Y1 V macropixel.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (i32::from(y) - 16).max(0) * 298;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;

    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(c + 409 * e),
        clamp(c - 100 * d - 208 * e),
        clamp(c + 516 * d),
    ]
}
