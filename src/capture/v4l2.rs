//! V4L2 camera backend

use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, instrument};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::decoder;
use super::device::{CameraDevice, CameraProvider, ReleaseToken};
use super::frame::{Frame, PixelFormat, Resolution};
use crate::error::CameraError;

const BUFFER_COUNT: u32 = 4;

/// Reported by the driver once the camera is unplugged.
const ENODEV: i32 = 19;

const POLLIN: i16 = 0x001;

/// Longest a read waits on the driver before checking for a release.
const POLL_SLICE_MS: i32 = 100;

/// Wait for the first frame of a fresh stream. The stream is rebuilt when
/// it expires.
const FIRST_FRAME_SLICE: Duration = Duration::from_millis(500);

/// Opens `/dev/video<index>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2Provider;

impl CameraProvider for V4l2Provider {
    fn name(&self) -> &str {
        "v4l2"
    }

    fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>, CameraError> {
        V4l2Camera::open(index).map(|camera| Box::new(camera) as Box<dyn CameraDevice>)
    }
}

pub struct V4l2Camera {
    index: u32,
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    /// The current stream has delivered a frame, so its buffers cycle.
    streaming: bool,
    release: ReleaseToken,
    format: PixelFormat,
    fourcc: FourCC,
    resolution: Resolution,
    sequence: u64,
}

impl V4l2Camera {
    pub fn open(index: u32) -> Result<Self, CameraError> {
        let path = format!("/dev/video{}", index);
        if !Path::new(&path).exists() {
            return Err(CameraError::Open {
                index,
                reason: format!("{} does not exist", path),
            });
        }

        let device = Device::with_path(&path)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CameraError::Open {
                index,
                reason: "device doesn't support video capture".into(),
            });
        }

        // Prefer MJPEG, fall back to YUYV
        let formats = device.enum_formats()?;
        let (format, fourcc) = if formats.iter().any(|f| f.fourcc == FourCC::new(b"MJPG")) {
            (PixelFormat::Mjpeg, FourCC::new(b"MJPG"))
        } else if formats.iter().any(|f| f.fourcc == FourCC::new(b"YUYV")) {
            (PixelFormat::Yuyv4, FourCC::new(b"YUYV"))
        } else {
            return Err(CameraError::Unsupported(format!(
                "{} offers neither MJPG nor YUYV",
                path
            )));
        };

        let mut fmt = device.format()?;
        fmt.fourcc = fourcc;
        let fmt = device.set_format(&fmt)?;
        info!("Negotiated {} {}x{}", fmt.fourcc, fmt.width, fmt.height);

        Ok(Self {
            index,
            device: Some(device),
            stream: None,
            streaming: false,
            release: ReleaseToken::new(),
            format,
            fourcc,
            resolution: Resolution::new(fmt.width, fmt.height),
            sequence: 0,
        })
    }

    fn device(&self) -> Result<&Device, CameraError> {
        self.device.as_ref().ok_or(CameraError::DeviceLost)
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.streaming = false;
    }

    /// Fails with `DeviceLost` once the release token fired, dropping the
    /// stream and the file descriptor on the way out.
    fn check_released(&mut self) -> Result<(), CameraError> {
        if self.release.is_released() {
            self.drop_stream();
            self.device = None;
            return Err(CameraError::DeviceLost);
        }
        Ok(())
    }

    /// Block until a buffer is ready, in slices so a release is noticed.
    fn wait_readable(&mut self) -> Result<(), CameraError> {
        loop {
            self.check_released()?;
            let handle = self.stream.as_ref().ok_or(CameraError::DeviceLost)?.handle();
            match handle.poll(POLLIN, POLL_SLICE_MS) {
                Ok(0) => continue,
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(read_error(e)),
            }
        }
    }
}

fn read_error(e: io::Error) -> CameraError {
    match e.raw_os_error() {
        Some(ENODEV) => CameraError::DeviceLost,
        _ if e.kind() == io::ErrorKind::NotFound => CameraError::DeviceLost,
        _ => CameraError::ReadFailed(e.to_string()),
    }
}

impl CameraDevice for V4l2Camera {
    fn index(&self) -> u32 {
        self.index
    }

    fn resolution(&self) -> Resolution {
        self.device
            .as_ref()
            .and_then(|device| device.format().ok())
            .map(|fmt| Resolution::new(fmt.width, fmt.height))
            .unwrap_or(self.resolution)
    }

    fn set_resolution(&mut self, target: Resolution) -> Result<(), CameraError> {
        // Buffers are sized for the old format
        self.drop_stream();

        let device = self.device()?;
        let mut fmt = device.format()?;
        fmt.width = target.width;
        fmt.height = target.height;
        fmt.fourcc = self.fourcc;
        let fmt = device.set_format(&fmt)?;

        self.resolution = Resolution::new(fmt.width, fmt.height);
        Ok(())
    }

    #[instrument(skip(self), fields(index = self.index))]
    fn read(&mut self) -> Result<Frame, CameraError> {
        loop {
            self.check_released()?;

            if self.stream.is_none() {
                let mut stream =
                    MmapStream::with_buffers(self.device()?, Type::VideoCapture, BUFFER_COUNT)?;
                stream.set_timeout(FIRST_FRAME_SLICE);
                debug!("Capture stream started with {} buffers", BUFFER_COUNT);
                self.stream = Some(stream);
            }

            // A stream that never produced a frame cannot be polled before
            // `next` queues its buffers
            if self.streaming {
                self.wait_readable()?;
            }

            let stream = self.stream.as_mut().ok_or(CameraError::DeviceLost)?;
            let (buf, meta) = match stream.next() {
                Ok(next) => next,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    debug!("No first frame within {:?}, restarting the stream", FIRST_FRAME_SLICE);
                    self.drop_stream();
                    continue;
                }
                Err(e) => return Err(read_error(e)),
            };

            let used = (meta.bytesused as usize).min(buf.len());
            let Resolution { width, height } = self.resolution;
            let rgb = decoder::decode_frame(&buf[..used], self.format, width, height)?;

            if !self.streaming {
                self.streaming = true;
                if let Some(stream) = self.stream.as_mut() {
                    stream.clear_timeout();
                }
            }
            // A frame finished after a release is discarded
            self.check_released()?;

            self.sequence += 1;
            return Frame::from_rgb(width, height, rgb, self.sequence);
        }
    }

    fn is_open(&self) -> bool {
        self.device.is_some() && !self.release.is_released()
    }

    fn close(&mut self) {
        self.release.release();
        self.drop_stream();
        self.device = None;
    }

    fn release_token(&self) -> ReleaseToken {
        self.release.clone()
    }
}
