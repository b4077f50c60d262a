//! Errors raised by the capture and encode pipeline.

/// Camera and capture failures. These never leave the capture subsystem
/// except as a failed start; everyone else only sees "camera not running".
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("no camera device could be opened (tried indices {0:?})")]
    DeviceNotFound(Vec<u32>),

    #[error("failed to open camera {index}: {reason}")]
    Open { index: u32, reason: String },

    #[error("frame read failed: {0}")]
    ReadFailed(String),

    #[error("camera device lost")]
    DeviceLost,

    #[error("frame decode failed: {0}")]
    Decode(String),

    #[error("unsupported pixel format: {0}")]
    Unsupported(String),

    #[error("frame buffer holds {actual} bytes, expected {expected} for {width}x{height} RGB24")]
    FrameSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("camera worker failed: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-frame encoding failures.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),

    #[error("encoder task failed: {0}")]
    Task(String),
}
