pub mod capture_loop;
pub mod decoder;
pub mod device;
pub mod frame;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use capture_loop::{CaptureExit, CaptureLoop};
pub use device::{CameraDevice, CameraHandle, CameraProvider, ReleaseToken};
pub use frame::{Frame, PixelFormat, Resolution};
pub use synthetic::SyntheticProvider;
#[cfg(feature = "v4l2")]
pub use v4l2::{V4l2Camera, V4l2Provider};
