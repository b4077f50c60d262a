//! Camera device abstraction: device discovery, resolution negotiation and the
//! shared handle the lifecycle controller hands to the capture loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::frame::{Frame, Resolution};
use crate::error::CameraError;

/// An open camera. Reads block until the device delivers a frame.
pub trait CameraDevice: Send {
    fn index(&self) -> u32;

    /// Resolution the device currently delivers.
    fn resolution(&self) -> Resolution;

    /// Request a capture size. Devices may ignore or adjust it.
    fn set_resolution(&mut self, target: Resolution) -> Result<(), CameraError>;

    fn read(&mut self) -> Result<Frame, CameraError>;

    fn is_open(&self) -> bool;

    /// Release the device. Must be safe to call repeatedly.
    fn close(&mut self);

    /// Token that releases this device without holding `&mut self`. Once it
    /// fires, a read in progress or any later read returns
    /// [`CameraError::DeviceLost`] and never yields a frame.
    fn release_token(&self) -> ReleaseToken;
}

type ReleaseHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct ReleaseState {
    released: AtomicBool,
    hook: Option<ReleaseHook>,
}

/// One-shot, shareable "this device is released" flag.
///
/// Clones observe the same state. The optional hook runs exactly once, on
/// the first [`release`](Self::release).
#[derive(Clone, Default)]
pub struct ReleaseToken {
    state: Arc<ReleaseState>,
}

impl ReleaseToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token running `hook` when it fires.
    pub fn with_hook(hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            state: Arc::new(ReleaseState {
                released: AtomicBool::new(false),
                hook: Some(Box::new(hook)),
            }),
        }
    }

    /// Fire the token. Returns false if it had already fired.
    pub fn release(&self) -> bool {
        if self.state.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(hook) = &self.state.hook {
            hook();
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ReleaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseToken")
            .field("released", &self.is_released())
            .finish()
    }
}

/// Opens camera devices by index.
pub trait CameraProvider: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>, CameraError>;
}

pub type SharedDevice = Arc<Mutex<Box<dyn CameraDevice>>>;

pub(crate) fn lock_device(device: &SharedDevice) -> MutexGuard<'_, Box<dyn CameraDevice>> {
    device.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open camera plus the resolution negotiated when it was opened.
pub struct CameraHandle {
    device: SharedDevice,
    release: ReleaseToken,
    index: u32,
    resolution: Resolution,
}

impl CameraHandle {
    pub fn new(device: Box<dyn CameraDevice>, resolution: Resolution) -> Self {
        let index = device.index();
        let release = device.release_token();
        Self {
            device: Arc::new(Mutex::new(device)),
            release,
            index,
            resolution,
        }
    }

    pub fn device(&self) -> SharedDevice {
        Arc::clone(&self.device)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Release the device without waiting for a read in progress. A read
    /// blocked in the driver returns `DeviceLost` and the capture thread
    /// drops the device once it gets the lock back.
    pub fn close(&self) {
        if self.release.release() {
            info!(index = self.index, "Camera device released");
        } else {
            info!(index = self.index, "Camera device was already closed");
        }

        match self.device.try_lock() {
            Ok(mut device) => device.close(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().close(),
            Err(TryLockError::WouldBlock) => {
                debug!(index = self.index, "Camera read in flight, it ends with DeviceLost")
            }
        }
    }
}

/// Try `indices` in order and return the first device that opens.
pub fn open_first(
    provider: &dyn CameraProvider,
    indices: &[u32],
) -> Result<Box<dyn CameraDevice>, CameraError> {
    for &index in indices {
        match provider.open(index) {
            Ok(device) if device.is_open() => {
                info!(index, provider = provider.name(), "Camera opened");
                return Ok(device);
            }
            Ok(mut device) => {
                warn!(index, "Camera opened but reports closed");
                device.close();
            }
            Err(e) => warn!(index, "Failed to open camera: {}", e),
        }
    }

    Err(CameraError::DeviceNotFound(indices.to_vec()))
}

/// Best-effort resolution negotiation. Returns what the device actually
/// delivers, which may differ from `target`.
pub fn configure_resolution(
    device: &mut dyn CameraDevice,
    target: Option<Resolution>,
    settle: Duration,
) -> Resolution {
    let Some(target) = target else {
        let current = device.resolution();
        info!("Using camera's default resolution: {}", current);
        return current;
    };

    info!("Attempting to set resolution: {}", target);
    if let Err(e) = device.set_resolution(target) {
        warn!("Setting resolution failed, camera might not support it: {}", e);
    }

    if !settle.is_zero() {
        std::thread::sleep(settle);
    }

    let actual = device.resolution();
    info!("Actual resolution after attempting set: {}", actual);
    if actual != target {
        warn!(
            "Camera did not accept target resolution {}. Using {}.",
            target, actual
        );
    }
    actual
}
