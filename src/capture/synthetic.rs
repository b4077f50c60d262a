//! Solid colour camera used for demos and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::device::{CameraDevice, CameraProvider, ReleaseToken};
use super::frame::{Frame, Resolution};
use crate::error::CameraError;

/// Granularity at which a simulated exposure notices a release.
const EXPOSURE_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
}

/// Hands out [`SyntheticCamera`]s for a configurable set of indices.
///
/// Clones share their open/close counters.
#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    indices: Vec<u32>,
    resolution: Resolution,
    color: [u8; 3],
    fixed_resolution: bool,
    fail_after: Option<u64>,
    frame_delay: Duration,
    counters: Arc<Counters>,
}

impl SyntheticProvider {
    pub fn new(resolution: Resolution, color: [u8; 3]) -> Self {
        Self {
            indices: vec![0],
            resolution,
            color,
            fixed_resolution: false,
            fail_after: None,
            frame_delay: Duration::ZERO,
            counters: Arc::default(),
        }
    }

    /// Indices at which a device "exists". Empty means no camera attached.
    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.indices = indices;
        self
    }

    /// Ignore resolution requests.
    pub fn with_fixed_resolution(mut self) -> Self {
        self.fixed_resolution = true;
        self
    }

    /// Fail every read after `reads` successful ones.
    pub fn with_fail_after(mut self, reads: u64) -> Self {
        self.fail_after = Some(reads);
        self
    }

    /// Simulated exposure time per read.
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    /// Devices opened and not yet closed.
    pub fn open_devices(&self) -> usize {
        self.opens() - self.counters.closes.load(Ordering::SeqCst)
    }
}

impl CameraProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&self, index: u32) -> Result<Box<dyn CameraDevice>, CameraError> {
        if !self.indices.contains(&index) {
            return Err(CameraError::Open {
                index,
                reason: "no synthetic device at this index".into(),
            });
        }

        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let counters = Arc::clone(&self.counters);
        let release = ReleaseToken::with_hook(move || {
            counters.closes.fetch_add(1, Ordering::SeqCst);
        });
        Ok(Box::new(SyntheticCamera {
            index,
            resolution: self.resolution,
            color: self.color,
            fixed_resolution: self.fixed_resolution,
            fail_after: self.fail_after,
            frame_delay: self.frame_delay,
            reads: 0,
            release,
        }))
    }
}

pub struct SyntheticCamera {
    index: u32,
    resolution: Resolution,
    color: [u8; 3],
    fixed_resolution: bool,
    fail_after: Option<u64>,
    frame_delay: Duration,
    reads: u64,
    release: ReleaseToken,
}

impl SyntheticCamera {
    /// Sleep for the exposure time, cut short by a release.
    fn expose(&self) -> Result<(), CameraError> {
        let deadline = Instant::now() + self.frame_delay;
        loop {
            if self.release.is_released() {
                return Err(CameraError::DeviceLost);
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Ok(());
            }
            std::thread::sleep(left.min(EXPOSURE_SLICE));
        }
    }
}

impl CameraDevice for SyntheticCamera {
    fn index(&self) -> u32 {
        self.index
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn set_resolution(&mut self, target: Resolution) -> Result<(), CameraError> {
        if !self.fixed_resolution && target.width > 0 && target.height > 0 {
            self.resolution = target;
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, CameraError> {
        if self.release.is_released() {
            return Err(CameraError::DeviceLost);
        }
        if self.fail_after.is_some_and(|limit| self.reads >= limit) {
            return Err(CameraError::ReadFailed("synthetic read failure".into()));
        }
        if !self.frame_delay.is_zero() {
            self.expose()?;
        }

        self.reads += 1;
        Ok(Frame::filled(
            self.resolution.width,
            self.resolution.height,
            self.color,
            self.reads,
        ))
    }

    fn is_open(&self) -> bool {
        !self.release.is_released()
    }

    fn close(&mut self) {
        self.release.release();
    }

    fn release_token(&self) -> ReleaseToken {
        self.release.clone()
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::{configure_resolution, open_first};

    #[test]
    fn tries_indices_in_order() {
        let provider = SyntheticProvider::new(Resolution::new(4, 4), [0; 3]).with_indices(vec![1]);
        let device = open_first(&provider, &[0, 1]).unwrap();
        assert_eq!(device.index(), 1);
        assert_eq!(provider.opens(), 1);
    }

    #[test]
    fn no_device_is_device_not_found() {
        let provider = SyntheticProvider::new(Resolution::new(4, 4), [0; 3]).with_indices(vec![]);
        let err = open_first(&provider, &[0, 1]).err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(ref tried) if tried == &[0, 1]));
    }

    #[test]
    fn fixed_resolution_is_reported_back() {
        let provider =
            SyntheticProvider::new(Resolution::new(640, 480), [0; 3]).with_fixed_resolution();
        let mut device = provider.open(0).unwrap();
        let actual = configure_resolution(
            device.as_mut(),
            Some(Resolution::new(1280, 720)),
            Duration::ZERO,
        );
        assert_eq!(actual, Resolution::new(640, 480));
    }

    #[test]
    fn close_is_idempotent() {
        let provider = SyntheticProvider::new(Resolution::new(2, 2), [0; 3]);
        let mut device = provider.open(0).unwrap();
        device.close();
        device.close();
        assert_eq!(provider.open_devices(), 0);
        assert!(matches!(device.read(), Err(CameraError::DeviceLost)));
    }

    #[test]
    fn release_interrupts_a_slow_read() {
        let provider = SyntheticProvider::new(Resolution::new(2, 2), [0; 3])
            .with_frame_delay(Duration::from_secs(5));
        let mut device = provider.open(0).unwrap();
        let token = device.release_token();

        let reader = std::thread::spawn(move || {
            let started = Instant::now();
            (device.read().err(), started.elapsed())
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(token.release());
        assert_eq!(provider.open_devices(), 0);

        let (err, took) = reader.join().unwrap();
        assert!(matches!(err, Some(CameraError::DeviceLost)));
        assert!(took < Duration::from_secs(1), "read blocked for {took:?}");
    }
}
