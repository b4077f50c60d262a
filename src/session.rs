//! Camera lifecycle: the start/stop state machine that owns the device
//! handle and the capture thread for the life of the process.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument, warn};

use crate::capture::device::{configure_resolution, open_first};
use crate::capture::{CameraHandle, CameraProvider, CaptureLoop, Frame, Resolution};
use crate::error::CameraError;
use crate::pipeline::FrameBuffer;
use crate::CameraConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Starting,
            2 => RunState::Running,
            _ => RunState::Stopped,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    Started { index: u32, resolution: Resolution },
}

#[derive(Default)]
struct SessionInner {
    handle: Option<CameraHandle>,
    capture: Option<CaptureLoop>,
}

/// The single camera session of the process.
///
/// Start and stop run inside one async mutex, so they never interleave.
/// The run state and the frame buffer are readable without that lock.
pub struct CameraSession {
    provider: Arc<dyn CameraProvider>,
    config: CameraConfig,
    frames: Arc<FrameBuffer>,
    state: AtomicU8,
    /// Cleared by the capture thread of the current run when it exits.
    capture_alive: ArcSwap<AtomicBool>,
    inner: Mutex<SessionInner>,
}

impl CameraSession {
    pub fn new(provider: Arc<dyn CameraProvider>, config: CameraConfig) -> Self {
        Self {
            provider,
            config,
            frames: Arc::new(FrameBuffer::new()),
            state: AtomicU8::new(RunState::Stopped as u8),
            capture_alive: ArcSwap::from_pointee(AtomicBool::new(false)),
            inner: Mutex::new(SessionInner::default()),
        }
    }

    pub fn frames(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    pub fn run_state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: RunState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// True while a start succeeded and its capture thread is still alive.
    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running && self.capture_alive.load().load(Ordering::Acquire)
    }

    /// Latest frame, only while the camera is running.
    pub fn current_frame(&self) -> Option<Frame> {
        if self.is_running() {
            self.frames.snapshot()
        } else {
            None
        }
    }

    /// Open a camera and launch the capture thread. Succeeds without side
    /// effects when already running.
    #[instrument(skip(self))]
    pub async fn start(&self, resolution: Option<Resolution>) -> Result<StartOutcome, CameraError> {
        info!("Acquiring camera lock for START");
        let mut inner = self.inner.lock().await;

        if self.run_state() == RunState::Running {
            if self.capture_alive.load().load(Ordering::Acquire) {
                warn!("start: camera already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            warn!("Capture thread exited on its own, cleaning up before restart");
            self.stop_locked(&mut inner).await;
        }

        self.set_state(RunState::Starting);
        info!("Attempting to start camera device");

        let provider = Arc::clone(&self.provider);
        let indices = self.config.device_indices.clone();
        let settle = self.config.settle();
        let opened = tokio::task::spawn_blocking(move || {
            let mut device = open_first(provider.as_ref(), &indices)?;
            let actual = configure_resolution(device.as_mut(), resolution, settle);
            Ok::<_, CameraError>((device, actual))
        })
        .await
        .map_err(|e| CameraError::Worker(e.to_string()))
        .and_then(|result| result);

        let (device, actual) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                self.set_state(RunState::Stopped);
                warn!("Cannot open any camera device: {}", e);
                return Err(e);
            }
        };

        let handle = CameraHandle::new(device, actual);
        let run = self.frames.begin_run();

        let alive = Arc::new(AtomicBool::new(true));
        self.capture_alive.store(Arc::clone(&alive));

        let capture = match CaptureLoop::spawn(
            handle.device(),
            Arc::clone(&self.frames),
            run,
            alive,
            self.config.capture_interval(),
        ) {
            Ok(capture) => capture,
            Err(e) => {
                handle.close();
                self.capture_alive.store(Arc::new(AtomicBool::new(false)));
                self.set_state(RunState::Stopped);
                return Err(e);
            }
        };

        let index = handle.index();
        inner.handle = Some(handle);
        inner.capture = Some(capture);
        self.set_state(RunState::Running);
        info!(index, %actual, "Camera process started (capture thread running)");

        Ok(StartOutcome::Started {
            index,
            resolution: actual,
        })
    }

    /// Stop capture and release the device. A no-op when already stopped.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        info!("Acquiring camera lock for STOP");
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await;
    }

    /// Process-exit cleanup: [`stop`](Self::stop) under a bounded lock wait
    /// so a stuck capture thread cannot block shutdown.
    pub async fn shutdown(&self) {
        info!("Application exit detected. Running cleanup");
        match tokio::time::timeout(self.config.cleanup_lock_timeout(), self.inner.lock()).await {
            Ok(mut inner) => self.stop_locked(&mut inner).await,
            Err(_) => warn!("Could not acquire camera lock during exit cleanup, camera might not be released cleanly"),
        }
        info!("Cleanup finished");
    }

    async fn stop_locked(&self, inner: &mut MutexGuard<'_, SessionInner>) {
        if self.run_state() == RunState::Stopped && inner.handle.is_none() && inner.capture.is_none()
        {
            info!("stop: camera already stopped");
            return;
        }

        info!("Stopping camera process");
        self.set_state(RunState::Stopped);

        if let Some(mut capture) = inner.capture.take() {
            capture.signal_stop();
            let timeout = self.config.stop_timeout();
            match capture.wait(timeout).await {
                Some(exit) => info!(?exit, "Camera capture thread joined"),
                None => warn!("Camera capture thread did not exit within {:?}", timeout),
            }
        }

        // Released even when the capture thread is still inside a read
        if let Some(handle) = inner.handle.take() {
            handle.close();
        }

        self.frames.clear();
        info!("Camera process stopped");
    }
}
