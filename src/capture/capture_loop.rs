//! Background capture thread: reads the camera and publishes every frame
//! into the shared [`FrameBuffer`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::device::{lock_device, SharedDevice};
use crate::error::CameraError;
use crate::pipeline::{FrameBuffer, RunId};

/// Why the capture thread exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureExit {
    Stopped,
    DeviceLost,
    ReadFailed,
    /// The thread died without reporting, e.g. a panicking backend.
    Aborted,
}

/// Handle to a running capture thread.
pub struct CaptureLoop {
    stop: Arc<AtomicBool>,
    done: flume::Receiver<CaptureExit>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    /// Spawn the capture thread for `run_id`. `alive` is cleared when the
    /// thread exits for any reason.
    pub fn spawn(
        device: SharedDevice,
        frames: Arc<FrameBuffer>,
        run_id: RunId,
        alive: Arc<AtomicBool>,
        interval: Duration,
    ) -> Result<Self, CameraError> {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, done) = flume::bounded(1);

        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || {
                let exit = run(&device, &frames, &thread_stop, interval);
                alive.store(false, Ordering::Release);
                if !frames.clear_run(run_id) {
                    debug!("Capture run superseded, leaving the frame buffer alone");
                }
                lock_device(&device).close();
                let _ = tx.send(exit);
            })?;

        Ok(Self {
            stop,
            done,
            thread: Some(thread),
        })
    }

    /// Ask the thread to exit at its next iteration.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait up to `timeout` for the thread to finish. `None` means it is
    /// still running.
    pub async fn wait(&mut self, timeout: Duration) -> Option<CaptureExit> {
        let exit = match tokio::time::timeout(timeout, self.done.recv_async()).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(_)) => CaptureExit::Aborted,
            Err(_) => return None,
        };

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Camera capture thread panicked");
            }
        }
        Some(exit)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

fn run(
    device: &SharedDevice,
    frames: &FrameBuffer,
    stop: &AtomicBool,
    interval: Duration,
) -> CaptureExit {
    info!("Camera capture thread starting");
    let started = Instant::now();
    let mut frame_count: u64 = 0;

    let exit = loop {
        if stop.load(Ordering::Acquire) {
            break CaptureExit::Stopped;
        }

        let result = {
            let mut device = lock_device(device);
            if device.is_open() {
                device.read()
            } else {
                Err(CameraError::DeviceLost)
            }
        };

        match result {
            Ok(frame) => {
                // A stop raised during the read must not repopulate the buffer
                if stop.load(Ordering::Acquire) {
                    break CaptureExit::Stopped;
                }
                frames.publish(frame);
                frame_count += 1;
                metrics::counter!("frames_captured_total").increment(1);
            }
            Err(CameraError::DeviceLost) => {
                warn!("Capture: camera lost");
                break CaptureExit::DeviceLost;
            }
            Err(e) => {
                warn!("Capture: frame read failed: {}", e);
                break CaptureExit::ReadFailed;
            }
        }

        thread::sleep(interval);
    };

    let elapsed = started.elapsed().as_secs_f64();
    let fps = if elapsed > 0.0 {
        frame_count as f64 / elapsed
    } else {
        0.0
    };
    info!(?exit, "Capture thread finished. {} frames (~{:.1} FPS)", frame_count, fps);
    debug!("Capture thread ran for {:.3}s", elapsed);
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::device::{CameraDevice, CameraHandle, CameraProvider};
    use crate::capture::{Frame, Resolution, SyntheticProvider};

    fn handle(provider: &SyntheticProvider) -> CameraHandle {
        let device = provider.open(0).unwrap();
        let resolution = device.resolution();
        CameraHandle::new(device, resolution)
    }

    #[tokio::test]
    async fn stop_signal_clears_the_buffer() {
        let provider = SyntheticProvider::new(Resolution::new(8, 8), [9, 9, 9]);
        let handle = handle(&provider);
        let frames = Arc::new(FrameBuffer::default());
        let run_id = frames.begin_run();
        let alive = Arc::new(AtomicBool::new(true));

        let mut capture = CaptureLoop::spawn(
            handle.device(),
            Arc::clone(&frames),
            run_id,
            Arc::clone(&alive),
            Duration::from_millis(1),
        )
        .unwrap();

        for _ in 0..200 {
            if frames.snapshot().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(frames.snapshot().is_some());

        capture.signal_stop();
        assert_eq!(capture.wait(Duration::from_secs(2)).await, Some(CaptureExit::Stopped));
        assert!(frames.snapshot().is_none());
        assert!(!alive.load(Ordering::Acquire));
        assert_eq!(provider.open_devices(), 0);
    }

    #[tokio::test]
    async fn read_failure_ends_the_loop() {
        let provider = SyntheticProvider::new(Resolution::new(4, 4), [0; 3]).with_fail_after(3);
        let handle = handle(&provider);
        let frames = Arc::new(FrameBuffer::default());
        let run_id = frames.begin_run();
        let alive = Arc::new(AtomicBool::new(true));

        let mut capture = CaptureLoop::spawn(
            handle.device(),
            Arc::clone(&frames),
            run_id,
            Arc::clone(&alive),
            Duration::from_millis(1),
        )
        .unwrap();

        assert_eq!(capture.wait(Duration::from_secs(2)).await, Some(CaptureExit::ReadFailed));
        assert!(capture.is_finished());
        assert!(frames.snapshot().is_none());
        assert!(!alive.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn late_exit_keeps_the_next_run_frame() {
        let provider = SyntheticProvider::new(Resolution::new(4, 4), [0; 3])
            .with_frame_delay(Duration::from_millis(300));
        let handle = handle(&provider);
        let frames = Arc::new(FrameBuffer::default());
        let run_id = frames.begin_run();
        let alive = Arc::new(AtomicBool::new(true));

        let mut capture = CaptureLoop::spawn(
            handle.device(),
            Arc::clone(&frames),
            run_id,
            Arc::clone(&alive),
            Duration::from_millis(1),
        )
        .unwrap();

        // Still inside its first read when a new run takes the buffer over
        tokio::time::sleep(Duration::from_millis(50)).await;
        capture.signal_stop();
        assert_eq!(capture.wait(Duration::from_millis(20)).await, None);
        frames.begin_run();
        frames.publish(Frame::filled(4, 4, [7; 3], 99));

        assert_eq!(capture.wait(Duration::from_secs(2)).await, Some(CaptureExit::Stopped));
        assert_eq!(frames.snapshot().unwrap().meta.sequence, 99);
        assert_eq!(provider.open_devices(), 0);
    }
}
