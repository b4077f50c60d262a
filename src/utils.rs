use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::capture::{CameraProvider, Resolution, SyntheticProvider};
use crate::{CameraBackend, CameraConfig};

/// Build the camera provider selected in the configuration.
pub fn camera_provider(config: &CameraConfig) -> Result<Arc<dyn CameraProvider>> {
    match config.backend {
        CameraBackend::Synthetic => {
            let s = &config.synthetic;
            info!("Using synthetic camera {}x{}", s.width, s.height);
            Ok(Arc::new(
                SyntheticProvider::new(Resolution::new(s.width, s.height), s.color)
                    .with_indices(config.device_indices.clone()),
            ))
        }
        #[cfg(feature = "v4l2")]
        CameraBackend::V4l2 => {
            log_capture_devices(&config.device_indices);
            Ok(Arc::new(crate::capture::V4l2Provider))
        }
        #[cfg(not(feature = "v4l2"))]
        CameraBackend::V4l2 => Err(eyre!(
            "camera backend 'v4l2' requested but this build lacks the `v4l2` feature"
        )),
    }
}

/// Report which of the configured indices are usable capture devices.
#[cfg(feature = "v4l2")]
fn log_capture_devices(indices: &[u32]) {
    use v4l::{capability::Flags, video::Capture, Device, FourCC};

    for &index in indices {
        let path = format!("/dev/video{index}");
        let Ok(dev) = Device::new(index as usize) else {
            info!("{}: not present", path);
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            info!("{}: {} is not a capture device", path, caps.card);
            continue;
        }

        let formats = dev.enum_formats().unwrap_or_default();
        let mjpeg = formats.iter().any(|f| f.fourcc == FourCC::new(b"MJPG"));
        let yuyv = formats.iter().any(|f| f.fourcc == FourCC::new(b"YUYV"));
        info!(mjpeg, yuyv, "{}: {}", path, caps.card);
    }
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async { tokio::signal::ctrl_c().await.map_err(|e| eyre!(e)) };

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => res?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await?;

    info!("Shutdown signal received");
    Ok(())
}
