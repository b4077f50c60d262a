pub mod analysis;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod utils;
pub mod web;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the optional configuration file, looked up in the working directory.
pub const CONFIG_FILE: &str = "trafficcam";

/// Prefix for configuration environment variables, e.g. `TRAFFICCAM__SERVER__PORT`.
pub const ENV_PREFIX: &str = "TRAFFICCAM";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub stream: StreamConfig,
    pub ai: AiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    V4l2,
    Synthetic,
}

impl Default for CameraBackend {
    /// Real cameras when the build can drive them.
    fn default() -> Self {
        if cfg!(feature = "v4l2") {
            CameraBackend::V4l2
        } else {
            CameraBackend::Synthetic
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub backend: CameraBackend,
    /// Device indices tried in order on start.
    pub device_indices: Vec<u32>,
    /// Sleep floor between capture iterations.
    pub capture_interval_ms: u64,
    /// Time the device gets to settle after a resolution change.
    pub settle_ms: u64,
    /// Bounded wait for the capture thread on stop.
    pub stop_timeout_ms: u64,
    /// Bounded lock acquisition for the exit cleanup.
    pub cleanup_lock_timeout_ms: u64,
    pub synthetic: SyntheticConfig,
}

/// Frames produced by the synthetic backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub color: [u8; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub fps: u32,
    pub jpeg_quality: u8,
    pub placeholder_width: u32,
    pub placeholder_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// `STUDIO` or `VERTEX`; anything else disables analysis.
    pub backend: String,
    pub api_key: Option<String>,
    pub project: Option<String>,
    pub location: String,
    pub access_token: Option<String>,
    pub studio_model: String,
    pub vertex_model: String,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 5000,
            },
            camera: CameraConfig {
                backend: CameraBackend::default(),
                device_indices: vec![0, 1],
                capture_interval_ms: 10,
                settle_ms: 500,
                stop_timeout_ms: 2000,
                cleanup_lock_timeout_ms: 1000,
                synthetic: SyntheticConfig {
                    width: 640,
                    height: 480,
                    color: [40, 120, 200],
                },
            },
            stream: StreamConfig {
                fps: 20,
                jpeg_quality: 80,
                placeholder_width: 640,
                placeholder_height: 480,
            },
            ai: AiConfig {
                backend: "STUDIO".into(),
                api_key: None,
                project: None,
                location: "us-central1".into(),
                access_token: None,
                studio_model: "gemini-1.5-flash-latest".into(),
                vertex_model: "gemini-1.5-flash-001".into(),
                timeout_secs: 30,
            },
        }
    }
}

impl Config {
    /// Layer defaults, `trafficcam.toml` and `TRAFFICCAM__*` variables, then
    /// apply the legacy AI environment variables on top.
    pub fn load() -> Result<Self, config::ConfigError> {
        let layered = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("camera.device_indices"),
            )
            .build()?;

        let mut config: Config = layered.try_deserialize()?;
        config.ai.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }
}

impl CameraConfig {
    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn cleanup_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.cleanup_lock_timeout_ms)
    }
}

impl StreamConfig {
    /// Target spacing between two emitted stream parts.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }
}

impl AiConfig {
    /// Variables understood by earlier deployments of the service.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(backend) = var("AI_BACKEND") {
            self.backend = backend;
        }
        self.backend = self.backend.trim().to_uppercase();
        if let Some(key) = var("GOOGLE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(project) = var("GOOGLE_CLOUD_PROJECT") {
            self.project = Some(project);
        }
        if let Some(location) = var("GOOGLE_CLOUD_LOCATION") {
            self.location = location;
        }
        if let Some(token) = var("GOOGLE_CLOUD_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
