//! HTTP surface: video feeds, camera control, settings and analysis.

mod error;
mod routes;

pub use error::ApiError;
pub use routes::create_router;

use std::sync::Arc;

use tokio::sync::watch;

use crate::analysis::VisionClient;
use crate::pipeline::Placeholder;
use crate::session::CameraSession;
use crate::settings::SettingsStore;
use crate::StreamConfig;

/// Shared handler state. Cloned per request, every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<CameraSession>,
    pub settings: Arc<SettingsStore>,
    pub vision: Option<Arc<dyn VisionClient>>,
    pub placeholder: Placeholder,
    pub stream: StreamConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(
        session: Arc<CameraSession>,
        settings: Arc<SettingsStore>,
        vision: Option<Arc<dyn VisionClient>>,
        placeholder: Placeholder,
        stream: StreamConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            session,
            settings,
            vision,
            placeholder,
            stream,
            shutdown: Arc::new(shutdown),
        }
    }

    /// End every open video feed so graceful shutdown can drain connections.
    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves once [`begin_shutdown`](Self::begin_shutdown) was called.
    pub(crate) fn shutdown_requested(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    pub fn ai_backend_mode(&self) -> String {
        self.vision
            .as_ref()
            .map_or_else(|| "NONE".to_string(), |client| client.backend().to_string())
    }

    pub fn ai_model_name(&self) -> String {
        self.vision
            .as_ref()
            .map_or_else(|| "N/A".to_string(), |client| client.model_name().to_string())
    }
}
