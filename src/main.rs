//! Traffic camera service: live MJPEG feeds, camera control and on-demand
//! vehicle counting over HTTP.

use std::sync::Arc;

use color_eyre::{eyre::WrapErr, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trafficcam::analysis::build_client;
use trafficcam::pipeline::Placeholder;
use trafficcam::session::CameraSession;
use trafficcam::settings::SettingsStore;
use trafficcam::web::{create_router, AppState};
use trafficcam::{utils, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).wrap_err("failed to read .env");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trafficcam=info,tower_http=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Traffic camera service launching...");

    let config = Config::load().wrap_err("invalid configuration")?;
    info!(
        backend = ?config.camera.backend,
        indices = ?config.camera.device_indices,
        fps = config.stream.fps,
        "Configuration loaded"
    );

    let provider = utils::camera_provider(&config.camera)?;
    let session = Arc::new(CameraSession::new(provider, config.camera.clone()));

    let placeholder = Placeholder::render(
        config.stream.placeholder_width,
        config.stream.placeholder_height,
    );
    if placeholder.jpeg().is_none() {
        warn!("Placeholder image unavailable, stopped streams send empty parts");
    }

    let vision = build_client(&config.ai);
    match &vision {
        Some(client) => info!("AI backend: {} ({})", client.backend(), client.model_name()),
        None => warn!("AI backend: NONE, analysis requests answer 503"),
    }

    let state = AppState::new(
        Arc::clone(&session),
        Arc::new(SettingsStore::default()),
        vision,
        placeholder,
        config.stream.clone(),
    );
    let app = create_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{}", addr);
    info!("Camera starts stopped, use POST /api/camera/start");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = utils::shutdown_signal().await {
                warn!("Signal handler failed: {}", e);
            }
            state.begin_shutdown();
        })
        .await?;

    session.shutdown().await;
    info!("Traffic camera service shutting down");
    Ok(())
}
