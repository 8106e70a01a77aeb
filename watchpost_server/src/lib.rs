// THEORY:
// This crate is the network face of the `watchpost` engine. It owns nothing but
// wiring: an `AppState` holding the shared `Monitor` and `SettingsStore`, the axum
// `Router` that maps URLs onto handlers, and the listener task.
//
// Authentication and password recovery are handled by a gateway in front of this
// server; every request that reaches a handler is treated as authorized.

pub mod api;
pub mod config;
pub mod logging;
pub mod mjpeg;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::task::JoinHandle;
use tracing::info;
use watchpost::{Monitor, SettingsStore};

pub use config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
    pub settings: Arc<SettingsStore>,
    /// Wait between two looks at the frame buffer when a viewer is ahead of the camera.
    pub stream_poll: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/test", get(api::liveness))
        .route("/status", get(api::monitoring_status))
        .route("/start_monitoring", get(api::start_monitoring))
        .route("/stop_monitoring", get(api::stop_monitoring))
        .route("/pause_monitoring", get(api::pause_monitoring))
        .route("/resume_monitoring", get(api::resume_monitoring))
        .route("/set_threshold", post(api::set_threshold))
        .route("/video_feed", get(api::video_feed))
        .route("/check_alerts", get(api::check_alerts))
        .route("/get_recovery_email", get(api::get_recovery_email))
        .route("/update_recovery_email", post(api::update_recovery_email))
        .route("/get_smtp_config", get(api::get_smtp_config))
        .route("/update_smtp_config", post(api::update_smtp_config))
        .route("/test_notification", post(api::test_notification))
        .with_state(state)
}

/// Binds `bind_addr` and serves the API on a background task until `shutdown` resolves.
pub async fn start_server<F>(
    state: AppState,
    bind_addr: &str,
    shutdown: F,
) -> anyhow::Result<(SocketAddr, JoinHandle<anyhow::Result<()>>)>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;
    let app = router(state);
    let server = tokio::spawn(async move {
        axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
        Ok(())
    });
    info!("watchpost listening on http://{local_addr}");
    Ok((local_addr, server))
}
