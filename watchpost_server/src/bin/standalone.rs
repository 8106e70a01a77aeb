use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use watchpost::{LogNotifier, Monitor, MonitorConfig, NotificationDispatcher, SettingsStore};
use watchpost_server::{AppState, ServerConfig, logging, start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init()?;
    let cfg = ServerConfig::parse();

    let settings = Arc::new(
        SettingsStore::load(&cfg.settings)
            .with_context(|| format!("loading settings from {}", cfg.settings.display()))?,
    );

    let monitor_config = MonitorConfig::default();
    let (dispatcher, delivery) = NotificationDispatcher::spawn(
        Arc::new(LogNotifier),
        monitor_config.capture.dispatch_queue_capacity,
    );
    let monitor = Arc::new(Monitor::new(
        cfg.source.factory(),
        dispatcher,
        settings.get().threshold(),
        monitor_config,
    ));
    info!(source = %cfg.source, threshold = %settings.get().threshold(), "monitor ready");

    if cfg.autostart {
        info!("{}", monitor.start().await.message());
    }

    let state = AppState {
        monitor: Arc::clone(&monitor),
        settings,
        stream_poll: cfg.stream_poll(),
    };
    // Monitoring stops before the listener drains, so open video streams can finish.
    let shutdown = {
        let monitor = Arc::clone(&monitor);
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("could not listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            info!("shutting down: {}", monitor.stop().await.message());
        }
    };
    let (_, server) = start_server(state, &cfg.bind, shutdown).await?;
    let served = server.await;

    // Dropping the last dispatcher handle lets the delivery task drain and exit.
    drop(monitor);
    if let Err(e) = delivery.await {
        warn!("notification delivery task failed: {e}");
    }
    served??;
    Ok(())
}
