use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber: console output with source locations, filtered by
/// `RUST_LOG` (defaults to `info`).
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_file(true).with_line_number(true))
        .try_init()?;

    match std::env::var("RUST_LOG") {
        Ok(var) => tracing::debug!("logging initiated with RUST_LOG=\"{var}\""),
        Err(_) => tracing::debug!("logging initiated"),
    }
    Ok(())
}
