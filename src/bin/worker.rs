//! Pipeline worker entrypoint
//!
//! Boots the application container, declares the broker topology, registers
//! the session-ingest and skill-learn consumers plus the stuck-message
//! reaper, then runs until interrupted.

use lore::app::App;
use lore::config::CoreConfig;
use lore::controller::ingest;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Optional YAML config path as the sole argument; env vars fill the rest
    let yaml = match std::env::args().nth(1) {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };
    let config = CoreConfig::load(yaml.as_deref())?;

    let app = App::init(config).await?;
    App::register_consumers(&app).await?;
    let reaper = ingest::spawn_reaper(app.clone());

    tokio::signal::ctrl_c().await?;
    reaper.abort();
    app.shutdown().await;
    Ok(())
}
