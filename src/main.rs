// =============================================================================
// PulseFeed: service entrypoint
// =============================================================================

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulsefeed::config::EngineConfig;
use pulsefeed::Engine;

const CONFIG_PATH: &str = "pulsefeed.json";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("starting PulseFeed v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match EngineConfig::load(CONFIG_PATH) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "no usable config file: running with defaults");
            let cfg = EngineConfig::default();
            if let Err(e) = cfg.save(CONFIG_PATH) {
                warn!(error = %e, "failed to write default config");
            }
            cfg
        }
    };
    config.apply_env();

    let engine = Engine::new(config)?;
    engine.spawn_tasks();
    info!("pipeline running: press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    engine.shutdown().await;

    Ok(())
}
