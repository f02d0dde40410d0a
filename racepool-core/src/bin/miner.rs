//! Miner binary

use racepool_core::config::init_logging;
use racepool_core::runtime::ShutdownSignal;
use racepool_core::worker::{Miner, MinerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()));

    let config = MinerConfig::from_env()?;
    config.validate()?;
    info!(
        "Starting miner {} against {}",
        config.name, config.client.coordinator_addr
    );

    let miner = Miner::new(config)?;
    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.shutdown();
        });
    }

    miner.run(shutdown).await?;
    Ok(())
}
