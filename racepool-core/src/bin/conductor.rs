//! Block conductor binary

use racepool_core::config::init_logging;
use racepool_core::runtime::ShutdownSignal;
use racepool_core::worker::{Conductor, ConductorConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()));

    let config = ConductorConfig::from_env()?;
    config.validate()?;
    info!("Conducting blocks for {}", config.client.coordinator_addr);

    let conductor = Conductor::new(config)?;
    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.shutdown();
        });
    }

    let records = conductor.run(shutdown).await?;
    info!("Conductor stopped after {} results", records.len());
    Ok(())
}
