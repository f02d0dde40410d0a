//! Coordinator service binary

use std::sync::Arc;

use racepool_core::config::{init_logging, CoordinatorConfig, ServerConfig, TemplateSource};
use racepool_core::protocol::BlockTemplate;
use racepool_core::runtime::ShutdownSignal;
use racepool_core::{server, Coordinator};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CoordinatorConfig::from_env()?;
    let server_config = ServerConfig::from_env(config.pool_index);
    init_logging(&server_config.log_level);

    config.validate()?;
    info!("Starting racepool coordinator {}", config.pool_index);

    let coordinator = Arc::new(Coordinator::from_config(config.clone()));

    // Fixed mode needs something to mine before any issuer shows up
    if config.template_source == TemplateSource::Fixed {
        let issuer = format!("pool-{}", config.pool_index);
        coordinator.issue_block(BlockTemplate::synthetic(1, &issuer));
    }

    let shutdown = ShutdownSignal::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
            }
            shutdown.shutdown();
        });
    }

    let controller = {
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = coordinator.run(shutdown.clone()).await;
            if let Err(e) = &result {
                error!("Round controller failed: {}", e);
            }
            shutdown.shutdown();
            result
        })
    };

    let listener = tokio::net::TcpListener::bind(&server_config.bind_addr).await?;
    server::serve(listener, coordinator, shutdown).await?;

    controller.await??;
    info!("Coordinator stopped");
    Ok(())
}
