//! Block conductor
//!
//! Stands in for the network: issues a template per race and collects
//! results. A dedicated task keeps a result request open at all times so no
//! record waits on the coordinator longer than necessary; the issuing loop
//! moves on after a result or after `result_timeout`.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::client::{ClientConfig, PoolClient};
use crate::config::{parse_env, ConfigError};
use crate::error::{PoolError, Result};
use crate::protocol::{BlockTemplate, WinRecord};
use crate::runtime::ShutdownSignal;

/// Conductor settings
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    pub client: ClientConfig,
    /// Observer name reported to the coordinator; also the template issuer
    pub observer: String,
    /// Issue the next block if no result arrived within this period
    pub result_timeout: Duration,
    /// Height of the first issued block
    pub start_height: u32,
    /// Stop after issuing this many blocks
    pub max_blocks: Option<u64>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            observer: "EXTERNAL".into(),
            result_timeout: Duration::from_secs(14),
            start_height: 1,
            max_blocks: None,
        }
    }
}

impl ConductorConfig {
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let mut config = ConductorConfig::default();

        let pool_index = parse_env::<u16>("POOL_INDEX")?.unwrap_or(0);
        config.client.coordinator_addr = std::env::var("COORDINATOR_ADDR").unwrap_or_else(|_| {
            format!("http://localhost:{}", crate::DEFAULT_PORT_BASE + pool_index)
        });
        if let Ok(val) = std::env::var("CONDUCTOR_NAME") {
            config.observer = val;
        }
        if let Some(val) = parse_env::<u64>("CONDUCTOR_RESULT_TIMEOUT_SECS")? {
            config.result_timeout = Duration::from_secs(val);
        }
        if let Some(val) = parse_env::<u32>("CONDUCTOR_START_HEIGHT")? {
            config.start_height = val;
        }
        config.max_blocks = parse_env::<u64>("CONDUCTOR_MAX_BLOCKS")?;

        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.result_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "CONDUCTOR_RESULT_TIMEOUT_SECS must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

pub struct Conductor {
    config: ConductorConfig,
    client: PoolClient,
}

impl Conductor {
    pub fn new(config: ConductorConfig) -> Result<Self> {
        let client = PoolClient::new(config.client.clone())?;
        Ok(Self { config, client })
    }

    /// Issue blocks until shutdown or `max_blocks`; returns the records seen
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<Vec<WinRecord>> {
        let (results_tx, mut results) = mpsc::channel(16);
        let watcher = tokio::spawn(watch_results(
            self.client.clone(),
            self.config.observer.clone(),
            results_tx,
        ));

        let mut records = Vec::new();
        let mut height = self.config.start_height;
        let mut issued = 0u64;

        let outcome = loop {
            if self.config.max_blocks.is_some_and(|max| issued >= max) {
                break Ok(());
            }

            let template = BlockTemplate::synthetic(height, &self.config.observer);
            match self.client.issue_block(template).await {
                Ok(reply) => {
                    issued += 1;
                    info!("Issued block at height {} (superseded: {})", height, reply.superseded);
                }
                Err(e) => break Err(e),
            }

            tokio::select! {
                record = results.recv() => match record {
                    Some(record) => {
                        info!(
                            "Round {} won by {} at height {}",
                            record.round, record.winner, record.template.height
                        );
                        records.push(record);
                    }
                    None => {
                        break Err(PoolError::Internal {
                            message: "result watcher stopped".into(),
                        })
                    }
                },
                _ = tokio::time::sleep(self.config.result_timeout) => {
                    warn!("No result within {:?}, issuing the next block", self.config.result_timeout);
                }
                _ = shutdown.recv() => break Ok(()),
            }
            height = height.wrapping_add(1);
        };

        watcher.abort();
        outcome.map(|()| records)
    }
}

/// Keep one result request in flight until the receiver goes away
async fn watch_results(client: PoolClient, observer: String, results: mpsc::Sender<WinRecord>) {
    loop {
        match client.get_result(&observer).await {
            Ok(record) => {
                debug!("Received result for round {}", record.round);
                if results.send(record).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("Result request failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
        if results.is_closed() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConductorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.observer, "EXTERNAL");
        assert_eq!(config.result_timeout, Duration::from_secs(14));
    }

    #[test]
    fn test_synthetic_template_shape() {
        let template = BlockTemplate::synthetic(12, "EXTERNAL");
        assert_eq!(template.header.len(), 80);
        assert_eq!(template.merkle_skeleton.len() % 32, 0);
        assert_eq!(template.issuer, "EXTERNAL");
        assert!(!template.upper.is_empty());
    }
}
