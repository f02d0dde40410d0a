//! Environment-driven configuration
//!
//! Every binary builds its settings from `Default` and then applies
//! environment overrides, failing fast on values that do not parse.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    DEFAULT_BARRIER_TIMEOUT_MS, DEFAULT_EXPECTED_WORKERS, DEFAULT_MAX_WORKERS, DEFAULT_PORT_BASE,
    DEFAULT_TEMPLATE_LIVENESS_SECS,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Where round templates come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSource {
    /// Reuse the template in effect until a newer one is issued
    Fixed,
    /// Every mined round consumes a freshly issued template
    External,
}

impl FromStr for TemplateSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(TemplateSource::Fixed),
            "external" => Ok(TemplateSource::External),
            other => Err(format!("unknown template source '{}'", other)),
        }
    }
}

/// Round controller settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Pool instance index; offsets the port and tags coinbases
    pub pool_index: u32,
    /// Quorum size `N` for the entry barrier
    pub expected_workers: usize,
    /// Barrier timeout `T`, shared by entry and exit
    pub barrier_timeout: Duration,
    /// Registry capacity
    pub max_workers: usize,
    /// Interval between "no template" warnings
    pub template_liveness: Duration,
    pub template_source: TemplateSource,
    /// Force the round over if nobody wins within this period
    pub mining_timeout: Option<Duration>,
    /// Stop after this many rounds
    pub max_rounds: Option<u64>,
    /// Block the controller until an observer takes the win record
    pub wait_for_observer: bool,
    /// user id -> shared secret; empty accepts every login
    pub auth_keys: HashMap<u32, String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pool_index: 0,
            expected_workers: DEFAULT_EXPECTED_WORKERS,
            barrier_timeout: Duration::from_millis(DEFAULT_BARRIER_TIMEOUT_MS),
            max_workers: DEFAULT_MAX_WORKERS,
            template_liveness: Duration::from_secs(DEFAULT_TEMPLATE_LIVENESS_SECS),
            template_source: TemplateSource::External,
            mining_timeout: None,
            max_rounds: None,
            wait_for_observer: true,
            auth_keys: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = CoordinatorConfig::default();

        if let Some(val) = parse_env::<u32>("POOL_INDEX")? {
            config.pool_index = val;
        }
        if let Some(val) = parse_env::<usize>("POOL_MINERS")? {
            config.expected_workers = val;
        }
        if let Some(val) = parse_env::<u64>("POOL_BARRIER_TIMEOUT_MS")? {
            config.barrier_timeout = Duration::from_millis(val);
        }
        if let Some(val) = parse_env::<usize>("POOL_MAX_WORKERS")? {
            config.max_workers = val;
        }
        if let Some(val) = parse_env::<u64>("POOL_TEMPLATE_LIVENESS_SECS")? {
            config.template_liveness = Duration::from_secs(val);
        }
        if let Some(val) = parse_env::<TemplateSource>("POOL_TEMPLATE_SOURCE")? {
            config.template_source = val;
        }
        if let Some(val) = parse_env::<u64>("POOL_MINING_TIMEOUT_SECS")? {
            config.mining_timeout = Some(Duration::from_secs(val));
        }
        if let Some(val) = parse_env::<u64>("POOL_MAX_ROUNDS")? {
            config.max_rounds = Some(val);
        }
        if let Ok(val) = env::var("POOL_WAIT_FOR_OBSERVER") {
            config.wait_for_observer = parse_flag("POOL_WAIT_FOR_OBSERVER", &val)?;
        }
        if let Ok(val) = env::var("POOL_AUTH_KEYS") {
            config.auth_keys = parse_auth_keys(&val)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_workers == 0 {
            return Err(ConfigError::ValidationError(
                "POOL_MINERS must be greater than 0".to_string(),
            ));
        }

        if self.barrier_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "POOL_BARRIER_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        if self.max_workers < self.expected_workers {
            return Err(ConfigError::ValidationError(format!(
                "POOL_MAX_WORKERS ({}) is below the quorum size ({})",
                self.max_workers, self.expected_workers
            )));
        }

        if self.template_liveness.is_zero() {
            return Err(ConfigError::ValidationError(
                "POOL_TEMPLATE_LIVENESS_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP listener settings for the coordinator binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub log_level: String,
}

impl ServerConfig {
    /// `BIND_ADDR` wins; otherwise the port is `50051 + pool_index`
    pub fn from_env(pool_index: u32) -> Self {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| format!("0.0.0.0:{}", DEFAULT_PORT_BASE + pool_index as u16));
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
        Self { bind_addr, log_level }
    }
}

/// Parse an optional environment variable, reporting the raw value on failure
pub fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar(key.to_string(), val)),
        Err(_) => Ok(None),
    }
}

/// Parse `"1=thekey,2=anotherthekey"` into a key table
pub fn parse_auth_keys(raw: &str) -> Result<HashMap<u32, String>, ConfigError> {
    let mut keys = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (user, key) = entry
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidEnvVar("POOL_AUTH_KEYS".into(), entry.into()))?;
        let user: u32 = user
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar("POOL_AUTH_KEYS".into(), entry.into()))?;
        keys.insert(user, key.trim().to_string());
    }
    Ok(keys)
}

/// Boolean switch: `1`/`true`/`yes`/`on` or `0`/`false`/`no`/`off`
pub fn parse_flag(name: &str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvVar(name.into(), val.into())),
    }
}

/// Install the fmt subscriber; `RUST_LOG` overrides the configured level
pub fn init_logging(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
