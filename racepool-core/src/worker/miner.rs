//! Miner loop
//!
//! Logs in, then races round after round: wait for work, search until a
//! solution turns up or the round is cancelled, announce, and wait for the
//! exit barrier before asking for the next round.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::client::{ClientConfig, PoolClient};
use super::state::{MinerPhase, MinerState};
use crate::auth::issue_credential;
use crate::config::{parse_env, ConfigError};
use crate::error::{PoolError, Result};
use crate::protocol::{Credential, Solution, WorkAssignment};
use crate::runtime::ShutdownSignal;

/// Miner settings
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub client: ClientConfig,
    /// Name to register under
    pub name: String,
    /// Account id for keyed login
    pub user: Option<u32>,
    /// Shared secret for keyed login
    pub key: Option<String>,
    /// Dice per attempt; a win needs every one to show five
    pub tosses: u32,
    /// Interval between attempts
    pub tick: Duration,
    /// Wait between failed logins
    pub login_retry: Duration,
    /// Give up after this many failed logins in a row
    pub max_login_attempts: u32,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            name: format!("miner-{:04x}", rand::random::<u16>()),
            user: None,
            key: None,
            tosses: 2,
            tick: Duration::from_secs(1),
            login_retry: Duration::from_secs(5),
            max_login_attempts: 4,
        }
    }
}

impl MinerConfig {
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let mut config = MinerConfig::default();

        let pool_index = parse_env::<u16>("POOL_INDEX")?.unwrap_or(0);
        config.client.coordinator_addr = std::env::var("COORDINATOR_ADDR").unwrap_or_else(|_| {
            format!("http://localhost:{}", crate::DEFAULT_PORT_BASE + pool_index)
        });

        config.user = parse_env::<u32>("MINER_USER")?;
        config.key = std::env::var("MINER_KEY").ok();
        if let Ok(name) = std::env::var("MINER_NAME") {
            config.name = name;
        } else if let Some(user) = config.user {
            config.name = format!("user{}-{:04x}", user, rand::random::<u16>());
        }
        if let Some(val) = parse_env::<u32>("MINER_TOSSES")? {
            config.tosses = val;
        }
        if let Some(val) = parse_env::<u64>("MINER_TICK_MS")? {
            config.tick = Duration::from_millis(val);
        }
        if let Some(val) = parse_env::<u64>("MINER_LOGIN_RETRY_SECS")? {
            config.login_retry = Duration::from_secs(val);
        }
        if let Some(val) = parse_env::<u32>("MINER_MAX_LOGIN_ATTEMPTS")? {
            config.max_login_attempts = val;
        }

        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError("MINER_NAME must not be empty".into()));
        }
        if self.tosses == 0 {
            return Err(ConfigError::ValidationError(
                "MINER_TOSSES must be greater than 0".into(),
            ));
        }
        if self.user.is_some() != self.key.is_some() {
            return Err(ConfigError::ValidationError(
                "MINER_USER and MINER_KEY must be set together".into(),
            ));
        }
        if self.max_login_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "MINER_MAX_LOGIN_ATTEMPTS must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Name and credential for one login attempt
    ///
    /// Under keyed login the coordinator only accepts the token itself as
    /// the worker name.
    pub fn login_request(&self) -> (String, Option<Credential>) {
        match self.credential() {
            Some(credential) => (credential.token.clone(), Some(credential)),
            None => (self.name.clone(), None),
        }
    }

    /// Fresh credential for the current time, when keyed login is configured
    pub fn credential(&self) -> Option<Credential> {
        let (user, key) = (self.user?, self.key.as_deref()?);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Some(issue_credential(user, key, now))
    }
}

/// Simulated proof-of-work: roll dice once per tick until all show five
#[derive(Debug, Clone, Copy)]
pub struct DiceSearch {
    pub tosses: u32,
    pub tick: Duration,
}

impl DiceSearch {
    /// One attempt
    pub fn roll<R: Rng>(&self, rng: &mut R) -> bool {
        (0..self.tosses).all(|_| rng.gen_range(1..=6) == 5)
    }

    /// Search until a winning nonce turns up or `cancelled` changes
    pub async fn run<R: Rng>(
        &self,
        rng: &mut R,
        cancelled: &mut watch::Receiver<bool>,
    ) -> Option<u32> {
        let mut tick = tokio::time::interval(self.tick);
        tick.tick().await;

        for nonce in 0..=u32::MAX {
            if self.roll(rng) {
                return Some(nonce);
            }
            tokio::select! {
                _ = cancelled.changed() => return None,
                _ = tick.tick() => {}
            }
        }
        None
    }
}

pub struct Miner {
    config: MinerConfig,
    client: PoolClient,
    state: Arc<MinerState>,
    search: DiceSearch,
}

impl Miner {
    pub fn new(config: MinerConfig) -> Result<Self> {
        let client = PoolClient::new(config.client.clone())?;
        let search = DiceSearch {
            tosses: config.tosses,
            tick: config.tick,
        };
        Ok(Self {
            config,
            client,
            state: Arc::new(MinerState::new()),
            search,
        })
    }

    pub fn state(&self) -> &Arc<MinerState> {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Mine until shutdown, or until login keeps failing
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        let result = tokio::select! {
            result = self.mine_forever() => result,
            _ = shutdown.recv() => Ok(()),
        };
        self.state.set_phase(MinerPhase::ShuttingDown).await;
        info!(
            "{} stopping after {} rounds, {} won",
            self.config.name,
            self.state.rounds_mined(),
            self.state.rounds_won()
        );
        result
    }

    async fn mine_forever(&self) -> Result<()> {
        loop {
            self.login().await?;
            loop {
                if let Err(e) = self.mine_round().await {
                    if e.requires_login() {
                        warn!("{} was evicted, logging in again", self.config.name);
                    } else {
                        warn!("Round failed for {}: {}", self.config.name, e);
                        tokio::time::sleep(self.config.login_retry).await;
                    }
                    self.state.logged_out().await;
                    break;
                }
            }
        }
    }

    /// Log in, retrying until `max_login_attempts` consecutive failures
    pub async fn login(&self) -> Result<u32> {
        let mut failures = 0;
        loop {
            let (name, credential) = self.config.login_request();
            match self.client.login(&name, credential).await {
                Ok(id) => {
                    info!("Login successful for {} as {}, assigned id {}", self.config.name, name, id);
                    self.state.set_session(id, name).await;
                    return Ok(id);
                }
                // Still registered from before a transport failure
                Err(PoolError::AlreadyLoggedIn { .. }) => {
                    let id = self.state.worker_id().await.unwrap_or_default();
                    self.state.set_session(id, name).await;
                    return Ok(id);
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.config.max_login_attempts {
                        warn!("Coordinator unreachable, giving up after {} attempts", failures);
                        return Err(e);
                    }
                    warn!("Could not log in ({}), retrying in {:?}", e, self.config.login_retry);
                    tokio::time::sleep(self.config.login_retry).await;
                }
            }
        }
    }

    /// Take part in one round
    pub async fn mine_round(&self) -> Result<()> {
        let name = self.session_name().await;
        self.state.set_phase(MinerPhase::WaitingForWork).await;
        debug!("Fetching work for {}", name);
        let work = self.client.get_work(&name).await?;
        self.state.start_round(work.round).await;
        info!("{} mining round {} at height {}", name, work.round, work.height);

        let (cancelled_tx, mut cancelled) = watch::channel(false);
        let cancel = {
            let client = self.client.clone();
            let name = name.clone();
            let round = work.round;
            tokio::spawn(async move {
                let notice = client.get_cancel(&name, Some(round)).await;
                let _ = cancelled_tx.send(true);
                notice
            })
        };

        let mut rng = StdRng::from_entropy();
        if let Some(nonce) = self.search.run(&mut rng, &mut cancelled).await {
            self.announce(&name, &work, nonce).await?;
        }

        self.state.set_phase(MinerPhase::WaitingForCancel).await;
        let notice = cancel.await.map_err(|e| PoolError::Internal {
            message: format!("cancel watcher failed: {}", e),
        })??;
        info!(
            "{}: round {} over, winner {}",
            name,
            notice.round,
            notice.winner.as_deref().unwrap_or("none")
        );
        Ok(())
    }

    async fn session_name(&self) -> String {
        self.state
            .session()
            .await
            .unwrap_or_else(|| self.config.name.clone())
    }

    async fn announce(&self, session: &str, work: &WorkAssignment, nonce: u32) -> Result<bool> {
        let solution = Solution {
            round: work.round,
            nonce,
            payload: work.coinbase.clone(),
            identity: session.to_string(),
        };
        debug!("{} sending solution ({})", self.config.name, nonce);

        let accepted = self.client.announce(solution).await?;
        if accepted {
            let wins = self.state.record_win();
            info!("== {} == FOUND -> {} ({} wins)", self.config.name, nonce, wins);
        } else {
            info!("{} was late with {}", self.config.name, nonce);
        }
        Ok(accepted)
    }
}
