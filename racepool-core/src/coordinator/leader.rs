//! Round controller
//!
//! The `Coordinator` owns the registry, template store, round state and
//! result slot. `run` drives rounds back to back; the RPC operations are
//! plain async methods that handlers call on a shared instance.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::barrier::Arrival;
use super::delivery::ResultDelivery;
use super::registry::SessionRegistry;
use super::round::{Arbitration, Round};
use super::template::TemplateStore;
use crate::auth::{AcceptAll, Authenticator, KeyedAuthenticator};
use crate::config::{CoordinatorConfig, TemplateSource};
use crate::error::{PoolError, Result};
use crate::metrics::standard;
use crate::protocol::{
    BlockTemplate, CancelNotice, CoordinatorStatus, Credential, IssueBlockReply, Solution,
    WinRecord, WorkAssignment, WorkerIdentity,
};
use crate::runtime::ShutdownSignal;
use crate::work::{self, CoinbaseBuilder, WorkMaterialProvider};

/// What blocked callers see when they look for a round
#[derive(Clone)]
enum RoundSlot {
    /// No round published yet
    Waiting,
    Active(Arc<Round>),
    /// Controller has returned; no further rounds
    Stopped,
}

/// How a round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundOutcome {
    /// Nobody entered; the template was not spent
    Empty,
    Mined,
}

/// Main coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    registry: SessionRegistry,
    templates: TemplateStore,
    delivery: ResultDelivery,
    provider: Arc<dyn WorkMaterialProvider>,
    rounds: watch::Sender<RoundSlot>,
    /// Cancellation notice of the most recently finished round
    last_notice: RwLock<Option<CancelNotice>>,
    rounds_completed: AtomicU64,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        authenticator: Arc<dyn Authenticator>,
        provider: Arc<dyn WorkMaterialProvider>,
    ) -> Self {
        let (rounds, _) = watch::channel(RoundSlot::Waiting);
        Self {
            registry: SessionRegistry::new(config.max_workers, authenticator),
            templates: TemplateStore::new(),
            delivery: ResultDelivery::new(),
            provider,
            rounds,
            last_notice: RwLock::new(None),
            rounds_completed: AtomicU64::new(0),
            config,
        }
    }

    /// Keyed authentication when keys are configured, coinbase work material
    pub fn from_config(config: CoordinatorConfig) -> Self {
        let authenticator: Arc<dyn Authenticator> = if config.auth_keys.is_empty() {
            Arc::new(AcceptAll)
        } else {
            Arc::new(KeyedAuthenticator::new(config.auth_keys.clone()))
        };
        let provider = Arc::new(CoinbaseBuilder::new(config.pool_index));
        Self::new(config, authenticator, provider)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ========== RPC operations ==========

    pub fn login(&self, name: &str, credential: Option<&Credential>) -> Result<WorkerIdentity> {
        self.registry.login(name, credential)
    }

    /// Block until the next round's entry barrier opens, then hand out work
    ///
    /// A caller that misses a round's entry barrier waits for the following
    /// round. Login is re-checked each time since absent workers get evicted.
    pub async fn get_work(&self, name: &str) -> Result<WorkAssignment> {
        let mut rounds = self.rounds.subscribe();
        loop {
            let worker = self
                .registry
                .get(name)
                .ok_or_else(|| PoolError::NotLoggedIn { name: name.to_string() })?;

            let slot = rounds.borrow_and_update().clone();
            match slot {
                RoundSlot::Stopped => return Err(PoolError::ShutdownInProgress),
                RoundSlot::Active(round) => match round.entry().arrive(name) {
                    Arrival::Admitted(gate) => {
                        tokio::select! {
                            biased;
                            _ = gate.opened() => return self.assignment(&round, &worker),
                            _ = stopped(&mut rounds) => return Err(PoolError::ShutdownInProgress),
                        }
                    }
                    Arrival::Closed => {
                        debug!("{} missed round {}, waiting for the next", name, round.number());
                    }
                },
                RoundSlot::Waiting => {}
            }

            if rounds.changed().await.is_err() {
                return Err(PoolError::ShutdownInProgress);
            }
        }
    }

    fn assignment(&self, round: &Round, worker: &WorkerIdentity) -> Result<WorkAssignment> {
        let template = round.template();
        let coinbase = self.provider.build_work(template, worker)?;
        debug!("Work for {} in round {}", worker.name, round.number());
        Ok(work::assign(round.number(), template, worker, coinbase))
    }

    /// Submit a solution; true only for the first one of the current round
    pub fn announce(&self, solution: Solution) -> bool {
        let Some(round) = self.current_round() else {
            standard::ANNOUNCES_STALE.inc();
            return false;
        };

        let identity = solution.identity.clone();
        let claimed = solution.round;
        let winner_id = self.registry.get(&identity).map(|w| w.id);

        match round.arbitrate(solution, winner_id) {
            Arbitration::Accepted => {
                standard::ANNOUNCES_ACCEPTED.inc();
                info!("{} won round {}", identity, round.number());
                true
            }
            outcome => {
                standard::ANNOUNCES_STALE.inc();
                debug!(
                    "Rejected solution from {} for round {} ({:?}, current round {})",
                    identity,
                    claimed,
                    outcome,
                    round.number()
                );
                false
            }
        }
    }

    /// Block until the exit barrier of the caller's round opens
    ///
    /// `round` names the round the caller mined; if it already finished the
    /// notice comes back at once. Without it the caller joins the current
    /// round's exit barrier.
    pub async fn get_cancel(&self, name: &str, round: Option<u64>) -> Result<CancelNotice> {
        let mut rounds = self.rounds.subscribe();
        loop {
            let slot = rounds.borrow_and_update().clone();
            match slot {
                RoundSlot::Stopped => {
                    return self
                        .finished_notice(round)
                        .ok_or(PoolError::ShutdownInProgress)
                }
                RoundSlot::Active(current) => {
                    let wanted = round.unwrap_or(current.number());
                    if wanted < current.number() {
                        return Ok(self.finished_notice(Some(wanted)).unwrap_or(CancelNotice {
                            round: wanted,
                            winner: None,
                            issuer: current.template().issuer.clone(),
                        }));
                    }

                    if wanted == current.number() {
                        // Only workers let into the round count toward its exit quorum
                        let gate = if current.is_released(name) {
                            match current.exit().arrive(name) {
                                Arrival::Admitted(gate) => gate,
                                Arrival::Closed => current.exit().observe(),
                            }
                        } else {
                            debug!("{} waits on round {} without a seat", name, current.number());
                            current.exit().observe()
                        };
                        tokio::select! {
                            biased;
                            _ = gate.opened() => return Ok(notice(&current)),
                            _ = stopped(&mut rounds) => return Err(PoolError::ShutdownInProgress),
                        }
                    }
                }
                RoundSlot::Waiting => {}
            }

            if rounds.changed().await.is_err() {
                return Err(PoolError::ShutdownInProgress);
            }
        }
    }

    fn finished_notice(&self, round: Option<u64>) -> Option<CancelNotice> {
        self.last_notice
            .read()
            .clone()
            .filter(|n| round.map_or(true, |r| r == n.round))
    }

    /// Buffer a template for the next round; never blocks
    pub fn issue_block(&self, template: BlockTemplate) -> IssueBlockReply {
        info!(
            "Block at height {} issued by {}",
            template.height,
            if template.issuer.is_empty() { "unknown" } else { template.issuer.as_str() }
        );
        let superseded = self.templates.set_template(template);
        IssueBlockReply {
            accepted: true,
            superseded,
        }
    }

    /// Block until a win record is available and take it
    pub async fn await_result(&self, observer: &str) -> Result<WinRecord> {
        let mut rounds = self.rounds.subscribe();
        tokio::select! {
            biased;
            result = self.delivery.await_result(observer) => result,
            _ = stopped(&mut rounds) => Err(PoolError::ShutdownInProgress),
        }
    }

    pub fn current_round(&self) -> Option<Arc<Round>> {
        match &*self.rounds.borrow() {
            RoundSlot::Active(round) => Some(round.clone()),
            _ => None,
        }
    }

    pub fn current_template(&self) -> Option<Arc<BlockTemplate>> {
        self.templates.current_template()
    }

    pub fn rounds_completed(&self) -> u64 {
        self.rounds_completed.load(Ordering::Acquire)
    }

    pub fn status(&self) -> CoordinatorStatus {
        let round = self.current_round();
        CoordinatorStatus {
            round: round.as_ref().map(|r| r.number()),
            phase: round.as_ref().map(|r| r.phase()),
            rounds_completed: self.rounds_completed(),
            template_height: self.templates.current_template().map(|t| t.height),
            expected_workers: self.config.expected_workers,
            workers: self.registry.workers(),
        }
    }

    // ========== Controller ==========

    /// Drive rounds until shutdown or the round cap
    pub async fn run(&self, shutdown: ShutdownSignal) -> Result<()> {
        info!(
            "Round controller starting: {} workers per round, barrier timeout {:?}, {:?} templates",
            self.config.expected_workers, self.config.barrier_timeout, self.config.template_source
        );

        let result = tokio::select! {
            result = self.drive_rounds() => result,
            _ = shutdown.recv() => {
                info!("Round controller stopping");
                Ok(())
            }
        };

        self.rounds.send_replace(RoundSlot::Stopped);
        result
    }

    async fn drive_rounds(&self) -> Result<()> {
        let fresh = self.config.template_source == TemplateSource::External;
        let mut number = 0u64;
        let mut unspent: Option<Arc<BlockTemplate>> = None;

        loop {
            if let Some(max) = self.config.max_rounds {
                if self.rounds_completed() >= max {
                    info!("Completed {} rounds, stopping", max);
                    return Ok(());
                }
            }

            let template = match unspent.take() {
                Some(template) if !self.templates.has_pending() => template,
                _ => {
                    self.templates
                        .next_template(fresh, self.config.template_liveness)
                        .await
                }
            };

            number += 1;
            let round = Arc::new(Round::new(number, template.clone()));
            if self.run_round(&round).await? == RoundOutcome::Empty {
                unspent = Some(template);
            }
        }
    }

    async fn run_round(&self, round: &Arc<Round>) -> Result<RoundOutcome> {
        let number = round.number();
        let timeout = self.config.barrier_timeout;
        standard::CURRENT_ROUND.set(number as i64);
        self.rounds.send_replace(RoundSlot::Active(round.clone()));
        debug!("Round {} collecting entrants at height {}", number, round.template().height);

        // Entry
        let (entry, watermark) = round
            .entry()
            .rendezvous_with(self.config.expected_workers, timeout, || self.registry.watermark())
            .await;
        standard::ENTRY_BARRIER_WAIT.observe_duration(entry.waited);

        if entry.timed_out {
            if let Some(shortfall) = entry.shortfall() {
                warn!("Round {}: {}", number, shortfall);
            }
            for dead in self.registry.evict_absent(&entry.arrived, watermark) {
                warn!("Round {}: {} (id={}) never arrived", number, dead.name, dead.id);
            }
        }

        if entry.is_empty() {
            round.exit().open();
            standard::ROUNDS_EMPTY.inc();
            debug!("Round {} had no entrants", number);
            return Ok(RoundOutcome::Empty);
        }

        round.begin_mining(entry.arrived);
        round.entry().open();
        standard::ROUNDS_STARTED.inc();

        // Mining
        match self.config.mining_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, round.decided()).await.is_err() && round.force_close() {
                    standard::ROUNDS_FORCED.inc();
                    warn!("Round {} found no solution within {:?}, moving on", number, limit);
                }
            }
            None => round.decided().await,
        }

        // Exit
        let exit = round.exit().rendezvous(round.released_count(), timeout).await;
        standard::EXIT_BARRIER_WAIT.observe_duration(exit.waited);
        if exit.timed_out {
            debug!(
                "Round {}: {} of {} workers acknowledged cancellation",
                number,
                exit.count(),
                exit.expected
            );
        }

        *self.last_notice.write() = Some(notice(round));
        round.exit().open();
        self.rounds_completed.fetch_add(1, Ordering::AcqRel);
        standard::ROUNDS_COMPLETED.inc();
        info!(
            "Round {} over, winner: {}",
            number,
            round.winner().as_deref().unwrap_or("none")
        );

        if let Some(record) = round.take_win() {
            self.delivery
                .deliver(record, self.config.wait_for_observer)
                .await?;
        }

        Ok(RoundOutcome::Mined)
    }
}

fn notice(round: &Round) -> CancelNotice {
    CancelNotice {
        round: round.number(),
        winner: round.winner(),
        issuer: round.template().issuer.clone(),
    }
}

/// Resolves once the controller has stopped for good
async fn stopped(rounds: &mut watch::Receiver<RoundSlot>) {
    let _ = rounds
        .wait_for(|slot| matches!(slot, RoundSlot::Stopped))
        .await
        .map(|_| ());
}
