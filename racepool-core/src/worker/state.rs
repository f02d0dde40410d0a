//! Miner state machine
//!
//! Tracks the local view of login, the round being mined and win counts.

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Miner phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerPhase {
    /// Not logged in (initially, or after eviction)
    LoggedOut,
    /// Waiting at the entry barrier
    WaitingForWork,
    /// Searching for a solution
    Mining,
    /// Waiting at the exit barrier
    WaitingForCancel,
    /// Shutting down
    ShuttingDown,
}

/// Local miner state
pub struct MinerState {
    /// Id assigned at the last successful login
    worker_id: RwLock<Option<u32>>,
    /// Name the coordinator knows us by; the login token under keyed auth
    session: RwLock<Option<String>>,
    phase: RwLock<MinerPhase>,
    /// Round of the last work received
    round: AtomicU64,
    rounds_mined: AtomicU64,
    rounds_won: AtomicU64,
}

impl MinerState {
    pub fn new() -> Self {
        Self {
            worker_id: RwLock::new(None),
            session: RwLock::new(None),
            phase: RwLock::new(MinerPhase::LoggedOut),
            round: AtomicU64::new(0),
            rounds_mined: AtomicU64::new(0),
            rounds_won: AtomicU64::new(0),
        }
    }

    /// Record a successful login
    pub async fn set_session(&self, id: u32, name: String) {
        *self.worker_id.write().await = Some(id);
        *self.session.write().await = Some(name);
        *self.phase.write().await = MinerPhase::WaitingForWork;
    }

    /// Forget the login; the coordinator evicted us
    pub async fn logged_out(&self) {
        *self.worker_id.write().await = None;
        *self.session.write().await = None;
        *self.phase.write().await = MinerPhase::LoggedOut;
    }

    pub async fn worker_id(&self) -> Option<u32> {
        *self.worker_id.read().await
    }

    pub async fn session(&self) -> Option<String> {
        self.session.read().await.clone()
    }

    pub async fn phase(&self) -> MinerPhase {
        *self.phase.read().await
    }

    pub async fn set_phase(&self, phase: MinerPhase) {
        *self.phase.write().await = phase;
    }

    /// Enter a round
    pub async fn start_round(&self, round: u64) {
        self.round.store(round, Ordering::Relaxed);
        self.rounds_mined.fetch_add(1, Ordering::Relaxed);
        *self.phase.write().await = MinerPhase::Mining;
    }

    pub fn round(&self) -> u64 {
        self.round.load(Ordering::Relaxed)
    }

    pub fn record_win(&self) -> u64 {
        self.rounds_won.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn rounds_mined(&self) -> u64 {
        self.rounds_mined.load(Ordering::Relaxed)
    }

    pub fn rounds_won(&self) -> u64 {
        self.rounds_won.load(Ordering::Relaxed)
    }
}

impl Default for MinerState {
    fn default() -> Self {
        Self::new()
    }
}
