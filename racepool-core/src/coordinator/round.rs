//! One round of the race
//!
//! A round owns its template snapshot, a fresh pair of barriers and the
//! winner decision. Rounds are never reused: the controller builds a new
//! one for every race, so a waiter holding an old round can only ever see
//! that round's signals.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

use super::barrier::{Direction, QuorumBarrier};
use crate::protocol::{BlockTemplate, Solution, WinRecord};

/// Round phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Entry barrier collecting workers
    CollectingEntrants,
    /// Workers released and searching
    Mining,
    /// Winner decided; exit barrier collecting cancellations
    CollectingExits,
}

/// Outcome of an announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arbitration {
    Accepted,
    /// Another solution already won this round
    AlreadyDecided,
    /// Solution was mined against a different round
    WrongRound,
    /// Round is not accepting solutions yet
    NotMining,
}

impl Arbitration {
    pub fn accepted(self) -> bool {
        self == Arbitration::Accepted
    }
}

struct Decision {
    phase: RoundPhase,
    winner_found: bool,
    /// Closed without a winner
    forced: bool,
    winner: Option<String>,
    win: Option<WinRecord>,
    released: HashSet<String>,
}

pub struct Round {
    number: u64,
    template: Arc<BlockTemplate>,
    entry: QuorumBarrier,
    exit: QuorumBarrier,
    decision: Mutex<Decision>,
    decided: Notify,
}

impl Round {
    pub fn new(number: u64, template: Arc<BlockTemplate>) -> Self {
        Self {
            number,
            template,
            entry: QuorumBarrier::new(Direction::Entry),
            exit: QuorumBarrier::new(Direction::Exit),
            decision: Mutex::new(Decision {
                phase: RoundPhase::CollectingEntrants,
                winner_found: false,
                forced: false,
                winner: None,
                win: None,
                released: HashSet::new(),
            }),
            decided: Notify::new(),
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn template(&self) -> &Arc<BlockTemplate> {
        &self.template
    }

    pub fn entry(&self) -> &QuorumBarrier {
        &self.entry
    }

    pub fn exit(&self) -> &QuorumBarrier {
        &self.exit
    }

    pub fn phase(&self) -> RoundPhase {
        self.decision.lock().phase
    }

    /// Clear the winner flag and record who was let in
    pub fn begin_mining(&self, released: HashSet<String>) {
        let mut decision = self.decision.lock();
        decision.winner_found = false;
        decision.released = released;
        decision.phase = RoundPhase::Mining;
        info!(
            "Round {} mining with {} workers at height {}",
            self.number,
            decision.released.len(),
            self.template.height
        );
    }

    /// Accept the first solution for this round, reject every later one
    pub fn arbitrate(&self, solution: Solution, winner_id: Option<u32>) -> Arbitration {
        if solution.round != self.number {
            return Arbitration::WrongRound;
        }

        let mut decision = self.decision.lock();
        if decision.winner_found {
            return Arbitration::AlreadyDecided;
        }
        if decision.phase != RoundPhase::Mining {
            return Arbitration::NotMining;
        }

        decision.winner_found = true;
        decision.phase = RoundPhase::CollectingExits;
        decision.winner = Some(solution.identity.clone());
        decision.win = Some(WinRecord {
            round: self.number,
            winner: solution.identity.clone(),
            winner_id,
            template: (*self.template).clone(),
            solution,
        });
        drop(decision);

        self.decided.notify_waiters();
        Arbitration::Accepted
    }

    /// Close arbitration without a winner. Returns false if a winner got in first.
    pub fn force_close(&self) -> bool {
        let mut decision = self.decision.lock();
        if decision.winner_found {
            return false;
        }
        decision.winner_found = true;
        decision.forced = true;
        decision.phase = RoundPhase::CollectingExits;
        drop(decision);

        debug!("Round {} closed without a winner", self.number);
        self.decided.notify_waiters();
        true
    }

    /// Resolve once a winner is accepted or the round is forced over
    pub async fn decided(&self) {
        loop {
            let notified = self.decided.notified();
            if self.decision.lock().winner_found {
                return;
            }
            notified.await;
        }
    }

    pub fn winner_found(&self) -> bool {
        self.decision.lock().winner_found
    }

    pub fn was_forced(&self) -> bool {
        self.decision.lock().forced
    }

    /// Winner's name; stays readable after the record is handed off
    pub fn winner(&self) -> Option<String> {
        self.decision.lock().winner.clone()
    }

    /// Hand the win record to delivery; yields it at most once
    pub fn take_win(&self) -> Option<WinRecord> {
        self.decision.lock().win.take()
    }

    /// Whether `name` was let through the entry barrier
    pub fn is_released(&self, name: &str) -> bool {
        self.decision.lock().released.contains(name)
    }

    pub fn released_count(&self) -> usize {
        self.decision.lock().released.len()
    }

    /// Exit barrier has opened; the round is over for its workers
    pub fn is_finished(&self) -> bool {
        self.exit.is_open()
    }
}
