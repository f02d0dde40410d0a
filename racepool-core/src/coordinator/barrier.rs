//! Quorum barrier
//!
//! N-of-M rendezvous with timeout degradation. Participants register and
//! wait on a gate; the controller runs `rendezvous` and then opens the gate
//! for everyone at once. A barrier serves exactly one round and one
//! direction and is never reset.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::error::PoolError;

/// Which side of a round the barrier gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Round start; late arrivals are turned away
    Entry,
    /// Cancellation broadcast; late arrivals still wait for the gate
    Exit,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Entry => write!(f, "in"),
            Direction::Exit => write!(f, "out"),
        }
    }
}

/// Outcome of a rendezvous
#[derive(Debug, Clone)]
pub struct Quorum {
    pub direction: Direction,
    pub expected: usize,
    /// Participants registered when the barrier closed
    pub arrived: HashSet<String>,
    /// Closed by the timeout rather than by a full quorum
    pub timed_out: bool,
    pub waited: Duration,
}

impl Quorum {
    pub fn count(&self) -> usize {
        self.arrived.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty()
    }

    /// Liveness error describing a short quorum, if any
    pub fn shortfall(&self) -> Option<PoolError> {
        (self.count() < self.expected).then(|| PoolError::LivenessTimeout {
            arrived: self.count(),
            expected: self.expected,
        })
    }
}

/// Result of registering at a barrier
pub enum Arrival {
    /// Registered (or late on an exit barrier); wait on the gate
    Admitted(Gate),
    /// Entry barrier already closed; try the next round
    Closed,
}

/// Receiver side of a barrier's release signal
pub struct Gate(watch::Receiver<bool>);

impl Gate {
    /// Resolve once the barrier opens
    pub async fn opened(mut self) {
        // The sender lives as long as the barrier, which the caller keeps alive.
        let _ = self.0.wait_for(|open| *open).await;
    }
}

struct BarrierState {
    arrived: HashSet<String>,
    first_arrival: Option<Instant>,
    closed: bool,
}

pub struct QuorumBarrier {
    direction: Direction,
    state: Mutex<BarrierState>,
    /// Wakes the controller on each new arrival
    arrival: Notify,
    gate: watch::Sender<bool>,
}

impl QuorumBarrier {
    pub fn new(direction: Direction) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            direction,
            state: Mutex::new(BarrierState {
                arrived: HashSet::new(),
                first_arrival: None,
                closed: false,
            }),
            arrival: Notify::new(),
            gate,
        }
    }

    /// Register `name`; repeated arrivals count once
    pub fn arrive(&self, name: &str) -> Arrival {
        let mut state = self.state.lock();

        if state.closed {
            return match self.direction {
                Direction::Entry => Arrival::Closed,
                Direction::Exit => Arrival::Admitted(Gate(self.gate.subscribe())),
            };
        }

        if state.arrived.insert(name.to_string()) {
            state.first_arrival.get_or_insert_with(Instant::now);
            debug!("({}) registered {}", self.direction, name);
            self.arrival.notify_one();
        }
        Arrival::Admitted(Gate(self.gate.subscribe()))
    }

    /// Wait on the gate without counting toward the quorum
    pub fn observe(&self) -> Gate {
        Gate(self.gate.subscribe())
    }

    /// Wait until `expected` distinct participants arrived or `timeout`
    /// passed since the first arrival, then close the barrier.
    ///
    /// The clock never starts before this call, so participants that arrived
    /// early still get the full timeout. With no arrivals at all the barrier
    /// closes empty after `timeout`.
    pub async fn rendezvous(&self, expected: usize, timeout: Duration) -> Quorum {
        self.rendezvous_with(expected, timeout, || ()).await.0
    }

    /// Like `rendezvous`, running `before_close` while arrivals are still
    /// admitted so its snapshot cannot miss anyone the barrier turned away.
    pub async fn rendezvous_with<R>(
        &self,
        expected: usize,
        timeout: Duration,
        before_close: impl FnOnce() -> R,
    ) -> (Quorum, R) {
        let started = Instant::now();

        let timed_out = loop {
            let deadline = {
                let state = self.state.lock();
                if state.arrived.len() >= expected {
                    break false;
                }
                match state.first_arrival {
                    Some(first) => first.max(started) + timeout,
                    None => started + timeout,
                }
            };

            tokio::select! {
                _ = self.arrival.notified() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    break self.state.lock().arrived.len() < expected;
                }
            }
        };

        let snapshot = before_close();
        let mut state = self.state.lock();
        state.closed = true;
        let quorum = Quorum {
            direction: self.direction,
            expected,
            arrived: state.arrived.clone(),
            timed_out,
            waited: started.elapsed(),
        };
        (quorum, snapshot)
    }

    /// Release every waiter, current and future
    pub fn open(&self) {
        self.state.lock().closed = true;
        self.gate.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.gate.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn arrived_count(&self) -> usize {
        self.state.lock().arrived.len()
    }
}
