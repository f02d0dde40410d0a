//! Result delivery
//!
//! Single-slot handoff of win records to external observers. Each record
//! reaches exactly one observer; records are never dropped.

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info};

use crate::error::{PoolError, Result};
use crate::protocol::WinRecord;

struct Handoff {
    record: WinRecord,
    /// Signalled when an observer takes the record
    taken: Option<oneshot::Sender<()>>,
}

pub struct ResultDelivery {
    tx: mpsc::Sender<Handoff>,
    rx: Mutex<mpsc::Receiver<Handoff>>,
}

impl ResultDelivery {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Publish a record
    ///
    /// With `wait_for_observer` this returns only after an observer has taken
    /// the record. Otherwise it returns once the record sits in the slot,
    /// which still waits if an earlier record is unclaimed.
    pub async fn deliver(&self, record: WinRecord, wait_for_observer: bool) -> Result<()> {
        let round = record.round;
        let (taken, confirmed) = if wait_for_observer {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.tx
            .send(Handoff { record, taken })
            .await
            .map_err(|_| PoolError::ShutdownInProgress)?;
        debug!("Win record for round {} waiting for an observer", round);

        if let Some(confirmed) = confirmed {
            confirmed.await.map_err(|_| PoolError::Internal {
                message: format!("win record for round {} was lost", round),
            })?;
        }
        Ok(())
    }

    /// Wait for the next record; concurrent observers take turns
    pub async fn await_result(&self, observer: &str) -> Result<WinRecord> {
        let mut rx = self.rx.lock().await;
        let handoff = rx.recv().await.ok_or(PoolError::ShutdownInProgress)?;
        if let Some(taken) = handoff.taken {
            let _ = taken.send(());
        }
        info!(
            "Sent result of round {} ({}) to {}",
            handoff.record.round, handoff.record.winner, observer
        );
        Ok(handoff.record)
    }
}

impl Default for ResultDelivery {
    fn default() -> Self {
        Self::new()
    }
}
