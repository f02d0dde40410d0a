//! Block template store
//!
//! Single-slot, latest-wins buffer between the block issuer and the round
//! controller. Issuing never blocks; an unconsumed template is replaced.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::metrics::standard;
use crate::protocol::BlockTemplate;

pub struct TemplateStore {
    /// Issued but not yet picked up by the controller
    pending: Mutex<Option<BlockTemplate>>,
    /// Template of the most recent round
    current: RwLock<Option<Arc<BlockTemplate>>>,
    issued: Notify,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            current: RwLock::new(None),
            issued: Notify::new(),
        }
    }

    /// Buffer a template, dropping any unconsumed one. Returns true if one was dropped.
    pub fn set_template(&self, template: BlockTemplate) -> bool {
        let height = template.height;
        let superseded = self.pending.lock().replace(template).is_some();
        self.issued.notify_one();

        standard::TEMPLATES_ISSUED.inc();
        if superseded {
            debug!("Template at height {} superseded an unconsumed one", height);
        }
        superseded
    }

    /// Template in effect for the latest round
    pub fn current_template(&self) -> Option<Arc<BlockTemplate>> {
        self.current.read().clone()
    }

    /// Whether a template is waiting to be picked up
    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Move the buffered template into effect
    fn take_pending(&self) -> Option<Arc<BlockTemplate>> {
        let template = self.pending.lock().take().map(Arc::new)?;
        *self.current.write() = Some(template.clone());
        Some(template)
    }

    /// Wait up to `liveness` for the issuer
    pub async fn wait_for_issue(&self, liveness: Duration) -> Result<Arc<BlockTemplate>> {
        let deadline = tokio::time::Instant::now() + liveness;
        loop {
            if let Some(template) = self.take_pending() {
                return Ok(template);
            }
            if tokio::time::timeout_at(deadline, self.issued.notified()).await.is_err() {
                return Err(PoolError::NoTemplate { waited: liveness });
            }
        }
    }

    /// Template for the next round
    ///
    /// A buffered template always wins. Otherwise the one in effect is
    /// reused unless `fresh` is set or there is none, in which case this
    /// waits for the issuer indefinitely, warning every `liveness`.
    pub async fn next_template(&self, fresh: bool, liveness: Duration) -> Arc<BlockTemplate> {
        if let Some(template) = self.take_pending() {
            return template;
        }
        if !fresh {
            if let Some(template) = self.current_template() {
                return template;
            }
        }

        loop {
            match self.wait_for_issue(liveness).await {
                Ok(template) => return template,
                Err(e) => warn!("{}; need a live block issuer, still waiting", e),
            }
        }
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}
