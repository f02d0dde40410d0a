//! Session registry
//!
//! Tracks logged-in workers, hands out sequential ids and enforces
//! the capacity limit. One lock guards the whole table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::error::{PoolError, Result};
use crate::metrics::standard;
use crate::protocol::{Credential, WorkerIdentity};

struct RegistryInner {
    /// Last id handed out; ids start at 1
    last_id: u32,
    workers: HashMap<String, WorkerIdentity>,
}

/// Logged-in workers keyed by name
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    capacity: usize,
    authenticator: Arc<dyn Authenticator>,
}

impl SessionRegistry {
    pub fn new(capacity: usize, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                last_id: 0,
                workers: HashMap::new(),
            }),
            capacity,
            authenticator,
        }
    }

    /// Admit a worker
    pub fn login(&self, name: &str, credential: Option<&Credential>) -> Result<WorkerIdentity> {
        let mut inner = self.inner.lock();

        if inner.workers.contains_key(name) {
            return Err(PoolError::AlreadyLoggedIn { name: name.to_string() });
        }

        if !self.authenticator.authenticate(name, credential) {
            warn!("Authentication failed for {}", name);
            return Err(PoolError::AuthenticationFailed { name: name.to_string() });
        }

        if inner.workers.len() >= self.capacity {
            return Err(PoolError::CapacityReached { limit: self.capacity });
        }

        inner.last_id += 1;
        let identity = WorkerIdentity {
            name: name.to_string(),
            id: inner.last_id,
            user: credential.map(|c| c.user),
        };
        inner.workers.insert(name.to_string(), identity.clone());

        standard::LOGINS.inc();
        standard::LOGGED_IN_WORKERS.set(inner.workers.len() as i64);
        info!("Worker {} logged in as id={}", name, identity.id);

        Ok(identity)
    }

    /// Remove a worker; it has to log in again to take part
    pub fn evict(&self, name: &str) -> Option<WorkerIdentity> {
        let mut inner = self.inner.lock();
        let removed = inner.workers.remove(name);
        if removed.is_some() {
            standard::EVICTIONS.inc();
            standard::LOGGED_IN_WORKERS.set(inner.workers.len() as i64);
            warn!("Evicted dead worker {}", name);
        }
        removed
    }

    /// Evict every worker admitted up to `watermark` that is not in `arrived`
    ///
    /// Workers that logged in after the barrier closed have ids above the
    /// watermark and are left alone.
    pub fn evict_absent(&self, arrived: &HashSet<String>, watermark: u32) -> Vec<WorkerIdentity> {
        let absent: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .workers
                .values()
                .filter(|w| w.id <= watermark && !arrived.contains(&w.name))
                .map(|w| w.name.clone())
                .collect()
        };

        let evicted: Vec<WorkerIdentity> =
            absent.iter().filter_map(|name| self.evict(name)).collect();
        debug!("Evicted {} absent workers", evicted.len());
        evicted
    }

    /// Highest id issued so far
    pub fn watermark(&self) -> u32 {
        self.inner.lock().last_id
    }

    pub fn get(&self, name: &str) -> Option<WorkerIdentity> {
        self.inner.lock().workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().workers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All logged-in workers ordered by id
    pub fn workers(&self) -> Vec<WorkerIdentity> {
        let mut workers: Vec<WorkerIdentity> =
            self.inner.lock().workers.values().cloned().collect();
        workers.sort_by_key(|w| w.id);
        workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
