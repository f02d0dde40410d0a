//! Racepool Core - round-synchronized mining pool coordinator
//!
//! This crate provides:
//! - Worker admission with optional keyed authentication
//! - Latest-wins block template buffering
//! - Entry and exit quorum barriers with timeout degradation
//! - Single-winner arbitration and result handoff
//! - The HTTP service, miner and conductor clients built on top

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod runtime;
pub mod server;
pub mod work;
pub mod worker;

pub use coordinator::Coordinator;
pub use error::PoolError;

/// Default quorum size for the entry barrier
pub const DEFAULT_EXPECTED_WORKERS: usize = 3;

/// Default barrier timeout in milliseconds
pub const DEFAULT_BARRIER_TIMEOUT_MS: u64 = 1000;

/// Default registry capacity
pub const DEFAULT_MAX_WORKERS: usize = 16;

/// Pool instance `i` listens on `DEFAULT_PORT_BASE + i`
pub const DEFAULT_PORT_BASE: u16 = 50051;

/// Default interval between "no template" warnings
pub const DEFAULT_TEMPLATE_LIVENESS_SECS: u64 = 20;
