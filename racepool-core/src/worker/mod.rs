//! Pool clients
//!
//! The HTTP client, the miner loop and the block conductor.

pub mod client;
pub mod conductor;
pub mod miner;
pub mod state;

pub use client::{ClientConfig, PoolClient};
pub use conductor::{Conductor, ConductorConfig};
pub use miner::{DiceSearch, Miner, MinerConfig};
pub use state::{MinerPhase, MinerState};
