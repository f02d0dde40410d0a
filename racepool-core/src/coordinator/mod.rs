//! Pool coordinator
//!
//! Handles worker admission, block templates, round barriers, winner
//! arbitration and result delivery.

pub mod barrier;
pub mod delivery;
pub mod leader;
pub mod registry;
pub mod round;
pub mod template;

pub use barrier::{Arrival, Direction, Quorum, QuorumBarrier};
pub use delivery::ResultDelivery;
pub use leader::Coordinator;
pub use registry::SessionRegistry;
pub use round::{Arbitration, Round, RoundPhase};
pub use template::TemplateStore;
