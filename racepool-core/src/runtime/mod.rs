//! Process runtime helpers
//!
//! Shutdown coordination shared by the binaries.

pub mod shutdown;

pub use shutdown::ShutdownSignal;
