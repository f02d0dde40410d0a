//! Error types for the pool coordinator
//!
//! Covers admission, round coordination, work material, configuration
//! and transport failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Primary error type for all pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    // ========== Admission Errors ==========

    /// Name already registered by a logged-in worker
    #[error("Worker {name} is already logged in")]
    AlreadyLoggedIn { name: String },

    /// Authenticator rejected the credential
    #[error("Authentication failed for {name}")]
    AuthenticationFailed { name: String },

    /// Registry is full
    #[error("Capacity reached: {limit} workers already logged in")]
    CapacityReached { limit: usize },

    /// Worker is not (or no longer) in the registry
    #[error("Worker {name} is not logged in")]
    NotLoggedIn { name: String },

    // ========== Round Errors ==========

    /// No block template arrived within the liveness window
    #[error("No block template issued after waiting {waited:?}")]
    NoTemplate { waited: Duration },

    /// Entry barrier closed on timeout before reaching quorum
    #[error("Entry quorum not reached: {arrived} of {expected} workers arrived")]
    LivenessTimeout { arrived: usize, expected: usize },

    /// Work-material provider could not build an assignment
    #[error("Failed to build work for {name}: {reason}")]
    WorkMaterial { name: String, reason: String },

    // ========== Configuration Errors ==========

    /// Configuration could not be loaded
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    // ========== Transport Errors ==========

    /// Connection to the coordinator failed
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Malformed request or response body
    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    /// Coordinator answered with an error we do not map to a variant
    #[error("Coordinator returned {status}: {message}")]
    Remote { status: u16, message: String },

    // ========== Runtime Errors ==========

    /// Coordinator is shutting down
    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Machine-readable error kind carried in RPC error bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyLoggedIn,
    AuthenticationFailed,
    CapacityReached,
    NotLoggedIn,
    InvalidRequest,
    ShuttingDown,
    Internal,
}

impl PoolError {
    /// Returns true if the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::CapacityReached { .. }
                | PoolError::ConnectionFailed { .. }
                | PoolError::ShutdownInProgress
        )
    }

    /// Returns true if the worker has to log in again before asking for work
    pub fn requires_login(&self) -> bool {
        matches!(self, PoolError::NotLoggedIn { .. })
    }

    /// Kind reported to remote callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::AlreadyLoggedIn { .. } => ErrorKind::AlreadyLoggedIn,
            PoolError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            PoolError::CapacityReached { .. } => ErrorKind::CapacityReached,
            PoolError::NotLoggedIn { .. } => ErrorKind::NotLoggedIn,
            PoolError::InvalidMessage { .. } => ErrorKind::InvalidRequest,
            PoolError::ShutdownInProgress => ErrorKind::ShuttingDown,
            _ => ErrorKind::Internal,
        }
    }
}

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
