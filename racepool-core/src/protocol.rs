//! Wire types shared by the coordinator service and its clients
//!
//! Binary fields travel as lowercase hex strings.

use serde::{Deserialize, Serialize};

use crate::coordinator::RoundPhase;
use crate::error::{ErrorKind, PoolError};

/// Round material supplied by the block issuer
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockTemplate {
    /// Coinbase bytes before the per-worker script data
    #[serde(with = "hex::serde")]
    pub upper: Vec<u8>,
    /// Coinbase bytes after the per-worker script data
    #[serde(with = "hex::serde")]
    pub lower: Vec<u8>,
    pub height: u32,
    /// Partially filled 80-byte block header
    #[serde(with = "hex::serde")]
    pub header: Vec<u8>,
    /// Merkle branch skeleton, a multiple of 32 bytes
    #[serde(with = "hex::serde")]
    pub merkle_skeleton: Vec<u8>,
    /// Compact difficulty target
    pub bits: u32,
    /// Identifier of the issuing server
    pub issuer: String,
}

impl BlockTemplate {
    /// Random stand-in material for test networks
    pub fn synthetic(height: u32, issuer: &str) -> Self {
        use rand::RngCore;

        let mut rng = rand::thread_rng();
        let mut header = vec![0u8; 80];
        rng.fill_bytes(&mut header[4..36]);
        header[..4].copy_from_slice(&2u32.to_le_bytes());
        let mut merkle_skeleton = vec![0u8; 64];
        rng.fill_bytes(&mut merkle_skeleton);

        Self {
            upper: hex::decode("01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff")
                .unwrap_or_default(),
            lower: hex::decode("ffffffff0100f2052a010000001976a914000000000000000000000000000000000000000088ac00000000")
                .unwrap_or_default(),
            height,
            header,
            merkle_skeleton,
            bits: 0x1d00ffff,
            issuer: issuer.to_string(),
        }
    }
}

/// Credential presented at login
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Numeric account id the secret is registered under
    pub user: u32,
    /// Timestamp the token was minted for
    pub timestamp: String,
    /// Hex digest proving knowledge of the account secret
    pub token: String,
}

/// A logged-in worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub name: String,
    pub id: u32,
    /// Account id, present when a credential was verified
    pub user: Option<u32>,
}

/// Per-worker payload handed out when the entry barrier opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub round: u64,
    pub worker_id: u32,
    pub height: u32,
    /// Opaque bytes from the work-material provider
    #[serde(with = "hex::serde")]
    pub coinbase: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub header: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub merkle_skeleton: Vec<u8>,
    pub bits: u32,
}

/// A candidate solution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Solution {
    pub round: u64,
    pub nonce: u32,
    #[serde(with = "hex::serde")]
    pub payload: Vec<u8>,
    /// Name of the worker claiming the win
    pub identity: String,
}

/// The accepted solution of a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinRecord {
    pub round: u64,
    pub winner: String,
    pub winner_id: Option<u32>,
    pub solution: Solution,
    pub template: BlockTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub name: String,
    pub credential: Option<Credential>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginReply {
    pub id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWorkRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWorkReply {
    pub work: WorkAssignment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub solution: Solution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceReply {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetCancelRequest {
    pub name: String,
    /// Round the caller is mining; a finished round answers immediately
    pub round: Option<u64>,
}

/// Acknowledgment returned once the exit barrier opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelNotice {
    pub round: u64,
    pub winner: Option<String>,
    pub issuer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueBlockRequest {
    pub template: BlockTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueBlockReply {
    pub accepted: bool,
    /// An unconsumed template was discarded
    pub superseded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResultRequest {
    pub observer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResultReply {
    pub record: WinRecord,
}

/// Snapshot served at `/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStatus {
    pub round: Option<u64>,
    pub phase: Option<RoundPhase>,
    pub rounds_completed: u64,
    pub template_height: Option<u32>,
    pub expected_workers: usize,
    pub workers: Vec<WorkerIdentity>,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl From<&PoolError> for ErrorBody {
    fn from(err: &PoolError) -> Self {
        let (name, limit) = match err {
            PoolError::AlreadyLoggedIn { name }
            | PoolError::AuthenticationFailed { name }
            | PoolError::NotLoggedIn { name } => (Some(name.clone()), None),
            PoolError::CapacityReached { limit } => (None, Some(*limit)),
            _ => (None, None),
        };
        Self {
            kind: err.kind(),
            message: err.to_string(),
            name,
            limit,
        }
    }
}

impl ErrorBody {
    /// Rebuild the typed error on the client side
    pub fn into_error(self, status: u16) -> PoolError {
        let name = self.name.unwrap_or_default();
        match self.kind {
            ErrorKind::AlreadyLoggedIn => PoolError::AlreadyLoggedIn { name },
            ErrorKind::AuthenticationFailed => PoolError::AuthenticationFailed { name },
            ErrorKind::NotLoggedIn => PoolError::NotLoggedIn { name },
            ErrorKind::CapacityReached => PoolError::CapacityReached {
                limit: self.limit.unwrap_or_default(),
            },
            ErrorKind::InvalidRequest => PoolError::InvalidMessage { reason: self.message },
            ErrorKind::ShuttingDown => PoolError::ShutdownInProgress,
            ErrorKind::Internal => PoolError::Remote {
                status,
                message: self.message,
            },
        }
    }
}
