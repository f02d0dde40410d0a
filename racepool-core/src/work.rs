//! Work material
//!
//! The coordinator treats a worker's payload as opaque bytes. The default
//! provider splices a per-worker script into the template's coinbase halves.

use crate::error::{PoolError, Result};
use crate::protocol::{BlockTemplate, WorkAssignment, WorkerIdentity};

/// Room available for coinbase script data
const MAX_SCRIPT_LEN: usize = 100;

/// Length of the extranonce field
const EXTRANONCE_LEN: usize = 3;

/// Builds the per-worker payload for a round
pub trait WorkMaterialProvider: Send + Sync {
    fn build_work(&self, template: &BlockTemplate, worker: &WorkerIdentity) -> Result<Vec<u8>>;
}

/// Coinbase builder: `upper || script data || lower`
#[derive(Debug, Clone, Copy, Default)]
pub struct CoinbaseBuilder {
    pool_index: u32,
}

impl CoinbaseBuilder {
    pub fn new(pool_index: u32) -> Self {
        Self { pool_index }
    }

    /// `len || height || 0x03 || extranonce || len || tag`
    fn script_data(&self, height: u32, extranonce: u32, worker: &WorkerIdentity) -> Result<Vec<u8>> {
        let height_bytes = height.to_le_bytes();
        let height_len = height_bytes
            .iter()
            .rposition(|b| *b != 0)
            .map(|idx| idx + 1)
            .unwrap_or(1);

        let tag = format!("{}:{}", self.pool_index, worker.name);
        let fixed_len = 1 + height_len + 1 + EXTRANONCE_LEN;
        if tag.len() > MAX_SCRIPT_LEN - fixed_len - 1 {
            return Err(PoolError::WorkMaterial {
                name: worker.name.clone(),
                reason: format!("coinbase tag is {} bytes, too long", tag.len()),
            });
        }

        let mut script = Vec::with_capacity(fixed_len + 1 + tag.len());
        script.push(height_len as u8);
        script.extend_from_slice(&height_bytes[..height_len]);
        script.push(EXTRANONCE_LEN as u8);
        script.extend_from_slice(&extranonce.to_be_bytes()[1..]);
        script.push(tag.len() as u8);
        script.extend_from_slice(tag.as_bytes());
        Ok(script)
    }
}

impl WorkMaterialProvider for CoinbaseBuilder {
    fn build_work(&self, template: &BlockTemplate, worker: &WorkerIdentity) -> Result<Vec<u8>> {
        let script = self.script_data(template.height, worker.id, worker)?;

        let mut coinbase =
            Vec::with_capacity(template.upper.len() + script.len() + template.lower.len());
        coinbase.extend_from_slice(&template.upper);
        coinbase.extend_from_slice(&script);
        coinbase.extend_from_slice(&template.lower);
        Ok(coinbase)
    }
}

/// Wrap provider output with the round's shared material
pub fn assign(
    round: u64,
    template: &BlockTemplate,
    worker: &WorkerIdentity,
    coinbase: Vec<u8>,
) -> WorkAssignment {
    WorkAssignment {
        round,
        worker_id: worker.id,
        height: template.height,
        coinbase,
        header: template.header.clone(),
        merkle_skeleton: template.merkle_skeleton.clone(),
        bits: template.bits,
    }
}
