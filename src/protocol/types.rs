//! Typed Stratum payloads

use serde::{Deserialize, Serialize};

/// Login request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginParams {
    /// Fullname, "username.rig" form
    pub login: String,
    /// Password (unused by the pool, forwarded upstream as-is)
    pub pass: String,
    /// Client agent string
    pub agent: String,
}

/// A work template as issued by the grin node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobTemplate {
    /// Block height
    pub height: u64,
    /// Job identifier
    pub job_id: u64,
    /// Required share difficulty
    pub difficulty: u64,
    /// Serialized block header, pre-nonce, hex
    pub pre_pow: String,
}

impl JobTemplate {
    /// An empty template, used before the first job arrives
    pub fn new() -> Self {
        Self {
            height: 0,
            job_id: 0,
            difficulty: 1,
            pre_pow: String::new(),
        }
    }
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self::new()
    }
}

/// A submitted proof-of-work solution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitParams {
    /// Block height the share was mined at
    pub height: u64,
    /// Job the share solves
    pub job_id: u64,
    /// Cuckoo edge-bits of the proof (29 secondary, 31 primary)
    pub edge_bits: u32,
    /// Block nonce
    pub nonce: u64,
    /// Cycle proof nonces
    pub pow: Vec<u64>,
}

impl SubmitParams {
    /// Compact display form used in upstream correlation ids
    pub fn as_string(&self) -> String {
        format!(
            "{}+{}+{}+{}",
            self.height, self.job_id, self.nonce, self.edge_bits
        )
    }
}

/// Per-worker (and pool-wide) share counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Worker identifier
    pub id: String,
    /// Last seen block height
    pub height: u64,
    /// Current share difficulty
    pub difficulty: u64,
    /// Shares accepted upstream
    pub accepted: u64,
    /// Shares rejected
    pub rejected: u64,
    /// Shares submitted too late
    pub stale: u64,
}

impl WorkerStatus {
    /// Create a zeroed status for a worker
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            height: 0,
            difficulty: 1,
            accepted: 0,
            rejected: 0,
            stale: 0,
        }
    }
}
