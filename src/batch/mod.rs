//! Batched transfers
//!
//! A batch groups transfers created together and reports one status derived
//! from its members. Members keep their own lifecycle in the orchestrator;
//! the batch never rolls a member back.

pub mod coordinator;

pub use coordinator::BatchCoordinator;

use crate::bridge::{decimal, Amount};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Confirmed,
    Executed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Confirmed => "confirmed",
            BatchStatus::Executed => "executed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionBatch {
    pub id: String,
    /// Member transactions, in request order
    pub transaction_ids: Vec<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub destination_tx_hash: Option<String>,
    pub gas_used: Option<u64>,
    /// Sum of member fees, set on execution
    #[serde(with = "decimal")]
    pub total_fee: Amount,
    pub failure_reason: Option<String>,
}

impl TransactionBatch {
    pub fn len(&self) -> usize {
        self.transaction_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transaction_ids.is_empty()
    }
}

/// Outcome of one `process_batch` pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub batch_id: String,
    pub status: BatchStatus,
    pub total: usize,
    /// Members confirmed or already executed
    pub confirmed: usize,
    /// Members still waiting on consensus
    pub awaiting: usize,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub total_batches: usize,
    pub pending_batches: usize,
    pub confirmed_batches: usize,
    pub executed_batches: usize,
    pub failed_batches: usize,
}
