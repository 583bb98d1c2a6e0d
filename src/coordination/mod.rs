//! Coordination between chain watchers and the bridge core
//!
//! The coordination engine:
//! 1. Dispatches chain-watcher observations to the orchestrator
//! 2. Mirrors state changes into the persistence repository
//! 3. Runs periodic maintenance (expiry sweeps, daily volume rollover)

pub mod engine;

pub use engine::CoordinationEngine;

use crate::bridge::TransferRequest;

use serde::Deserialize;

/// Observation reported by a chain watcher
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WatcherEvent {
    /// Deposit seen on the source chain
    DepositObserved(TransferRequest),

    /// Validator attestation; the signature is hex encoded
    ConfirmationObserved {
        tx_id: String,
        validator_id: String,
        signature: String,
    },

    /// Transfer completed on the destination chain
    ExecutionObserved {
        tx_id: String,
        destination_tx_hash: String,
        gas_used: u64,
    },

    ExecutionFailed { tx_id: String, reason: String },
}

impl WatcherEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WatcherEvent::DepositObserved(_) => "deposit_observed",
            WatcherEvent::ConfirmationObserved { .. } => "confirmation_observed",
            WatcherEvent::ExecutionObserved { .. } => "execution_observed",
            WatcherEvent::ExecutionFailed { .. } => "execution_failed",
        }
    }
}

/// Periodic housekeeping jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceTask {
    ConfirmationSweep,
    BatchSweep,
    TransactionExpiry,
    RateLimiterCleanup,
    DailyReset,
}

impl MaintenanceTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceTask::ConfirmationSweep => "confirmation_sweep",
            MaintenanceTask::BatchSweep => "batch_sweep",
            MaintenanceTask::TransactionExpiry => "transaction_expiry",
            MaintenanceTask::RateLimiterCleanup => "rate_limiter_cleanup",
            MaintenanceTask::DailyReset => "daily_reset",
        }
    }
}
