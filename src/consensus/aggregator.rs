//! Per-transaction confirmation aggregation
//!
//! Each transaction's confirmations live in one map entry. The entry lock
//! makes insert-count-compare a single step for that transaction, while
//! confirmations for other transactions proceed in parallel.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// One validator's attestation for one transaction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Confirmation {
    pub tx_id: String,
    pub validator_id: String,
    /// Hex encoded signature bytes
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
}

#[derive(Debug, Default)]
struct TxConfirmations {
    /// Keyed by validator: a repeat confirmation replaces the earlier one
    by_validator: HashMap<String, Confirmation>,
    threshold_reached: bool,
}

impl TxConfirmations {
    fn valid_count(&self) -> usize {
        self.by_validator.values().filter(|c| c.valid).count()
    }
}

pub struct ConfirmationAggregator {
    entries: DashMap<String, TxConfirmations>,
    required: usize,
    timeout: Duration,
}

impl ConfirmationAggregator {
    pub fn new(required: usize, timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            required: required.max(1),
            timeout,
        }
    }

    pub fn required(&self) -> usize {
        self.required
    }

    /// Store the confirmation and return `true` exactly once per
    /// transaction: when the distinct valid count first reaches the threshold.
    pub fn record(&self, confirmation: Confirmation) -> bool {
        let mut entry = self.entries.entry(confirmation.tx_id.clone()).or_default();
        entry
            .by_validator
            .insert(confirmation.validator_id.clone(), confirmation);

        if entry.threshold_reached {
            return false;
        }
        if entry.valid_count() >= self.required {
            entry.threshold_reached = true;
            return true;
        }
        false
    }

    pub fn count(&self, tx_id: &str) -> usize {
        self.entries
            .get(tx_id)
            .map(|e| e.valid_count())
            .unwrap_or(0)
    }

    pub fn confirmations(&self, tx_id: &str) -> Vec<Confirmation> {
        self.entries
            .get(tx_id)
            .map(|e| e.by_validator.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Does `validator_id` hold a confirmation on a transaction still short of the threshold
    pub fn has_unresolved(&self, validator_id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| !e.threshold_reached && e.by_validator.contains_key(validator_id))
    }

    /// Forget every confirmation for a transaction
    pub fn discard(&self, tx_id: &str) -> bool {
        self.entries.remove(tx_id).is_some()
    }

    /// Remove confirmations older than the timeout; returns how many were dropped
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.timeout;
        let mut removed = 0;

        self.entries.retain(|tx_id, entry| {
            let before = entry.by_validator.len();
            entry.by_validator.retain(|_, c| c.timestamp > cutoff);
            let dropped = before - entry.by_validator.len();
            if dropped > 0 {
                debug!(tx_id = %tx_id, dropped, "Expired confirmations removed");
            }
            removed += dropped;
            !entry.by_validator.is_empty()
        });

        removed
    }

    /// Transactions with at least one stored confirmation
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}
