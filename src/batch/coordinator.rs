//! Batch lifecycle on top of the transfer orchestrator
//!
//! The batch map lock is taken before any orchestrator call and held across
//! it, so batch operations on the same coordinator are serialized.

use super::{BatchProgress, BatchStats, BatchStatus, TransactionBatch};
use crate::bridge::types::generate_id;
use crate::bridge::{
    Amount, CrossChainTransaction, TransactionStatus, TransferOrchestrator, TransferRequest,
};
use crate::config::BatchSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventBus};

use chrono::{DateTime, Duration, Utc};
use num_traits::Zero;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct BatchCoordinator {
    orchestrator: Arc<TransferOrchestrator>,
    events: Arc<EventBus>,
    batches: RwLock<HashMap<String, TransactionBatch>>,
    max_batch_size: usize,
    timeout: Duration,
}

impl BatchCoordinator {
    pub fn new(config: &BatchSettings, orchestrator: Arc<TransferOrchestrator>) -> Self {
        Self {
            events: orchestrator.events().clone(),
            orchestrator,
            batches: RwLock::new(HashMap::new()),
            max_batch_size: config.max_batch_size.max(1),
            timeout: Duration::seconds(config.batch_timeout_secs as i64),
        }
    }

    /// Create one transfer per request and group them into a pending batch.
    ///
    /// Every request is pre-validated before anything is created. If the
    /// orchestrator rejects a later request, the members created so far are
    /// failed and no batch is recorded.
    pub async fn initiate_batch_transfer(
        &self,
        transfers: Vec<TransferRequest>,
    ) -> BridgeResult<TransactionBatch> {
        if transfers.is_empty() {
            return Err(BridgeError::EmptyBatch);
        }
        if transfers.len() > self.max_batch_size {
            return Err(BridgeError::BatchTooLarge {
                size: transfers.len(),
                max: self.max_batch_size,
            });
        }
        for (index, transfer) in transfers.iter().enumerate() {
            self.orchestrator
                .pre_validate(transfer)
                .map_err(|e| BridgeError::InvalidTransfer {
                    index,
                    reason: e.to_string(),
                })?;
        }

        let mut created: Vec<CrossChainTransaction> = Vec::with_capacity(transfers.len());
        for (index, transfer) in transfers.into_iter().enumerate() {
            match self.orchestrator.initiate_transfer(transfer).await {
                Ok(tx) => created.push(tx),
                Err(e) => {
                    self.abort(&created, index, &e).await;
                    return Err(e);
                }
            }
        }

        let now = Utc::now();
        let transaction_ids: Vec<String> = created.into_iter().map(|tx| tx.id).collect();
        let batch = TransactionBatch {
            id: generate_id(&[b"batch", transaction_ids.join(",").as_bytes()]),
            transaction_ids,
            status: BatchStatus::Pending,
            created_at: now,
            updated_at: now,
            executed_at: None,
            destination_tx_hash: None,
            gas_used: None,
            total_fee: Amount::zero(),
            failure_reason: None,
        };

        self.batches
            .write()
            .await
            .insert(batch.id.clone(), batch.clone());

        info!(batch_id = %batch.id, size = batch.len(), "Batch transfer initiated");
        self.events.emit(BridgeEvent::BatchTransferInitiated {
            batch: batch.clone(),
        });
        Ok(batch)
    }

    async fn abort(&self, created: &[CrossChainTransaction], index: usize, cause: &BridgeError) {
        let reason = format!("batch aborted: entry {} rejected: {}", index, cause);
        for tx in created {
            if let Err(e) = self.orchestrator.fail_transaction(&tx.id, &reason).await {
                warn!(tx_id = %tx.id, error = %e, "Could not fail aborted batch member");
            }
        }
        warn!(index, created = created.len(), error = %cause, "Batch aborted");
    }

    /// Fold member statuses into the batch status. A pending batch becomes
    /// `confirmed` once every member is past consensus, or `failed` as soon as
    /// one member has failed.
    pub async fn process_batch(&self, batch_id: &str) -> BridgeResult<BatchProgress> {
        let mut batches = self.batches.write().await;
        let batch = find_mut(&mut batches, batch_id)?;
        expect_status(batch, BatchStatus::Pending)?;

        let mut confirmed = 0;
        let mut awaiting = 0;
        let mut failure = None;
        for tx_id in &batch.transaction_ids {
            let tx = self.orchestrator.get_transaction(tx_id).await?;
            match tx.status {
                TransactionStatus::Confirmed | TransactionStatus::Executed => confirmed += 1,
                TransactionStatus::Pending => awaiting += 1,
                TransactionStatus::Failed => {
                    failure = Some(format!(
                        "transaction {} failed: {}",
                        tx.id,
                        tx.failure_reason.as_deref().unwrap_or("unknown")
                    ));
                    break;
                }
            }
        }

        let event = if let Some(reason) = &failure {
            mark_failed(batch, reason);
            Some(BridgeEvent::BatchFailed {
                batch: batch.clone(),
                reason: reason.clone(),
            })
        } else if awaiting == 0 {
            batch.status = BatchStatus::Confirmed;
            batch.updated_at = Utc::now();
            Some(BridgeEvent::BatchConfirmed {
                batch: batch.clone(),
            })
        } else {
            None
        };

        let progress = BatchProgress {
            batch_id: batch.id.clone(),
            status: batch.status,
            total: batch.len(),
            confirmed,
            awaiting,
            failure_reason: failure,
        };
        drop(batches);

        match progress.status {
            BatchStatus::Confirmed => info!(batch_id, "Batch confirmed"),
            BatchStatus::Failed => {
                warn!(batch_id, reason = ?progress.failure_reason, "Batch failed");
                crate::metrics::record_batch(BatchStatus::Failed.as_str());
            }
            _ => debug!(batch_id, awaiting, "Batch awaiting consensus"),
        }
        if let Some(event) = event {
            self.events.emit(event);
        }
        Ok(progress)
    }

    /// Execute every member of a confirmed batch. Gas is split evenly, with the
    /// remainder charged to the first member.
    pub async fn execute_batch(
        &self,
        batch_id: &str,
        destination_tx_hash: &str,
        gas_used: u64,
    ) -> BridgeResult<TransactionBatch> {
        let mut batches = self.batches.write().await;
        let batch = find_mut(&mut batches, batch_id)?;
        expect_status(batch, BatchStatus::Confirmed)?;

        let members = batch.transaction_ids.clone();
        let count = members.len().max(1) as u64;
        let (share, remainder) = (gas_used / count, gas_used % count);

        let mut total_fee = Amount::zero();
        let mut failure = None;
        for (i, tx_id) in members.iter().enumerate() {
            let gas = if i == 0 { share + remainder } else { share };
            let result = match self.orchestrator.get_transaction(tx_id).await {
                Ok(tx) if tx.status == TransactionStatus::Executed => Ok(tx),
                Ok(_) => {
                    self.orchestrator
                        .execute_transaction(tx_id, destination_tx_hash, gas)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(tx) => total_fee += &tx.fee,
                Err(e) => {
                    failure = Some((format!("failed to execute transaction {}: {}", tx_id, e), e));
                    break;
                }
            }
        }

        if let Some((reason, cause)) = failure {
            mark_failed(batch, &reason);
            let failed = batch.clone();
            drop(batches);

            warn!(batch_id, reason = %reason, "Batch execution failed");
            crate::metrics::record_batch(BatchStatus::Failed.as_str());
            self.events.emit(BridgeEvent::BatchFailed {
                batch: failed,
                reason,
            });
            return Err(cause);
        }

        let now = Utc::now();
        batch.status = BatchStatus::Executed;
        batch.executed_at = Some(now);
        batch.updated_at = now;
        batch.destination_tx_hash = Some(destination_tx_hash.to_string());
        batch.gas_used = Some(gas_used);
        batch.total_fee = total_fee;
        let executed = batch.clone();
        drop(batches);

        info!(
            batch_id,
            destination_tx_hash,
            gas_used,
            total_fee = %executed.total_fee,
            "Batch executed"
        );
        crate::metrics::record_batch(BatchStatus::Executed.as_str());
        self.events.emit(BridgeEvent::BatchExecuted {
            batch: executed.clone(),
        });
        Ok(executed)
    }

    /// Return a failed batch to `pending`, reopening its failed members
    pub async fn retry_failed_batch(&self, batch_id: &str) -> BridgeResult<TransactionBatch> {
        let mut batches = self.batches.write().await;
        let batch = find_mut(&mut batches, batch_id)?;
        expect_status(batch, BatchStatus::Failed)?;

        let mut reopened = 0;
        for tx_id in &batch.transaction_ids {
            let tx = self.orchestrator.get_transaction(tx_id).await?;
            if tx.status == TransactionStatus::Failed {
                self.orchestrator.reopen_transaction(tx_id).await?;
                reopened += 1;
            }
        }

        batch.status = BatchStatus::Pending;
        batch.failure_reason = None;
        batch.updated_at = Utc::now();
        let retried = batch.clone();
        drop(batches);

        info!(batch_id, reopened, "Batch retry initiated");
        self.events.emit(BridgeEvent::BatchRetryInitiated {
            batch: retried.clone(),
        });
        Ok(retried)
    }

    pub async fn get_batch(&self, batch_id: &str) -> BridgeResult<TransactionBatch> {
        self.batches
            .read()
            .await
            .get(batch_id)
            .cloned()
            .ok_or_else(|| BridgeError::BatchNotFound(batch_id.to_string()))
    }

    /// Oldest first
    pub async fn batches_by_status(&self, status: BatchStatus) -> Vec<TransactionBatch> {
        let batches = self.batches.read().await;
        let mut matching: Vec<TransactionBatch> = batches
            .values()
            .filter(|b| b.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching
    }

    pub async fn stats(&self) -> BatchStats {
        let batches = self.batches.read().await;
        let mut stats = BatchStats {
            total_batches: batches.len(),
            ..Default::default()
        };
        for batch in batches.values() {
            match batch.status {
                BatchStatus::Pending => stats.pending_batches += 1,
                BatchStatus::Confirmed => stats.confirmed_batches += 1,
                BatchStatus::Executed => stats.executed_batches += 1,
                BatchStatus::Failed => stats.failed_batches += 1,
            }
        }
        stats
    }

    pub async fn cleanup_expired_batches(&self) -> usize {
        self.cleanup_expired_batches_at(Utc::now()).await
    }

    /// Drop batches older than the batch timeout, whatever their status.
    /// Member transactions are left untouched.
    pub async fn cleanup_expired_batches_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.timeout;
        let mut batches = self.batches.write().await;
        let before = batches.len();
        batches.retain(|_, b| b.created_at >= cutoff);
        let removed = before - batches.len();
        if removed > 0 {
            info!(removed, "Expired batches cleaned up");
        }
        removed
    }
}

fn find_mut<'a>(
    batches: &'a mut HashMap<String, TransactionBatch>,
    batch_id: &str,
) -> BridgeResult<&'a mut TransactionBatch> {
    batches
        .get_mut(batch_id)
        .ok_or_else(|| BridgeError::BatchNotFound(batch_id.to_string()))
}

fn expect_status(batch: &TransactionBatch, expected: BatchStatus) -> BridgeResult<()> {
    if batch.status == expected {
        return Ok(());
    }
    Err(BridgeError::BatchWrongState {
        batch_id: batch.id.clone(),
        actual: batch.status.to_string(),
        expected: expected.to_string(),
    })
}

fn mark_failed(batch: &mut TransactionBatch, reason: &str) {
    batch.status = BatchStatus::Failed;
    batch.failure_reason = Some(reason.to_string());
    batch.updated_at = Utc::now();
}
