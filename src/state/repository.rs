//! In-memory repository

use super::{BridgeRepository, RepositoryStats};
use crate::batch::TransactionBatch;
use crate::bridge::CrossChainTransaction;
use crate::consensus::Validator;
use crate::error::BridgeResult;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Keeps the latest snapshot of every record, keyed by id
#[derive(Default)]
pub struct InMemoryRepository {
    transactions: DashMap<String, CrossChainTransaction>,
    validators: DashMap<String, Validator>,
    batches: DashMap<String, TransactionBatch>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BridgeRepository for InMemoryRepository {
    async fn save_transaction(&self, tx: &CrossChainTransaction) -> BridgeResult<()> {
        debug!(tx_id = %tx.id, status = %tx.status, "Saving transaction");
        self.transactions.insert(tx.id.clone(), tx.clone());
        Ok(())
    }

    async fn load_transactions(&self) -> BridgeResult<Vec<CrossChainTransaction>> {
        let mut txs: Vec<CrossChainTransaction> =
            self.transactions.iter().map(|e| e.value().clone()).collect();
        txs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(txs)
    }

    async fn save_validator(&self, validator: &Validator) -> BridgeResult<()> {
        self.validators
            .insert(validator.address.clone(), validator.clone());
        Ok(())
    }

    async fn load_validators(&self) -> BridgeResult<Vec<Validator>> {
        Ok(self.validators.iter().map(|e| e.value().clone()).collect())
    }

    async fn save_batch(&self, batch: &TransactionBatch) -> BridgeResult<()> {
        debug!(batch_id = %batch.id, status = %batch.status, "Saving batch");
        self.batches.insert(batch.id.clone(), batch.clone());
        Ok(())
    }

    async fn load_batches(&self) -> BridgeResult<Vec<TransactionBatch>> {
        Ok(self.batches.iter().map(|e| e.value().clone()).collect())
    }

    async fn health_check(&self) -> BridgeResult<()> {
        Ok(())
    }

    async fn stats(&self) -> BridgeResult<RepositoryStats> {
        Ok(RepositoryStats {
            transactions: self.transactions.len(),
            validators: self.validators.len(),
            batches: self.batches.len(),
        })
    }
}
