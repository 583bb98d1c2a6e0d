//! Persistence capability
//!
//! The bridge core is memory-resident. A [`BridgeRepository`] receives
//! snapshots of transactions, validators and batches so that state can be
//! restored after a restart.

mod repository;

pub use repository::InMemoryRepository;

use crate::batch::TransactionBatch;
use crate::bridge::CrossChainTransaction;
use crate::consensus::Validator;
use crate::error::BridgeResult;

use async_trait::async_trait;
use serde::Serialize;

#[async_trait]
pub trait BridgeRepository: Send + Sync {
    /// Insert or replace by transaction id
    async fn save_transaction(&self, tx: &CrossChainTransaction) -> BridgeResult<()>;

    /// Oldest first
    async fn load_transactions(&self) -> BridgeResult<Vec<CrossChainTransaction>>;

    async fn save_validator(&self, validator: &Validator) -> BridgeResult<()>;

    async fn load_validators(&self) -> BridgeResult<Vec<Validator>>;

    async fn save_batch(&self, batch: &TransactionBatch) -> BridgeResult<()>;

    async fn load_batches(&self) -> BridgeResult<Vec<TransactionBatch>>;

    async fn health_check(&self) -> BridgeResult<()>;

    async fn stats(&self) -> BridgeResult<RepositoryStats>;
}

/// Record counts held by a repository
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepositoryStats {
    pub transactions: usize,
    pub validators: usize,
    pub batches: usize,
}
