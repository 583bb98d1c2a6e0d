//! Transfer orchestrator
//!
//! Owns transactions, asset mappings and daily volume accounting. Calls into
//! the [`SecurityGate`] and [`ConsensusLedger`] happen strictly before the
//! orchestrator's own state lock is taken, never while it is held.

use super::types::{
    Amount, AssetMapping, BridgeStatus, ChainId, CrossChainTransaction, TransactionStatus,
    TransferRequest, MIN_ADDRESS_LEN,
};
use crate::config::BridgeSettings;
use crate::consensus::ConsensusLedger;
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::events::{BridgeEvent, EventBus};
use crate::security::SecurityGate;

use chrono::{DateTime, Duration, Utc};
use num_traits::{ToPrimitive, Zero};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Mutable bridge state, guarded by a single lock
#[derive(Debug, Default)]
struct BridgeState {
    status: BridgeStatus,
    transactions: HashMap<String, CrossChainTransaction>,
    asset_mappings: HashMap<String, AssetMapping>,
    daily_volume_used: Amount,
}

/// Bridge statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub total_transactions: usize,
    pub pending_transactions: usize,
    pub confirmed_transactions: usize,
    pub executed_transactions: usize,
    pub failed_transactions: usize,
    pub total_validators: usize,
    pub active_validators: usize,
    pub total_asset_mappings: usize,
    pub bridge_status: BridgeStatus,
    #[serde(with = "super::types::decimal")]
    pub daily_volume_used: Amount,
    #[serde(with = "super::types::decimal")]
    pub max_daily_volume: Amount,
}

pub struct TransferOrchestrator {
    config: BridgeSettings,
    supported_chains: HashSet<ChainId>,
    security: Arc<SecurityGate>,
    consensus: Arc<ConsensusLedger>,
    events: Arc<EventBus>,
    state: RwLock<BridgeState>,
}

impl TransferOrchestrator {
    pub fn new(
        config: BridgeSettings,
        asset_mappings: Vec<AssetMapping>,
        security: Arc<SecurityGate>,
        consensus: Arc<ConsensusLedger>,
        events: Arc<EventBus>,
    ) -> Self {
        let state = BridgeState {
            status: config.status,
            asset_mappings: asset_mappings
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect(),
            ..Default::default()
        };

        Self {
            supported_chains: config.supported_chains.iter().cloned().collect(),
            config,
            security,
            consensus,
            events,
            state: RwLock::new(state),
        }
    }

    pub fn security(&self) -> &Arc<SecurityGate> {
        &self.security
    }

    pub fn consensus(&self) -> &Arc<ConsensusLedger> {
        &self.consensus
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// In configuration order
    pub fn supported_chains(&self) -> Vec<ChainId> {
        self.config.supported_chains.clone()
    }

    /// Validate and record a new transfer in `pending` state
    pub async fn initiate_transfer(
        &self,
        request: TransferRequest,
    ) -> BridgeResult<CrossChainTransaction> {
        let source = request.source_address.clone();
        match self.try_initiate(request).await {
            Ok(tx) => Ok(tx),
            Err(e) => {
                if e.should_alert() {
                    warn!(source = %source, error = %e, "Transfer rejected");
                } else if e.kind() == ErrorKind::Security {
                    info!(source = %source, error = %e, "Transfer rejected");
                } else {
                    debug!(source = %source, error = %e, "Transfer rejected");
                }
                crate::metrics::record_transfer_rejected(e.kind().as_str());
                Err(e)
            }
        }
    }

    async fn try_initiate(&self, request: TransferRequest) -> BridgeResult<CrossChainTransaction> {
        // A paused bridge answers before any validation.
        if self.security.is_paused().await {
            return Err(BridgeError::BridgeEmergency);
        }
        {
            let state = self.state.read().await;
            check_status(state.status)?;
            self.pre_validate(&request)?;
            self.assess(&state, &request)?;
        }

        self.security
            .check_transfer_security(
                &request.source_address,
                &request.destination_address,
                &request.amount,
                request.asset_type,
            )
            .await?;

        let transaction = {
            let mut state = self.state.write().await;
            // Conditions may have moved while the gate ran.
            check_status(state.status)?;
            let (key, fee) = self.assess(&state, &request)?;

            let mapping = match state.asset_mappings.get_mut(&key) {
                Some(mapping) => mapping,
                None => panic!("asset mapping {} disappeared under the state lock", key),
            };
            let now = Utc::now();
            mapping.daily_used += &request.amount;
            mapping.updated_at = now;
            record_volume_ratio(&key, &mapping.daily_used, &mapping.daily_limit);

            state.daily_volume_used += &request.amount;
            record_volume_ratio("bridge", &state.daily_volume_used, &self.config.max_daily_volume);

            let transaction = CrossChainTransaction::new(request, fee, now);
            state
                .transactions
                .insert(transaction.id.clone(), transaction.clone());
            transaction
        };

        info!(
            tx_id = %transaction.id,
            source_chain = %transaction.source_chain,
            destination_chain = %transaction.destination_chain,
            amount = %transaction.amount,
            fee = %transaction.fee,
            "Transfer initiated"
        );
        crate::metrics::record_transfer_initiated(
            transaction.source_chain.as_str(),
            transaction.destination_chain.as_str(),
        );
        self.events.emit(BridgeEvent::TransferInitiated {
            transaction: transaction.clone(),
        });

        Ok(transaction)
    }

    /// Stateless checks: chains, addresses and a positive amount
    pub fn pre_validate(&self, request: &TransferRequest) -> BridgeResult<()> {
        if request.source_chain == request.destination_chain {
            return Err(BridgeError::InvalidChain(format!(
                "source and destination are both {}",
                request.source_chain
            )));
        }
        for chain in [&request.source_chain, &request.destination_chain] {
            if !self.supported_chains.contains(chain) {
                return Err(BridgeError::InvalidChain(chain.to_string()));
            }
        }

        for address in [&request.source_address, &request.destination_address] {
            if address.trim().is_empty() || address.len() < MIN_ADDRESS_LEN {
                return Err(BridgeError::InvalidAddress(address.clone()));
            }
        }

        if request.amount.is_zero() {
            return Err(self.out_of_bounds(&request.amount));
        }
        Ok(())
    }

    /// Mapping, bounds and daily limits against the current state. Returns the
    /// mapping key and the fee.
    fn assess(&self, state: &BridgeState, request: &TransferRequest) -> BridgeResult<(String, Amount)> {
        let key = AssetMapping::key(
            &request.source_chain,
            &request.destination_chain,
            request.asset_type,
        );
        let mapping = state
            .asset_mappings
            .get(&key)
            .filter(|m| m.active)
            .ok_or_else(|| BridgeError::AssetNotSupported {
                source_chain: request.source_chain.to_string(),
                destination_chain: request.destination_chain.to_string(),
                asset_type: request.asset_type.to_string(),
            })?;

        let amount = &request.amount;
        if amount < &mapping.min_amount || amount > &mapping.max_amount {
            return Err(BridgeError::AmountOutOfBounds {
                amount: amount.to_string(),
                min: mapping.min_amount.to_string(),
                max: mapping.max_amount.to_string(),
            });
        }
        if amount < &self.config.min_amount || amount > &self.config.max_amount {
            return Err(self.out_of_bounds(amount));
        }

        let asset_remaining = mapping.remaining_daily();
        if amount > &asset_remaining {
            return Err(BridgeError::DailyLimitExceeded {
                scope: key,
                requested: amount.to_string(),
                remaining: asset_remaining.to_string(),
            });
        }

        let bridge_remaining = self.bridge_remaining(state);
        if amount > &bridge_remaining {
            return Err(BridgeError::DailyLimitExceeded {
                scope: "bridge".to_string(),
                requested: amount.to_string(),
                remaining: bridge_remaining.to_string(),
            });
        }

        Ok((key, mapping.fee_rate.apply(amount)))
    }

    fn bridge_remaining(&self, state: &BridgeState) -> Amount {
        if state.daily_volume_used > self.config.max_daily_volume {
            panic!(
                "bridge daily volume {} exceeds maximum {}",
                state.daily_volume_used, self.config.max_daily_volume
            );
        }
        &self.config.max_daily_volume - &state.daily_volume_used
    }

    fn out_of_bounds(&self, amount: &Amount) -> BridgeError {
        BridgeError::AmountOutOfBounds {
            amount: amount.to_string(),
            min: self.config.min_amount.to_string(),
            max: self.config.max_amount.to_string(),
        }
    }

    /// Submit one validator's attestation. Returns `true` when this
    /// confirmation moved the transaction to `confirmed`.
    pub async fn confirm_transaction(
        &self,
        tx_id: &str,
        validator_id: &str,
        signature: &[u8],
    ) -> BridgeResult<bool> {
        let payload = {
            let state = self.state.read().await;
            let tx = find(&state, tx_id)?;
            check_transition(tx, TransactionStatus::Confirmed)?;
            tx.signing_payload()
        };

        let reached = self
            .consensus
            .record_confirmation(tx_id, &payload, validator_id, signature)
            .await?;
        if !reached {
            // A fail or expiry that landed during the await has already
            // discarded, so the confirmation just stored would dangle.
            let still_pending = {
                let state = self.state.read().await;
                find(&state, tx_id).and_then(|tx| check_transition(tx, TransactionStatus::Confirmed))
            };
            if let Err(e) = still_pending {
                self.consensus.discard(tx_id);
                return Err(e);
            }
            return Ok(false);
        }

        let confirmed = {
            let mut state = self.state.write().await;
            let tx = find_mut(&mut state, tx_id)?;
            match check_transition(tx, TransactionStatus::Confirmed) {
                Ok(()) => {
                    tx.status = TransactionStatus::Confirmed;
                    tx.confirming_validator = Some(validator_id.to_string());
                    tx.updated_at = Utc::now();
                    Ok(tx.clone())
                }
                Err(e) => Err(e),
            }
        };

        let confirmed = match confirmed {
            Ok(tx) => tx,
            Err(e) => {
                // failed while the quorum was forming
                self.consensus.discard(tx_id);
                return Err(e);
            }
        };

        info!(tx_id, validator = validator_id, "Transaction confirmed");
        crate::metrics::record_tx_confirmed();
        self.events.emit(BridgeEvent::TransactionConfirmed {
            transaction: confirmed,
        });
        Ok(true)
    }

    /// Record destination-chain execution of a confirmed transaction
    pub async fn execute_transaction(
        &self,
        tx_id: &str,
        destination_tx_hash: &str,
        gas_used: u64,
    ) -> BridgeResult<CrossChainTransaction> {
        let executed = {
            let mut state = self.state.write().await;
            let tx = find_mut(&mut state, tx_id)?;
            check_transition(tx, TransactionStatus::Executed)?;

            let now = Utc::now();
            tx.status = TransactionStatus::Executed;
            tx.destination_tx_hash = Some(destination_tx_hash.to_string());
            tx.gas_used = Some(gas_used);
            tx.executed_at = Some(now);
            tx.updated_at = now;
            tx.clone()
        };

        info!(tx_id, destination_tx_hash, gas_used, "Transaction executed");
        crate::metrics::record_tx_executed();
        self.events.emit(BridgeEvent::TransactionExecuted {
            transaction: executed.clone(),
        });
        Ok(executed)
    }

    /// Fail a pending or confirmed transaction. Daily volume is not refunded.
    pub async fn fail_transaction(
        &self,
        tx_id: &str,
        reason: &str,
    ) -> BridgeResult<CrossChainTransaction> {
        let failed = {
            let mut state = self.state.write().await;
            let tx = find_mut(&mut state, tx_id)?;
            check_transition(tx, TransactionStatus::Failed)?;

            let now = Utc::now();
            tx.status = TransactionStatus::Failed;
            tx.failure_reason = Some(reason.to_string());
            tx.failed_at = Some(now);
            tx.updated_at = now;
            tx.clone()
        };
        self.consensus.discard(tx_id);

        warn!(tx_id, reason, "Transaction failed");
        crate::metrics::record_tx_failed();
        self.events.emit(BridgeEvent::TransactionFailed {
            transaction: failed.clone(),
        });
        Ok(failed)
    }

    /// Return a failed transaction to `pending` so it can be confirmed again
    pub async fn reopen_transaction(&self, tx_id: &str) -> BridgeResult<CrossChainTransaction> {
        let reopened = {
            let mut state = self.state.write().await;
            let tx = find_mut(&mut state, tx_id)?;
            if tx.status != TransactionStatus::Failed {
                return Err(wrong_state(tx, &[TransactionStatus::Failed]));
            }

            tx.status = TransactionStatus::Pending;
            tx.failure_reason = None;
            tx.failed_at = None;
            tx.confirming_validator = None;
            // restarts the expiry window; never moves backwards
            tx.updated_at = Utc::now().max(tx.updated_at);
            tx.clone()
        };
        self.consensus.discard(tx_id);

        info!(tx_id, "Transaction reopened");
        self.events.emit(BridgeEvent::TransactionReopened {
            transaction: reopened.clone(),
        });
        Ok(reopened)
    }

    /// Fail transactions pending for longer than the configured timeout.
    /// Age counts from the last entry into `pending`, so a reopened
    /// transaction gets a fresh window.
    pub async fn expire_stale_transactions(&self) -> usize {
        self.expire_stale_transactions_at(Utc::now()).await
    }

    pub async fn expire_stale_transactions_at(&self, now: DateTime<Utc>) -> usize {
        let timeout = Duration::seconds(self.config.transaction_timeout_secs as i64);
        let reason = format!(
            "timed out after {}s without confirmation",
            self.config.transaction_timeout_secs
        );

        let expired: Vec<CrossChainTransaction> = {
            let mut state = self.state.write().await;
            state
                .transactions
                .values_mut()
                .filter(|tx| tx.status == TransactionStatus::Pending && now - tx.updated_at > timeout)
                .map(|tx| {
                    tx.status = TransactionStatus::Failed;
                    tx.failure_reason = Some(reason.clone());
                    tx.failed_at = Some(now);
                    tx.updated_at = now;
                    tx.clone()
                })
                .collect()
        };

        for tx in &expired {
            self.consensus.discard(&tx.id);
            warn!(tx_id = %tx.id, reason = %reason, "Transaction expired");
            crate::metrics::record_tx_failed();
            self.events.emit(BridgeEvent::TransactionFailed {
                transaction: tx.clone(),
            });
        }
        expired.len()
    }

    pub async fn get_transaction(&self, tx_id: &str) -> BridgeResult<CrossChainTransaction> {
        let state = self.state.read().await;
        find(&state, tx_id).cloned()
    }

    /// Oldest first
    pub async fn transactions_by_status(
        &self,
        status: TransactionStatus,
    ) -> Vec<CrossChainTransaction> {
        self.collect(|tx| tx.status == status).await
    }

    /// Transactions where `address` is the source or the destination
    pub async fn transactions_by_address(&self, address: &str) -> Vec<CrossChainTransaction> {
        self.collect(|tx| tx.involves(address)).await
    }

    async fn collect<F>(&self, keep: F) -> Vec<CrossChainTransaction>
    where
        F: Fn(&CrossChainTransaction) -> bool,
    {
        let state = self.state.read().await;
        let mut txs: Vec<CrossChainTransaction> = state
            .transactions
            .values()
            .filter(|tx| keep(tx))
            .cloned()
            .collect();
        txs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        txs
    }

    pub async fn stats(&self) -> BridgeStats {
        let (total_validators, active_validators) = self.consensus.validator_counts().await;

        let state = self.state.read().await;
        let count = |status: TransactionStatus| {
            state
                .transactions
                .values()
                .filter(|tx| tx.status == status)
                .count()
        };

        BridgeStats {
            total_transactions: state.transactions.len(),
            pending_transactions: count(TransactionStatus::Pending),
            confirmed_transactions: count(TransactionStatus::Confirmed),
            executed_transactions: count(TransactionStatus::Executed),
            failed_transactions: count(TransactionStatus::Failed),
            total_validators,
            active_validators,
            total_asset_mappings: state.asset_mappings.len(),
            bridge_status: state.status,
            daily_volume_used: state.daily_volume_used.clone(),
            max_daily_volume: self.config.max_daily_volume.clone(),
        }
    }

    /// Insert or replace an asset mapping; its id is derived from the triple
    pub async fn add_asset_mapping(&self, mut mapping: AssetMapping) -> BridgeResult<AssetMapping> {
        if mapping.source_chain == mapping.destination_chain {
            return Err(BridgeError::InvalidChain(format!(
                "source and destination are both {}",
                mapping.source_chain
            )));
        }
        for chain in [&mapping.source_chain, &mapping.destination_chain] {
            if !self.supported_chains.contains(chain) {
                return Err(BridgeError::InvalidChain(chain.to_string()));
            }
        }
        if mapping.min_amount > mapping.max_amount {
            return Err(BridgeError::AmountOutOfBounds {
                amount: mapping.min_amount.to_string(),
                min: mapping.min_amount.to_string(),
                max: mapping.max_amount.to_string(),
            });
        }
        if mapping.daily_used > mapping.daily_limit {
            return Err(BridgeError::Config(format!(
                "mapping daily_used {} exceeds daily_limit {}",
                mapping.daily_used, mapping.daily_limit
            )));
        }

        mapping.id = AssetMapping::key(
            &mapping.source_chain,
            &mapping.destination_chain,
            mapping.asset_type,
        );
        mapping.updated_at = Utc::now();

        self.state
            .write()
            .await
            .asset_mappings
            .insert(mapping.id.clone(), mapping.clone());
        info!(mapping = %mapping.id, fee = %mapping.fee_rate, "Asset mapping registered");
        Ok(mapping)
    }

    pub async fn set_mapping_active(&self, id: &str, active: bool) -> BridgeResult<()> {
        let mut state = self.state.write().await;
        let mapping = state
            .asset_mappings
            .get_mut(id)
            .ok_or_else(|| BridgeError::AssetMappingNotFound(id.to_string()))?;
        mapping.active = active;
        mapping.updated_at = Utc::now();
        info!(mapping = id, active, "Asset mapping toggled");
        Ok(())
    }

    pub async fn asset_mapping(&self, id: &str) -> Option<AssetMapping> {
        self.state.read().await.asset_mappings.get(id).cloned()
    }

    pub async fn asset_mappings(&self) -> Vec<AssetMapping> {
        let state = self.state.read().await;
        let mut mappings: Vec<AssetMapping> = state.asset_mappings.values().cloned().collect();
        mappings.sort_by(|a, b| a.id.cmp(&b.id));
        mappings
    }

    pub async fn status(&self) -> BridgeStatus {
        self.state.read().await.status
    }

    /// Operator switch for the bridge status
    pub async fn set_status(&self, status: BridgeStatus) {
        let previous = std::mem::replace(&mut self.state.write().await.status, status);
        if previous != status {
            info!(from = previous.as_str(), to = status.as_str(), "Bridge status changed");
        }
    }

    /// Roll over every daily counter
    pub async fn reset_daily_volume(&self) {
        let mut state = self.state.write().await;
        let now = Utc::now();
        for mapping in state.asset_mappings.values_mut() {
            mapping.daily_used = Amount::zero();
            mapping.updated_at = now;
            record_volume_ratio(&mapping.id, &mapping.daily_used, &mapping.daily_limit);
        }
        state.daily_volume_used = Amount::zero();
        record_volume_ratio("bridge", &state.daily_volume_used, &self.config.max_daily_volume);
        info!("Daily volume counters reset");
    }

    /// Seed state with previously persisted transactions
    pub async fn restore(&self, transactions: Vec<CrossChainTransaction>) -> usize {
        let mut state = self.state.write().await;
        let count = transactions.len();
        for tx in transactions {
            state.transactions.insert(tx.id.clone(), tx);
        }
        info!(count, "Transactions restored");
        count
    }

    /// Register a handler for one event topic
    pub fn on<F, Fut>(&self, topic: &str, handler: F) -> JoinHandle<()>
    where
        F: Fn(BridgeEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.events.on(topic, handler)
    }

    pub fn subscribe(&self, topic: &str) -> mpsc::Receiver<BridgeEvent> {
        self.events.subscribe(topic)
    }
}

fn check_status(status: BridgeStatus) -> BridgeResult<()> {
    match status {
        BridgeStatus::Active => Ok(()),
        BridgeStatus::Paused => Err(BridgeError::BridgePaused),
        BridgeStatus::Emergency => Err(BridgeError::BridgeEmergency),
        BridgeStatus::Upgrading => Err(BridgeError::BridgeUpgrading),
    }
}

fn find<'a>(state: &'a BridgeState, tx_id: &str) -> BridgeResult<&'a CrossChainTransaction> {
    state
        .transactions
        .get(tx_id)
        .ok_or_else(|| BridgeError::TransactionNotFound {
            tx_id: tx_id.to_string(),
        })
}

fn find_mut<'a>(
    state: &'a mut BridgeState,
    tx_id: &str,
) -> BridgeResult<&'a mut CrossChainTransaction> {
    state
        .transactions
        .get_mut(tx_id)
        .ok_or_else(|| BridgeError::TransactionNotFound {
            tx_id: tx_id.to_string(),
        })
}

const STATUSES: [TransactionStatus; 4] = [
    TransactionStatus::Pending,
    TransactionStatus::Confirmed,
    TransactionStatus::Executed,
    TransactionStatus::Failed,
];

/// Forward lifecycle step check
fn check_transition(tx: &CrossChainTransaction, next: TransactionStatus) -> BridgeResult<()> {
    if tx.status.can_transition_to(next) {
        return Ok(());
    }
    let allowed: Vec<TransactionStatus> = STATUSES
        .into_iter()
        .filter(|s| s.can_transition_to(next))
        .collect();
    Err(wrong_state(tx, &allowed))
}

fn wrong_state(tx: &CrossChainTransaction, allowed: &[TransactionStatus]) -> BridgeError {
    let expected: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
    BridgeError::WrongState {
        tx_id: tx.id.clone(),
        actual: tx.status.to_string(),
        expected: expected.join(" or "),
    }
}

fn record_volume_ratio(scope: &str, used: &Amount, limit: &Amount) {
    let ratio = match (used.to_f64(), limit.to_f64()) {
        (Some(used), Some(limit)) if limit > 0.0 => used / limit,
        _ => 0.0,
    };
    crate::metrics::record_daily_volume(scope, ratio);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AssetType, FeeRate};
    use crate::config::Settings;
    use crate::consensus::{SignatureVerifier, StructuralVerifier};
    use futures::future::join_all;
    use std::str::FromStr;

    const SRC: &str = "0x1234567890123456789012345678901234567890";
    const DST: &str = "0x0987654321098765432109876543210987654321";
    const VALIDATORS: [&str; 3] = [
        "0xvalidator0000000000000000000000000000000a",
        "0xvalidator0000000000000000000000000000000b",
        "0xvalidator0000000000000000000000000000000c",
    ];

    struct Fixture {
        bridge: Arc<TransferOrchestrator>,
        security: Arc<SecurityGate>,
        events: Arc<EventBus>,
    }

    fn wei(raw: &str) -> Amount {
        Amount::from_str(raw).unwrap()
    }

    fn eth(n: u64) -> Amount {
        Amount::from(n) * wei("1000000000000000000")
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.security.rate_limit_max_requests = 1000;
        for mapping in settings.asset_mappings.iter_mut() {
            mapping.min_amount = Amount::from(1000u32);
        }
        settings
    }

    async fn fixture_with(settings: Settings) -> Fixture {
        fixture_with_verifier(settings, Arc::new(StructuralVerifier)).await
    }

    async fn fixture_with_verifier(
        settings: Settings,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Fixture {
        let events = Arc::new(EventBus::new(256));
        let security = Arc::new(SecurityGate::new(&settings.security, events.clone()));
        let consensus = Arc::new(ConsensusLedger::new(
            &settings.consensus,
            settings.bridge.required_confirmations,
            verifier,
            events.clone(),
        ));
        for v in VALIDATORS {
            consensus
                .add_validator(v, "ethereum".into(), eth(1), "02ab")
                .await
                .unwrap();
        }
        let bridge = Arc::new(TransferOrchestrator::new(
            settings.bridge.clone(),
            settings.build_asset_mappings(),
            security.clone(),
            consensus,
            events.clone(),
        ));
        Fixture {
            bridge,
            security,
            events,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(settings()).await
    }

    fn request(amount: Amount) -> TransferRequest {
        TransferRequest {
            source_chain: "gochain".into(),
            destination_chain: "ethereum".into(),
            source_address: SRC.to_string(),
            destination_address: DST.to_string(),
            asset_type: AssetType::Native,
            asset_address: "0x0000000000000000000000000000000000000000".to_string(),
            amount,
            token_id: None,
            source_tx_hash: None,
        }
    }

    const SIG: [u8; 64] = [1u8; 64];

    #[tokio::test]
    async fn test_full_transfer_lifecycle() {
        let f = fixture().await;
        let mut confirmed_rx = f.events.subscribe("transaction_confirmed");

        let tx = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.fee, wei("1000000000000000"));

        assert!(!f
            .bridge
            .confirm_transaction(&tx.id, VALIDATORS[0], &SIG)
            .await
            .unwrap());
        assert_eq!(
            f.bridge.get_transaction(&tx.id).await.unwrap().status,
            TransactionStatus::Pending
        );

        assert!(f
            .bridge
            .confirm_transaction(&tx.id, VALIDATORS[1], &SIG)
            .await
            .unwrap());
        let confirmed = f.bridge.get_transaction(&tx.id).await.unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Confirmed);
        assert_eq!(confirmed.confirming_validator.as_deref(), Some(VALIDATORS[1]));
        assert!(confirmed_rx.recv().await.is_some());

        let executed = f
            .bridge
            .execute_transaction(&tx.id, "0xdeadbeef", 21000)
            .await
            .unwrap();
        assert_eq!(executed.status, TransactionStatus::Executed);
        assert_eq!(executed.gas_used, Some(21000));
        assert!(executed.executed_at.is_some());

        let validator = f
            .bridge
            .consensus()
            .get_validator(VALIDATORS[1])
            .await
            .unwrap();
        assert_eq!(validator.total_validated, 1);
    }

    #[tokio::test]
    async fn test_fee_is_exact() {
        let f = fixture().await;
        for raw in ["1000000000000000", "123456789012345678", "999999999999999999"] {
            let amount = wei(raw);
            let tx = f.bridge.initiate_transfer(request(amount.clone())).await.unwrap();
            assert_eq!(tx.fee, &amount * 100u32 / 100_000u32);
            assert_eq!(tx.status, TransactionStatus::Pending);
        }
    }

    #[tokio::test]
    async fn test_daily_limit_rejection_leaves_counters_untouched() {
        let f = fixture().await;
        for _ in 0..9 {
            f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
        }
        let half = wei("500000000000000000");
        f.bridge.initiate_transfer(request(half.clone())).await.unwrap();

        let before = f.bridge.stats().await;
        let mapping_before = f
            .bridge
            .asset_mapping("gochain_ethereum_native")
            .await
            .unwrap();

        let err = f.bridge.initiate_transfer(request(eth(1))).await.unwrap_err();
        assert!(matches!(err, BridgeError::DailyLimitExceeded { .. }));
        assert_eq!(err.kind(), ErrorKind::Limit);

        let after = f.bridge.stats().await;
        let mapping_after = f
            .bridge
            .asset_mapping("gochain_ethereum_native")
            .await
            .unwrap();
        assert_eq!(before.total_transactions, after.total_transactions);
        assert_eq!(before.daily_volume_used, after.daily_volume_used);
        assert_eq!(mapping_before.daily_used, mapping_after.daily_used);
        assert!(mapping_after.daily_used <= mapping_after.daily_limit);

        // exactly the remainder still fits
        f.bridge.initiate_transfer(request(half)).await.unwrap();
        assert_eq!(f.bridge.stats().await.daily_volume_used, eth(10));

        f.bridge.reset_daily_volume().await;
        assert_eq!(f.bridge.stats().await.daily_volume_used, Amount::zero());
        f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
    }

    #[tokio::test]
    async fn test_bridge_wide_limit_applies_across_mappings() {
        let mut settings = settings();
        settings.bridge.max_daily_volume = eth(1);
        let f = fixture_with(settings).await;

        f.bridge.initiate_transfer(request(eth(1))).await.unwrap();

        let mut reverse = request(wei("1000000000000000"));
        reverse.source_chain = "ethereum".into();
        reverse.destination_chain = "gochain".into();
        let err = f.bridge.initiate_transfer(reverse).await.unwrap_err();
        match err {
            BridgeError::DailyLimitExceeded { scope, .. } => assert_eq!(scope, "bridge"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let f = fixture().await;

        let mut same_chain = request(eth(1));
        same_chain.destination_chain = "gochain".into();
        assert!(matches!(
            f.bridge.initiate_transfer(same_chain).await,
            Err(BridgeError::InvalidChain(_))
        ));

        let mut unknown_chain = request(eth(1));
        unknown_chain.destination_chain = "solana".into();
        assert!(matches!(
            f.bridge.initiate_transfer(unknown_chain).await,
            Err(BridgeError::InvalidChain(_))
        ));

        let mut short = request(eth(1));
        short.destination_address = "0x1234".to_string();
        assert!(matches!(
            f.bridge.initiate_transfer(short).await,
            Err(BridgeError::InvalidAddress(_))
        ));

        let mut unmapped = request(eth(1));
        unmapped.destination_chain = "polygon".into();
        assert!(matches!(
            f.bridge.initiate_transfer(unmapped).await,
            Err(BridgeError::AssetNotSupported { .. })
        ));

        for amount in [Amount::zero(), eth(2), Amount::from(10_000u32)] {
            // zero, above mapping max, below the global minimum
            let err = f.bridge.initiate_transfer(request(amount)).await.unwrap_err();
            assert!(matches!(err, BridgeError::AmountOutOfBounds { .. }), "{err:?}");
        }

        assert_eq!(f.bridge.stats().await.total_transactions, 0);
    }

    #[tokio::test]
    async fn test_bridge_status_gates_transfers() {
        let f = fixture().await;

        f.bridge.set_status(BridgeStatus::Paused).await;
        assert_eq!(
            f.bridge.initiate_transfer(request(eth(1))).await,
            Err(BridgeError::BridgePaused)
        );
        f.bridge.set_status(BridgeStatus::Upgrading).await;
        assert_eq!(
            f.bridge.initiate_transfer(request(eth(1))).await,
            Err(BridgeError::BridgeUpgrading)
        );
        f.bridge.set_status(BridgeStatus::Active).await;

        f.security.pause_bridge("ops", "incident").await.unwrap();
        assert_eq!(
            f.bridge.initiate_transfer(request(eth(1))).await,
            Err(BridgeError::BridgeEmergency)
        );
        f.security.resume_bridge("ops").await.unwrap();
        f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
    }

    #[tokio::test]
    async fn test_emergency_pause_reported_before_validation() {
        let f = fixture().await;
        f.security.pause_bridge("ops", "incident").await.unwrap();

        let mut bad_chain = request(eth(1));
        bad_chain.destination_chain = "solana".into();
        assert_eq!(
            f.bridge.initiate_transfer(bad_chain).await,
            Err(BridgeError::BridgeEmergency)
        );
        assert_eq!(
            f.bridge.initiate_transfer(request(eth(5))).await,
            Err(BridgeError::BridgeEmergency)
        );
        assert_eq!(
            f.bridge.initiate_transfer(request(Amount::zero())).await,
            Err(BridgeError::BridgeEmergency)
        );
    }

    /// Fails the armed transaction from inside signature verification,
    /// between the orchestrator's status read and the ledger's record.
    struct FailDuringVerify {
        armed: std::sync::Mutex<Option<(Arc<TransferOrchestrator>, String)>>,
    }

    impl SignatureVerifier for FailDuringVerify {
        fn verify(&self, _payload: &[u8], signature: &[u8], _public_key: &str) -> bool {
            let armed = self.armed.lock().unwrap().take();
            if let Some((bridge, tx_id)) = armed {
                tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current()
                        .block_on(bridge.fail_transaction(&tx_id, "cancelled by operator"))
                        .unwrap();
                });
            }
            !signature.is_empty()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_confirmation_racing_a_failure_leaves_nothing_behind() {
        let verifier = Arc::new(FailDuringVerify {
            armed: std::sync::Mutex::new(None),
        });
        let f = fixture_with_verifier(settings(), verifier.clone()).await;
        let tx = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
        *verifier.armed.lock().unwrap() = Some((f.bridge.clone(), tx.id.clone()));

        let err = f
            .bridge
            .confirm_transaction(&tx.id, VALIDATORS[0], &SIG)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::WrongState { .. }));
        assert_eq!(
            f.bridge.get_transaction(&tx.id).await.unwrap().status,
            TransactionStatus::Failed
        );
        assert_eq!(f.bridge.consensus().confirmation_count(&tx.id), 0);
        assert!(!f.bridge.consensus().has_unresolved(VALIDATORS[0]));
        f.bridge.consensus().remove_validator(VALIDATORS[0]).await.unwrap();
    }

    #[tokio::test]
    async fn test_security_rejection_consumes_no_volume() {
        let f = fixture().await;
        f.security.blacklist_address(DST, "sanctioned").await.unwrap();

        let err = f.bridge.initiate_transfer(request(eth(1))).await.unwrap_err();
        assert_eq!(err, BridgeError::Blacklisted(DST.to_string()));
        assert_eq!(f.bridge.stats().await.daily_volume_used, Amount::zero());
    }

    #[tokio::test]
    async fn test_repeat_confirmation_counts_once() {
        let f = fixture().await;
        let tx = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();

        for _ in 0..3 {
            assert!(!f
                .bridge
                .confirm_transaction(&tx.id, VALIDATORS[0], &SIG)
                .await
                .unwrap());
        }
        assert_eq!(f.bridge.consensus().confirmation_count(&tx.id), 1);
        assert_eq!(
            f.bridge.get_transaction(&tx.id).await.unwrap().status,
            TransactionStatus::Pending
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations_confirm_exactly_once() {
        for _ in 0..10 {
            let f = fixture().await;
            let mut confirmed_rx = f.events.subscribe("transaction_confirmed");
            let tx = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();

            let tasks = VALIDATORS.map(|v| {
                let bridge = f.bridge.clone();
                let id = tx.id.clone();
                tokio::spawn(async move { bridge.confirm_transaction(&id, v, &SIG).await })
            });

            let mut transitions = 0;
            for result in join_all(tasks).await {
                match result.unwrap() {
                    Ok(true) => transitions += 1,
                    Ok(false) => {}
                    // a late validator may find the transaction already confirmed
                    Err(BridgeError::WrongState { .. }) => {}
                    Err(e) => panic!("unexpected error {e}"),
                }
            }
            assert_eq!(transitions, 1);

            assert!(confirmed_rx.recv().await.is_some());
            assert!(confirmed_rx.try_recv().is_err());
            assert_eq!(
                f.bridge.get_transaction(&tx.id).await.unwrap().status,
                TransactionStatus::Confirmed
            );
        }
    }

    #[tokio::test]
    async fn test_lifecycle_is_forward_only() {
        let f = fixture().await;
        let tx = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();

        assert!(matches!(
            f.bridge.execute_transaction(&tx.id, "0x1", 1).await,
            Err(BridgeError::WrongState { .. })
        ));

        f.bridge.confirm_transaction(&tx.id, VALIDATORS[0], &SIG).await.unwrap();
        f.bridge.confirm_transaction(&tx.id, VALIDATORS[1], &SIG).await.unwrap();
        assert!(matches!(
            f.bridge.confirm_transaction(&tx.id, VALIDATORS[2], &SIG).await,
            Err(BridgeError::WrongState { .. })
        ));

        f.bridge.execute_transaction(&tx.id, "0x1", 1).await.unwrap();
        let err = f.bridge.execute_transaction(&tx.id, "0x1", 1).await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::WrongState {
                tx_id: tx.id.clone(),
                actual: "executed".to_string(),
                expected: "confirmed".to_string(),
            }
        );
        assert!(matches!(
            f.bridge.fail_transaction(&tx.id, "late").await,
            Err(BridgeError::WrongState { .. })
        ));
        assert!(matches!(
            f.bridge.get_transaction("missing").await,
            Err(BridgeError::TransactionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_and_reopen() {
        let f = fixture().await;
        let tx = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
        f.bridge.confirm_transaction(&tx.id, VALIDATORS[0], &SIG).await.unwrap();

        let failed = f.bridge.fail_transaction(&tx.id, "destination reverted").await.unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("destination reverted"));
        assert!(failed.failed_at.is_some());
        assert_eq!(f.bridge.consensus().confirmation_count(&tx.id), 0);
        // validator is no longer pinned by the abandoned confirmation
        assert!(!f.bridge.consensus().has_unresolved(VALIDATORS[0]));

        let reopened = f.bridge.reopen_transaction(&tx.id).await.unwrap();
        assert_eq!(reopened.status, TransactionStatus::Pending);
        assert!(reopened.failure_reason.is_none());
        assert!(matches!(
            f.bridge.reopen_transaction(&tx.id).await,
            Err(BridgeError::WrongState { .. })
        ));
        // daily volume is charged once
        assert_eq!(f.bridge.stats().await.daily_volume_used, eth(1));
    }

    #[tokio::test]
    async fn test_stale_pending_transactions_expire() {
        let f = fixture().await;
        let stale = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
        let confirmed = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
        for v in &VALIDATORS[..2] {
            f.bridge.confirm_transaction(&confirmed.id, v, &SIG).await.unwrap();
        }
        f.bridge.confirm_transaction(&stale.id, VALIDATORS[2], &SIG).await.unwrap();
        let mut failures = f.bridge.subscribe("transaction_failed");

        assert_eq!(f.bridge.expire_stale_transactions().await, 0);

        let later = Utc::now() + Duration::seconds(24 * 3600 + 1);
        assert_eq!(f.bridge.expire_stale_transactions_at(later).await, 1);

        let expired = f.bridge.get_transaction(&stale.id).await.unwrap();
        assert_eq!(expired.status, TransactionStatus::Failed);
        assert!(expired.failure_reason.unwrap().contains("timed out"));
        assert_eq!(f.bridge.consensus().confirmation_count(&stale.id), 0);
        assert_eq!(
            f.bridge.get_transaction(&confirmed.id).await.unwrap().status,
            TransactionStatus::Confirmed
        );
        match failures.recv().await {
            Some(BridgeEvent::TransactionFailed { transaction }) => {
                assert_eq!(transaction.id, stale.id)
            }
            other => panic!("unexpected event {:?}", other),
        }

        // already failed, nothing left to expire
        assert_eq!(f.bridge.expire_stale_transactions_at(later).await, 0);
    }

    #[tokio::test]
    async fn test_reopened_transaction_gets_a_fresh_expiry_window() {
        let f = fixture().await;
        let tx = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();

        let expired_at = Utc::now() + Duration::hours(25);
        assert_eq!(f.bridge.expire_stale_transactions_at(expired_at).await, 1);

        let reopened = f.bridge.reopen_transaction(&tx.id).await.unwrap();
        assert!(reopened.updated_at >= expired_at);

        let next_sweep = expired_at + Duration::minutes(1);
        assert_eq!(f.bridge.expire_stale_transactions_at(next_sweep).await, 0);
        assert_eq!(
            f.bridge.get_transaction(&tx.id).await.unwrap().status,
            TransactionStatus::Pending
        );

        // a full window after the reopen it expires again
        let much_later = expired_at + Duration::hours(25);
        assert_eq!(f.bridge.expire_stale_transactions_at(much_later).await, 1);
    }

    #[tokio::test]
    async fn test_queries_and_stats() {
        let f = fixture().await;
        let first = f.bridge.initiate_transfer(request(eth(1))).await.unwrap();
        let mut other = request(eth(1));
        other.source_address = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd".to_string();
        let second = f.bridge.initiate_transfer(other).await.unwrap();
        f.bridge.fail_transaction(&second.id, "cancelled").await.unwrap();

        let by_src = f.bridge.transactions_by_address(SRC).await;
        assert_eq!(by_src.len(), 1);
        assert_eq!(by_src[0].id, first.id);
        assert_eq!(f.bridge.transactions_by_address(DST).await.len(), 2);
        assert_eq!(
            f.bridge.transactions_by_status(TransactionStatus::Failed).await[0].id,
            second.id
        );

        let stats = f.bridge.stats().await;
        assert_eq!(stats.total_transactions, 2);
        assert_eq!(stats.pending_transactions, 1);
        assert_eq!(stats.failed_transactions, 1);
        assert_eq!(stats.total_validators, 3);
        assert_eq!(stats.active_validators, 3);
        assert_eq!(stats.total_asset_mappings, 2);
        assert_eq!(stats.daily_volume_used, eth(2));
    }

    #[tokio::test]
    async fn test_asset_mapping_administration() {
        let f = fixture().await;
        let now = Utc::now();
        let mapping = AssetMapping {
            id: String::new(),
            source_chain: "ethereum".into(),
            destination_chain: "polygon".into(),
            source_asset: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".to_string(),
            destination_asset: "0x2791bca1f2de4661ed88a30c99a7a9449aa84174".to_string(),
            asset_type: AssetType::Erc20,
            decimals: 6,
            active: true,
            min_amount: wei("1000000000000000"),
            max_amount: eth(1),
            daily_limit: eth(5),
            daily_used: Amount::zero(),
            fee_rate: FeeRate::from_percent_str("0.25").unwrap(),
            created_at: now,
            updated_at: now,
        };
        let added = f.bridge.add_asset_mapping(mapping).await.unwrap();
        assert_eq!(added.id, "ethereum_polygon_erc20");

        let mut usdc = request(eth(1));
        usdc.source_chain = "ethereum".into();
        usdc.destination_chain = "polygon".into();
        usdc.asset_type = AssetType::Erc20;
        let tx = f.bridge.initiate_transfer(usdc.clone()).await.unwrap();
        assert_eq!(tx.fee, wei("2500000000000000"));

        f.bridge.set_mapping_active(&added.id, false).await.unwrap();
        assert!(matches!(
            f.bridge.initiate_transfer(usdc).await,
            Err(BridgeError::AssetNotSupported { .. })
        ));
        assert!(matches!(
            f.bridge.set_mapping_active("nope", true).await,
            Err(BridgeError::AssetMappingNotFound(_))
        ));
    }
}
