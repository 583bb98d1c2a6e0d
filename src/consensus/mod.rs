//! Validator membership and confirmation threshold aggregation
//!
//! The [`ConsensusLedger`] is the single authority on how many validators
//! have attested a transaction. The orchestrator supplies the signing payload
//! and acts on the `threshold reached` signal; it never counts on its own.

pub mod aggregator;
pub mod registry;
pub mod verifier;

pub use aggregator::{Confirmation, ConfirmationAggregator};
pub use registry::{Validator, ValidatorRegistry};
pub use verifier::{
    Secp256k1Verifier, SignatureScheme, SignatureVerifier, StructuralVerifier, MIN_SIGNATURE_LEN,
};

use crate::bridge::{Amount, ChainId};
use crate::config::ConsensusSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventBus};

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct ConsensusLedger {
    registry: RwLock<ValidatorRegistry>,
    aggregator: ConfirmationAggregator,
    verifier: Arc<dyn SignatureVerifier>,
    events: Arc<EventBus>,
}

impl ConsensusLedger {
    pub fn new(
        config: &ConsensusSettings,
        required_confirmations: usize,
        verifier: Arc<dyn SignatureVerifier>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            registry: RwLock::new(ValidatorRegistry::new(config.min_stake.clone())),
            aggregator: ConfirmationAggregator::new(
                required_confirmations,
                Duration::seconds(config.confirmation_timeout_secs as i64),
            ),
            verifier,
            events,
        }
    }

    pub fn required_confirmations(&self) -> usize {
        self.aggregator.required()
    }

    /// Register an active validator
    pub async fn add_validator(
        &self,
        address: &str,
        chain: ChainId,
        stake: Amount,
        public_key: &str,
    ) -> BridgeResult<Validator> {
        let (validator, active) = {
            let mut registry = self.registry.write().await;
            let validator = registry.add(address, chain, stake, public_key, Utc::now())?;
            (validator, registry.active().count())
        };

        info!(
            validator = %validator.address,
            chain = %validator.chain,
            stake = %validator.stake,
            "Validator added"
        );
        crate::metrics::record_active_validators(active);
        self.events.emit(BridgeEvent::ValidatorAdded {
            validator: validator.clone(),
        });
        Ok(validator)
    }

    /// Deactivate a validator that holds no unresolved confirmations
    pub async fn remove_validator(&self, address: &str) -> BridgeResult<()> {
        let active = {
            let mut registry = self.registry.write().await;
            if registry.get(address).is_none() {
                return Err(BridgeError::ValidatorNotFound(address.to_string()));
            }
            if self.aggregator.has_unresolved(address) {
                return Err(BridgeError::PendingConfirmations(address.to_string()));
            }
            registry.deactivate(address, Utc::now())?;
            registry.active().count()
        };

        info!(validator = address, "Validator removed");
        crate::metrics::record_active_validators(active);
        self.events.emit(BridgeEvent::ValidatorRemoved {
            address: address.to_string(),
        });
        Ok(())
    }

    pub async fn update_validator_stake(&self, address: &str, stake: Amount) -> BridgeResult<()> {
        let old_stake = self
            .registry
            .write()
            .await
            .update_stake(address, stake.clone(), Utc::now())?;

        info!(validator = address, old = %old_stake, new = %stake, "Validator stake updated");
        self.events.emit(BridgeEvent::ValidatorStakeUpdated {
            address: address.to_string(),
            old_stake,
            new_stake: stake,
        });
        Ok(())
    }

    pub async fn heartbeat(&self, address: &str) -> BridgeResult<()> {
        self.registry.write().await.heartbeat(address, Utc::now())?;
        debug!(validator = address, "Heartbeat");
        Ok(())
    }

    /// Verify and store one attestation. Returns `true` exactly once per
    /// transaction, on the confirmation that first reaches the threshold.
    pub async fn record_confirmation(
        &self,
        tx_id: &str,
        payload: &[u8],
        validator_id: &str,
        signature: &[u8],
    ) -> BridgeResult<bool> {
        let now = Utc::now();

        // The read guard keeps removal out while the confirmation lands.
        let reached = {
            let registry = self.registry.read().await;
            let validator = registry
                .get(validator_id)
                .filter(|v| v.active)
                .ok_or_else(|| BridgeError::ValidatorInactive(validator_id.to_string()))?;

            if !self.verifier.verify(payload, signature, &validator.public_key) {
                warn!(tx_id, validator = validator_id, "Invalid validator signature");
                return Err(BridgeError::InvalidSignature(validator_id.to_string()));
            }

            self.aggregator.record(Confirmation {
                tx_id: tx_id.to_string(),
                validator_id: validator_id.to_string(),
                signature: hex::encode(signature),
                timestamp: now,
                valid: true,
            })
        };

        self.registry
            .write()
            .await
            .note_confirmation(validator_id, reached, now);

        crate::metrics::record_confirmation(validator_id);
        debug!(
            tx_id,
            validator = validator_id,
            count = self.aggregator.count(tx_id),
            required = self.aggregator.required(),
            "Confirmation recorded"
        );
        Ok(reached)
    }

    pub fn cleanup_expired_confirmations(&self) -> usize {
        self.cleanup_expired_confirmations_at(Utc::now())
    }

    pub fn cleanup_expired_confirmations_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.aggregator.cleanup_expired_at(now);
        if removed > 0 {
            info!(removed, "Expired confirmations cleaned up");
        }
        removed
    }

    pub fn confirmations(&self, tx_id: &str) -> Vec<Confirmation> {
        self.aggregator.confirmations(tx_id)
    }

    pub fn confirmation_count(&self, tx_id: &str) -> usize {
        self.aggregator.count(tx_id)
    }

    /// Drop a transaction's confirmations once it can no longer be confirmed
    pub fn discard(&self, tx_id: &str) {
        if self.aggregator.discard(tx_id) {
            debug!(tx_id, "Confirmations discarded");
        }
    }

    pub fn has_unresolved(&self, validator_id: &str) -> bool {
        self.aggregator.has_unresolved(validator_id)
    }

    pub async fn get_validator(&self, address: &str) -> Option<Validator> {
        self.registry.read().await.get(address).cloned()
    }

    pub async fn active_validators(&self) -> Vec<Validator> {
        let mut active: Vec<Validator> = self.registry.read().await.active().cloned().collect();
        active.sort_by(|a, b| a.address.cmp(&b.address));
        active
    }

    pub async fn validators(&self) -> Vec<Validator> {
        let mut all: Vec<Validator> = self.registry.read().await.all().cloned().collect();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        all
    }

    /// (total, active)
    pub async fn validator_counts(&self) -> (usize, usize) {
        let registry = self.registry.read().await;
        (registry.len(), registry.active().count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::verifier::MockSignatureVerifier;
    use futures::future::join_all;

    const A: &str = "0xvalidator0000000000000000000000000000000a";
    const B: &str = "0xvalidator0000000000000000000000000000000b";
    const C: &str = "0xvalidator0000000000000000000000000000000c";

    fn one_eth() -> Amount {
        Amount::from(1_000_000_000_000_000_000u64)
    }

    fn ledger_with(verifier: Arc<dyn SignatureVerifier>) -> (ConsensusLedger, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(64));
        let ledger = ConsensusLedger::new(&ConsensusSettings::default(), 2, verifier, bus.clone());
        (ledger, bus)
    }

    fn ledger() -> ConsensusLedger {
        ledger_with(Arc::new(StructuralVerifier)).0
    }

    async fn with_validators(ledger: &ConsensusLedger, addresses: &[&str]) {
        for address in addresses {
            ledger
                .add_validator(address, "ethereum".into(), one_eth(), "02ab")
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_add_validator_emits_event() {
        let (ledger, bus) = ledger_with(Arc::new(StructuralVerifier));
        let mut rx = bus.subscribe("validator_added");

        with_validators(&ledger, &[A]).await;
        assert_eq!(rx.recv().await.unwrap().name(), "validator_added");

        let err = ledger
            .add_validator(B, "ethereum".into(), Amount::from(1u32), "02ab")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InsufficientStake { .. }));
        assert_eq!(ledger.validator_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_threshold_and_validated_counter() {
        let ledger = ledger();
        with_validators(&ledger, &[A, B, C]).await;
        let sig = [1u8; 64];

        assert!(!ledger.record_confirmation("tx1", b"p", A, &sig).await.unwrap());
        // same validator again counts once
        assert!(!ledger.record_confirmation("tx1", b"p", A, &sig).await.unwrap());
        assert_eq!(ledger.confirmation_count("tx1"), 1);

        assert!(ledger.record_confirmation("tx1", b"p", B, &sig).await.unwrap());
        assert!(!ledger.record_confirmation("tx1", b"p", C, &sig).await.unwrap());

        let a = ledger.get_validator(A).await.unwrap();
        let b = ledger.get_validator(B).await.unwrap();
        assert_eq!(a.total_confirmations, 2);
        assert_eq!(a.total_validated, 0);
        assert_eq!(b.total_validated, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_confirmations_reach_threshold_once() {
        for _ in 0..20 {
            let ledger = Arc::new(ledger());
            with_validators(&ledger, &[A, B, C]).await;

            let tasks = [A, B, C].map(|v| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .record_confirmation("tx1", b"p", v, &[1u8; 64])
                        .await
                        .unwrap()
                })
            });

            let reached: Vec<bool> = join_all(tasks)
                .await
                .into_iter()
                .map(|r| r.unwrap())
                .collect();
            assert_eq!(reached.iter().filter(|r| **r).count(), 1);
        }
    }

    #[tokio::test]
    async fn test_invalid_signature_is_not_recorded() {
        let mut verifier = MockSignatureVerifier::new();
        verifier
            .expect_verify()
            .times(2)
            .returning(|_, sig, _| sig[0] == 1);
        let (ledger, _bus) = ledger_with(Arc::new(verifier));
        with_validators(&ledger, &[A]).await;

        assert_eq!(
            ledger.record_confirmation("tx1", b"p", A, &[0u8; 64]).await,
            Err(BridgeError::InvalidSignature(A.to_string()))
        );
        assert_eq!(ledger.confirmation_count("tx1"), 0);

        ledger
            .record_confirmation("tx1", b"p", A, &[1u8; 64])
            .await
            .unwrap();
        assert_eq!(ledger.confirmation_count("tx1"), 1);
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_validator_rejected() {
        let ledger = ledger();
        with_validators(&ledger, &[A]).await;

        assert_eq!(
            ledger.record_confirmation("tx1", b"p", B, &[1u8; 64]).await,
            Err(BridgeError::ValidatorInactive(B.to_string()))
        );

        ledger.remove_validator(A).await.unwrap();
        assert_eq!(
            ledger.record_confirmation("tx1", b"p", A, &[1u8; 64]).await,
            Err(BridgeError::ValidatorInactive(A.to_string()))
        );
    }

    #[tokio::test]
    async fn test_remove_blocked_by_unresolved_confirmations() {
        let ledger = ledger();
        with_validators(&ledger, &[A, B]).await;

        ledger
            .record_confirmation("tx1", b"p", A, &[1u8; 64])
            .await
            .unwrap();
        assert_eq!(
            ledger.remove_validator(A).await,
            Err(BridgeError::PendingConfirmations(A.to_string()))
        );

        ledger
            .record_confirmation("tx1", b"p", B, &[1u8; 64])
            .await
            .unwrap();
        ledger.remove_validator(A).await.unwrap();
        assert_eq!(ledger.active_validators().await.len(), 1);
        assert!(matches!(
            ledger.remove_validator("0xnobody").await,
            Err(BridgeError::ValidatorNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_confirmations_restart_from_scratch() {
        let ledger = ledger();
        with_validators(&ledger, &[A, B]).await;

        ledger
            .record_confirmation("tx1", b"p", A, &[1u8; 64])
            .await
            .unwrap();
        let removed = ledger.cleanup_expired_confirmations_at(Utc::now() + Duration::minutes(31));
        assert_eq!(removed, 1);
        assert_eq!(ledger.confirmation_count("tx1"), 0);

        assert!(!ledger
            .record_confirmation("tx1", b"p", B, &[1u8; 64])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stake_update_and_heartbeat() {
        let (ledger, bus) = ledger_with(Arc::new(StructuralVerifier));
        with_validators(&ledger, &[A]).await;
        let mut rx = bus.subscribe("validator_stake_updated");

        ledger.update_validator_stake(A, one_eth() * 2u32).await.unwrap();
        assert_eq!(ledger.get_validator(A).await.unwrap().stake, one_eth() * 2u32);
        match rx.recv().await.unwrap() {
            BridgeEvent::ValidatorStakeUpdated { old_stake, new_stake, .. } => {
                assert_eq!(old_stake, one_eth());
                assert_eq!(new_stake, one_eth() * 2u32);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert!(matches!(
            ledger.update_validator_stake(A, Amount::from(1u32)).await,
            Err(BridgeError::InsufficientStake { .. })
        ));
        assert!(matches!(
            ledger.update_validator_stake(B, one_eth()).await,
            Err(BridgeError::ValidatorNotFound(_))
        ));

        let before = ledger.get_validator(A).await.unwrap().last_heartbeat;
        ledger.heartbeat(A).await.unwrap();
        assert!(ledger.get_validator(A).await.unwrap().last_heartbeat >= before);
        assert!(matches!(
            ledger.heartbeat(B).await,
            Err(BridgeError::ValidatorNotFound(_))
        ));
    }
}
