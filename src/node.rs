//! Component wiring
//!
//! Builds the bridge core from [`Settings`] in dependency order: event bus,
//! security gate, consensus ledger, orchestrator, batch coordinator.

use crate::batch::BatchCoordinator;
use crate::bridge::TransferOrchestrator;
use crate::config::Settings;
use crate::consensus::ConsensusLedger;
use crate::error::BridgeResult;
use crate::events::EventBus;
use crate::security::SecurityGate;

use std::sync::Arc;
use tracing::info;

pub struct BridgeNode {
    pub settings: Settings,
    pub events: Arc<EventBus>,
    pub security: Arc<SecurityGate>,
    pub consensus: Arc<ConsensusLedger>,
    pub orchestrator: Arc<TransferOrchestrator>,
    pub batches: Arc<BatchCoordinator>,
}

impl BridgeNode {
    pub fn from_settings(settings: Settings) -> BridgeResult<Self> {
        settings.validate()?;

        let events = Arc::new(EventBus::new(settings.events.queue_capacity));
        let security = Arc::new(SecurityGate::new(&settings.security, events.clone()));
        let consensus = Arc::new(ConsensusLedger::new(
            &settings.consensus,
            settings.bridge.required_confirmations,
            Arc::from(settings.consensus.signature_scheme.verifier()),
            events.clone(),
        ));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            settings.bridge.clone(),
            settings.build_asset_mappings(),
            security.clone(),
            consensus.clone(),
            events.clone(),
        ));
        let batches = Arc::new(BatchCoordinator::new(&settings.batch, orchestrator.clone()));

        info!(
            bridge_id = %settings.bridge.bridge_id,
            chains = settings.bridge.supported_chains.len(),
            required_confirmations = settings.bridge.required_confirmations,
            signature_scheme = ?settings.consensus.signature_scheme,
            "Bridge core initialized"
        );

        Ok(Self {
            settings,
            events,
            security,
            consensus,
            orchestrator,
            batches,
        })
    }
}
