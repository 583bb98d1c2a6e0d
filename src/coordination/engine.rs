//! Main coordination loop: watcher dispatch, persistence mirror and
//! periodic maintenance

use super::{MaintenanceTask, WatcherEvent};
use crate::batch::BatchCoordinator;
use crate::bridge::TransferOrchestrator;
use crate::config::MaintenanceSettings;
use crate::error::{BridgeError, BridgeResult};
use crate::events::BridgeEvent;
use crate::state::BridgeRepository;

use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{interval_at, Duration, Instant, Interval};
use tracing::{debug, error, info, warn};

/// Cross-chain coordination engine
pub struct CoordinationEngine {
    orchestrator: Arc<TransferOrchestrator>,
    batches: Arc<BatchCoordinator>,
    repository: Arc<dyn BridgeRepository>,
    config: MaintenanceSettings,
    /// Shutdown flag
    shutdown: Arc<RwLock<bool>>,
    wake: Notify,
}

impl CoordinationEngine {
    /// Create the engine and seed the orchestrator with persisted transactions
    pub async fn new(
        orchestrator: Arc<TransferOrchestrator>,
        batches: Arc<BatchCoordinator>,
        repository: Arc<dyn BridgeRepository>,
        config: MaintenanceSettings,
    ) -> BridgeResult<Self> {
        repository.health_check().await?;

        let persisted = repository.load_transactions().await?;
        if !persisted.is_empty() {
            orchestrator.restore(persisted).await;
        }

        Ok(Self {
            orchestrator,
            batches,
            repository,
            config,
            shutdown: Arc::new(RwLock::new(false)),
            wake: Notify::new(),
        })
    }

    /// Main coordination loop
    pub async fn run(&self, mut watcher_rx: mpsc::Receiver<WatcherEvent>) -> BridgeResult<()> {
        // Mirror every state change into the repository
        let mut events_rx = self.orchestrator.events().subscribe_all();

        let mut confirmation_sweep = ticker(self.config.confirmation_sweep_secs);
        let mut batch_sweep = ticker(self.config.batch_sweep_secs);
        let mut expiry_sweep = ticker(self.config.transaction_sweep_secs);
        let mut limiter_cleanup = ticker(self.config.rate_limiter_cleanup_secs);
        let mut daily_reset = ticker(self.config.daily_reset_secs);

        info!("Coordination engine started");

        loop {
            if *self.shutdown.read().await {
                break;
            }

            tokio::select! {
                Some(event) = watcher_rx.recv() => {
                    if let Err(e) = self.handle_event(event).await {
                        if e.is_retryable() {
                            warn!(error = %e, "Watcher event rejected");
                        } else {
                            error!(error = %e, "Error handling watcher event");
                        }
                    }
                }

                Some(event) = events_rx.recv() => {
                    if let Err(e) = self.persist(&event).await {
                        error!(event = event.name(), error = %e, "Failed to persist event");
                    }
                }

                _ = confirmation_sweep.tick() => {
                    self.run_maintenance(MaintenanceTask::ConfirmationSweep).await;
                }

                _ = batch_sweep.tick() => {
                    self.run_maintenance(MaintenanceTask::BatchSweep).await;
                }

                _ = expiry_sweep.tick() => {
                    self.run_maintenance(MaintenanceTask::TransactionExpiry).await;
                }

                _ = limiter_cleanup.tick() => {
                    self.run_maintenance(MaintenanceTask::RateLimiterCleanup).await;
                }

                _ = daily_reset.tick() => {
                    self.run_maintenance(MaintenanceTask::DailyReset).await;
                }

                _ = self.wake.notified() => {}
            }
        }

        info!("Coordination engine stopped");
        Ok(())
    }

    /// Dispatch one chain-watcher observation to the orchestrator
    pub async fn handle_event(&self, event: WatcherEvent) -> BridgeResult<()> {
        debug!(event = event.name(), "Handling watcher event");

        match event {
            WatcherEvent::DepositObserved(request) => {
                let tx = self.orchestrator.initiate_transfer(request).await?;
                info!(tx_id = %tx.id, source_tx_hash = ?tx.source_tx_hash, "Deposit accepted");
            }

            WatcherEvent::ConfirmationObserved {
                tx_id,
                validator_id,
                signature,
            } => {
                let signature = hex::decode(signature.trim_start_matches("0x"))
                    .map_err(|_| BridgeError::InvalidSignature(validator_id.clone()))?;
                self.orchestrator
                    .confirm_transaction(&tx_id, &validator_id, &signature)
                    .await?;
            }

            WatcherEvent::ExecutionObserved {
                tx_id,
                destination_tx_hash,
                gas_used,
            } => {
                self.orchestrator
                    .execute_transaction(&tx_id, &destination_tx_hash, gas_used)
                    .await?;
            }

            WatcherEvent::ExecutionFailed { tx_id, reason } => {
                self.orchestrator.fail_transaction(&tx_id, &reason).await?;
            }
        }

        Ok(())
    }

    async fn persist(&self, event: &BridgeEvent) -> BridgeResult<()> {
        match event {
            BridgeEvent::TransferInitiated { transaction }
            | BridgeEvent::TransactionConfirmed { transaction }
            | BridgeEvent::TransactionExecuted { transaction }
            | BridgeEvent::TransactionFailed { transaction }
            | BridgeEvent::TransactionReopened { transaction } => {
                self.repository.save_transaction(transaction).await
            }

            BridgeEvent::ValidatorAdded { validator } => {
                self.repository.save_validator(validator).await
            }

            BridgeEvent::ValidatorRemoved { address }
            | BridgeEvent::ValidatorStakeUpdated { address, .. } => {
                match self.orchestrator.consensus().get_validator(address).await {
                    Some(validator) => self.repository.save_validator(&validator).await,
                    None => Ok(()),
                }
            }

            BridgeEvent::BatchTransferInitiated { batch }
            | BridgeEvent::BatchConfirmed { batch }
            | BridgeEvent::BatchExecuted { batch }
            | BridgeEvent::BatchFailed { batch, .. }
            | BridgeEvent::BatchRetryInitiated { batch } => self.repository.save_batch(batch).await,

            BridgeEvent::SecurityEvent { .. } => Ok(()),
        }
    }

    pub async fn run_maintenance(&self, task: MaintenanceTask) {
        debug!(task = task.as_str(), "Running maintenance");

        match task {
            MaintenanceTask::ConfirmationSweep => {
                self.orchestrator.consensus().cleanup_expired_confirmations();
            }
            MaintenanceTask::BatchSweep => {
                self.batches.cleanup_expired_batches().await;
            }
            MaintenanceTask::TransactionExpiry => {
                let expired = self.orchestrator.expire_stale_transactions().await;
                if expired > 0 {
                    info!(expired, "Stale pending transactions failed");
                }
            }
            MaintenanceTask::RateLimiterCleanup => {
                let removed = self.orchestrator.security().cleanup_rate_limiters();
                if removed > 0 {
                    debug!(removed, "Idle rate limiter windows dropped");
                }
            }
            MaintenanceTask::DailyReset => {
                self.orchestrator.reset_daily_volume().await;
            }
        }
    }

    /// Stop the coordination engine
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        self.wake.notify_one();
        info!("Coordination engine shutdown initiated");
    }
}

/// Periodic ticker whose first tick is one period away
fn ticker(secs: u64) -> Interval {
    let period = Duration::from_secs(secs.max(1));
    interval_at(Instant::now() + period, period)
}
