//! Bridge notifications and their delivery
//!
//! Every state change in the core is published on a named topic. Delivery is
//! best-effort and at-most-once per emission: each subscriber owns a bounded
//! queue, and a full queue drops the notification instead of blocking the
//! emitting component.

use crate::batch::TransactionBatch;
use crate::bridge::{decimal, Amount, CrossChainTransaction};
use crate::consensus::Validator;
use crate::security::SecurityEvent;

use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Topic that receives every notification
pub const ALL_TOPICS: &str = "*";

/// Notifications emitted by the bridge core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "topic", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// New transfer accepted and pending consensus
    TransferInitiated { transaction: CrossChainTransaction },

    /// Confirmation threshold reached
    TransactionConfirmed { transaction: CrossChainTransaction },

    TransactionExecuted { transaction: CrossChainTransaction },

    TransactionFailed { transaction: CrossChainTransaction },

    /// Failed transaction returned to pending for reprocessing
    TransactionReopened { transaction: CrossChainTransaction },

    ValidatorAdded { validator: Validator },

    ValidatorRemoved { address: String },

    ValidatorStakeUpdated {
        address: String,
        #[serde(with = "decimal")]
        old_stake: Amount,
        #[serde(with = "decimal")]
        new_stake: Amount,
    },

    BatchTransferInitiated { batch: TransactionBatch },

    BatchConfirmed { batch: TransactionBatch },

    BatchExecuted { batch: TransactionBatch },

    BatchFailed { batch: TransactionBatch, reason: String },

    BatchRetryInitiated { batch: TransactionBatch },

    /// Rate limit, fraud, large transfer or pause record
    SecurityEvent { event: SecurityEvent },
}

impl BridgeEvent {
    /// Topic name
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::TransferInitiated { .. } => "transfer_initiated",
            BridgeEvent::TransactionConfirmed { .. } => "transaction_confirmed",
            BridgeEvent::TransactionExecuted { .. } => "transaction_executed",
            BridgeEvent::TransactionFailed { .. } => "transaction_failed",
            BridgeEvent::TransactionReopened { .. } => "transaction_reopened",
            BridgeEvent::ValidatorAdded { .. } => "validator_added",
            BridgeEvent::ValidatorRemoved { .. } => "validator_removed",
            BridgeEvent::ValidatorStakeUpdated { .. } => "validator_stake_updated",
            BridgeEvent::BatchTransferInitiated { .. } => "batch_transfer_initiated",
            BridgeEvent::BatchConfirmed { .. } => "batch_confirmed",
            BridgeEvent::BatchExecuted { .. } => "batch_executed",
            BridgeEvent::BatchFailed { .. } => "batch_failed",
            BridgeEvent::BatchRetryInitiated { .. } => "batch_retry_initiated",
            BridgeEvent::SecurityEvent { .. } => "security_event",
        }
    }
}

/// Topic-based fan-out with one bounded queue per subscriber
pub struct EventBus {
    subscribers: DashMap<String, Vec<mpsc::Sender<BridgeEvent>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Receive notifications for one topic
    pub fn subscribe(&self, topic: &str) -> mpsc::Receiver<BridgeEvent> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        debug!(topic, "Subscriber registered");
        rx
    }

    /// Receive every notification
    pub fn subscribe_all(&self) -> mpsc::Receiver<BridgeEvent> {
        self.subscribe(ALL_TOPICS)
    }

    /// Register a handler; it runs on its own task, one notification at a time.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on<F, Fut>(&self, topic: &str, handler: F) -> JoinHandle<()>
    where
        F: Fn(BridgeEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut rx = self.subscribe(topic);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event).await;
            }
        })
    }

    /// Publish without waiting on any subscriber
    pub fn emit(&self, event: BridgeEvent) {
        let topic = event.name();
        self.deliver(topic, &event);
        self.deliver(ALL_TOPICS, &event);
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn deliver(&self, key: &str, event: &BridgeEvent) {
        let Some(mut subs) = self.subscribers.get_mut(key) else {
            return;
        };

        subs.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(topic = event.name(), "Subscriber queue full, dropping notification");
                crate::metrics::record_event_dropped(event.name());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
