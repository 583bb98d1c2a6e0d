//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transfer lifecycle transitions
//! - Validator confirmations and membership
//! - Security events and rejected transfers
//! - Batch outcomes and dropped event notifications

use crate::error::{BridgeError, BridgeResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge,
    GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Transfer metrics
    pub static ref TRANSFERS_INITIATED: CounterVec = register_counter_vec!(
        "xchain_bridge_transfers_initiated_total",
        "Total transfers initiated",
        &["source_chain", "destination_chain"]
    ).unwrap();

    pub static ref TRANSFERS_REJECTED: CounterVec = register_counter_vec!(
        "xchain_bridge_transfers_rejected_total",
        "Total transfer requests rejected by error kind",
        &["kind"]
    ).unwrap();

    pub static ref TX_TRANSITIONS: CounterVec = register_counter_vec!(
        "xchain_bridge_transaction_transitions_total",
        "Total transaction status transitions",
        &["status"]
    ).unwrap();

    // Consensus metrics
    pub static ref CONFIRMATIONS_RECORDED: CounterVec = register_counter_vec!(
        "xchain_bridge_confirmations_recorded_total",
        "Total validator confirmations accepted",
        &["validator"]
    ).unwrap();

    pub static ref ACTIVE_VALIDATORS: Gauge = register_gauge!(
        "xchain_bridge_active_validators",
        "Number of active validators"
    ).unwrap();

    // Security metrics
    pub static ref SECURITY_EVENTS: CounterVec = register_counter_vec!(
        "xchain_bridge_security_events_total",
        "Total security events by type",
        &["event_type"]
    ).unwrap();

    pub static ref BRIDGE_PAUSED: Gauge = register_gauge!(
        "xchain_bridge_paused",
        "Emergency pause status (1=paused, 0=active)"
    ).unwrap();

    // Batch metrics
    pub static ref BATCHES: CounterVec = register_counter_vec!(
        "xchain_bridge_batches_total",
        "Total batch transitions by status",
        &["status"]
    ).unwrap();

    // Event bus metrics
    pub static ref EVENTS_DROPPED: CounterVec = register_counter_vec!(
        "xchain_bridge_events_dropped_total",
        "Event notifications dropped because a subscriber queue was full",
        &["topic"]
    ).unwrap();

    pub static ref DAILY_VOLUME_USED: GaugeVec = register_gauge_vec!(
        "xchain_bridge_daily_volume_used_ratio",
        "Fraction of the daily limit consumed",
        &["scope"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| BridgeError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_transfer_initiated(source_chain: &str, destination_chain: &str) {
    TRANSFERS_INITIATED
        .with_label_values(&[source_chain, destination_chain])
        .inc();
    TX_TRANSITIONS.with_label_values(&["pending"]).inc();
}

pub fn record_transfer_rejected(kind: &str) {
    TRANSFERS_REJECTED.with_label_values(&[kind]).inc();
}

pub fn record_tx_confirmed() {
    TX_TRANSITIONS.with_label_values(&["confirmed"]).inc();
}

pub fn record_tx_executed() {
    TX_TRANSITIONS.with_label_values(&["executed"]).inc();
}

pub fn record_tx_failed() {
    TX_TRANSITIONS.with_label_values(&["failed"]).inc();
}

pub fn record_confirmation(validator: &str) {
    CONFIRMATIONS_RECORDED.with_label_values(&[validator]).inc();
}

pub fn record_active_validators(count: usize) {
    ACTIVE_VALIDATORS.set(count as f64);
}

pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS.with_label_values(&[event_type]).inc();
}

pub fn record_bridge_paused(paused: bool) {
    BRIDGE_PAUSED.set(if paused { 1.0 } else { 0.0 });
}

pub fn record_batch(status: &str) {
    BATCHES.with_label_values(&[status]).inc();
}

pub fn record_event_dropped(topic: &str) {
    EVENTS_DROPPED.with_label_values(&[topic]).inc();
}

pub fn record_daily_volume(scope: &str, ratio: f64) {
    DAILY_VOLUME_USED.with_label_values(&[scope]).set(ratio);
}
