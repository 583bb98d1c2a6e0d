//! Security gate: rate limiting, fraud detection and the emergency switch
//!
//! `check_transfer_security` is the mandatory pre-check for every new
//! transfer. All outcomes worth auditing land in a bounded security event
//! log and are published on the `security_event` topic.

pub mod emergency;
pub mod fraud;
pub mod rate_limiter;

pub use emergency::{EmergencyControls, PauseInfo};
pub use fraud::{
    BlacklistEntry, FraudDetector, PatternMatcher, RuleBasedMatcher, SuspiciousPattern,
    TransferContext, Verdict,
};
pub use rate_limiter::RateLimiter;

use crate::bridge::{decimal, Amount, AssetType};
use crate::config::SecuritySettings;
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, EventBus};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Kind of security record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    RateLimitExceeded,
    SuspiciousActivity,
    LargeTransfer,
    FraudDetected,
    EmergencyPause,
    EmergencyResume,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::SuspiciousActivity => "suspicious_activity",
            SecurityEventType::LargeTransfer => "large_transfer",
            SecurityEventType::FraudDetected => "fraud_detected",
            SecurityEventType::EmergencyPause => "emergency_pause",
            SecurityEventType::EmergencyResume => "emergency_resume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Append-only security log record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityEvent {
    pub id: String,
    pub event_type: SecurityEventType,
    pub severity: SecuritySeverity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(
        with = "decimal::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount: Option<Amount>,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

/// Snapshot of the gate's state
#[derive(Debug, Clone, Serialize)]
pub struct SecurityStats {
    pub total_security_events: usize,
    pub emergency_paused: bool,
    pub blacklisted_addresses: usize,
    pub suspicious_patterns: usize,
    pub rate_limited_addresses: usize,
}

/// Composite pre-check guarding every transfer
pub struct SecurityGate {
    limiter: RateLimiter,
    fraud: RwLock<FraudDetector>,
    emergency: RwLock<EmergencyControls>,
    /// Bounded ring buffer, oldest first
    log: Mutex<VecDeque<SecurityEvent>>,
    max_events: usize,
    next_event: AtomicU64,
    events: Arc<EventBus>,
}

impl SecurityGate {
    pub fn new(config: &SecuritySettings, events: Arc<EventBus>) -> Self {
        Self::with_matcher(config, events, Box::new(RuleBasedMatcher))
    }

    pub fn with_matcher(
        config: &SecuritySettings,
        events: Arc<EventBus>,
        matcher: Box<dyn PatternMatcher>,
    ) -> Self {
        let mut fraud = FraudDetector::new(matcher);
        for entry in &config.blacklist {
            fraud.blacklist(&entry.address, &entry.reason);
        }
        for seed in &config.patterns {
            fraud.add_pattern(&seed.pattern, seed.risk_score, seed.threshold);
        }

        Self {
            limiter: RateLimiter::new(
                Duration::seconds(config.rate_limit_window_secs as i64),
                config.rate_limit_max_requests,
            ),
            fraud: RwLock::new(fraud),
            emergency: RwLock::new(EmergencyControls::new(config.emergency_threshold.clone())),
            log: Mutex::new(VecDeque::with_capacity(config.max_security_events.min(1024))),
            max_events: config.max_security_events.max(1),
            next_event: AtomicU64::new(1),
            events,
        }
    }

    /// Sliding-window check for one address
    pub async fn check_rate_limit(&self, address: &str) -> BridgeResult<()> {
        self.check_rate_limit_at(address, Utc::now()).await
    }

    pub async fn check_rate_limit_at(&self, address: &str, now: DateTime<Utc>) -> BridgeResult<()> {
        match self.limiter.check_at(address, now) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(address, "Rate limit exceeded");
                self.record(
                    SecurityEventType::RateLimitExceeded,
                    SecuritySeverity::Medium,
                    format!("Rate limit exceeded for address {}", address),
                    Some(address),
                    None,
                )
                .await;
                Err(e)
            }
        }
    }

    /// Emergency switch, rate limit, blacklist and patterns, in that order.
    /// Large transfers are logged but never blocked.
    ///
    /// A blacklisted source or destination fails with
    /// [`BridgeError::Blacklisted`], not [`BridgeError::SuspiciousActivity`];
    /// the latter is reserved for pattern matches. Both report
    /// [`ErrorKind::Security`](crate::error::ErrorKind::Security), so match on
    /// the kind to treat them alike.
    pub async fn check_transfer_security(
        &self,
        source: &str,
        destination: &str,
        amount: &Amount,
        asset_type: AssetType,
    ) -> BridgeResult<()> {
        self.check_transfer_security_at(source, destination, amount, asset_type, Utc::now())
            .await
    }

    pub async fn check_transfer_security_at(
        &self,
        source: &str,
        destination: &str,
        amount: &Amount,
        asset_type: AssetType,
        now: DateTime<Utc>,
    ) -> BridgeResult<()> {
        let threshold = {
            let emergency = self.emergency.read().await;
            if emergency.is_paused() {
                return Err(BridgeError::BridgeEmergency);
            }
            emergency.threshold().clone()
        };

        self.check_rate_limit_at(source, now).await?;

        let verdict = {
            let ctx = TransferContext {
                source,
                destination,
                amount,
                asset_type,
                recent_requests: self.limiter.recent_requests_at(source, now),
                max_requests: self.limiter.max_requests(),
                large_transfer_threshold: &threshold,
            };
            self.fraud.read().await.assess(&ctx)
        };

        match verdict {
            Verdict::Clear => {}
            Verdict::Blacklisted(address) => {
                warn!(source, destination, blacklisted = %address, "Transfer involves blacklisted address");
                self.record(
                    SecurityEventType::SuspiciousActivity,
                    SecuritySeverity::High,
                    format!(
                        "Blacklisted address {} in transfer from {} to {}",
                        address, source, destination
                    ),
                    Some(source),
                    Some(amount),
                )
                .await;
                return Err(BridgeError::Blacklisted(address));
            }
            Verdict::Suspicious(pattern) => {
                warn!(source, destination, pattern = %pattern, "Suspicious transfer pattern");
                self.record(
                    SecurityEventType::SuspiciousActivity,
                    SecuritySeverity::High,
                    format!(
                        "Suspicious activity ({}) for transfer from {} to {}",
                        pattern, source, destination
                    ),
                    Some(source),
                    Some(amount),
                )
                .await;
                return Err(BridgeError::SuspiciousActivity(pattern));
            }
        }

        if amount > &threshold {
            self.record(
                SecurityEventType::LargeTransfer,
                SecuritySeverity::Medium,
                format!("Large transfer detected: {}", amount),
                Some(source),
                Some(amount),
            )
            .await;
        }

        Ok(())
    }

    /// Engage the emergency switch
    pub async fn pause_bridge(&self, actor: &str, reason: &str) -> BridgeResult<PauseInfo> {
        let info = self.emergency.write().await.pause(actor, reason)?;
        warn!(actor, reason, "Bridge emergency pause engaged");
        crate::metrics::record_bridge_paused(true);
        self.record(
            SecurityEventType::EmergencyPause,
            SecuritySeverity::Critical,
            format!("Bridge paused by {}: {}", actor, reason),
            Some(actor),
            None,
        )
        .await;
        Ok(info)
    }

    pub async fn resume_bridge(&self, actor: &str) -> BridgeResult<()> {
        let previous = self.emergency.write().await.resume()?;
        info!(actor, paused_by = %previous.paused_by, "Bridge resumed");
        crate::metrics::record_bridge_paused(false);
        self.record(
            SecurityEventType::EmergencyResume,
            SecuritySeverity::Low,
            format!("Bridge resumed by {}", actor),
            Some(actor),
            None,
        )
        .await;
        Ok(())
    }

    pub async fn is_paused(&self) -> bool {
        self.emergency.read().await.is_paused()
    }

    pub async fn pause_info(&self) -> Option<PauseInfo> {
        self.emergency.read().await.pause_info().cloned()
    }

    pub async fn emergency_threshold(&self) -> Amount {
        self.emergency.read().await.threshold().clone()
    }

    pub async fn set_emergency_threshold(&self, threshold: Amount) {
        info!(threshold = %threshold, "Emergency threshold updated");
        self.emergency.write().await.set_threshold(threshold);
    }

    pub async fn add_suspicious_pattern(
        &self,
        pattern: &str,
        risk_score: f64,
        threshold: f64,
    ) -> BridgeResult<SuspiciousPattern> {
        if pattern.trim().is_empty() {
            return Err(BridgeError::Config("pattern name must not be empty".to_string()));
        }
        if !risk_score.is_finite() || !threshold.is_finite() {
            return Err(BridgeError::Config(format!(
                "pattern {} has non-finite scores",
                pattern
            )));
        }
        let added = self
            .fraud
            .write()
            .await
            .add_pattern(pattern.trim(), risk_score, threshold);
        info!(pattern = %added.pattern, risk_score, threshold, "Suspicious pattern added");
        Ok(added)
    }

    pub async fn blacklist_address(&self, address: &str, reason: &str) -> BridgeResult<()> {
        if address.trim().is_empty() {
            return Err(BridgeError::InvalidAddress(address.to_string()));
        }
        self.fraud.write().await.blacklist(address, reason);
        warn!(address, reason, "Address blacklisted");
        self.record(
            SecurityEventType::FraudDetected,
            SecuritySeverity::High,
            format!("Address {} blacklisted: {}", address, reason),
            Some(address),
            None,
        )
        .await;
        Ok(())
    }

    pub async fn is_blacklisted(&self, address: &str) -> bool {
        self.fraud.read().await.is_blacklisted(address)
    }

    pub async fn suspicious_patterns(&self) -> Vec<SuspiciousPattern> {
        self.fraud.read().await.patterns().to_vec()
    }

    /// Most recent `limit` events, oldest first; `0` returns everything
    pub async fn security_events(&self, limit: usize) -> Vec<SecurityEvent> {
        let log = self.log.lock().await;
        let limit = if limit == 0 || limit > log.len() {
            log.len()
        } else {
            limit
        };
        log.iter().skip(log.len() - limit).cloned().collect()
    }

    pub async fn stats(&self) -> SecurityStats {
        let total_security_events = self.log.lock().await.len();
        let emergency_paused = self.is_paused().await;
        let (blacklisted_addresses, suspicious_patterns) = {
            let fraud = self.fraud.read().await;
            (fraud.blacklisted().len(), fraud.patterns().len())
        };

        SecurityStats {
            total_security_events,
            emergency_paused,
            blacklisted_addresses,
            suspicious_patterns,
            rate_limited_addresses: self.limiter.tracked(),
        }
    }

    /// Drop idle rate-limit windows
    pub fn cleanup_rate_limiters(&self) -> usize {
        self.cleanup_rate_limiters_at(Utc::now())
    }

    pub fn cleanup_rate_limiters_at(&self, now: DateTime<Utc>) -> usize {
        self.limiter.cleanup_at(now)
    }

    async fn record(
        &self,
        event_type: SecurityEventType,
        severity: SecuritySeverity,
        description: String,
        address: Option<&str>,
        amount: Option<&Amount>,
    ) {
        let event = SecurityEvent {
            id: format!("sec_{}", self.next_event.fetch_add(1, Ordering::Relaxed)),
            event_type,
            severity,
            description,
            address: address.map(str::to_string),
            amount: amount.cloned(),
            timestamp: Utc::now(),
            resolved: false,
        };

        {
            let mut log = self.log.lock().await;
            if log.len() >= self.max_events {
                log.pop_front();
            }
            log.push_back(event.clone());
        }

        crate::metrics::record_security_event(event_type.as_str());
        self.events.emit(BridgeEvent::SecurityEvent { event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BlacklistSeed, SecuritySettings};

    const SRC: &str = "0x1234567890123456789012345678901234567890";
    const DST: &str = "0x0987654321098765432109876543210987654321";

    fn gate(config: SecuritySettings) -> (SecurityGate, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new(64));
        (SecurityGate::new(&config, bus.clone()), bus)
    }

    fn eth(n: u64) -> Amount {
        Amount::from(n) * Amount::from(1_000_000_000_000_000_000u64)
    }

    #[tokio::test]
    async fn test_rate_limit_through_gate() {
        let (gate, _bus) = gate(SecuritySettings::default());
        let now = Utc::now();

        for _ in 0..10 {
            gate.check_transfer_security_at(SRC, DST, &eth(1), AssetType::Native, now)
                .await
                .unwrap();
        }
        let err = gate
            .check_transfer_security_at(SRC, DST, &eth(1), AssetType::Native, now)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::RateLimitExceeded { .. }));
        assert!(err.is_retryable());

        let later = now + Duration::hours(2);
        gate.check_transfer_security_at(SRC, DST, &eth(1), AssetType::Native, later)
            .await
            .unwrap();

        let events = gate.security_events(0).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::RateLimitExceeded);
    }

    #[tokio::test]
    async fn test_pause_blocks_transfers_and_cannot_repeat() {
        let (gate, _bus) = gate(SecuritySettings::default());

        gate.pause_bridge("ops", "incident").await.unwrap();
        assert!(matches!(
            gate.pause_bridge("ops", "incident").await,
            Err(BridgeError::AlreadyPaused)
        ));
        assert_eq!(
            gate.check_transfer_security(SRC, DST, &eth(1), AssetType::Native).await,
            Err(BridgeError::BridgeEmergency)
        );
        assert_eq!(gate.pause_info().await.unwrap().reason, "incident");

        gate.resume_bridge("ops").await.unwrap();
        assert!(matches!(gate.resume_bridge("ops").await, Err(BridgeError::NotPaused)));
        gate.check_transfer_security(SRC, DST, &eth(1), AssetType::Native)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_blacklist_is_distinct_from_suspicious_activity() {
        let mut config = SecuritySettings::default();
        config.blacklist.push(BlacklistSeed {
            address: DST.to_string(),
            reason: "sanctioned".to_string(),
        });
        let (gate, _bus) = gate(config);

        let err = gate
            .check_transfer_security(SRC, DST, &eth(1), AssetType::Native)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::Blacklisted(DST.to_string()));
        assert!(!err.is_retryable());

        gate.add_suspicious_pattern("self_transfer", 0.9, 0.5).await.unwrap();
        let err = gate
            .check_transfer_security(SRC, SRC, &eth(1), AssetType::Native)
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::SuspiciousActivity("self_transfer".to_string()));
        assert_eq!(err.kind(), crate::error::ErrorKind::Security);
        assert_eq!(
            BridgeError::Blacklisted(DST.to_string()).kind(),
            crate::error::ErrorKind::Security
        );
    }

    #[tokio::test]
    async fn test_large_transfer_is_logged_not_blocked() {
        let (gate, bus) = gate(SecuritySettings::default());
        let mut rx = bus.subscribe("security_event");

        gate.check_transfer_security(SRC, DST, &eth(11), AssetType::Native)
            .await
            .unwrap();

        let events = gate.security_events(10).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SecurityEventType::LargeTransfer);
        assert_eq!(events[0].amount, Some(eth(11)));

        match rx.recv().await.unwrap() {
            BridgeEvent::SecurityEvent { event } => {
                assert_eq!(event.event_type, SecurityEventType::LargeTransfer)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let mut config = SecuritySettings::default();
        config.max_security_events = 3;
        let (gate, _bus) = gate(config);

        for i in 0..5 {
            gate.blacklist_address(&format!("0xbad{}", i), "test").await.unwrap();
        }

        let events = gate.security_events(0).await;
        assert_eq!(events.len(), 3);
        assert!(events[0].description.contains("0xbad2"));
        assert!(events[2].description.contains("0xbad4"));

        let last = gate.security_events(1).await;
        assert!(last[0].description.contains("0xbad4"));

        let stats = gate.stats().await;
        assert_eq!(stats.total_security_events, 3);
        assert_eq!(stats.blacklisted_addresses, 5);
    }

    #[tokio::test]
    async fn test_admin_input_validation() {
        let (gate, _bus) = gate(SecuritySettings::default());
        assert!(matches!(
            gate.blacklist_address("", "x").await,
            Err(BridgeError::InvalidAddress(_))
        ));
        assert!(matches!(
            gate.add_suspicious_pattern(" ", 1.0, 0.5).await,
            Err(BridgeError::Config(_))
        ));
        assert_eq!(gate.suspicious_patterns().await.len(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_check_and_threshold_update() {
        let mut config = SecuritySettings::default();
        config.rate_limit_max_requests = 2;
        let (gate, _bus) = gate(config);

        gate.check_rate_limit(SRC).await.unwrap();
        gate.check_rate_limit(SRC).await.unwrap();
        assert!(matches!(
            gate.check_rate_limit(SRC).await,
            Err(BridgeError::RateLimitExceeded { .. })
        ));
        // limits are per address
        gate.check_rate_limit(DST).await.unwrap();

        gate.set_emergency_threshold(eth(100)).await;
        assert_eq!(gate.emergency_threshold().await, eth(100));
        gate.check_transfer_security(DST, SRC, &eth(50), AssetType::Native)
            .await
            .unwrap();
        assert!(gate
            .security_events(0)
            .await
            .iter()
            .all(|e| e.event_type != SecurityEventType::LargeTransfer));
    }
}
