//! Blacklist and suspicious-pattern fraud detection

use crate::bridge::{Amount, AssetType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Named heuristic with a risk score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousPattern {
    pub id: String,
    /// Rule name understood by the active [`PatternMatcher`]
    pub pattern: String,
    pub risk_score: f64,
    /// Minimum risk score for the pattern to be enforced
    pub threshold: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl SuspiciousPattern {
    /// Only active patterns at or above their threshold can block a transfer
    pub fn is_enforced(&self) -> bool {
        self.active && self.risk_score >= self.threshold
    }
}

/// Blacklisted address with provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlacklistEntry {
    pub address: String,
    pub reason: String,
    pub added_at: DateTime<Utc>,
}

/// Everything a matcher may look at for one transfer
#[derive(Debug, Clone)]
pub struct TransferContext<'a> {
    pub source: &'a str,
    pub destination: &'a str,
    pub amount: &'a Amount,
    pub asset_type: AssetType,
    /// Requests the source already has in its rate-limit window
    pub recent_requests: usize,
    pub max_requests: usize,
    pub large_transfer_threshold: &'a Amount,
}

/// Pluggable pattern evaluation
pub trait PatternMatcher: Send + Sync {
    fn matches(&self, pattern: &SuspiciousPattern, ctx: &TransferContext<'_>) -> bool;
}

/// Built-in rules keyed by pattern name; unknown names never match
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedMatcher;

impl PatternMatcher for RuleBasedMatcher {
    fn matches(&self, pattern: &SuspiciousPattern, ctx: &TransferContext<'_>) -> bool {
        match pattern.pattern.as_str() {
            "self_transfer" => ctx.source.eq_ignore_ascii_case(ctx.destination),
            "large_amount" => ctx.amount > ctx.large_transfer_threshold,
            "high_frequency" => {
                ctx.max_requests > 0 && ctx.recent_requests * 2 >= ctx.max_requests
            }
            _ => false,
        }
    }
}

/// Outcome of a fraud assessment
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Clear,
    Blacklisted(String),
    /// Name of the first enforced pattern that matched
    Suspicious(String),
}

/// Blacklist plus pattern set, evaluated through a [`PatternMatcher`]
pub struct FraudDetector {
    blacklist: HashMap<String, BlacklistEntry>,
    patterns: Vec<SuspiciousPattern>,
    matcher: Box<dyn PatternMatcher>,
    next_pattern: u64,
}

impl FraudDetector {
    pub fn new(matcher: Box<dyn PatternMatcher>) -> Self {
        Self {
            blacklist: HashMap::new(),
            patterns: Vec::new(),
            matcher,
            next_pattern: 1,
        }
    }

    pub fn assess(&self, ctx: &TransferContext<'_>) -> Verdict {
        for address in [ctx.source, ctx.destination] {
            if self.is_blacklisted(address) {
                return Verdict::Blacklisted(address.to_string());
            }
        }

        self.patterns
            .iter()
            .filter(|p| p.is_enforced())
            .find(|p| self.matcher.matches(p, ctx))
            .map(|p| Verdict::Suspicious(p.pattern.clone()))
            .unwrap_or(Verdict::Clear)
    }

    pub fn add_pattern(&mut self, pattern: &str, risk_score: f64, threshold: f64) -> SuspiciousPattern {
        let entry = SuspiciousPattern {
            id: format!("pattern_{}", self.next_pattern),
            pattern: pattern.to_string(),
            risk_score,
            threshold,
            active: true,
            created_at: Utc::now(),
        };
        self.next_pattern += 1;
        self.patterns.push(entry.clone());
        entry
    }

    pub fn blacklist(&mut self, address: &str, reason: &str) {
        self.blacklist.insert(
            normalize(address),
            BlacklistEntry {
                address: address.to_string(),
                reason: reason.to_string(),
                added_at: Utc::now(),
            },
        );
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklist.contains_key(&normalize(address))
    }

    pub fn blacklisted(&self) -> Vec<BlacklistEntry> {
        self.blacklist.values().cloned().collect()
    }

    pub fn patterns(&self) -> &[SuspiciousPattern] {
        &self.patterns
    }
}

fn normalize(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}
