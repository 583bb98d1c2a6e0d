//! Error types for the bridge core

use thiserror::Error;

/// Coarse classification of a [`BridgeError`], used by callers to decide
/// whether to fix the request, wait, or stop retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: chain id, address, amount bounds
    Validation,
    /// Operation not valid for the entity's current status
    State,
    /// Unknown transaction, validator or batch
    NotFound,
    /// Rate limit, blacklist, suspicious pattern, emergency pause
    Security,
    /// Daily or global volume exhausted
    Limit,
    /// Inactive validator, insufficient stake, bad signature
    Consensus,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::State => "state",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Security => "security",
            ErrorKind::Limit => "limit",
            ErrorKind::Consensus => "consensus",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Main error type for the bridge
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bridge is paused")]
    BridgePaused,

    #[error("Bridge is in emergency mode")]
    BridgeEmergency,

    #[error("Bridge is upgrading")]
    BridgeUpgrading,

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("Asset {asset_type} not supported from {source_chain} to {destination_chain}")]
    AssetNotSupported {
        source_chain: String,
        destination_chain: String,
        asset_type: String,
    },

    #[error("Asset mapping {0} not found")]
    AssetMappingNotFound(String),

    #[error("Amount {amount} outside of bounds [{min}, {max}]")]
    AmountOutOfBounds {
        amount: String,
        min: String,
        max: String,
    },

    #[error("Daily limit exceeded for {scope}: requested {requested}, remaining {remaining}")]
    DailyLimitExceeded {
        scope: String,
        requested: String,
        remaining: String,
    },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Transaction {tx_id} is {actual}, expected {expected}")]
    WrongState {
        tx_id: String,
        actual: String,
        expected: String,
    },

    #[error("Validator {0} not found")]
    ValidatorNotFound(String),

    #[error("Validator {0} already registered")]
    ValidatorExists(String),

    #[error("Validator {0} is inactive")]
    ValidatorInactive(String),

    #[error("Stake {stake} is below threshold {threshold}")]
    InsufficientStake { stake: String, threshold: String },

    #[error("Validator {0} has unresolved confirmations")]
    PendingConfirmations(String),

    #[error("Invalid signature from validator {0}")]
    InvalidSignature(String),

    #[error("Rate limit exceeded for {address}: {count} requests in {window_secs}s")]
    RateLimitExceeded {
        address: String,
        count: usize,
        window_secs: u64,
    },

    #[error("Address {0} is blacklisted")]
    Blacklisted(String),

    #[error("Suspicious activity detected: {0}")]
    SuspiciousActivity(String),

    #[error("Bridge is already paused")]
    AlreadyPaused,

    #[error("Bridge is not paused")]
    NotPaused,

    #[error("Batch {0} not found")]
    BatchNotFound(String),

    #[error("Batch {batch_id} is {actual}, expected {expected}")]
    BatchWrongState {
        batch_id: String,
        actual: String,
        expected: String,
    },

    #[error("No transfers provided")]
    EmptyBatch,

    #[error("Batch size {size} exceeds maximum {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Invalid transfer at index {index}: {reason}")]
    InvalidTransfer { index: usize, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Taxonomy bucket of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InvalidChain(_)
            | BridgeError::InvalidAddress(_)
            | BridgeError::AssetNotSupported { .. }
            | BridgeError::AmountOutOfBounds { .. }
            | BridgeError::EmptyBatch
            | BridgeError::BatchTooLarge { .. }
            | BridgeError::InvalidTransfer { .. } => ErrorKind::Validation,

            BridgeError::WrongState { .. }
            | BridgeError::BatchWrongState { .. }
            | BridgeError::ValidatorExists(_)
            | BridgeError::PendingConfirmations(_)
            | BridgeError::AlreadyPaused
            | BridgeError::NotPaused
            | BridgeError::BridgeUpgrading => ErrorKind::State,

            BridgeError::TransactionNotFound { .. }
            | BridgeError::ValidatorNotFound(_)
            | BridgeError::AssetMappingNotFound(_)
            | BridgeError::BatchNotFound(_) => ErrorKind::NotFound,

            BridgeError::BridgePaused
            | BridgeError::BridgeEmergency
            | BridgeError::RateLimitExceeded { .. }
            | BridgeError::Blacklisted(_)
            | BridgeError::SuspiciousActivity(_) => ErrorKind::Security,

            BridgeError::DailyLimitExceeded { .. } => ErrorKind::Limit,

            BridgeError::ValidatorInactive(_)
            | BridgeError::InsufficientStake { .. }
            | BridgeError::InvalidSignature(_) => ErrorKind::Consensus,

            BridgeError::Config(_) => ErrorKind::Config,
            BridgeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if the same request may succeed later without modification
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::RateLimitExceeded { .. }
                | BridgeError::DailyLimitExceeded { .. }
                | BridgeError::BridgePaused
                | BridgeError::BridgeEmergency
                | BridgeError::BridgeUpgrading
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            BridgeError::Blacklisted(_)
                | BridgeError::SuspiciousActivity(_)
                | BridgeError::BridgeEmergency
                | BridgeError::InvalidSignature(_)
        )
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
