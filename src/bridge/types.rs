//! Core domain types shared by the orchestrator, consensus and batching layers

use super::fees::FeeRate;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Token amounts are arbitrary-precision unsigned integers in base units
pub type Amount = BigUint;

/// Addresses shorter than this are rejected as implausible
pub const MIN_ADDRESS_LEN: usize = 20;

/// Blockchain network identifier (lower-case network name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Kind of asset being bridged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// Native token (e.g. ETH, MATIC)
    Native,
    Erc20,
    /// NFT
    Erc721,
    Erc1155,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Native => "native",
            AssetType::Erc20 => "erc20",
            AssetType::Erc721 => "erc721",
            AssetType::Erc1155 => "erc1155",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the bridge as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    #[default]
    Active,
    Paused,
    Emergency,
    Upgrading,
}

impl BridgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::Active => "active",
            BridgeStatus::Paused => "paused",
            BridgeStatus::Emergency => "emergency",
            BridgeStatus::Upgrading => "upgrading",
        }
    }
}

/// Lifecycle of a cross-chain transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Executed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Executed => "executed",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Forward transitions only: pending -> confirmed -> executed, or failed
    /// from any non-terminal state.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Executed) | (Pending, Failed) | (Confirmed, Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments of a single transfer, as submitted by a caller or a batch entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub source_address: String,
    pub destination_address: String,
    pub asset_type: AssetType,
    /// Contract address for tokens, zero address for native assets
    pub asset_address: String,
    #[serde(with = "decimal")]
    pub amount: Amount,
    #[serde(default, with = "decimal::option")]
    pub token_id: Option<Amount>,
    /// Deposit transaction on the source chain, when reported by a watcher
    #[serde(default)]
    pub source_tx_hash: Option<String>,
}

/// A single cross-chain transfer attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossChainTransaction {
    pub id: String,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub source_address: String,
    pub destination_address: String,
    pub asset_type: AssetType,
    pub asset_address: String,
    #[serde(with = "decimal")]
    pub amount: Amount,
    #[serde(default, with = "decimal::option")]
    pub token_id: Option<Amount>,
    pub status: TransactionStatus,
    #[serde(with = "decimal")]
    pub fee: Amount,
    pub source_tx_hash: Option<String>,
    pub destination_tx_hash: Option<String>,
    /// Validator whose confirmation completed the quorum
    pub confirming_validator: Option<String>,
    pub gas_used: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl CrossChainTransaction {
    pub(crate) fn new(request: TransferRequest, fee: Amount, now: DateTime<Utc>) -> Self {
        let id = generate_id(&[
            request.source_chain.as_str().as_bytes(),
            request.destination_chain.as_str().as_bytes(),
            request.source_address.as_bytes(),
            request.amount.to_string().as_bytes(),
        ]);

        Self {
            id,
            source_chain: request.source_chain,
            destination_chain: request.destination_chain,
            source_address: request.source_address,
            destination_address: request.destination_address,
            asset_type: request.asset_type,
            asset_address: request.asset_address,
            amount: request.amount,
            token_id: request.token_id,
            status: TransactionStatus::Pending,
            fee,
            source_tx_hash: request.source_tx_hash,
            destination_tx_hash: None,
            confirming_validator: None,
            gas_used: None,
            created_at: now,
            updated_at: now,
            executed_at: None,
            failed_at: None,
            failure_reason: None,
        }
    }

    /// Canonical digest validators sign to attest this transfer
    pub fn signing_payload(&self) -> [u8; 32] {
        let canonical = format!(
            "{}_{}_{}_{}_{}_{}",
            self.id,
            self.source_chain,
            self.destination_chain,
            self.source_address,
            self.destination_address,
            self.amount
        );
        Keccak256::digest(canonical.as_bytes()).into()
    }

    pub fn involves(&self, address: &str) -> bool {
        self.source_address == address || self.destination_address == address
    }
}

/// Configuration and accounting for one bridgeable asset on an ordered chain pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMapping {
    pub id: String,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub source_asset: String,
    pub destination_asset: String,
    pub asset_type: AssetType,
    pub decimals: u8,
    pub active: bool,
    #[serde(with = "decimal")]
    pub min_amount: Amount,
    #[serde(with = "decimal")]
    pub max_amount: Amount,
    #[serde(with = "decimal")]
    pub daily_limit: Amount,
    #[serde(with = "decimal")]
    pub daily_used: Amount,
    pub fee_rate: FeeRate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssetMapping {
    /// Lookup key for the (source, destination, asset type) triple
    pub fn key(source: &ChainId, destination: &ChainId, asset_type: AssetType) -> String {
        format!("{}_{}_{}", source, destination, asset_type)
    }

    /// Remaining daily allowance.
    ///
    /// Panics if the counter has overrun its limit: that can only happen
    /// through a logic bug in the accounting path.
    pub fn remaining_daily(&self) -> Amount {
        if self.daily_used > self.daily_limit {
            panic!(
                "asset mapping {} daily-used {} exceeds daily limit {}",
                self.id, self.daily_used, self.daily_limit
            );
        }
        &self.daily_limit - &self.daily_used
    }
}

/// Short unique identifier: first 16 bytes of Keccak-256 over the given parts
/// and a random nonce, hex encoded.
pub(crate) fn generate_id(parts: &[&[u8]]) -> String {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
        hasher.update(b"_");
    }
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Serde helpers encoding [`Amount`] as a decimal string
pub mod decimal {
    use num_bigint::BigUint;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BigUint::from_str(raw.trim())
            .map_err(|e| D::Error::custom(format!("invalid amount {:?}: {}", raw, e)))
    }

    pub mod option {
        use num_bigint::BigUint;
        use serde::de::Error;
        use serde::{Deserialize, Deserializer, Serializer};
        use std::str::FromStr;

        pub fn serialize<S: Serializer>(
            value: &Option<BigUint>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => serializer.serialize_some(&v.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<BigUint>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| {
                    BigUint::from_str(raw.trim())
                        .map_err(|e| D::Error::custom(format!("invalid amount {:?}: {}", raw, e)))
                })
                .transpose()
        }
    }
}
