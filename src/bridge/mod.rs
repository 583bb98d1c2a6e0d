//! Transfer orchestration: validation, fees, limit accounting and the
//! transaction lifecycle

pub mod fees;
pub mod orchestrator;
pub mod types;

pub use fees::{FeeRate, FEE_DENOMINATOR};
pub use orchestrator::{BridgeStats, TransferOrchestrator};
pub use types::{
    decimal, Amount, AssetMapping, AssetType, BridgeStatus, ChainId, CrossChainTransaction,
    TransactionStatus, TransferRequest, MIN_ADDRESS_LEN,
};
