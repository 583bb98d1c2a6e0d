//! Cross-chain bridge core
//!
//! Validator-attested transfers between chains: transfer validation and fee
//! computation, daily volume accounting, N-of-M confirmation consensus,
//! security gating, and batched transfers.

pub mod api;
pub mod batch;
pub mod bridge;
pub mod config;
pub mod consensus;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod node;
pub mod security;
pub mod state;

pub use error::{BridgeError, BridgeResult, ErrorKind};
pub use node::BridgeNode;
