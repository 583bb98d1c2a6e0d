//! Validator signature verification capability

use k256::ecdsa::{signature::hazmat::PrehashVerifier, Signature, VerifyingKey};
use serde::Deserialize;
use tracing::debug;

/// Minimum signature length accepted by every scheme
pub const MIN_SIGNATURE_LEN: usize = 64;

/// Checks a validator's attestation over a transaction's signing payload.
///
/// Implementations must be pure and non-blocking: the ledger calls them while
/// holding the validator registry lock.
#[cfg_attr(test, mockall::automock)]
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &[u8], public_key: &str) -> bool;
}

/// Scheme selected in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureScheme {
    /// ECDSA over secp256k1, prehashed payload
    #[default]
    Secp256k1,
    /// Length check only, for local networks
    Structural,
}

impl SignatureScheme {
    pub fn verifier(&self) -> Box<dyn SignatureVerifier> {
        match self {
            SignatureScheme::Secp256k1 => Box::new(Secp256k1Verifier),
            SignatureScheme::Structural => Box::new(StructuralVerifier),
        }
    }
}

/// ECDSA secp256k1 verification of a 32-byte prehash.
///
/// Public keys are SEC1 encoded hex (compressed or uncompressed, optional `0x`).
/// Signatures are `r || s`, optionally followed by a recovery byte.
#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1Verifier;

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, payload: &[u8], signature: &[u8], public_key: &str) -> bool {
        if signature.len() < MIN_SIGNATURE_LEN {
            return false;
        }

        let key_bytes = match hex::decode(public_key.trim_start_matches("0x")) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let key = match VerifyingKey::from_sec1_bytes(&key_bytes) {
            Ok(key) => key,
            Err(e) => {
                debug!("Rejecting malformed validator key: {}", e);
                return false;
            }
        };
        let signature = match Signature::from_slice(&signature[..MIN_SIGNATURE_LEN]) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        key.verify_prehash(payload, &signature).is_ok()
    }
}

/// Accepts any signature of plausible length
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralVerifier;

impl SignatureVerifier for StructuralVerifier {
    fn verify(&self, _payload: &[u8], signature: &[u8], _public_key: &str) -> bool {
        signature.len() >= MIN_SIGNATURE_LEN
    }
}
