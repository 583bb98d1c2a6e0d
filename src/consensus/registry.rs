//! Stake-gated validator membership

use crate::bridge::{decimal, Amount, ChainId};
use crate::error::{BridgeError, BridgeResult};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// A bridge validator, identified by its address
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Validator {
    pub address: String,
    pub chain: ChainId,
    #[serde(with = "decimal")]
    pub stake: Amount,
    /// SEC1 hex public key handed to the signature verifier
    pub public_key: String,
    pub active: bool,
    pub last_heartbeat: DateTime<Utc>,
    /// Transactions this validator carried over the threshold
    pub total_validated: u64,
    /// Accepted attestations
    pub total_confirmations: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Validator>,
    min_stake: Amount,
}

impl ValidatorRegistry {
    pub fn new(min_stake: Amount) -> Self {
        Self {
            validators: HashMap::new(),
            min_stake,
        }
    }

    pub fn min_stake(&self) -> &Amount {
        &self.min_stake
    }

    pub fn add(
        &mut self,
        address: &str,
        chain: ChainId,
        stake: Amount,
        public_key: &str,
        now: DateTime<Utc>,
    ) -> BridgeResult<Validator> {
        if address.trim().is_empty() {
            return Err(BridgeError::InvalidAddress(address.to_string()));
        }
        if self.validators.contains_key(address) {
            return Err(BridgeError::ValidatorExists(address.to_string()));
        }
        self.check_stake(&stake)?;

        let validator = Validator {
            address: address.to_string(),
            chain,
            stake,
            public_key: public_key.to_string(),
            active: true,
            last_heartbeat: now,
            total_validated: 0,
            total_confirmations: 0,
            created_at: now,
            updated_at: now,
        };
        self.validators
            .insert(validator.address.clone(), validator.clone());
        Ok(validator)
    }

    pub fn deactivate(&mut self, address: &str, now: DateTime<Utc>) -> BridgeResult<Validator> {
        let validator = self.get_mut(address)?;
        if !validator.active {
            return Err(BridgeError::ValidatorInactive(address.to_string()));
        }
        validator.active = false;
        validator.updated_at = now;
        Ok(validator.clone())
    }

    /// Returns the previous stake
    pub fn update_stake(
        &mut self,
        address: &str,
        stake: Amount,
        now: DateTime<Utc>,
    ) -> BridgeResult<Amount> {
        self.check_stake(&stake)?;
        let validator = self.get_mut(address)?;
        let previous = std::mem::replace(&mut validator.stake, stake);
        validator.updated_at = now;
        Ok(previous)
    }

    pub fn heartbeat(&mut self, address: &str, now: DateTime<Utc>) -> BridgeResult<()> {
        let validator = self.get_mut(address)?;
        if !validator.active {
            return Err(BridgeError::ValidatorInactive(address.to_string()));
        }
        validator.last_heartbeat = now;
        validator.updated_at = now;
        Ok(())
    }

    /// Bump counters after an accepted confirmation
    pub fn note_confirmation(&mut self, address: &str, reached_threshold: bool, now: DateTime<Utc>) {
        if let Some(validator) = self.validators.get_mut(address) {
            validator.total_confirmations += 1;
            if reached_threshold {
                validator.total_validated += 1;
            }
            validator.updated_at = now;
        }
    }

    pub fn get(&self, address: &str) -> Option<&Validator> {
        self.validators.get(address)
    }

    pub fn active(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values().filter(|v| v.active)
    }

    pub fn all(&self) -> impl Iterator<Item = &Validator> {
        self.validators.values()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    fn get_mut(&mut self, address: &str) -> BridgeResult<&mut Validator> {
        self.validators
            .get_mut(address)
            .ok_or_else(|| BridgeError::ValidatorNotFound(address.to_string()))
    }

    fn check_stake(&self, stake: &Amount) -> BridgeResult<()> {
        if stake < &self.min_stake {
            return Err(BridgeError::InsufficientStake {
                stake: stake.to_string(),
                threshold: self.min_stake.to_string(),
            });
        }
        Ok(())
    }
}
