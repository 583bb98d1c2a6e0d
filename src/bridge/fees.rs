//! Fixed-point fee arithmetic
//!
//! Fee percentages are stored in milli-percent (three decimal places of a
//! percent) so that fees never touch floating point.

use super::types::Amount;
use crate::error::{BridgeError, BridgeResult};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Denominator for milli-percent rates: 100% == 100_000
pub const FEE_DENOMINATOR: u32 = 100_000;

/// Fee rate in milli-percent (`100` is 0.1%)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct FeeRate(u32);

impl FeeRate {
    pub fn from_milli_percent(value: u32) -> BridgeResult<Self> {
        if value > FEE_DENOMINATOR {
            return Err(BridgeError::Config(format!(
                "fee rate {} milli-percent exceeds 100%",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Parse a percentage such as `"0.1"` or `"2.125"`.
    pub fn from_percent_str(raw: &str) -> BridgeResult<Self> {
        let raw = raw.trim();
        let invalid = || BridgeError::Config(format!("invalid fee percentage {:?}", raw));

        let (whole, frac) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if frac.len() > 3 {
            return Err(BridgeError::Config(format!(
                "fee percentage {:?} has more than three decimal places",
                raw
            )));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: u32 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut frac_value: u32 = if frac.is_empty() {
            0
        } else {
            frac.parse().map_err(|_| invalid())?
        };
        for _ in frac.len()..3 {
            frac_value *= 10;
        }

        let milli = whole
            .checked_mul(1000)
            .and_then(|w| w.checked_add(frac_value))
            .ok_or_else(invalid)?;
        Self::from_milli_percent(milli)
    }

    pub fn milli_percent(&self) -> u32 {
        self.0
    }

    /// `floor(amount * rate / 100000)`
    pub fn apply(&self, amount: &Amount) -> Amount {
        amount * self.0 / FEE_DENOMINATOR
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 1000;
        let frac = self.0 % 1000;
        if frac == 0 {
            write!(f, "{}", whole)
        } else {
            let digits = format!("{:03}", frac);
            write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
        }
    }
}

impl Serialize for FeeRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FeeRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FeeRate::from_percent_str(&raw).map_err(serde::de::Error::custom)
    }
}
