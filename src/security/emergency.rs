//! Global emergency pause switch

use crate::bridge::Amount;
use crate::error::{BridgeError, BridgeResult};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who paused the bridge, when and why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PauseInfo {
    pub paused_by: String,
    pub reason: String,
    pub paused_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct EmergencyControls {
    pause: Option<PauseInfo>,
    /// Transfers above this amount are logged as large
    threshold: Amount,
}

impl EmergencyControls {
    pub fn new(threshold: Amount) -> Self {
        Self {
            pause: None,
            threshold,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_some()
    }

    pub fn pause_info(&self) -> Option<&PauseInfo> {
        self.pause.as_ref()
    }

    pub fn pause(&mut self, actor: &str, reason: &str) -> BridgeResult<PauseInfo> {
        if self.pause.is_some() {
            return Err(BridgeError::AlreadyPaused);
        }
        let info = PauseInfo {
            paused_by: actor.to_string(),
            reason: reason.to_string(),
            paused_at: Utc::now(),
        };
        self.pause = Some(info.clone());
        Ok(info)
    }

    pub fn resume(&mut self) -> BridgeResult<PauseInfo> {
        self.pause.take().ok_or(BridgeError::NotPaused)
    }

    pub fn threshold(&self) -> &Amount {
        &self.threshold
    }

    pub fn set_threshold(&mut self, threshold: Amount) {
        self.threshold = threshold;
    }

    pub fn is_large(&self, amount: &Amount) -> bool {
        amount > &self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_resume_cycle() {
        let mut controls = EmergencyControls::new(Amount::from(10u32));
        assert!(matches!(controls.resume(), Err(BridgeError::NotPaused)));

        let info = controls.pause("ops", "exploit on destination chain").unwrap();
        assert_eq!(info.paused_by, "ops");
        assert!(controls.is_paused());
        assert!(matches!(
            controls.pause("ops", "again"),
            Err(BridgeError::AlreadyPaused)
        ));

        let released = controls.resume().unwrap();
        assert_eq!(released.reason, "exploit on destination chain");
        assert!(!controls.is_paused());
    }

    #[test]
    fn test_large_transfer_is_strictly_above_threshold() {
        let controls = EmergencyControls::new(Amount::from(10u32));
        assert!(!controls.is_large(&Amount::from(10u32)));
        assert!(controls.is_large(&Amount::from(11u32)));
    }
}
