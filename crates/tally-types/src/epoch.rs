//! Epoch descriptors.

use serde::{Deserialize, Serialize};

use crate::{EpochNumber, Height, Result, ValidationError, MAX_NAME_LEN};

/// A named, fixed-duration recurring window measured in blocks.
///
/// Mutated only by the epoch tracker on block boundaries. `current_epoch`
/// and `current_epoch_start_height` never move backwards, and
/// `epoch_counting_started` is permanently `true` once the chain first
/// reaches `start_height`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochInfo {
    /// Unique key, e.g. "day", "week", "monthly".
    pub identifier: String,
    /// Height at which counting may begin.
    pub start_height: Height,
    /// Epoch length in blocks.
    pub duration: u64,
    /// Ordinal of the running epoch; 0 until counting starts.
    pub current_epoch: EpochNumber,
    /// Height at which the current ordinal began.
    pub current_epoch_start_height: Height,
    pub epoch_counting_started: bool,
    /// Start height of the ordinal that most recently closed.
    #[serde(default)]
    pub previous_epoch_start_height: Height,
}

impl EpochInfo {
    /// A fresh, not-yet-started epoch.
    pub fn new(identifier: impl Into<String>, start_height: Height, duration: u64) -> Self {
        Self {
            identifier: identifier.into(),
            start_height,
            duration,
            current_epoch: 0,
            current_epoch_start_height: start_height,
            epoch_counting_started: false,
            previous_epoch_start_height: 0,
        }
    }

    /// Stateless validation.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidEpoch`] if the identifier is empty or
    ///   longer than [`MAX_NAME_LEN`] bytes, or the duration is zero
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(ValidationError::InvalidEpoch(
                "epoch identifier cannot be empty".to_string(),
            ));
        }
        if self.identifier.len() > MAX_NAME_LEN {
            return Err(ValidationError::InvalidEpoch(format!(
                "epoch identifier longer than {MAX_NAME_LEN} bytes"
            )));
        }
        if self.duration == 0 {
            return Err(ValidationError::InvalidEpoch(format!(
                "epoch {} duration must be positive",
                self.identifier
            )));
        }
        Ok(())
    }

    /// Blocks elapsed since the current ordinal began.
    pub fn blocks_since_start(&self, height: Height) -> u64 {
        height.saturating_sub(self.current_epoch_start_height)
    }

    /// Height window `[start, end)` of the ordinal that most recently closed.
    pub fn closed_window(&self) -> (Height, Height) {
        (
            self.previous_epoch_start_height,
            self.current_epoch_start_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_epoch_not_started() {
        let info = EpochInfo::new("monthly", 1, 525_960);
        assert_eq!(info.current_epoch, 0);
        assert!(!info.epoch_counting_started);
        assert_eq!(info.current_epoch_start_height, 1);
        info.validate().expect("valid");
    }

    #[test]
    fn test_zero_duration_rejected() {
        let info = EpochInfo::new("monthly", 1, 0);
        assert!(matches!(info.validate(), Err(ValidationError::InvalidEpoch(_))));
    }

    #[test]
    fn test_empty_identifier_rejected() {
        assert!(EpochInfo::new("", 1, 10).validate().is_err());
    }

    #[test]
    fn test_blocks_since_start_saturates() {
        let mut info = EpochInfo::new("day", 1, 10);
        info.current_epoch_start_height = 50;
        assert_eq!(info.blocks_since_start(60), 10);
        assert_eq!(info.blocks_since_start(40), 0);
    }
}
