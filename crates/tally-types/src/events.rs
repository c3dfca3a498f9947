//! Events emitted during block execution.
//!
//! Events are appended to the block context as state transitions happen
//! and published to subscribers only after the block commits.

use serde::{Deserialize, Serialize};

use crate::Height;

/// Envelope for all block events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub height: Height,
    /// Block time, Unix seconds.
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Epoch events
    EpochStart,
    EpochEnd,

    // Reward events
    RewardProgramCreated,
    RewardProgramCancelled,
    RewardDistribution,
    RewardClaimed,
    RewardExpired,
}

impl EventType {
    /// Category used by subscribers for filtering.
    pub fn category(self) -> &'static str {
        match self {
            EventType::EpochStart | EventType::EpochEnd => "epoch",
            _ => "reward",
        }
    }
}
