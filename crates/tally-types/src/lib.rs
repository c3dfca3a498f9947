//! # tally-types
//!
//! Shared domain records used across the Tally workspace: epoch
//! descriptors, reward programs, per-epoch distributions and the share
//! records participants claim against.
//!
//! Everything here is plain data plus stateless validation. Temporal
//! logic lives in `tally-epoch`; distribution and claim logic lives in
//! `tally-reward`.

pub mod address;
pub mod epoch;
pub mod events;
pub mod reward;

pub use address::{Address, Coin};
pub use epoch::EpochInfo;
pub use events::{Event, EventType};
pub use reward::{
    AllocationPolicy, AnyAction, EligibilityCriteria, EpochRewardDistribution, ForfeitPolicy,
    ProgramStatus, RewardClaim, RewardProgram, ShareState, SharesPerEpochPerRewardsProgram,
};

/// Block height.
pub type Height = u64;

/// Epoch ordinal (`current_epoch`).
pub type EpochNumber = u64;

/// Reward program identifier.
pub type ProgramId = u64;

/// Maximum length in bytes of identifiers, addresses and denominations.
///
/// Store keys length-prefix these with a single byte.
pub const MAX_NAME_LEN: usize = 255;

/// Failure classes shared by every crate in the workspace.
///
/// `Configuration` errors surface at wiring or governance time,
/// `NotFound` and `StateConflict` are reported to the caller without
/// affecting the chain, and `Integrity` errors abort the enclosing block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    NotFound,
    StateConflict,
    Integrity,
}

impl ErrorKind {
    /// Whether the error must abort the enclosing block.
    pub fn is_fatal(self) -> bool {
        self == ErrorKind::Integrity
    }
}

/// Errors raised by stateless validation of domain records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Address is empty, too long or contains forbidden characters.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Coin denomination or amount is malformed.
    #[error("invalid coin: {0}")]
    InvalidCoin(String),

    /// Epoch descriptor is malformed.
    #[error("invalid epoch info: {0}")]
    InvalidEpoch(String),

    /// Reward program is malformed.
    #[error("invalid reward program: {0}")]
    InvalidProgram(String),
}

/// Convenience result type for validation.
pub type Result<T> = std::result::Result<T, ValidationError>;
