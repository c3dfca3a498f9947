//! # tally-reward
//!
//! Epoch-driven reward programs. Funded programs ride an epoch cadence;
//! at the end of each ordinal the distribution engine computes
//! participant shares and the pool allocated to that ordinal, and the
//! claim ledger later pays out or forfeits each share.
//!
//! ## Modules
//!
//! - [`action`]: Eligibility actions and their registry
//! - [`activity`]: Observed participant activity
//! - [`bank`]: Balances, escrow transfers and burns
//! - [`program`]: Reward program storage, creation and cancellation
//! - [`distribution`]: The `AfterEpochEnd` subscriber
//! - [`claims`]: Claims and expiration sweeps
//! - [`queries`]: Read-only views

pub mod action;
pub mod activity;
pub mod bank;
pub mod claims;
pub mod distribution;
pub mod program;
pub mod queries;

use std::fmt;

pub use action::{ActionDelegate, ActionRegistry, ActionTransferDelegations, RewardAction};
pub use activity::{ActivityLog, ActivitySource, ParticipantActivity};
pub use bank::{Bank, LedgerBank};
pub use claims::ClaimLedger;
pub use distribution::{EngineConfig, RewardDistributionEngine};

use tally_epoch::{EpochError, HookError};
use tally_types::{Address, EpochNumber, ErrorKind, ProgramId, ValidationError};

/// Identity of one share record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareId {
    pub address: Address,
    pub program_id: ProgramId,
    pub epoch_id: String,
    pub epoch_number: EpochNumber,
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in program {} epoch {}#{}",
            self.address, self.program_id, self.epoch_id, self.epoch_number
        )
    }
}

/// Error types for reward operations.
#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("reward program {0} not found")]
    ProgramNotFound(ProgramId),

    /// No share record exists for the claimant.
    #[error("no shares to claim for {0}")]
    NotEligible(ShareId),

    #[error("shares already claimed for {0}")]
    AlreadyClaimed(ShareId),

    #[error("shares expired for {0}")]
    Expired(ShareId),

    /// The program was cancelled and no longer accepts changes.
    #[error("reward program {0} is cancelled")]
    ProgramCancelled(ProgramId),

    /// A participant's activity does not satisfy the program's action.
    #[error("participant {address} is not eligible: {reason}")]
    Ineligible { address: Address, reason: String },

    #[error("invalid reward program: {0}")]
    InvalidProgram(String),

    #[error("invalid {action_type} action: {reason}")]
    InvalidAction { action_type: String, reason: String },

    /// No decoder is registered for the action type.
    #[error("unknown reward action type: {0}")]
    UnknownAction(String),

    #[error("invalid reward configuration: {0}")]
    Config(String),

    #[error("insufficient funds: {address} has {available}{denom}, needs {needed}{denom}")]
    InsufficientFunds {
        address: Address,
        denom: String,
        needed: u64,
        available: u64,
    },

    #[error("arithmetic overflow: {0}")]
    Overflow(String),

    /// Persisted reward state violates an invariant.
    #[error("reward state integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Epoch(#[from] EpochError),

    #[error("store error: {0}")]
    Store(#[from] tally_store::StoreError),
}

impl RewardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RewardError::ProgramNotFound(_) => ErrorKind::NotFound,
            RewardError::NotEligible(_)
            | RewardError::AlreadyClaimed(_)
            | RewardError::Expired(_)
            | RewardError::ProgramCancelled(_)
            | RewardError::Ineligible { .. }
            | RewardError::InsufficientFunds { .. } => ErrorKind::StateConflict,
            RewardError::InvalidProgram(_)
            | RewardError::InvalidAction { .. }
            | RewardError::UnknownAction(_)
            | RewardError::Config(_) => ErrorKind::Configuration,
            RewardError::Overflow(_) | RewardError::Integrity(_) | RewardError::Store(_) => {
                ErrorKind::Integrity
            }
            RewardError::Epoch(e) => e.kind(),
        }
    }

    /// Stable reason code reported for rejected transactions.
    pub fn code(&self) -> &'static str {
        match self {
            RewardError::ProgramNotFound(_) => "program_not_found",
            RewardError::NotEligible(_) => "not_eligible",
            RewardError::AlreadyClaimed(_) => "already_claimed",
            RewardError::Expired(_) => "expired",
            RewardError::ProgramCancelled(_) => "program_cancelled",
            RewardError::Ineligible { .. } => "ineligible",
            RewardError::InvalidProgram(_) => "invalid_program",
            RewardError::InvalidAction { .. } => "invalid_action",
            RewardError::UnknownAction(_) => "unknown_action",
            RewardError::Config(_) => "invalid_config",
            RewardError::InsufficientFunds { .. } => "insufficient_funds",
            RewardError::Overflow(_) => "overflow",
            RewardError::Integrity(_) => "integrity",
            RewardError::Epoch(EpochError::NotFound(_)) => "epoch_not_found",
            RewardError::Epoch(_) => "epoch",
            RewardError::Store(_) => "store",
        }
    }
}

impl From<ValidationError> for RewardError {
    fn from(err: ValidationError) -> Self {
        RewardError::InvalidProgram(err.to_string())
    }
}

impl From<RewardError> for HookError {
    fn from(err: RewardError) -> Self {
        HookError::new(err.kind(), err)
    }
}

/// Convenience result type for reward operations.
pub type Result<T> = std::result::Result<T, RewardError>;
