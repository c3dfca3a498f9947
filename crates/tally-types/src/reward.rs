//! Reward programs, per-epoch distributions and participant share records.

use serde::{Deserialize, Serialize};

use crate::{Address, Coin, EpochNumber, Height, ProgramId, Result, ValidationError, MAX_NAME_LEN};

/// How a program's remaining balance is allocated to each epoch it spans.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AllocationPolicy {
    /// Split the remaining balance evenly over the remaining active
    /// ordinals; the final ordinal takes whatever is left.
    #[default]
    EvenSplit,
    /// Allocate a fixed amount per ordinal, capped by the remaining balance.
    FixedPerEpoch { amount: u64 },
}

/// What happens to a share that expires unclaimed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForfeitPolicy {
    /// Return to the program's remaining balance, or to the funder once the
    /// program has nothing left to distribute.
    #[default]
    ReturnToPool,
    /// Burn from the module escrow.
    Burn,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramStatus {
    #[default]
    Active,
    Cancelled,
}

/// A type-tagged, encoded reward action.
///
/// The reward crate resolves this into a concrete action through its
/// action registry; the tag is the action's `action_type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnyAction {
    pub action_type: String,
    pub value: serde_json::Value,
}

/// A named wrapper around a reward action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EligibilityCriteria {
    pub name: String,
    pub action: Option<AnyAction>,
}

impl EligibilityCriteria {
    /// # Errors
    ///
    /// - [`ValidationError::InvalidProgram`] if the name is empty or the
    ///   action is missing
    pub fn validate_basic(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ValidationError::InvalidProgram(
                "eligibility criteria must have a name".to_string(),
            ));
        }
        if self.action.is_none() {
            return Err(ValidationError::InvalidProgram(
                "eligibility criteria must have an action".to_string(),
            ));
        }
        Ok(())
    }
}

/// A funded, time-bounded campaign paying participants per epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardProgram {
    pub id: ProgramId,
    pub distribute_from_address: Address,
    /// Total pool committed at creation.
    pub coin: Coin,
    /// Identifier of the epoch cadence this program rides on.
    pub epoch_id: String,
    pub start_epoch: EpochNumber,
    pub number_epochs: u64,
    pub eligibility_criteria: EligibilityCriteria,
    /// Escrowed amount not yet allocated to any epoch.
    pub remaining_balance: u64,
    /// Last ordinal the distribution engine processed; 0 if none.
    #[serde(default)]
    pub last_processed_epoch: EpochNumber,
    #[serde(default)]
    pub allocation: AllocationPolicy,
    #[serde(default)]
    pub forfeit_policy: ForfeitPolicy,
    #[serde(default)]
    pub status: ProgramStatus,
}

impl RewardProgram {
    pub fn new(
        id: ProgramId,
        distribute_from_address: Address,
        coin: Coin,
        epoch_id: impl Into<String>,
        start_epoch: EpochNumber,
        number_epochs: u64,
        eligibility_criteria: EligibilityCriteria,
    ) -> Self {
        let remaining_balance = coin.amount;
        Self {
            id,
            distribute_from_address,
            coin,
            epoch_id: epoch_id.into(),
            start_epoch,
            number_epochs,
            eligibility_criteria,
            remaining_balance,
            last_processed_epoch: 0,
            allocation: AllocationPolicy::default(),
            forfeit_policy: ForfeitPolicy::default(),
            status: ProgramStatus::default(),
        }
    }

    /// Stateless validation. Action resolution is checked by the reward
    /// crate, which owns the action registry.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidProgram`] on an empty or over-long epoch
    ///   id, zero start epoch or epoch count, or an ordinal window that
    ///   overflows
    /// - [`ValidationError::InvalidCoin`] on a malformed or zero coin
    pub fn validate_basic(&self) -> Result<()> {
        if self.epoch_id.is_empty() {
            return Err(ValidationError::InvalidProgram(
                "epoch id cannot be empty".to_string(),
            ));
        }
        if self.epoch_id.len() > MAX_NAME_LEN {
            return Err(ValidationError::InvalidProgram(format!(
                "epoch id longer than {MAX_NAME_LEN} bytes"
            )));
        }
        self.coin.validate()?;
        if self.coin.is_zero() {
            return Err(ValidationError::InvalidCoin(
                "reward program coin must be positive".to_string(),
            ));
        }
        if self.start_epoch == 0 {
            return Err(ValidationError::InvalidProgram(
                "start epoch must be at least 1".to_string(),
            ));
        }
        if self.number_epochs == 0 {
            return Err(ValidationError::InvalidProgram(
                "number of epochs must be positive".to_string(),
            ));
        }
        if self.start_epoch.checked_add(self.number_epochs).is_none() {
            return Err(ValidationError::InvalidProgram(
                "epoch window overflows".to_string(),
            ));
        }
        if let AllocationPolicy::FixedPerEpoch { amount: 0 } = self.allocation {
            return Err(ValidationError::InvalidProgram(
                "fixed per-epoch allocation must be positive".to_string(),
            ));
        }
        self.eligibility_criteria.validate_basic().map_err(|e| {
            ValidationError::InvalidProgram(format!("eligibility criteria is not valid: {e}"))
        })
    }

    /// First ordinal past the program's active window.
    pub fn end_epoch(&self) -> EpochNumber {
        self.start_epoch.saturating_add(self.number_epochs)
    }

    /// Whether `ordinal` lies in `[start_epoch, start_epoch + number_epochs)`.
    pub fn is_active_for(&self, ordinal: EpochNumber) -> bool {
        self.status == ProgramStatus::Active
            && ordinal >= self.start_epoch
            && ordinal < self.end_epoch()
    }

    /// Active ordinals from `ordinal` (inclusive) to the end of the window.
    pub fn remaining_epochs(&self, ordinal: EpochNumber) -> u64 {
        self.end_epoch().saturating_sub(ordinal.max(self.start_epoch))
    }

    /// Whether the program can still allocate balance to a future ordinal.
    pub fn has_undistributed_epochs(&self) -> bool {
        if self.status != ProgramStatus::Active {
            return false;
        }
        let next = self
            .last_processed_epoch
            .saturating_add(1)
            .max(self.start_epoch);
        next < self.end_epoch()
    }

    /// Amount of the remaining balance allocated to `ordinal`.
    pub fn allocation_for(&self, ordinal: EpochNumber) -> u64 {
        match self.allocation {
            AllocationPolicy::EvenSplit => {
                self.remaining_balance / self.remaining_epochs(ordinal).max(1)
            }
            AllocationPolicy::FixedPerEpoch { amount } => amount.min(self.remaining_balance),
        }
    }
}

/// Rewards pool and share total for one program in one epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochRewardDistribution {
    pub epoch_id: String,
    pub epoch_number: EpochNumber,
    pub reward_program_id: ProgramId,
    pub total_rewards_pool: Coin,
    pub total_shares: u64,
}

impl EpochRewardDistribution {
    /// # Errors
    ///
    /// - [`ValidationError::InvalidProgram`] on an empty epoch id or zero program id
    pub fn validate_basic(&self) -> Result<()> {
        if self.epoch_id.is_empty() {
            return Err(ValidationError::InvalidProgram(
                "epoch reward distribution must have a epoch id".to_string(),
            ));
        }
        if self.reward_program_id < 1 {
            return Err(ValidationError::InvalidProgram(
                "epoch reward distribution must have a valid reward program id".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle state of a share record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareState {
    Unclaimed,
    Claimed,
    Expired,
}

/// One participant's earned shares for one program in one epoch.
///
/// `total_shares` and `total_rewards` snapshot the distribution at
/// computation time so the payout can be computed from the record alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharesPerEpochPerRewardsProgram {
    pub address: Address,
    pub reward_program_id: ProgramId,
    pub epoch_id: String,
    pub epoch_number: EpochNumber,
    pub shares: u64,
    pub epoch_end_height: Height,
    pub claimed: bool,
    pub expiration_height: Height,
    pub expired: bool,
    pub total_shares: u64,
    pub total_rewards: Coin,
}

impl SharesPerEpochPerRewardsProgram {
    pub fn state(&self) -> ShareState {
        if self.claimed {
            ShareState::Claimed
        } else if self.expired {
            ShareState::Expired
        } else {
            ShareState::Unclaimed
        }
    }

    /// The participant's payout: `shares / total_shares * total_rewards`,
    /// rounded down.
    pub fn payout(&self) -> Coin {
        let amount = if self.total_shares == 0 {
            0
        } else {
            let scaled = u128::from(self.shares) * u128::from(self.total_rewards.amount)
                / u128::from(self.total_shares);
            // shares <= total_shares, so the quotient fits the pool's u64
            u64::try_from(scaled).unwrap_or(u64::MAX)
        };
        Coin::new(self.total_rewards.denom.clone(), amount)
    }

    /// Move an Unclaimed record to a terminal state.
    ///
    /// Returns the record's current terminal state if it is not Unclaimed,
    /// leaving the record untouched.
    pub fn settle(&mut self, outcome: ShareState) -> std::result::Result<(), ShareState> {
        match self.state() {
            ShareState::Unclaimed => {}
            terminal => return Err(terminal),
        }
        match outcome {
            ShareState::Claimed => self.claimed = true,
            ShareState::Expired => self.expired = true,
            ShareState::Unclaimed => {}
        }
        Ok(())
    }
}

/// All share records held by one address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardClaim {
    pub address: Address,
    pub shares_per_epoch_per_reward: Vec<SharesPerEpochPerRewardsProgram>,
}

impl RewardClaim {
    /// Records still open for claiming.
    pub fn unclaimed(&self) -> impl Iterator<Item = &SharesPerEpochPerRewardsProgram> {
        self.shares_per_epoch_per_reward
            .iter()
            .filter(|s| s.state() == ShareState::Unclaimed)
    }
}
