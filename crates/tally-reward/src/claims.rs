//! Claims and expiration sweeps.
//!
//! Every share record ends in exactly one terminal state. [`ClaimLedger::claim`]
//! and [`ClaimLedger::sweep_expired`] both go through
//! [`SharesPerEpochPerRewardsProgram::settle`], which only succeeds from
//! `Unclaimed`, so whichever runs first wins and the other is rejected
//! without moving funds.

use std::sync::Arc;

use tally_store::{codec, keys, Context};
use tally_types::{
    Address, Coin, EpochNumber, EventType, ForfeitPolicy, ProgramId, ShareState,
    SharesPerEpochPerRewardsProgram, MAX_NAME_LEN,
};

use crate::bank::Bank;
use crate::distribution::EngineConfig;
use crate::{program, RewardError, Result, ShareId};

/// Outcome of one expiration sweep.
///
/// Amount totals add raw amounts across denominations and saturate; they
/// are for logs and receipts, not bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired: usize,
    /// Returned to programs' remaining balances.
    pub returned: u64,
    /// Refunded to funders of finished or cancelled programs.
    pub refunded: u64,
    pub burned: u64,
}

fn tally(total: &mut u64, amount: u64) {
    *total = total.saturating_add(amount);
}

pub struct ClaimLedger {
    bank: Arc<dyn Bank>,
    module_account: Address,
}

impl ClaimLedger {
    pub fn new(config: &EngineConfig, bank: Arc<dyn Bank>) -> Result<Self> {
        Ok(Self {
            bank,
            module_account: config.module_address()?,
        })
    }

    /// Pay out one share record to its owner.
    ///
    /// # Errors
    ///
    /// - [`RewardError::NotEligible`] if no share record exists
    /// - [`RewardError::AlreadyClaimed`] if it was claimed before
    /// - [`RewardError::Expired`] if it expired, or its expiration height
    ///   has been reached and the sweep has not run yet
    pub fn claim(
        &self,
        ctx: &mut Context<'_>,
        address: &Address,
        program_id: ProgramId,
        epoch_id: &str,
        epoch_number: EpochNumber,
    ) -> Result<Coin> {
        let id = ShareId {
            address: address.clone(),
            program_id,
            epoch_id: epoch_id.to_string(),
            epoch_number,
        };
        // Longer ids would alias a shorter one in the key space.
        if epoch_id.len() > MAX_NAME_LEN {
            return Err(RewardError::NotEligible(id));
        }
        let key = keys::shares_key(address, program_id, epoch_id, epoch_number);
        let mut record: SharesPerEpochPerRewardsProgram = codec::get(ctx.store(), &key)?
            .ok_or_else(|| RewardError::NotEligible(id.clone()))?;

        if record.state() == ShareState::Unclaimed && record.expiration_height <= ctx.height() {
            return Err(RewardError::Expired(id));
        }
        record.settle(ShareState::Claimed).map_err(|state| match state {
            ShareState::Expired => RewardError::Expired(id.clone()),
            _ => RewardError::AlreadyClaimed(id.clone()),
        })?;

        let payout = record.payout();
        self.bank
            .send(ctx.store_mut(), &self.module_account, address, &payout)
            .map_err(escrow_shortfall)?;
        codec::put(ctx.store_mut(), &key, &record)?;
        ctx.store_mut()
            .delete(&keys::expiration_index_key(record.expiration_height, &key))?;

        tracing::info!(%address, program_id, epoch_id, epoch_number, %payout, "reward claimed");
        ctx.emit(
            EventType::RewardClaimed,
            serde_json::json!({
                "address": address.as_str(),
                "reward_program_id": program_id,
                "epoch_id": epoch_id,
                "epoch_number": epoch_number,
                "amount": payout.to_string(),
            }),
        );
        Ok(payout)
    }

    /// Claim every unclaimed, unexpired share of `address`.
    pub fn claim_all(&self, ctx: &mut Context<'_>, address: &Address) -> Result<Vec<Coin>> {
        let height = ctx.height();
        let pending: Vec<SharesPerEpochPerRewardsProgram> =
            codec::iter::<SharesPerEpochPerRewardsProgram>(ctx.store(), &keys::shares_by_address_prefix(address))
                .filter(|r| match r {
                    Ok(s) => s.state() == ShareState::Unclaimed && s.expiration_height > height,
                    Err(_) => true,
                })
                .collect::<tally_store::Result<_>>()?;

        let mut paid = Vec::with_capacity(pending.len());
        for share in pending {
            paid.push(self.claim(
                ctx,
                address,
                share.reward_program_id,
                &share.epoch_id,
                share.epoch_number,
            )?);
        }
        Ok(paid)
    }

    /// Expire every unclaimed share whose expiration height is at or
    /// below the context's height, applying each program's forfeit policy.
    pub fn sweep_expired(&self, ctx: &mut Context<'_>) -> Result<SweepSummary> {
        let height = ctx.height();
        let start = keys::expiration_index_prefix();
        let end = keys::expiration_height_bound(height.saturating_add(1));
        let due: Vec<(Vec<u8>, Vec<u8>)> = ctx
            .store()
            .iter_range(&start, Some(end.as_slice()))
            .collect::<tally_store::Result<_>>()?;

        let mut summary = SweepSummary::default();
        for (index_key, share_key) in due {
            let mut record: SharesPerEpochPerRewardsProgram = codec::get(ctx.store(), &share_key)?
                .ok_or_else(|| {
                    RewardError::Integrity(format!(
                        "expiration index references missing share {}",
                        String::from_utf8_lossy(&share_key)
                    ))
                })?;
            if keys::expiration_height_of(&index_key) != Some(record.expiration_height) {
                return Err(RewardError::Integrity(format!(
                    "expiration index disagrees with share of {} expiring at {}",
                    record.address, record.expiration_height
                )));
            }
            ctx.store_mut().delete(&index_key)?;
            if record.settle(ShareState::Expired).is_err() {
                tracing::debug!(address = %record.address, "stale expiration entry");
                continue;
            }
            codec::put(ctx.store_mut(), &share_key, &record)?;
            summary.expired = summary.expired.saturating_add(1);

            let forfeited = record.payout();
            self.forfeit(ctx, &record, &forfeited, &mut summary)?;

            tracing::info!(
                address = %record.address,
                program_id = record.reward_program_id,
                epoch_id = %record.epoch_id,
                epoch_number = record.epoch_number,
                %forfeited,
                "reward expired"
            );
            ctx.emit(
                EventType::RewardExpired,
                serde_json::json!({
                    "address": record.address.as_str(),
                    "reward_program_id": record.reward_program_id,
                    "epoch_id": record.epoch_id,
                    "epoch_number": record.epoch_number,
                    "amount": forfeited.to_string(),
                }),
            );
        }
        if summary.expired > 0 {
            tracing::info!(height, expired = summary.expired, "expiration sweep");
        }
        Ok(summary)
    }

    fn forfeit(
        &self,
        ctx: &mut Context<'_>,
        record: &SharesPerEpochPerRewardsProgram,
        amount: &Coin,
        summary: &mut SweepSummary,
    ) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let mut program = program::get(ctx.store(), record.reward_program_id)?.ok_or_else(|| {
            RewardError::Integrity(format!(
                "share references missing program {}",
                record.reward_program_id
            ))
        })?;

        match program.forfeit_policy {
            ForfeitPolicy::Burn => {
                self.bank
                    .burn(ctx.store_mut(), &self.module_account, amount)
                    .map_err(escrow_shortfall)?;
                tally(&mut summary.burned, amount.amount);
            }
            ForfeitPolicy::ReturnToPool if program.has_undistributed_epochs() => {
                program.remaining_balance = program
                    .remaining_balance
                    .checked_add(amount.amount)
                    .ok_or_else(|| RewardError::Overflow(format!("program {} balance", program.id)))?;
                program::set(ctx.store_mut(), &program)?;
                tally(&mut summary.returned, amount.amount);
            }
            ForfeitPolicy::ReturnToPool => {
                self.bank
                    .send(
                        ctx.store_mut(),
                        &self.module_account,
                        &program.distribute_from_address,
                        amount,
                    )
                    .map_err(escrow_shortfall)?;
                tally(&mut summary.refunded, amount.amount);
            }
        }
        Ok(())
    }
}

/// The module escrow always covers outstanding shares; running short
/// means the books are wrong.
fn escrow_shortfall(err: RewardError) -> RewardError {
    match err {
        RewardError::InsufficientFunds { .. } => RewardError::Integrity(err.to_string()),
        other => other,
    }
}
