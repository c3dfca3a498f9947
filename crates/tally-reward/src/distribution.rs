//! Per-epoch reward distribution.
//!
//! [`RewardDistributionEngine`] subscribes to epoch boundaries. When an
//! ordinal of an epoch closes it visits every program riding that epoch
//! and, for programs active in the closed ordinal:
//!
//! 1. evaluates each participant active during the ordinal's height
//!    window against the program's action, isolating failures per
//!    participant;
//! 2. allocates part of the program's remaining balance to the ordinal;
//! 3. writes one [`EpochRewardDistribution`] and one share record per
//!    eligible participant, indexed by expiration height.
//!
//! Store failures abort the whole call, so a round is never half applied.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_epoch::{registry as epochs, EpochHooks, HookError, HookResult};
use tally_store::{codec, keys, Context};
use tally_types::{
    Address, Coin, EpochNumber, EpochRewardDistribution, EventType, Height, ProgramId,
    RewardProgram, SharesPerEpochPerRewardsProgram,
};

use crate::action::{ActionRegistry, RewardAction};
use crate::activity::{ActivitySource, ParticipantActivity};
use crate::bank::Bank;
use crate::{program, RewardError, Result};

/// Reward module configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Blocks after an epoch's end during which its shares can be claimed.
    #[serde(default = "default_claim_period_blocks")]
    pub claim_period_blocks: u64,
    /// Account holding escrowed program funds.
    #[serde(default = "default_module_account")]
    pub module_account: String,
}

fn default_claim_period_blocks() -> u64 {
    // 30 days of 5s blocks
    518_400
}

fn default_module_account() -> String {
    "tally1rewardmodule".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claim_period_blocks: default_claim_period_blocks(),
            module_account: default_module_account(),
        }
    }
}

impl EngineConfig {
    pub fn module_address(&self) -> Result<Address> {
        Address::new(self.module_account.clone())
            .map_err(|e| RewardError::Config(format!("module account: {e}")))
    }
}

/// The `AfterEpochEnd` subscriber that turns observed activity into
/// claimable shares.
pub struct RewardDistributionEngine {
    bank: Arc<dyn Bank>,
    activity: Arc<dyn ActivitySource>,
    actions: Arc<ActionRegistry>,
    module_account: Address,
    claim_period_blocks: u64,
}

impl RewardDistributionEngine {
    pub fn new(
        config: &EngineConfig,
        bank: Arc<dyn Bank>,
        activity: Arc<dyn ActivitySource>,
        actions: Arc<ActionRegistry>,
    ) -> Result<Self> {
        Ok(Self {
            bank,
            activity,
            actions,
            module_account: config.module_address()?,
            claim_period_blocks: config.claim_period_blocks,
        })
    }

    pub fn module_account(&self) -> &Address {
        &self.module_account
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// See [`program::create_program`].
    pub fn create_program(&self, ctx: &mut Context<'_>, program: RewardProgram) -> Result<ProgramId> {
        program::create_program(
            ctx,
            self.bank.as_ref(),
            &self.actions,
            &self.module_account,
            program,
        )
    }

    /// See [`program::cancel_program`].
    pub fn cancel_program(&self, ctx: &mut Context<'_>, id: ProgramId) -> Result<u64> {
        program::cancel_program(ctx, self.bank.as_ref(), &self.module_account, id)
    }

    /// Process the close of ordinal `epoch_number` of `epoch_id`.
    ///
    /// Returns the distributions written, in program id order.
    pub fn distribute(
        &self,
        ctx: &mut Context<'_>,
        epoch_id: &str,
        epoch_number: EpochNumber,
    ) -> Result<Vec<EpochRewardDistribution>> {
        let info = epochs::must_get(ctx.store(), epoch_id)?;
        if info.current_epoch != epoch_number.saturating_add(1) {
            return Err(RewardError::Integrity(format!(
                "epoch {epoch_id} closed ordinal {epoch_number} but is at {}",
                info.current_epoch
            )));
        }
        let (start, end) = info.closed_window();

        let programs: Vec<RewardProgram> = program::iter_for_epoch(ctx.store(), epoch_id)
            .filter(|p| match p {
                Ok(p) => p.is_active_for(epoch_number) && p.last_processed_epoch < epoch_number,
                Err(_) => true,
            })
            .collect::<Result<_>>()?;
        if programs.is_empty() {
            tracing::debug!(epoch_id, epoch_number, "no active reward programs");
            return Ok(Vec::new());
        }

        let participants = self.activity.participants(ctx.store(), start, end)?;
        tracing::debug!(
            epoch_id,
            epoch_number,
            start,
            end,
            participants = participants.len(),
            programs = programs.len(),
            "distributing epoch rewards"
        );

        let mut distributions = Vec::with_capacity(programs.len());
        for program in programs {
            distributions.push(self.distribute_program(ctx, program, epoch_number, end, &participants)?);
        }
        Ok(distributions)
    }

    fn distribute_program(
        &self,
        ctx: &mut Context<'_>,
        mut program: RewardProgram,
        epoch_number: EpochNumber,
        epoch_end_height: Height,
        participants: &[ParticipantActivity],
    ) -> Result<EpochRewardDistribution> {
        let action = self.actions.resolve_criteria(&program.eligibility_criteria)?;
        let earned = evaluate(action.as_ref(), program.id, participants);

        let total_shares = earned
            .iter()
            .try_fold(0u64, |acc, (_, shares)| acc.checked_add(*shares))
            .ok_or_else(|| {
                RewardError::Overflow(format!("total shares of program {}", program.id))
            })?;
        let pool = if total_shares == 0 {
            0
        } else {
            program.allocation_for(epoch_number)
        };
        if pool > program.remaining_balance {
            return Err(RewardError::Integrity(format!(
                "program {} allocated {pool} with {} remaining",
                program.id, program.remaining_balance
            )));
        }

        let total_rewards = Coin::new(program.coin.denom.clone(), pool);
        let distribution = EpochRewardDistribution {
            epoch_id: program.epoch_id.clone(),
            epoch_number,
            reward_program_id: program.id,
            total_rewards_pool: total_rewards.clone(),
            total_shares,
        };
        codec::put(
            ctx.store_mut(),
            &keys::distribution_key(&program.epoch_id, epoch_number, program.id),
            &distribution,
        )?;

        let expiration_height = epoch_end_height.saturating_add(self.claim_period_blocks);
        for (address, shares) in earned {
            let record = SharesPerEpochPerRewardsProgram {
                address: address.clone(),
                reward_program_id: program.id,
                epoch_id: program.epoch_id.clone(),
                epoch_number,
                shares,
                epoch_end_height,
                claimed: false,
                expiration_height,
                expired: false,
                total_shares,
                total_rewards: total_rewards.clone(),
            };
            let share_key = keys::shares_key(address, program.id, &program.epoch_id, epoch_number);
            codec::put(ctx.store_mut(), &share_key, &record)?;
            ctx.store_mut()
                .set(&keys::expiration_index_key(expiration_height, &share_key), &share_key)?;
            ctx.store_mut().set(
                &keys::distribution_participant_key(&program.epoch_id, epoch_number, program.id, address),
                &share_key,
            )?;
        }

        program.remaining_balance -= pool;
        program.last_processed_epoch = epoch_number;
        program::set(ctx.store_mut(), &program)?;

        tracing::info!(
            program_id = program.id,
            epoch_id = %program.epoch_id,
            epoch_number,
            total_shares,
            pool,
            remaining = program.remaining_balance,
            "epoch rewards distributed"
        );
        ctx.emit(
            EventType::RewardDistribution,
            serde_json::json!({
                "reward_program_id": program.id,
                "epoch_id": program.epoch_id,
                "epoch_number": epoch_number,
                "total_rewards_pool": total_rewards.to_string(),
                "total_shares": total_shares,
            }),
        );

        if !program.has_undistributed_epochs() {
            program::refund_finished(ctx, self.bank.as_ref(), &self.module_account, program.id)?;
        }
        Ok(distribution)
    }
}

/// Shares earned per eligible participant. Ineligible participants and
/// participants whose evaluation fails earn nothing and do not affect
/// anyone else.
fn evaluate<'p>(
    action: &dyn RewardAction,
    program_id: ProgramId,
    participants: &'p [ParticipantActivity],
) -> Vec<(&'p Address, u64)> {
    let mut earned = Vec::new();
    for participant in participants {
        match action.is_eligible(participant) {
            Ok(()) => {
                let shares = action.shares(participant);
                if shares > 0 {
                    earned.push((&participant.address, shares));
                }
            }
            Err(RewardError::Ineligible { reason, .. }) => {
                tracing::trace!(program_id, address = %participant.address, reason = %reason, "not eligible");
            }
            Err(e) => {
                tracing::warn!(
                    program_id,
                    address = %participant.address,
                    error = %e,
                    "eligibility evaluation failed"
                );
            }
        }
    }
    earned
}

impl EpochHooks for RewardDistributionEngine {
    fn before_epoch_start(
        &self,
        _ctx: &mut Context<'_>,
        identifier: &str,
        epoch_number: EpochNumber,
    ) -> HookResult {
        tracing::trace!(identifier, epoch_number, "reward engine: epoch start");
        Ok(())
    }

    fn after_epoch_end(
        &self,
        ctx: &mut Context<'_>,
        identifier: &str,
        epoch_number: EpochNumber,
    ) -> HookResult {
        self.distribute(ctx, identifier, epoch_number)
            .map(|_| ())
            .map_err(HookError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{pack, ActionDelegate};
    use crate::activity::ActivityLog;
    use crate::bank::LedgerBank;
    use crate::program::tests::{addr, funder, program};
    use crate::queries;
    use tally_store::{KvStore, MemStore};
    use tally_types::{AllocationPolicy, EpochInfo, ErrorKind};

    fn engine() -> RewardDistributionEngine {
        let config = EngineConfig {
            claim_period_blocks: 100,
            module_account: "tally1module".to_string(),
        };
        RewardDistributionEngine::new(
            &config,
            Arc::new(LedgerBank),
            Arc::new(ActivityLog),
            Arc::new(ActionRegistry::default()),
        )
        .expect("engine")
    }

    /// "day" epoch running ordinal 1 since height 10.
    fn open_day(store: &mut MemStore) {
        let mut info = EpochInfo::new("day", 1, 10);
        info.current_epoch = 1;
        info.current_epoch_start_height = 10;
        info.epoch_counting_started = true;
        epochs::set(store, &info).expect("epoch");
    }

    /// "day" epoch whose ordinal `closed` spanned [10, 20).
    fn closed_day(store: &mut MemStore, closed: EpochNumber) {
        let info = EpochInfo {
            identifier: "day".to_string(),
            start_height: 1,
            duration: 10,
            current_epoch: closed + 1,
            current_epoch_start_height: 20,
            epoch_counting_started: true,
            previous_epoch_start_height: 10,
        };
        epochs::set(store, &info).expect("epoch");
    }

    fn fund(store: &mut MemStore, amount: u64) {
        LedgerBank
            .mint(store, &funder(), &Coin::new("nhash", amount))
            .expect("mint");
    }

    fn delegate(store: &mut MemStore, height: Height, who: &str, volume: u64) {
        let mut ctx = Context::new(height, 0, store);
        ActivityLog::record(&mut ctx, &addr(who), "ActionDelegate", volume).expect("record");
    }

    #[test]
    fn test_shares_and_payout_snapshot() {
        let engine = engine();
        let mut store = MemStore::new();
        open_day(&mut store);
        fund(&mut store, 1_000);
        {
            let mut ctx = Context::new(5, 0, &mut store);
            engine
                .create_program(&mut ctx, program("day", 1_000, 1, 1))
                .expect("create");
        }
        for _ in 0..3 {
            delegate(&mut store, 12, "tally1alice", 10);
        }
        for _ in 0..7 {
            delegate(&mut store, 15, "tally1bravo", 10);
        }
        // outside the window
        delegate(&mut store, 20, "tally1carol", 10);

        closed_day(&mut store, 1);
        let mut ctx = Context::new(20, 0, &mut store);
        let distributions = engine.distribute(&mut ctx, "day", 1).expect("distribute");
        assert_eq!(distributions.len(), 1);
        assert_eq!(distributions[0].total_shares, 10);
        assert_eq!(distributions[0].total_rewards_pool, Coin::new("nhash", 1_000));

        let shares = queries::distribution_shares(ctx.store(), "day", 1, 1).expect("shares");
        assert_eq!(shares.len(), 2);
        let sum: u64 = shares.iter().map(|s| s.shares).sum();
        assert_eq!(sum, 10);
        let payouts: Vec<u64> = shares.iter().map(|s| s.payout().amount).collect();
        assert_eq!(payouts, vec![300, 700]);
        assert!(shares.iter().all(|s| s.expiration_height == 120 && s.epoch_end_height == 20));

        let program = program::must_get(ctx.store(), 1).expect("program");
        assert_eq!(program.remaining_balance, 0);
        assert_eq!(program.last_processed_epoch, 1);
        assert_eq!(ctx.events().last().map(|e| e.event_type), Some(EventType::RewardDistribution));
    }

    #[test]
    fn test_even_split_over_remaining_ordinals() {
        let engine = engine();
        let mut store = MemStore::new();
        open_day(&mut store);
        fund(&mut store, 1_000);
        {
            let mut ctx = Context::new(5, 0, &mut store);
            engine
                .create_program(&mut ctx, program("day", 1_000, 1, 3))
                .expect("create");
        }
        delegate(&mut store, 11, "tally1alice", 10);

        closed_day(&mut store, 1);
        let mut ctx = Context::new(20, 0, &mut store);
        let distributions = engine.distribute(&mut ctx, "day", 1).expect("distribute");
        assert_eq!(distributions[0].total_rewards_pool.amount, 333);
        let program = program::must_get(ctx.store(), 1).expect("program");
        assert_eq!(program.remaining_balance, 667);
    }

    #[test]
    fn test_no_eligible_participants_keeps_balance() {
        let engine = engine();
        let mut store = MemStore::new();
        open_day(&mut store);
        fund(&mut store, 1_000);
        {
            let mut ctx = Context::new(5, 0, &mut store);
            engine
                .create_program(&mut ctx, program("day", 1_000, 1, 2))
                .expect("create");
        }
        // out of the [1, 1000] range
        delegate(&mut store, 11, "tally1alice", 5_000);

        closed_day(&mut store, 1);
        let mut ctx = Context::new(20, 0, &mut store);
        let distributions = engine.distribute(&mut ctx, "day", 1).expect("distribute");
        assert_eq!(distributions[0].total_shares, 0);
        assert_eq!(distributions[0].total_rewards_pool.amount, 0);
        assert!(queries::distribution_shares(ctx.store(), "day", 1, 1).expect("shares").is_empty());
        assert_eq!(program::must_get(ctx.store(), 1).expect("program").remaining_balance, 1_000);
    }

    #[test]
    fn test_final_ordinal_refunds_unallocated_balance() {
        let engine = engine();
        let mut store = MemStore::new();
        open_day(&mut store);
        fund(&mut store, 1_000);
        {
            let mut ctx = Context::new(5, 0, &mut store);
            let mut fixed = program("day", 1_000, 1, 1);
            fixed.allocation = AllocationPolicy::FixedPerEpoch { amount: 400 };
            engine.create_program(&mut ctx, fixed).expect("create");
        }
        delegate(&mut store, 11, "tally1alice", 10);

        closed_day(&mut store, 1);
        let mut ctx = Context::new(20, 0, &mut store);
        engine.distribute(&mut ctx, "day", 1).expect("distribute");
        let bank = LedgerBank;
        assert_eq!(bank.balance(ctx.store(), &funder(), "nhash").expect("balance"), 600);
        assert_eq!(
            bank.balance(ctx.store(), engine.module_account(), "nhash").expect("balance"),
            400
        );
        assert_eq!(program::must_get(ctx.store(), 1).expect("program").remaining_balance, 0);
    }

    #[test]
    fn test_inactive_programs_skipped() {
        let engine = engine();
        let mut store = MemStore::new();
        open_day(&mut store);
        fund(&mut store, 1_000);
        {
            let mut ctx = Context::new(5, 0, &mut store);
            engine
                .create_program(&mut ctx, program("day", 1_000, 2, 2))
                .expect("create");
        }
        delegate(&mut store, 11, "tally1alice", 10);

        closed_day(&mut store, 1);
        let mut ctx = Context::new(20, 0, &mut store);
        assert!(engine.distribute(&mut ctx, "day", 1).expect("distribute").is_empty());
        assert!(queries::epoch_reward_distribution(ctx.store(), "day", 1, 1)
            .expect("query")
            .is_none());
    }

    #[test]
    fn test_ordinal_processed_once() {
        let engine = engine();
        let mut store = MemStore::new();
        open_day(&mut store);
        fund(&mut store, 1_000);
        {
            let mut ctx = Context::new(5, 0, &mut store);
            engine
                .create_program(&mut ctx, program("day", 1_000, 1, 2))
                .expect("create");
        }
        delegate(&mut store, 11, "tally1alice", 10);

        closed_day(&mut store, 1);
        let mut ctx = Context::new(20, 0, &mut store);
        assert_eq!(engine.distribute(&mut ctx, "day", 1).expect("first").len(), 1);
        assert!(engine.distribute(&mut ctx, "day", 1).expect("second").is_empty());
    }

    #[test]
    fn test_stale_epoch_state_is_integrity_error() {
        let engine = engine();
        let mut store = MemStore::new();
        closed_day(&mut store, 1);
        let mut ctx = Context::new(20, 0, &mut store);
        let err = engine.distribute(&mut ctx, "day", 4).expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_corrupt_program_aborts_round() {
        let engine = engine();
        let mut store = MemStore::new();
        closed_day(&mut store, 1);
        store
            .set(&keys::programs_by_epoch_key("day", 9), b"9")
            .expect("index");
        let mut ctx = Context::new(20, 0, &mut store);
        let err = engine
            .after_epoch_end(&mut ctx, "day", 1)
            .expect_err("missing program");
        assert_eq!(err.kind, ErrorKind::Integrity);
    }

    #[test]
    fn test_custom_range_per_program() {
        let engine = engine();
        let mut store = MemStore::new();
        open_day(&mut store);
        fund(&mut store, 2_000);
        {
            let mut ctx = Context::new(5, 0, &mut store);
            let mut whales = program("day", 1_000, 1, 1);
            whales.eligibility_criteria.action =
                Some(pack(&ActionDelegate::new(1_000, u64::MAX)).expect("pack"));
            engine.create_program(&mut ctx, whales).expect("create");
            engine
                .create_program(&mut ctx, program("day", 1_000, 1, 1))
                .expect("create");
        }
        delegate(&mut store, 11, "tally1alice", 10);
        delegate(&mut store, 11, "tally1whale", 50_000);

        closed_day(&mut store, 1);
        let mut ctx = Context::new(20, 0, &mut store);
        let distributions = engine.distribute(&mut ctx, "day", 1).expect("distribute");
        assert_eq!(distributions.len(), 2);
        let whales = queries::distribution_shares(ctx.store(), "day", 1, 1).expect("shares");
        assert_eq!(whales.len(), 1);
        assert_eq!(whales[0].address, addr("tally1whale"));
        let small = queries::distribution_shares(ctx.store(), "day", 1, 2).expect("shares");
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].address, addr("tally1alice"));
    }
}
