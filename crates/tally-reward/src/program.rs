//! Reward program storage, creation and cancellation.
//!
//! Programs are keyed by id, with a secondary index by epoch identifier
//! so the distribution engine only visits programs riding the epoch
//! that ended.

use tally_epoch::registry as epochs;
use tally_store::{codec, keys, Context, KvStore};
use tally_types::{
    Address, Coin, EventType, ProgramId, ProgramStatus, RewardProgram,
};

use crate::action::ActionRegistry;
use crate::bank::Bank;
use crate::{RewardError, Result};

pub fn get(store: &dyn KvStore, id: ProgramId) -> Result<Option<RewardProgram>> {
    Ok(codec::get(store, &keys::reward_program_key(id))?)
}

/// # Errors
///
/// - [`RewardError::ProgramNotFound`] if no program has this id
pub fn must_get(store: &dyn KvStore, id: ProgramId) -> Result<RewardProgram> {
    get(store, id)?.ok_or(RewardError::ProgramNotFound(id))
}

/// Write a program and its epoch index entry.
pub fn set(store: &mut dyn KvStore, program: &RewardProgram) -> Result<()> {
    codec::put(store, &keys::reward_program_key(program.id), program)?;
    codec::put(
        store,
        &keys::programs_by_epoch_key(&program.epoch_id, program.id),
        &program.id,
    )?;
    Ok(())
}

/// Lazily iterate all programs in id order.
pub fn iter<'a>(store: &'a dyn KvStore) -> impl Iterator<Item = Result<RewardProgram>> + 'a {
    codec::iter::<RewardProgram>(store, &keys::reward_program_prefix())
        .map(|r| r.map_err(RewardError::from))
}

pub fn all(store: &dyn KvStore) -> Result<Vec<RewardProgram>> {
    iter(store).collect()
}

/// Lazily iterate the programs riding `epoch_id`, in id order.
///
/// An index entry pointing at a missing program is an integrity error.
pub fn iter_for_epoch<'a>(
    store: &'a dyn KvStore,
    epoch_id: &str,
) -> impl Iterator<Item = Result<RewardProgram>> + 'a {
    codec::iter::<ProgramId>(store, &keys::programs_by_epoch_prefix(epoch_id)).map(move |id| {
        let id = id?;
        get(store, id)?.ok_or_else(|| {
            RewardError::Integrity(format!("epoch index references missing program {id}"))
        })
    })
}

/// Allocate the next program id, starting from 1.
pub fn next_id(store: &mut dyn KvStore) -> Result<ProgramId> {
    let key = keys::program_sequence_key();
    let id: ProgramId = codec::get(store, &key)?.unwrap_or(1);
    let next = id
        .checked_add(1)
        .ok_or_else(|| RewardError::Overflow("program id sequence".to_string()))?;
    codec::put(store, &key, &next)?;
    Ok(id)
}

/// Validate, fund and store a new program.
///
/// The program's `coin` is escrowed from `distribute_from_address` into
/// `module_account`. The id, balance and processing fields of `program`
/// are assigned here; whatever the caller set is ignored.
///
/// # Errors
///
/// - [`RewardError::InvalidProgram`] / [`RewardError::InvalidAction`] /
///   [`RewardError::UnknownAction`] if the program is malformed
/// - [`RewardError::Epoch`] if the referenced epoch is not registered
/// - [`RewardError::InsufficientFunds`] if the funder cannot cover `coin`
pub fn create_program(
    ctx: &mut Context<'_>,
    bank: &dyn Bank,
    actions: &ActionRegistry,
    module_account: &Address,
    mut program: RewardProgram,
) -> Result<ProgramId> {
    program.validate_basic()?;
    actions.resolve_criteria(&program.eligibility_criteria)?;

    let epoch = epochs::must_get(ctx.store(), &program.epoch_id)?;
    if program.start_epoch < epoch.current_epoch {
        return Err(RewardError::InvalidProgram(format!(
            "start epoch {} of {} has already passed (current {})",
            program.start_epoch, program.epoch_id, epoch.current_epoch
        )));
    }

    bank.send(
        ctx.store_mut(),
        &program.distribute_from_address,
        module_account,
        &program.coin,
    )?;

    program.id = next_id(ctx.store_mut())?;
    program.remaining_balance = program.coin.amount;
    program.last_processed_epoch = 0;
    program.status = ProgramStatus::Active;
    set(ctx.store_mut(), &program)?;

    tracing::info!(
        id = program.id,
        epoch_id = %program.epoch_id,
        start_epoch = program.start_epoch,
        number_epochs = program.number_epochs,
        coin = %program.coin,
        "reward program created"
    );
    ctx.emit(
        EventType::RewardProgramCreated,
        serde_json::json!({
            "id": program.id,
            "epoch_id": program.epoch_id,
            "start_epoch": program.start_epoch,
            "number_epochs": program.number_epochs,
            "coin": program.coin.to_string(),
        }),
    );
    Ok(program.id)
}

/// Cancel a program and refund its undistributed balance to the funder.
///
/// Shares already distributed stay claimable.
///
/// # Errors
///
/// - [`RewardError::ProgramNotFound`] if the id is unknown
/// - [`RewardError::ProgramCancelled`] if the program was already cancelled
pub fn cancel_program(
    ctx: &mut Context<'_>,
    bank: &dyn Bank,
    module_account: &Address,
    id: ProgramId,
) -> Result<u64> {
    let mut program = must_get(ctx.store(), id)?;
    if program.status == ProgramStatus::Cancelled {
        return Err(RewardError::ProgramCancelled(id));
    }
    let refund = program.remaining_balance;
    bank.send(
        ctx.store_mut(),
        module_account,
        &program.distribute_from_address,
        &Coin::new(program.coin.denom.clone(), refund),
    )?;
    program.remaining_balance = 0;
    program.status = ProgramStatus::Cancelled;
    set(ctx.store_mut(), &program)?;

    tracing::info!(id, refund, "reward program cancelled");
    ctx.emit(
        EventType::RewardProgramCancelled,
        serde_json::json!({ "id": id, "refund": refund }),
    );
    Ok(refund)
}

/// Refund whatever balance a program that has processed its final
/// ordinal still holds.
pub fn refund_finished(
    ctx: &mut Context<'_>,
    bank: &dyn Bank,
    module_account: &Address,
    id: ProgramId,
) -> Result<u64> {
    let mut program = must_get(ctx.store(), id)?;
    if program.has_undistributed_epochs() || program.remaining_balance == 0 {
        return Ok(0);
    }
    let refund = program.remaining_balance;
    bank.send(
        ctx.store_mut(),
        module_account,
        &program.distribute_from_address,
        &Coin::new(program.coin.denom.clone(), refund),
    )?;
    program.remaining_balance = 0;
    set(ctx.store_mut(), &program)?;
    tracing::info!(id, refund, "finished program refunded");
    Ok(refund)
}
