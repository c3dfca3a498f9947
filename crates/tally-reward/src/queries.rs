//! Read-only reward views.

use std::collections::BTreeMap;

use tally_store::{codec, keys, KvStore};
use tally_types::{
    Address, Coin, EpochNumber, EpochRewardDistribution, Height, ProgramId, RewardClaim,
    RewardProgram, ShareState, SharesPerEpochPerRewardsProgram,
};

use crate::{program, RewardError, Result};

pub fn reward_program(store: &dyn KvStore, id: ProgramId) -> Result<RewardProgram> {
    program::must_get(store, id)
}

pub fn reward_programs(store: &dyn KvStore) -> Result<Vec<RewardProgram>> {
    program::all(store)
}

/// Every share record of `address`, ordered by program then epoch.
pub fn reward_claim(store: &dyn KvStore, address: &Address) -> Result<RewardClaim> {
    let shares = codec::iter::<SharesPerEpochPerRewardsProgram>(
        store,
        &keys::shares_by_address_prefix(address),
    )
    .collect::<tally_store::Result<Vec<_>>>()?;
    Ok(RewardClaim {
        address: address.clone(),
        shares_per_epoch_per_reward: shares,
    })
}

pub fn epoch_reward_distribution(
    store: &dyn KvStore,
    epoch_id: &str,
    epoch_number: EpochNumber,
    program_id: ProgramId,
) -> Result<Option<EpochRewardDistribution>> {
    Ok(codec::get(
        store,
        &keys::distribution_key(epoch_id, epoch_number, program_id),
    )?)
}

/// Share records of one distribution, ordered by address.
pub fn distribution_shares(
    store: &dyn KvStore,
    epoch_id: &str,
    epoch_number: EpochNumber,
    program_id: ProgramId,
) -> Result<Vec<SharesPerEpochPerRewardsProgram>> {
    let prefix = keys::distribution_participants_prefix(epoch_id, epoch_number, program_id);
    store
        .iter_prefix(&prefix)
        .map(|entry| {
            let (_, share_key) = entry?;
            codec::get::<SharesPerEpochPerRewardsProgram>(store, &share_key)?.ok_or_else(|| {
                RewardError::Integrity(format!(
                    "distribution {epoch_id}#{epoch_number}/{program_id} lists a missing share"
                ))
            })
        })
        .collect()
}

/// Total unclaimed, unexpired payout of `address` as of `height`, per denom.
pub fn claimable(store: &dyn KvStore, address: &Address, height: Height) -> Result<Vec<Coin>> {
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for share in reward_claim(store, address)?.unclaimed() {
        if share.expiration_height <= height {
            continue;
        }
        let payout = share.payout();
        let total = totals.entry(payout.denom).or_default();
        *total = total
            .checked_add(payout.amount)
            .ok_or_else(|| RewardError::Overflow(format!("claimable total of {address}")))?;
    }
    Ok(totals
        .into_iter()
        .map(|(denom, amount)| Coin::new(denom, amount))
        .collect())
}

/// Aggregate state counts for an address.
pub fn share_states(store: &dyn KvStore, address: &Address) -> Result<BTreeMap<&'static str, usize>> {
    let mut counts = BTreeMap::new();
    for share in reward_claim(store, address)?.shares_per_epoch_per_reward {
        let name = match share.state() {
            ShareState::Unclaimed => "unclaimed",
            ShareState::Claimed => "claimed",
            ShareState::Expired => "expired",
        };
        *counts.entry(name).or_default() += 1;
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_store::MemStore;

    fn share(address: &Address, program_id: ProgramId, epoch_number: EpochNumber, shares: u64) -> SharesPerEpochPerRewardsProgram {
        SharesPerEpochPerRewardsProgram {
            address: address.clone(),
            reward_program_id: program_id,
            epoch_id: "day".to_string(),
            epoch_number,
            shares,
            epoch_end_height: 10,
            claimed: false,
            expiration_height: 100,
            expired: false,
            total_shares: 10,
            total_rewards: Coin::new("nhash", 1_000),
        }
    }

    fn put(store: &mut MemStore, s: &SharesPerEpochPerRewardsProgram) {
        let key = keys::shares_key(&s.address, s.reward_program_id, &s.epoch_id, s.epoch_number);
        codec::put(store, &key, s).expect("put");
        store
            .set(
                &keys::distribution_participant_key(&s.epoch_id, s.epoch_number, s.reward_program_id, &s.address),
                &key,
            )
            .expect("index");
    }

    #[test]
    fn test_reward_claim_and_claimable() {
        let alice = Address::new("tally1alice").expect("address");
        let mut store = MemStore::new();
        put(&mut store, &share(&alice, 1, 1, 3));
        put(&mut store, &share(&alice, 1, 2, 5));
        let mut claimed = share(&alice, 2, 1, 1);
        claimed.claimed = true;
        put(&mut store, &claimed);

        let claim = reward_claim(&store, &alice).expect("claim");
        assert_eq!(claim.shares_per_epoch_per_reward.len(), 3);
        assert_eq!(claim.unclaimed().count(), 2);

        assert_eq!(
            claimable(&store, &alice, 50).expect("claimable"),
            vec![Coin::new("nhash", 800)]
        );
        assert!(claimable(&store, &alice, 100).expect("claimable").is_empty());

        let states = share_states(&store, &alice).expect("states");
        assert_eq!(states.get("unclaimed"), Some(&2));
        assert_eq!(states.get("claimed"), Some(&1));
    }

    #[test]
    fn test_distribution_shares_lists_participants() {
        let mut store = MemStore::new();
        let alice = Address::new("tally1alice").expect("address");
        let bravo = Address::new("tally1bravo").expect("address");
        put(&mut store, &share(&alice, 1, 1, 3));
        put(&mut store, &share(&bravo, 1, 1, 7));
        put(&mut store, &share(&bravo, 1, 2, 7));

        let shares = distribution_shares(&store, "day", 1, 1).expect("shares");
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].address, alice);
        assert!(distribution_shares(&store, "day", 3, 1).expect("shares").is_empty());
    }

    #[test]
    fn test_unknown_program_not_found() {
        let store = MemStore::new();
        let err = reward_program(&store, 7).expect_err("missing");
        assert!(matches!(err, RewardError::ProgramNotFound(7)));
        assert!(epoch_reward_distribution(&store, "day", 1, 7).expect("query").is_none());
    }
}
