//! Observed participant activity.
//!
//! The distribution engine asks an [`ActivitySource`] who did what during
//! the height window of the epoch that just closed. [`ActivityLog`] is the
//! store-backed source: transaction handlers call
//! [`ActivityLog::record`] as actions happen, and entries are keyed by
//! height so a window is a single range scan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tally_epoch::registry as epochs;
use tally_store::{codec, keys, Context, KvStore};
use tally_types::{Address, Height, MAX_NAME_LEN};

use crate::{RewardError, Result};

/// Everything one address did during an epoch window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantActivity {
    pub address: Address,
    /// Volumes of individual actions, grouped by action type.
    pub actions: BTreeMap<String, Vec<u64>>,
}

impl ParticipantActivity {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            actions: BTreeMap::new(),
        }
    }

    pub fn volumes(&self, action_type: &str) -> &[u64] {
        self.actions
            .get(action_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn observe(&mut self, action_type: &str, volume: u64) {
        self.actions
            .entry(action_type.to_string())
            .or_default()
            .push(volume);
    }
}

/// Source of per-address activity within a height window.
pub trait ActivitySource: Send + Sync {
    /// Participants active in `[start, end)`, ordered by address.
    fn participants(
        &self,
        store: &dyn KvStore,
        start: Height,
        end: Height,
    ) -> Result<Vec<ParticipantActivity>>;
}

/// Stored actions of one type by one address in one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct ActivityRecord {
    address: Address,
    action_type: String,
    volumes: Vec<u64>,
}

/// Store-backed [`ActivitySource`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ActivityLog;

impl ActivityLog {
    /// Record one action at the context's height.
    ///
    /// # Errors
    ///
    /// [`RewardError::InvalidAction`] on an empty action type or one longer
    /// than [`MAX_NAME_LEN`] bytes.
    pub fn record(
        ctx: &mut Context<'_>,
        address: &Address,
        action_type: &str,
        volume: u64,
    ) -> Result<()> {
        if action_type.is_empty() || action_type.len() > MAX_NAME_LEN {
            return Err(RewardError::InvalidAction {
                action_type: action_type.chars().take(32).collect(),
                reason: format!("action type must be 1..={MAX_NAME_LEN} bytes"),
            });
        }
        let key = keys::activity_key(ctx.height(), address, action_type);
        let mut record = codec::get::<ActivityRecord>(ctx.store(), &key)?.unwrap_or_else(|| {
            ActivityRecord {
                address: address.clone(),
                action_type: action_type.to_string(),
                volumes: Vec::new(),
            }
        });
        record.volumes.push(volume);
        codec::put(ctx.store_mut(), &key, &record)?;
        tracing::trace!(%address, action_type, volume, height = ctx.height(), "activity recorded");
        Ok(())
    }

    /// Delete entries recorded before `height`.
    pub fn prune(store: &mut dyn KvStore, height: Height) -> Result<usize> {
        let start = keys::activity_height_bound(0);
        let end = keys::activity_height_bound(height);
        let stale: Vec<Vec<u8>> = store
            .iter_range(&start, Some(end.as_slice()))
            .map(|entry| entry.map(|(key, _)| key))
            .collect::<std::result::Result<_, _>>()?;
        for key in &stale {
            store.delete(key)?;
        }
        Ok(stale.len())
    }

    /// Delete entries no epoch window can still cover.
    ///
    /// A started epoch still needs everything from its
    /// `current_epoch_start_height`; closed windows were consumed when
    /// they closed. Epochs that have not started only read activity from
    /// later blocks.
    pub fn prune_consumed(ctx: &mut Context<'_>) -> Result<usize> {
        let mut bound = ctx.height();
        for info in epochs::iter(ctx.store()) {
            let info = info?;
            if info.epoch_counting_started {
                bound = bound.min(info.current_epoch_start_height);
            }
        }
        let pruned = Self::prune(ctx.store_mut(), bound)?;
        if pruned > 0 {
            tracing::debug!(bound, pruned, "consumed activity pruned");
        }
        Ok(pruned)
    }
}

impl ActivitySource for ActivityLog {
    fn participants(
        &self,
        store: &dyn KvStore,
        start: Height,
        end: Height,
    ) -> Result<Vec<ParticipantActivity>> {
        let mut by_address: BTreeMap<Address, ParticipantActivity> = BTreeMap::new();
        if end <= start {
            return Ok(Vec::new());
        }
        let lower = keys::activity_height_bound(start);
        let upper = keys::activity_height_bound(end);
        for entry in store.iter_range(&lower, Some(upper.as_slice())) {
            let (key, value) = entry?;
            let record: ActivityRecord = codec::decode(&key, &value)?;
            let participant = by_address
                .entry(record.address.clone())
                .or_insert_with(|| ParticipantActivity::new(record.address.clone()));
            for volume in record.volumes {
                participant.observe(&record.action_type, volume);
            }
        }
        Ok(by_address.into_values().collect())
    }
}
