//! Read-only epoch views. None of these mutate state.

use tally_store::KvStore;
use tally_types::{EpochInfo, EpochNumber, Height};

use crate::{registry, Result};

pub fn epoch_info(store: &dyn KvStore, identifier: &str) -> Result<EpochInfo> {
    registry::must_get(store, identifier)
}

pub fn epoch_infos(store: &dyn KvStore) -> Result<Vec<EpochInfo>> {
    registry::all(store)
}

/// Blocks elapsed in the current ordinal as of `height`. Saturates at 0
/// for epochs whose start lies in the future.
pub fn num_blocks_since_epoch_start(
    store: &dyn KvStore,
    height: Height,
    identifier: &str,
) -> Result<u64> {
    Ok(registry::must_get(store, identifier)?.blocks_since_start(height))
}

pub fn current_epoch(store: &dyn KvStore, identifier: &str) -> Result<EpochNumber> {
    Ok(registry::must_get(store, identifier)?.current_epoch)
}
