//! Durable mapping from epoch identifier to [`EpochInfo`].
//!
//! Pure storage access; no temporal logic. A record that fails to decode
//! is reported as a store error, which callers treat as fatal.

use tally_store::{codec, keys, KvStore};
use tally_types::EpochInfo;

use crate::{EpochError, Result};

pub fn get(store: &dyn KvStore, identifier: &str) -> Result<Option<EpochInfo>> {
    Ok(codec::get(store, &keys::epoch_info_key(identifier))?)
}

/// Like [`get`], but an unknown identifier is an error.
///
/// # Errors
///
/// - [`EpochError::NotFound`] if no epoch is registered under `identifier`
pub fn must_get(store: &dyn KvStore, identifier: &str) -> Result<EpochInfo> {
    get(store, identifier)?.ok_or_else(|| EpochError::NotFound(identifier.to_string()))
}

pub fn set(store: &mut dyn KvStore, info: &EpochInfo) -> Result<()> {
    Ok(codec::put(store, &keys::epoch_info_key(&info.identifier), info)?)
}

/// Administrative removal.
pub fn delete(store: &mut dyn KvStore, identifier: &str) -> Result<()> {
    Ok(store.delete(&keys::epoch_info_key(identifier))?)
}

pub fn exists(store: &dyn KvStore, identifier: &str) -> Result<bool> {
    Ok(store.has(&keys::epoch_info_key(identifier))?)
}

/// Lazily iterate all epochs in identifier order.
pub fn iter<'a>(store: &'a dyn KvStore) -> impl Iterator<Item = Result<EpochInfo>> + 'a {
    codec::iter::<EpochInfo>(store, &keys::epoch_info_prefix()).map(|r| r.map_err(EpochError::from))
}

pub fn all(store: &dyn KvStore) -> Result<Vec<EpochInfo>> {
    iter(store).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_store::MemStore;

    #[test]
    fn test_set_get_delete() {
        let mut store = MemStore::new();
        let info = EpochInfo::new("week", 1, 120_960);
        set(&mut store, &info).expect("set");
        assert_eq!(get(&store, "week").expect("get"), Some(info));
        assert!(exists(&store, "week").expect("exists"));

        delete(&mut store, "week").expect("delete");
        assert_eq!(get(&store, "week").expect("get"), None);
    }

    #[test]
    fn test_must_get_not_found() {
        let store = MemStore::new();
        let result = must_get(&store, "fortnight");
        assert!(matches!(result, Err(EpochError::NotFound(ref id)) if id == "fortnight"));
    }

    #[test]
    fn test_all_ordered_by_identifier() {
        let mut store = MemStore::new();
        for id in ["week", "day", "month"] {
            set(&mut store, &EpochInfo::new(id, 1, 10)).expect("set");
        }
        let ids: Vec<String> = all(&store)
            .expect("all")
            .into_iter()
            .map(|e| e.identifier)
            .collect();
        // length prefix first: "day"(3) < "week"(4) < "month"(5)
        assert_eq!(ids, vec!["day", "week", "month"]);
    }

    #[test]
    fn test_corrupt_record_is_integrity_error() {
        let mut store = MemStore::new();
        store
            .set(&keys::epoch_info_key("day"), b"{broken")
            .expect("set");
        let err = get(&store, "day").expect_err("corrupt");
        assert_eq!(err.kind(), tally_types::ErrorKind::Integrity);
    }
}
