//! JSON record encoding.
//!
//! Records are stored as `serde_json` documents. A value that fails to
//! decode means the store is corrupt; callers treat that as fatal.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{KvStore, Result, StoreError};

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StoreError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupt {
        key: hex::encode(key),
        reason: e.to_string(),
    })
}

/// Read and decode the record at `key`.
pub fn get<T: DeserializeOwned>(store: &dyn KvStore, key: &[u8]) -> Result<Option<T>> {
    store
        .get(key)?
        .map(|bytes| decode(key, &bytes))
        .transpose()
}

/// Encode and write `value` at `key`.
pub fn put<T: Serialize>(store: &mut dyn KvStore, key: &[u8], value: &T) -> Result<()> {
    store.set(key, &encode(value)?)
}

/// Lazily decode every record under `prefix`, in key order.
pub fn iter<'a, T: DeserializeOwned + 'a>(
    store: &'a dyn KvStore,
    prefix: &[u8],
) -> impl Iterator<Item = Result<T>> + 'a {
    store
        .iter_prefix(prefix)
        .map(|entry| entry.and_then(|(key, value)| decode(&key, &value)))
}
