//! # tally-store
//!
//! Deterministic key-value state store for the Tally chain.
//!
//! The store is an ordered map of byte keys to byte values with
//! prefix/range iteration. Two backends are provided:
//!
//! - [`MemStore`]: `BTreeMap`-backed, for tests and simulations
//! - [`SqliteStore`]: a single SQLite database (WAL mode) holding one
//!   `kv` table, for nodes
//!
//! Block execution never writes to a backend directly. It runs against a
//! [`BlockCache`] overlay that is committed atomically when the block
//! succeeds and dropped when it fails.
//!
//! ## Modules
//!
//! - [`cache`]: Block-scoped write buffer
//! - [`codec`]: JSON record encoding
//! - [`context`]: Block execution context
//! - [`keys`]: Key layout
//! - [`mem`]: In-memory backend
//! - [`sqlite`]: SQLite backend, schema and migrations

pub mod cache;
pub mod codec;
pub mod context;
pub mod keys;
pub mod mem;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use cache::BlockCache;
pub use context::Context;
pub use mem::MemStore;
pub use sqlite::SqliteStore;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    /// A stored record could not be decoded. The store is corrupt.
    #[error("corrupt record at key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("encoding error: {0}")]
    Codec(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A key-value pair yielded by iteration.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Lazy, key-ordered iterator over store entries.
pub type KvIter<'a> = Box<dyn Iterator<Item = Result<KvPair>> + 'a>;

/// A pending write: `Some(value)` to set, `None` to delete.
pub type BatchOp = (Vec<u8>, Option<Vec<u8>>);

/// Ordered key-value storage.
///
/// Iteration is lazy and ordered by key bytes; callers stop early with
/// ordinary iterator adapters.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Iterate entries with `start <= key < end` (unbounded above when
    /// `end` is `None`).
    fn iter_range<'a>(&'a self, start: &[u8], end: Option<&[u8]>) -> KvIter<'a>;

    /// Iterate entries whose key starts with `prefix`.
    fn iter_prefix<'a>(&'a self, prefix: &[u8]) -> KvIter<'a> {
        let end = keys::prefix_end(prefix);
        self.iter_range(prefix, end.as_deref())
    }

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Apply a batch of writes. Backends with transactions apply it
    /// atomically.
    fn apply_batch(&mut self, batch: Vec<BatchOp>) -> Result<()> {
        for (key, value) in batch {
            match value {
                Some(value) => self.set(&key, &value)?,
                None => self.delete(&key)?,
            }
        }
        Ok(())
    }
}

impl<T: KvStore + ?Sized> KvStore for &mut T {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        (**self).delete(key)
    }

    fn iter_range<'a>(&'a self, start: &[u8], end: Option<&[u8]>) -> KvIter<'a> {
        (**self).iter_range(start, end)
    }

    fn apply_batch(&mut self, batch: Vec<BatchOp>) -> Result<()> {
        (**self).apply_batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &mut dyn KvStore) {
        store.set(b"a/1", b"one").expect("set");
        store.set(b"a/2", b"two").expect("set");
        store.set(b"b/1", b"three").expect("set");

        assert_eq!(store.get(b"a/1").expect("get"), Some(b"one".to_vec()));
        assert!(store.has(b"b/1").expect("has"));

        let keys: Vec<Vec<u8>> = store
            .iter_prefix(b"a/")
            .map(|r| r.expect("entry").0)
            .collect();
        assert_eq!(keys, vec![b"a/1".to_vec(), b"a/2".to_vec()]);

        store.delete(b"a/1").expect("delete");
        assert_eq!(store.get(b"a/1").expect("get"), None);
        assert_eq!(store.iter_prefix(b"a/").count(), 1);
    }

    #[test]
    fn test_mem_store_contract() {
        exercise(&mut MemStore::new());
    }

    #[test]
    fn test_sqlite_store_contract() {
        exercise(&mut SqliteStore::open_memory().expect("open"));
    }

    #[test]
    fn test_apply_batch_default() {
        let mut store = MemStore::new();
        store.set(b"gone", b"x").expect("set");
        store
            .apply_batch(vec![
                (b"kept".to_vec(), Some(b"y".to_vec())),
                (b"gone".to_vec(), None),
            ])
            .expect("batch");
        assert!(store.has(b"kept").expect("has"));
        assert!(!store.has(b"gone").expect("has"));
    }
}
