//! In-memory backend.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::{KvIter, KvStore, Result};

/// `BTreeMap`-backed store for tests and simulations.
#[derive(Clone, Debug, Default)]
pub struct MemStore {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn iter_range<'a>(&'a self, start: &[u8], end: Option<&[u8]>) -> KvIter<'a> {
        let upper = match end {
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        if let Bound::Excluded(ref end) = upper {
            if end.as_slice() <= start {
                return Box::new(std::iter::empty());
            }
        }
        Box::new(
            self.map
                .range((Bound::Included(start.to_vec()), upper))
                .map(|(k, v)| Ok((k.clone(), v.clone()))),
        )
    }
}
