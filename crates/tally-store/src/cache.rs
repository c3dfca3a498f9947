//! Block-scoped write buffer.
//!
//! All state transitions of a block run against a [`BlockCache`] layered
//! over the committed store. Reads see the block's own writes; nothing
//! reaches the backend until [`BlockCache::commit`]. Dropping the cache
//! discards the block.

use std::cmp::Ordering;
use std::collections::{btree_map, BTreeMap};
use std::iter::Peekable;
use std::ops::Bound;

use crate::{KvIter, KvPair, KvStore, Result};

pub struct BlockCache<'a> {
    base: &'a mut dyn KvStore,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> BlockCache<'a> {
    pub fn new(base: &'a mut dyn KvStore) -> Self {
        Self {
            base,
            pending: BTreeMap::new(),
        }
    }

    /// Number of buffered writes.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Flush all buffered writes to the backend in one batch.
    pub fn commit(self) -> Result<()> {
        let writes = self.pending.len();
        self.base.apply_batch(self.pending.into_iter().collect())?;
        tracing::trace!(writes, "block cache committed");
        Ok(())
    }
}

impl KvStore for BlockCache<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.base.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.pending.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.pending.insert(key.to_vec(), None);
        Ok(())
    }

    fn iter_range<'b>(&'b self, start: &[u8], end: Option<&[u8]>) -> KvIter<'b> {
        let upper = match end {
            Some(end) if end <= start => return Box::new(std::iter::empty()),
            Some(end) => Bound::Excluded(end.to_vec()),
            None => Bound::Unbounded,
        };
        let pending = self
            .pending
            .range((Bound::Included(start.to_vec()), upper))
            .peekable();
        Box::new(MergeIter {
            base: self.base.iter_range(start, end).peekable(),
            pending,
        })
    }
}

enum Step {
    Base,
    Pending,
    /// Both sides hold the same key; the buffered write wins.
    Shadowed,
}

/// Merges the committed range with buffered writes, skipping deletions.
struct MergeIter<'a> {
    base: Peekable<KvIter<'a>>,
    pending: Peekable<btree_map::Range<'a, Vec<u8>, Option<Vec<u8>>>>,
}

impl Iterator for MergeIter<'_> {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = match (self.base.peek(), self.pending.peek()) {
                (None, None) => return None,
                (Some(Err(_)), _) | (Some(Ok(_)), None) => Step::Base,
                (None, Some(_)) => Step::Pending,
                (Some(Ok((base_key, _))), Some((pending_key, _))) => {
                    match base_key.as_slice().cmp(pending_key.as_slice()) {
                        Ordering::Less => Step::Base,
                        Ordering::Equal => Step::Shadowed,
                        Ordering::Greater => Step::Pending,
                    }
                }
            };
            match step {
                Step::Base => return self.base.next(),
                Step::Shadowed => {
                    self.base.next();
                }
                Step::Pending => {}
            }
            if let Some((key, Some(value))) = self.pending.next() {
                return Some(Ok((key.clone(), value.clone())));
            }
        }
    }
}
