use std::hash::{Hash, Hasher};

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};

use crate::types::{FrameIndex, PageKey};

/// Where a resident page lives, plus the frame of its last known parent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct HashEntry {
    pub(crate) frame: FrameIndex,
    /// Hint only; eviction re-verifies it against the parent's slots.
    pub(crate) parent: Option<FrameIndex>,
}

/// Sharded page-id index. No shard lock is ever held across I/O.
pub(crate) struct PageTable {
    shards: Box<[RwLock<FxHashMap<PageKey, HashEntry>>]>,
}

impl PageTable {
    pub(crate) fn new(capacity: usize) -> Self {
        let shard_count = (capacity / 64).clamp(1, 256).next_power_of_two();
        let per_shard = capacity / shard_count + 1;
        let shards = (0..shard_count)
            .map(|_| {
                RwLock::new(FxHashMap::with_capacity_and_hasher(
                    per_shard,
                    Default::default(),
                ))
            })
            .collect();
        Self { shards }
    }

    fn shard(&self, key: &PageKey) -> &RwLock<FxHashMap<PageKey, HashEntry>> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize & (self.shards.len() - 1)]
    }

    pub(crate) fn lookup(&self, key: PageKey) -> Option<HashEntry> {
        self.shard(&key).read().get(&key).copied()
    }

    /// Inserts unless the key is present; on conflict returns the existing
    /// entry.
    pub(crate) fn insert_if_absent(
        &self,
        key: PageKey,
        entry: HashEntry,
    ) -> Result<(), HashEntry> {
        let mut shard = self.shard(&key).write();
        match shard.get(&key) {
            Some(existing) => Err(*existing),
            None => {
                shard.insert(key, entry);
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn remove(&self, key: PageKey) -> Option<HashEntry> {
        self.shard(&key).write().remove(&key)
    }

    /// Removes the entry only if it still points at `frame`.
    pub(crate) fn remove_if(&self, key: PageKey, frame: FrameIndex) -> bool {
        let mut shard = self.shard(&key).write();
        match shard.get(&key) {
            Some(entry) if entry.frame == frame => {
                shard.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn set_parent(&self, key: PageKey, parent: FrameIndex) {
        if let Some(entry) = self.shard(&key).write().get_mut(&key) {
            entry.parent = Some(parent);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }
}
