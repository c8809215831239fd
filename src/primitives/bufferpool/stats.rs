use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub(crate) struct PoolCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) swizzled_hits: AtomicU64,
    pub(crate) reads: AtomicU64,
    pub(crate) writes: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) unswizzles: AtomicU64,
    pub(crate) emlsn_updates: AtomicU64,
    pub(crate) skipped_not_leaf: AtomicU64,
    pub(crate) skipped_dirty: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Point-in-time pool statistics.
#[derive(Default, Clone, Debug, Serialize)]
pub struct PoolStats {
    /// Fixes resolved through the hash index.
    pub hits: u64,
    /// Fixes that had to load a page.
    pub misses: u64,
    /// Fixes resolved through a swizzled slot.
    pub swizzled_hits: u64,
    /// Pages read from volumes.
    pub reads: u64,
    /// Pages written to volumes.
    pub writes: u64,
    /// Frames reclaimed by the sweeper.
    pub evictions: u64,
    /// Parent slots returned to disk form.
    pub unswizzles: u64,
    /// Parent end-marker LSNs raised on eviction.
    pub emlsn_updates: u64,
    /// Candidates skipped for not being evictable node types.
    pub skipped_not_leaf: u64,
    /// Candidates skipped for being dirty.
    pub skipped_dirty: u64,
    /// Frames on the free list.
    pub free_frames: u64,
    /// Frames holding a page.
    pub used_frames: u64,
    /// Frames whose page is newer than the volume copy.
    pub dirty_frames: u64,
}

impl PoolStats {
    pub(crate) fn from_counters(c: &PoolCounters) -> Self {
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        Self {
            hits: load(&c.hits),
            misses: load(&c.misses),
            swizzled_hits: load(&c.swizzled_hits),
            reads: load(&c.reads),
            writes: load(&c.writes),
            evictions: load(&c.evictions),
            unswizzles: load(&c.unswizzles),
            emlsn_updates: load(&c.emlsn_updates),
            skipped_not_leaf: load(&c.skipped_not_leaf),
            skipped_dirty: load(&c.skipped_dirty),
            ..Self::default()
        }
    }

    /// Share of fixes that needed no I/O.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.hits + self.swizzled_hits;
        let total = served + self.misses;
        if total == 0 {
            return 0.0;
        }
        served as f64 / total as f64
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} swizzled_hits={} misses={} reads={} writes={} evictions={} unswizzles={} emlsn_updates={} free={} used={} dirty={} hit_ratio={:.3}",
            self.hits,
            self.swizzled_hits,
            self.misses,
            self.reads,
            self.writes,
            self.evictions,
            self.unswizzles,
            self.emlsn_updates,
            self.free_frames,
            self.used_frames,
            self.dirty_frames,
            self.hit_ratio()
        )
    }
}
