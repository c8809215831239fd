//! Clock sweeper.
//!
//! The sweeper never blocks on a latch: every frame it looks at is
//! try-latched, and a busy latch just means the frame is skipped this round.
//! A victim is unlinked from its parent (slot unswizzled, end-marker LSN
//! raised) while both latches are held, after which it is removed from the
//! hash index and returned to the free list.

use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::pool::BufferPool;
use super::stats::PoolCounters;
use crate::types::node::{ChildSlot, NodeView, NodeViewMut};
use crate::types::page::{self, PageTag};
use crate::types::{ChildRef, FrameIndex, PoolError, Result};

/// How hard a sweep tries.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum EvictUrgency {
    /// One round; hot and swizzled frames are left alone.
    Normal,
    /// Several rounds; reference hints decay faster.
    Eager,
    /// Reference hints are ignored; swizzled leaves go after the first round.
    Urgent,
    /// Everything unpinned and clean goes.
    Complete,
}

/// What one call to [`BufferPool::evict_blocks`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EvictionReport {
    /// Frames examined.
    pub visited: usize,
    /// Frames returned to the free list.
    pub evicted: usize,
    /// Rounds over the frame array.
    pub rounds: u32,
    /// Skipped because a latch was busy or the frame was pinned.
    pub skipped_busy: usize,
    /// Skipped for being a root, an inner node, or a foster parent.
    pub skipped_structural: usize,
    /// Skipped for holding unwritten updates.
    pub skipped_dirty: usize,
    /// Skipped for recent use or for being swizzled.
    pub skipped_hot: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Outcome {
    Evicted,
    Empty,
    Busy,
    Structural,
    NotLeaf,
    Dirty,
    Hot,
}

/// Clock hand. Guarded by the pool's sweeper mutex, which also keeps
/// eviction single-threaded.
#[derive(Debug, Default)]
pub(crate) struct Sweeper {
    clock_hand: u32,
}

impl Sweeper {
    fn advance(&mut self, block_count: u32) -> FrameIndex {
        self.clock_hand = self.clock_hand % block_count + 1;
        FrameIndex::new(self.clock_hand)
    }
}

impl BufferPool {
    /// Runs the clock until `wanted` frames were freed or the round budget
    /// for `urgency` is spent.
    pub fn evict_blocks(&self, urgency: EvictUrgency, wanted: usize) -> Result<EvictionReport> {
        let rounds = match urgency {
            EvictUrgency::Normal => 1,
            _ => self.options.evict_max_rounds,
        };
        let block_count = self.block_count() as u32;
        let mut report = EvictionReport::default();
        let mut sweeper = self.sweeper.lock();
        'rounds: for round in 0..rounds {
            report.rounds = round + 1;
            for _ in 0..block_count {
                if report.evicted >= wanted {
                    break 'rounds;
                }
                let idx = sweeper.advance(block_count);
                report.visited += 1;
                match self.try_evict(idx, urgency, round)? {
                    Outcome::Evicted => report.evicted += 1,
                    Outcome::Empty => {}
                    Outcome::Busy => report.skipped_busy += 1,
                    Outcome::Structural => report.skipped_structural += 1,
                    Outcome::NotLeaf => {
                        PoolCounters::bump(&self.counters.skipped_not_leaf);
                        report.skipped_structural += 1;
                    }
                    Outcome::Dirty => {
                        PoolCounters::bump(&self.counters.skipped_dirty);
                        report.skipped_dirty += 1;
                    }
                    Outcome::Hot => report.skipped_hot += 1,
                }
            }
            if report.evicted >= wanted {
                break;
            }
            if report.skipped_dirty > 0 {
                self.wakeup_cleaner(false);
            }
        }
        drop(sweeper);
        debug!(
            ?urgency,
            wanted,
            evicted = report.evicted,
            visited = report.visited,
            dirty = report.skipped_dirty,
            "bufferpool.evict"
        );
        Ok(report)
    }

    fn try_evict(&self, idx: FrameIndex, urgency: EvictUrgency, round: u32) -> Result<Outcome> {
        let frame = self.frame(idx);
        let cb = &frame.cb;
        if !cb.is_used() {
            return Ok(Outcome::Empty);
        }
        let Some(mut child) = frame.try_write() else {
            return Ok(Outcome::Busy);
        };
        if !cb.is_used() {
            return Ok(Outcome::Empty);
        }
        let key = cb.key();
        if self.is_root_frame(key.vol, cb.store(), idx) {
            return Ok(Outcome::Structural);
        }
        if page::read_tag(&child).ok() != Some(PageTag::BTree) {
            return Ok(Outcome::NotLeaf);
        }
        let view = NodeView::new(&child);
        if !view.is_leaf() {
            let allowed = self.options.evict_inner_nodes
                && urgency >= EvictUrgency::Urgent
                && !view.has_swizzled_child();
            if !allowed {
                return Ok(Outcome::NotLeaf);
            }
        }
        if view.foster().is_some() {
            return Ok(Outcome::Structural);
        }
        if cb.is_dirty_unlatched() {
            return Ok(Outcome::Dirty);
        }
        if urgency >= EvictUrgency::Urgent {
            cb.reset_refs();
        } else if cb.ref_count() > 0 {
            cb.decay_refs(1u16 << round.min(15));
            return Ok(Outcome::Hot);
        }
        if cb.is_swizzled()
            && !(urgency >= EvictUrgency::Complete
                || (urgency >= EvictUrgency::Urgent && round > 0))
        {
            return Ok(Outcome::Hot);
        }
        if !cb.prepare_for_eviction() {
            return Ok(Outcome::Busy);
        }

        let Some(parent_idx) = self.table.lookup(key).and_then(|entry| entry.parent) else {
            cb.cancel_eviction();
            return Ok(Outcome::Structural);
        };
        let parent_frame = self.frame(parent_idx);
        let Some(mut parent) = parent_frame.try_write() else {
            cb.cancel_eviction();
            return Ok(Outcome::Busy);
        };
        let parent_cb = &parent_frame.cb;
        if !parent_cb.is_used()
            || parent_cb.key().vol != key.vol
            || page::read_tag(&parent).ok() != Some(PageTag::BTree)
        {
            cb.cancel_eviction();
            return Ok(Outcome::Structural);
        }
        let target = if cb.is_swizzled() {
            ChildRef::Frame(idx)
        } else {
            ChildRef::Disk(key.page)
        };
        let Some(slot) = NodeView::new(&parent).find_child(target) else {
            // The hint is stale; a later fix through the real parent fixes it.
            cb.cancel_eviction();
            return Ok(Outcome::Structural);
        };

        let child_lsn = page::read_lsn(&child);
        if NodeView::new(&parent).emlsn(slot) < child_lsn {
            let lsn = match self.log.log_child_emlsn_update(
                parent_cb.key(),
                slot,
                key.page,
                child_lsn,
            ) {
                Ok(lsn) => lsn,
                Err(err) => {
                    cb.cancel_eviction();
                    warn!(page = %key, error = %err, "bufferpool.evict.emlsn_log_failed");
                    return Err(err);
                }
            };
            NodeViewMut::new(&mut parent).set_emlsn(slot, child_lsn);
            if lsn > page::read_lsn(&parent) {
                page::write_lsn(&mut parent, lsn);
            }
            parent_cb.set_page_lsn(lsn);
            PoolCounters::bump(&self.counters.emlsn_updates);
        }
        if let (ChildSlot::Child(_), true) = (slot, cb.is_swizzled()) {
            NodeViewMut::new(&mut parent).set_child(slot, ChildRef::Disk(key.page));
            PoolCounters::bump(&self.counters.unswizzles);
        }

        self.table.remove_if(key, idx);
        cb.clear();
        child.fill(0);
        drop(child);
        drop(parent);
        self.free.push(idx);
        PoolCounters::bump(&self.counters.evictions);
        Ok(Outcome::Evicted)
    }

    /// Pops a free frame, sweeping with rising urgency when none is left.
    pub(crate) fn grab_free_block(&self, evict: bool) -> Result<FrameIndex> {
        if let Some(idx) = self.free.pop() {
            return Ok(idx);
        }
        if !evict {
            return Err(PoolError::PoolFull);
        }
        let pct = self.options.evict_batch_percent as usize;
        let batch = (self.block_count() * pct / 100).max(1);
        for urgency in [
            EvictUrgency::Normal,
            EvictUrgency::Eager,
            EvictUrgency::Urgent,
            EvictUrgency::Complete,
        ] {
            if urgency >= EvictUrgency::Urgent {
                warn!(?urgency, free = self.free.len(), "bufferpool.evict.escalate");
            }
            let report = self.evict_blocks(urgency, batch)?;
            if let Some(idx) = self.free.pop() {
                return Ok(idx);
            }
            if report.evicted == 0 {
                self.wakeup_cleaner(false);
                thread::sleep(Duration::from_millis(self.options.evict_retry_sleep_ms));
            }
        }
        self.evict_blocks(EvictUrgency::Complete, batch)?;
        if let Some(idx) = self.free.pop() {
            return Ok(idx);
        }
        warn!(blocks = self.block_count(), "bufferpool.evict.exhausted");
        Err(PoolError::FrameNotFound)
    }
}
