use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use super::control_block::ControlBlock;
use super::pool::BufferPool;
use super::stats::PoolCounters;
use crate::primitives::volume::Volume;
use crate::types::node::{NodeView, NodeViewMut};
use crate::types::page::{self, PageTag};
use crate::types::{ChildRef, FrameIndex, Lsn, PageKey, Result, VolumeId};

/// What a flush pass wrote.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlushReport {
    /// Page images written.
    pub pages_written: usize,
    /// `write_many_pages` calls issued.
    pub write_calls: usize,
    /// Dirty frames left alone because their latch was busy or a
    /// dependency could not be written first.
    pub skipped: usize,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.pages_written += other.pages_written;
        self.write_calls += other.write_calls;
        self.skipped += other.skipped;
    }
}

struct Snapshot {
    idx: FrameIndex,
    key: PageKey,
    lsn: Lsn,
    image: Box<[u8]>,
}

impl BufferPool {
    /// Writes every dirty frame.
    pub fn force_all(&self) -> Result<FlushReport> {
        let _flush = self.flush_lock.lock();
        let report = self.flush_locked(|_| true, false, usize::MAX)?;
        info!(pages = report.pages_written, "bufferpool.force_all");
        Ok(report)
    }

    /// Writes every dirty frame of `vol`.
    pub fn force_volume(&self, vol: VolumeId) -> Result<FlushReport> {
        self.volume(vol)?;
        let _flush = self.flush_lock.lock();
        self.flush_locked(|cb| cb.key().vol == vol, false, usize::MAX)
    }

    /// Writes every frame that has been dirty since `lsn` or earlier.
    pub fn force_until_lsn(&self, lsn: Lsn) -> Result<FlushReport> {
        let _flush = self.flush_lock.lock();
        self.flush_locked(|cb| cb.rec_lsn() <= lsn, false, usize::MAX)
    }

    /// One cleaner pass: writes up to `max_pages` dirty frames, skipping
    /// frames whose latch is busy.
    pub fn clean_pass(&self, max_pages: usize) -> Result<FlushReport> {
        let _flush = self.flush_lock.lock();
        self.flush_locked(|_| true, true, max_pages)
    }

    /// Caller holds `flush_lock`.
    pub(crate) fn flush_locked(
        &self,
        filter: impl Fn(&ControlBlock) -> bool,
        conditional: bool,
        max_pages: usize,
    ) -> Result<FlushReport> {
        let mut pending: Vec<FrameIndex> = Vec::new();
        let mut queued: FxHashSet<FrameIndex> = FxHashSet::default();
        for idx in self.frame_indices() {
            if pending.len() >= max_pages {
                break;
            }
            let cb = &self.frame(idx).cb;
            if !cb.is_used() || !cb.is_dirty_unlatched() || !filter(cb) {
                continue;
            }
            // Pull in whatever has to reach the volume first.
            let mut next = Some(idx);
            let mut steps = 0;
            while let Some(cur) = next {
                if !queued.insert(cur) || steps > self.block_count() {
                    break;
                }
                pending.push(cur);
                next = self
                    .frame(cur)
                    .cb
                    .dependency()
                    .filter(|dep| self.dependency_active(*dep))
                    .map(|dep| dep.frame);
                steps += 1;
            }
        }

        let mut report = FlushReport::default();
        while !pending.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|&idx| {
                self.frame(idx)
                    .cb
                    .dependency()
                    .map_or(true, |dep| !self.dependency_active(dep))
            });
            if ready.is_empty() {
                report.skipped += blocked.len();
                break;
            }
            report.absorb(self.write_frames(&ready, conditional)?);
            pending = blocked;
        }
        if report.pages_written > 0 {
            debug!(
                pages = report.pages_written,
                calls = report.write_calls,
                skipped = report.skipped,
                "bufferpool.flush"
            );
        }
        Ok(report)
    }

    fn write_frames(&self, frames: &[FrameIndex], conditional: bool) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        let mut snapshots = Vec::with_capacity(frames.len());
        for &idx in frames {
            match self.snapshot(idx, conditional) {
                Some(Some(snap)) => snapshots.push(snap),
                Some(None) => {}
                None => report.skipped += 1,
            }
        }
        if snapshots.is_empty() {
            return Ok(report);
        }
        if let Err(err) = self.write_snapshots(&mut snapshots, &mut report) {
            // Frames notified before the failure are on the volume; the
            // rest go back to plain dirty.
            let aborted = snapshots
                .iter()
                .filter(|snap| self.frame(snap.idx).cb.abort_write())
                .count();
            warn!(aborted, written = report.pages_written, error = %err, "bufferpool.flush.aborted");
            return Err(err);
        }
        Ok(report)
    }

    fn write_snapshots(&self, snapshots: &mut [Snapshot], report: &mut FlushReport) -> Result<()> {
        // Write-ahead: the log covers every image before it goes out.
        let max_lsn = snapshots.iter().map(|s| s.lsn).max().unwrap_or(Lsn::NULL);
        if self.log.durable_lsn() < max_lsn {
            self.log.flush(max_lsn)?;
        }

        snapshots.sort_by_key(|s| s.key);
        let mut volumes: FxHashMap<VolumeId, Arc<dyn Volume>> = FxHashMap::default();
        let batch = self.options.cleaner_batch_pages.max(1);
        let mut start = 0;
        while start < snapshots.len() {
            let first = snapshots[start].key;
            let mut end = start + 1;
            while end < snapshots.len()
                && end - start < batch
                && snapshots[end].key.vol == first.vol
                && snapshots[end].key.page.0 == first.page.0 + (end - start) as u32
            {
                end += 1;
            }
            let run = &snapshots[start..end];
            let volume = match volumes.get(&first.vol) {
                Some(volume) => volume.clone(),
                None => {
                    let volume = self.volume(first.vol)?;
                    volumes.insert(first.vol, volume.clone());
                    volume
                }
            };
            if run.len() == 1 {
                volume.write_many_pages(first.page, &run[0].image, 1)?;
            } else {
                let mut buf = Vec::with_capacity(run.len() * self.page_size());
                for snap in run {
                    buf.extend_from_slice(&snap.image);
                }
                volume.write_many_pages(first.page, &buf, run.len())?;
            }
            let written: SmallVec<[FrameIndex; 16]> = run.iter().map(|s| s.idx).collect();
            for idx in written {
                self.frame(idx).cb.notify_write();
            }
            report.write_calls += 1;
            report.pages_written += run.len();
            PoolCounters::add(&self.counters.writes, run.len() as u64);
            start = end;
        }
        for volume in volumes.values() {
            volume.sync()?;
        }
        Ok(())
    }

    /// `None` when the latch was busy, `Some(None)` when the frame no
    /// longer needs a write.
    fn snapshot(&self, idx: FrameIndex, conditional: bool) -> Option<Option<Snapshot>> {
        let frame = self.frame(idx);
        let cb = &frame.cb;
        if !cb.pin() {
            return Some(None);
        }
        let latch = if conditional {
            match frame.try_read() {
                Some(latch) => latch,
                None => {
                    cb.unpin();
                    return None;
                }
            }
        } else {
            frame.read()
        };
        if !cb.is_used() || !cb.is_dirty_unlatched() {
            drop(latch);
            cb.unpin();
            return Some(None);
        }
        let key = cb.key();
        let lsn = cb.mark_persisted_lsn();
        let mut image = latch.to_vec().into_boxed_slice();
        if page::read_tag(&image).ok() == Some(PageTag::BTree) {
            // Children cannot leave while the parent latch is held, so the
            // frame keys read here are stable.
            let swizzled: SmallVec<[_; 8]> = {
                let view = NodeView::new(&image);
                view.slots()
                    .filter_map(|slot| match view.child(slot) {
                        ChildRef::Frame(child) => Some((slot, child)),
                        ChildRef::Disk(_) => None,
                    })
                    .collect()
            };
            let mut node = NodeViewMut::new(&mut image);
            for (slot, child) in swizzled {
                node.set_child(slot, ChildRef::Disk(self.frame(child).cb.key().page));
            }
        }
        drop(latch);
        cb.unpin();
        page::stamp_crc32(&mut image);
        Some(Some(Snapshot {
            idx,
            key,
            lsn,
            image,
        }))
    }
}
