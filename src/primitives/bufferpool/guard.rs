use std::fmt;

use super::frame::{LatchMode, Latched};
use super::pool::BufferPool;
use crate::types::node::{NodeView, NodeViewMut};
use crate::types::page;
use crate::types::{FrameIndex, Lsn, PageId, PageKey, StoreId};

/// How a fix should latch and allocate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FixOptions {
    /// Latch mode to acquire.
    pub mode: LatchMode,
    /// Fail with `WouldBlock` instead of waiting for the latch.
    pub conditional: bool,
    /// The page is new; format it instead of reading it.
    pub virgin: bool,
    /// Allow eviction when no frame is free.
    pub evict: bool,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            mode: LatchMode::Shared,
            conditional: false,
            virgin: false,
            evict: true,
        }
    }
}

impl FixOptions {
    /// Blocking shared fix.
    pub fn shared() -> Self {
        Self::default()
    }

    /// Blocking exclusive fix.
    pub fn exclusive() -> Self {
        Self {
            mode: LatchMode::Exclusive,
            ..Self::default()
        }
    }

    /// Sets `conditional`.
    pub fn conditional(mut self, conditional: bool) -> Self {
        self.conditional = conditional;
        self
    }

    /// Sets `virgin`; virgin fixes are always exclusive.
    pub fn virgin(mut self, virgin: bool) -> Self {
        self.virgin = virgin;
        if virgin {
            self.mode = LatchMode::Exclusive;
        }
        self
    }

    /// Sets `evict`.
    pub fn evict(mut self, evict: bool) -> Self {
        self.evict = evict;
        self
    }
}

/// A fixed page: one pin plus the frame latch.
///
/// Dropping the guard is the unfix: the latch is released first, then the
/// pin.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    idx: FrameIndex,
    latch: Option<Latched<'a>>,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPool, idx: FrameIndex, latch: Latched<'a>) -> Self {
        Self {
            pool,
            idx,
            latch: Some(latch),
        }
    }

    fn latched(&self) -> &Latched<'a> {
        match &self.latch {
            Some(latch) => latch,
            None => unreachable!("page guard without latch"),
        }
    }

    pub(crate) fn pool(&self) -> &'a BufferPool {
        self.pool
    }

    /// Frame holding the page.
    pub fn frame_index(&self) -> FrameIndex {
        self.idx
    }

    /// Volume and page id.
    pub fn key(&self) -> PageKey {
        self.pool.frame(self.idx).cb.key()
    }

    /// Page id.
    pub fn page_id(&self) -> PageId {
        self.key().page
    }

    /// Owning store.
    pub fn store(&self) -> StoreId {
        self.pool.frame(self.idx).cb.store()
    }

    /// Mode of the held latch.
    pub fn latch_mode(&self) -> LatchMode {
        self.latched().mode()
    }

    /// True under an exclusive latch.
    pub fn is_exclusive(&self) -> bool {
        self.latch_mode() == LatchMode::Exclusive
    }

    /// Page image.
    pub fn data(&self) -> &[u8] {
        self.latched().data()
    }

    /// Mutable page image. Panics under a shared latch.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.latch {
            Some(latch) => latch.data_mut(),
            None => unreachable!("page guard without latch"),
        }
    }

    /// Pointer view of a B-tree page.
    pub fn node(&self) -> NodeView<'_> {
        NodeView::new(self.data())
    }

    /// Mutable pointer view of a B-tree page.
    pub fn node_mut(&mut self) -> NodeViewMut<'_> {
        NodeViewMut::new(self.data_mut())
    }

    /// LSN stored in the page header.
    pub fn header_lsn(&self) -> Lsn {
        page::read_lsn(self.data())
    }

    /// Frame's page LSN.
    pub fn page_lsn(&self) -> Lsn {
        self.pool.frame(self.idx).cb.page_lsn()
    }

    /// Current pin count, including this guard's pin.
    pub fn pin_count(&self) -> i32 {
        self.pool.frame(self.idx).cb.pin_count()
    }

    /// Trades the exclusive latch for a shared one without letting a
    /// writer in between.
    pub fn downgrade(&mut self) {
        if let Some(latch) = self.latch.take() {
            self.latch = Some(latch.downgrade());
        }
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        drop(self.latch.take());
        self.pool.frame(self.idx).cb.unpin();
    }
}

impl fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageGuard")
            .field("frame", &self.idx)
            .field("key", &self.key())
            .field("mode", &self.latch_mode())
            .finish()
    }
}

/// Keeps a frame resident while no latch is held.
///
/// Obtained from [`BufferPool::pin_for_refix`]; dropping it (or passing it
/// to [`BufferPool::unpin_for_refix`]) releases the pin.
pub struct RefixPin<'a> {
    pool: &'a BufferPool,
    idx: FrameIndex,
}

impl<'a> RefixPin<'a> {
    pub(crate) fn new(pool: &'a BufferPool, idx: FrameIndex) -> Self {
        Self { pool, idx }
    }

    /// Pinned frame.
    pub fn frame_index(&self) -> FrameIndex {
        self.idx
    }

    pub(crate) fn pool(&self) -> &'a BufferPool {
        self.pool
    }
}

impl Drop for RefixPin<'_> {
    fn drop(&mut self) {
        self.pool.frame(self.idx).cb.unpin();
    }
}

impl fmt::Debug for RefixPin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefixPin").field(&self.idx).finish()
    }
}
