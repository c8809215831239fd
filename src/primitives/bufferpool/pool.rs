use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use super::cleaner::PageCleaner;
use super::config::PoolOptions;
use super::control_block::{ControlBlock, Dependency, FlushState, PinState};
use super::evict::Sweeper;
use super::frame::{Frame, LatchMode, Latched};
use super::freelist::FreeList;
use super::guard::{FixOptions, PageGuard, RefixPin};
use super::hashtable::{HashEntry, PageTable};
use super::stats::{PoolCounters, PoolStats};
use crate::primitives::volume::Volume;
use crate::primitives::wal::LogManager;
use crate::types::node::{self, ChildSlot, NodeView, LEAF_LEVEL};
use crate::types::page::{self, PageHeader, PageTag};
use crate::types::{
    ChildRef, FrameIndex, Lsn, PageId, PageKey, PoolError, Result, StoreId, VolumeId,
};

const PIN_SPINS_BEFORE_YIELD: u32 = 64;

/// A dirty frame as seen by a checkpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DirtyPage {
    /// Page identity.
    pub key: PageKey,
    /// First LSN that dirtied the frame.
    pub rec_lsn: Lsn,
    /// Latest LSN applied to the frame.
    pub page_lsn: Lsn,
}

/// Swizzle-aware B-tree buffer pool.
pub struct BufferPool {
    pub(crate) options: PoolOptions,
    page_size: usize,
    frames: Box<[Frame]>,
    pub(crate) table: PageTable,
    pub(crate) free: FreeList,
    volumes: RwLock<FxHashMap<VolumeId, Arc<dyn Volume>>>,
    roots: RwLock<FxHashMap<(VolumeId, StoreId), FrameIndex>>,
    pub(crate) log: Arc<dyn LogManager>,
    cleaner: RwLock<Option<Weak<dyn PageCleaner>>>,
    pub(crate) sweeper: Mutex<Sweeper>,
    pub(crate) flush_lock: Mutex<()>,
    swizzling: AtomicBool,
    pub(crate) counters: PoolCounters,
}

impl BufferPool {
    /// Allocates every frame up front.
    pub fn new(options: PoolOptions, log: Arc<dyn LogManager>) -> Result<Self> {
        options.validate()?;
        let page_size = options.page_size as usize;
        // Slot 0 is never handed out.
        let frames = (0..=options.block_count)
            .map(|_| Frame::new(page_size))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        info!(
            blocks = options.block_count,
            page_size,
            swizzling = options.swizzling,
            "bufferpool.create"
        );
        Ok(Self {
            page_size,
            frames,
            table: PageTable::new(options.block_count),
            free: FreeList::new(options.block_count),
            volumes: RwLock::new(FxHashMap::default()),
            roots: RwLock::new(FxHashMap::default()),
            log,
            cleaner: RwLock::new(None),
            sweeper: Mutex::new(Sweeper::default()),
            flush_lock: Mutex::new(()),
            swizzling: AtomicBool::new(options.swizzling),
            counters: PoolCounters::default(),
            options,
        })
    }

    /// Options the pool was built with.
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of usable frames.
    pub fn block_count(&self) -> usize {
        self.frames.len() - 1
    }

    /// The log manager pages are stamped against.
    pub fn log(&self) -> &Arc<dyn LogManager> {
        &self.log
    }

    pub(crate) fn frame(&self, idx: FrameIndex) -> &Frame {
        &self.frames[idx.as_usize()]
    }

    pub(crate) fn frame_indices(&self) -> impl Iterator<Item = FrameIndex> {
        (1..self.frames.len() as u32).map(FrameIndex::new)
    }

    /// Control block of `idx`.
    pub fn control_block(&self, idx: FrameIndex) -> &ControlBlock {
        &self.frame(idx).cb
    }

    pub(crate) fn volume(&self, vol: VolumeId) -> Result<Arc<dyn Volume>> {
        self.volumes.read().get(&vol).cloned().ok_or(PoolError::NotFound)
    }

    pub(crate) fn is_root_frame(&self, vol: VolumeId, store: StoreId, idx: FrameIndex) -> bool {
        self.roots.read().get(&(vol, store)) == Some(&idx)
    }

    /// Registers `volume` under `vol` and loads the given store roots.
    pub fn install_volume(
        &self,
        vol: VolumeId,
        volume: Arc<dyn Volume>,
        roots: &[(StoreId, PageId)],
    ) -> Result<()> {
        if volume.page_size() != self.page_size {
            return Err(PoolError::Invalid("volume page size differs from pool"));
        }
        {
            let mut volumes = self.volumes.write();
            if volumes.contains_key(&vol) {
                return Err(PoolError::Invalid("volume already installed"));
            }
            volumes.insert(vol, volume);
        }
        for &(store, pid) in roots {
            if let Err(err) = self.load_root(vol, store, pid) {
                warn!(vol = vol.0, store = store.0, page = pid.0, error = %err, "bufferpool.volume.install_failed");
                if let Err(cleanup) = self.uninstall_volume(vol) {
                    warn!(vol = vol.0, error = %cleanup, "bufferpool.volume.install_cleanup_failed");
                }
                return Err(err);
            }
        }
        info!(vol = vol.0, roots = roots.len(), "bufferpool.volume.install");
        Ok(())
    }

    fn load_root(&self, vol: VolumeId, store: StoreId, pid: PageId) -> Result<()> {
        let guard = self.fix_page(
            PageKey::new(vol, pid),
            None,
            None,
            FixOptions::shared(),
        )?;
        if guard.store() != store {
            return Err(PoolError::Corruption("root page belongs to another store"));
        }
        self.register_root(vol, store, &guard)
    }

    fn register_root(&self, vol: VolumeId, store: StoreId, guard: &PageGuard<'_>) -> Result<()> {
        let mut roots = self.roots.write();
        if roots.contains_key(&(vol, store)) {
            return Err(PoolError::Invalid("store already has a root"));
        }
        roots.insert((vol, store), guard.frame_index());
        self.frame(guard.frame_index()).cb.set_swizzled(true);
        Ok(())
    }

    /// Forces the volume's dirty pages, then drops all of its frames.
    pub fn uninstall_volume(&self, vol: VolumeId) -> Result<()> {
        self.volume(vol)?;
        let _flush = self.flush_lock.lock();
        self.flush_locked(|cb| cb.key().vol == vol, false, usize::MAX)?;
        let _sweeper = self.sweeper.lock();
        let victims: Vec<FrameIndex> = self
            .frame_indices()
            .filter(|&idx| {
                let cb = &self.frame(idx).cb;
                cb.is_used() && cb.key().vol == vol
            })
            .collect();
        let mut claimed = Vec::with_capacity(victims.len());
        for idx in victims {
            let cb = &self.frame(idx).cb;
            let claimed_now = cb.prepare_for_eviction();
            if !claimed_now || cb.is_dirty_unlatched() {
                if claimed_now {
                    cb.cancel_eviction();
                }
                for &done in &claimed {
                    self.frame(done).cb.cancel_eviction();
                }
                debug!(vol = vol.0, frame = idx.get(), "bufferpool.volume.uninstall_busy");
                return Err(PoolError::WouldBlock);
            }
            claimed.push(idx);
        }
        for &idx in &claimed {
            let frame = self.frame(idx);
            let latch = frame.write();
            self.table.remove_if(frame.cb.key(), idx);
            frame.cb.clear();
            drop(latch);
            self.free.push(idx);
        }
        self.roots.write().retain(|(v, _), _| *v != vol);
        self.volumes.write().remove(&vol);
        info!(vol = vol.0, frames = claimed.len(), "bufferpool.volume.uninstall");
        Ok(())
    }

    /// Root page id of `store`, if registered.
    pub fn root_page_id(&self, vol: VolumeId, store: StoreId) -> Option<PageId> {
        let idx = *self.roots.read().get(&(vol, store))?;
        Some(self.frame(idx).cb.key().page)
    }

    /// Fixes the root page of `store` through the root table.
    pub fn fix_root(
        &self,
        vol: VolumeId,
        store: StoreId,
        mode: LatchMode,
        conditional: bool,
    ) -> Result<PageGuard<'_>> {
        let idx = *self
            .roots
            .read()
            .get(&(vol, store))
            .ok_or(PoolError::NotFound)?;
        let cb = &self.frame(idx).cb;
        if !cb.pin() {
            // Only an uninstall takes root frames away.
            return Err(PoolError::NotFound);
        }
        PoolCounters::bump(&self.counters.hits);
        self.latch_pinned(idx, mode, conditional)
    }

    /// Creates the root of a brand-new store, formatted as an empty leaf and
    /// returned EX-latched and dirty.
    pub fn fix_virgin_root(
        &self,
        vol: VolumeId,
        store: StoreId,
        pid: PageId,
    ) -> Result<PageGuard<'_>> {
        self.volume(vol)?;
        if self.roots.read().contains_key(&(vol, store)) {
            return Err(PoolError::Invalid("store already has a root"));
        }
        let guard = self.fix_page(
            PageKey::new(vol, pid),
            Some(store),
            None,
            FixOptions::exclusive().virgin(true),
        )?;
        self.register_root(vol, store, &guard)?;
        info!(vol = vol.0, store = store.0, page = pid.0, "bufferpool.root.create");
        Ok(guard)
    }

    /// Fixes the child referenced by `child`, a slot value read from the
    /// latched `parent`.
    ///
    /// A swizzled reference resolves to its frame directly. Otherwise the
    /// page is looked up (and read on a miss); when swizzling is enabled and
    /// the parent is held EX, the parent slot is then rewritten to point at
    /// the frame.
    pub fn fix_nonroot<'a>(
        &'a self,
        parent: &mut PageGuard<'a>,
        child: ChildRef,
        opts: FixOptions,
    ) -> Result<PageGuard<'a>> {
        debug_assert!(std::ptr::eq(parent.pool(), self));
        match child {
            ChildRef::Frame(idx) => {
                if opts.virgin {
                    return Err(PoolError::Invalid("virgin fix through a swizzled slot"));
                }
                let frame = self
                    .frames
                    .get(idx.as_usize())
                    .filter(|_| idx.get() != 0)
                    .ok_or(PoolError::Corruption("swizzled slot out of range"))?;
                // The sweeper cannot commit while we hold the parent latch;
                // a failed pin only means it is about to back off. A frame
                // no slot owns is never coming back.
                let mut spins = 0u32;
                while !frame.cb.pin() {
                    if !frame.cb.is_swizzled() {
                        warn!(frame = idx.get(), parent = %parent.key(), "bufferpool.fix.dangling_swizzle");
                        return Err(PoolError::Corruption("swizzled slot names a free frame"));
                    }
                    if spins < PIN_SPINS_BEFORE_YIELD {
                        std::hint::spin_loop();
                    } else {
                        thread::yield_now();
                    }
                    spins = spins.saturating_add(1);
                }
                PoolCounters::bump(&self.counters.swizzled_hits);
                self.latch_pinned(idx, opts.mode, opts.conditional)
            }
            ChildRef::Disk(pid) => {
                if pid.is_null() {
                    return Err(PoolError::Invalid("null child pointer"));
                }
                let key = PageKey::new(parent.key().vol, pid);
                let guard = self.fix_page(
                    key,
                    Some(parent.store()),
                    Some(parent.frame_index()),
                    opts,
                )?;
                if self.swizzling_enabled() && parent.is_exclusive() {
                    self.swizzle_fixed(parent, &guard);
                }
                Ok(guard)
            }
        }
    }

    /// Fixes a page by id without a parent.
    ///
    /// Pages loaded this way have no parent hint and are not evicted until a
    /// traversal fixes them through their parent.
    pub fn fix_direct(&self, key: PageKey, opts: FixOptions) -> Result<PageGuard<'_>> {
        if opts.virgin {
            return Err(PoolError::Invalid("virgin pages need a parent or a store"));
        }
        self.fix_page(key, None, None, opts)
    }

    /// Releases a fix. Equivalent to dropping the guard.
    pub fn unfix(&self, page: PageGuard<'_>) {
        drop(page);
    }

    /// Takes an extra pin that keeps `page` resident after it is unfixed.
    pub fn pin_for_refix<'a>(&'a self, page: &PageGuard<'a>) -> RefixPin<'a> {
        let pinned = self.frame(page.frame_index()).cb.pin();
        assert!(pinned, "fixed page cannot be evicting");
        RefixPin::new(self, page.frame_index())
    }

    /// Latches a frame kept resident by `pin`. The pin stays in place.
    pub fn refix_direct<'a>(
        &'a self,
        pin: &RefixPin<'a>,
        mode: LatchMode,
        conditional: bool,
    ) -> Result<PageGuard<'a>> {
        debug_assert!(std::ptr::eq(pin.pool(), self));
        let pinned = self.frame(pin.frame_index()).cb.pin();
        assert!(pinned, "refix pin lost");
        PoolCounters::bump(&self.counters.hits);
        self.latch_pinned(pin.frame_index(), mode, conditional)
    }

    /// Releases a refix pin. Equivalent to dropping it.
    pub fn unpin_for_refix(&self, pin: RefixPin<'_>) {
        drop(pin);
    }

    fn latch_pinned(
        &self,
        idx: FrameIndex,
        mode: LatchMode,
        conditional: bool,
    ) -> Result<PageGuard<'_>> {
        let frame = self.frame(idx);
        let latch = if conditional {
            match frame.try_latch(mode) {
                Some(latch) => latch,
                None => {
                    frame.cb.unpin();
                    return Err(PoolError::WouldBlock);
                }
            }
        } else {
            frame.latch(mode)
        };
        frame.cb.hit(mode == LatchMode::Exclusive);
        Ok(PageGuard::new(self, idx, latch))
    }

    fn fix_page(
        &self,
        key: PageKey,
        store: Option<StoreId>,
        parent: Option<FrameIndex>,
        opts: FixOptions,
    ) -> Result<PageGuard<'_>> {
        loop {
            if let Some(entry) = self.table.lookup(key) {
                let cb = &self.frame(entry.frame).cb;
                if !cb.pin() {
                    thread::yield_now();
                    continue;
                }
                if !cb.is_used() || cb.key() != key {
                    cb.unpin();
                    thread::yield_now();
                    continue;
                }
                if opts.virgin {
                    cb.unpin();
                    return Err(PoolError::Invalid("virgin page already resident"));
                }
                if let Some(parent) = parent {
                    if !cb.is_swizzled() && entry.parent != Some(parent) {
                        self.table.set_parent(key, parent);
                    }
                }
                PoolCounters::bump(&self.counters.hits);
                return self.latch_pinned(entry.frame, opts.mode, opts.conditional);
            }

            let idx = self.grab_free_block(opts.evict)?;
            let frame = self.frame(idx);
            let mut buf = frame.write();
            let loaded = if opts.virgin {
                self.format_virgin(&mut buf, key, store)
            } else {
                self.read_page(&mut buf, key)
            };
            let (page_store, page_lsn) = match loaded {
                Ok(loaded) => loaded,
                Err(err) => {
                    drop(buf);
                    self.free.push(idx);
                    return Err(err);
                }
            };
            frame.cb.init(key, page_store, page_lsn);
            if self
                .table
                .insert_if_absent(key, HashEntry { frame: idx, parent })
                .is_err()
            {
                // Someone else loaded the page while we were reading it.
                drop(buf);
                frame.cb.release_uninstalled();
                self.free.push(idx);
                continue;
            }
            frame.cb.publish();
            frame.cb.hit(opts.mode == LatchMode::Exclusive);
            let mut latch = Latched::Exclusive(buf);
            if opts.virgin {
                let lsn = self.log.curr_lsn();
                page::write_lsn(latch.data_mut(), lsn);
                frame.cb.set_page_lsn(lsn);
            } else {
                PoolCounters::bump(&self.counters.reads);
            }
            PoolCounters::bump(&self.counters.misses);
            debug!(frame = idx.get(), page = %key, virgin = opts.virgin, "bufferpool.fix.miss");
            if opts.mode == LatchMode::Shared {
                latch = latch.downgrade();
            }
            return Ok(PageGuard::new(self, idx, latch));
        }
    }

    fn format_virgin(
        &self,
        buf: &mut [u8],
        key: PageKey,
        store: Option<StoreId>,
    ) -> Result<(StoreId, Lsn)> {
        self.volume(key.vol)?;
        let store = store.ok_or(PoolError::Invalid("virgin pages need a parent or a store"))?;
        node::format_node(buf, key.page, store, LEAF_LEVEL)?;
        Ok((store, Lsn::NULL))
    }

    fn read_page(&self, buf: &mut [u8], key: PageKey) -> Result<(StoreId, Lsn)> {
        let volume = self.volume(key.vol)?;
        volume.read_many_pages(key.page, buf, 1)?;
        let checked = PageHeader::decode(buf).and_then(|header| {
            if header.page_id != key.page {
                return Err(PoolError::Corruption("page id mismatch"));
            }
            if header.page_size as usize != self.page_size {
                return Err(PoolError::Corruption("page size mismatch"));
            }
            if self.options.verify_checksums {
                page::verify_crc32(buf)?;
            }
            if header.tag == PageTag::BTree {
                NodeView::new(buf).validate_stored()?;
            }
            Ok(header)
        });
        match checked {
            Ok(header) => Ok((header.store, header.lsn)),
            Err(err) => {
                warn!(page = %key, error = %err, "bufferpool.read.corrupt");
                Err(err)
            }
        }
    }

    /// True when fixes swizzle parent slots.
    pub fn swizzling_enabled(&self) -> bool {
        self.swizzling.load(Ordering::SeqCst)
    }

    /// Turns swizzling on or off. Turning it off first returns every
    /// swizzled slot in the pool to disk form; the caller must not hold any
    /// page latch.
    ///
    /// Parents are latched one at a time without the sweeper mutex. Fixes
    /// read the flag under the parent EX latch, so nothing is swizzled
    /// behind the scan.
    pub fn set_swizzling_enabled(&self, enabled: bool) {
        let was = self.swizzling.swap(enabled, Ordering::SeqCst);
        if enabled || !was {
            return;
        }
        let mut restored = 0u64;
        for idx in self.frame_indices() {
            let frame = self.frame(idx);
            if !frame.cb.is_used() {
                continue;
            }
            let mut parent = frame.write();
            if !frame.cb.is_used() || page::read_tag(&parent).ok() != Some(PageTag::BTree) {
                continue;
            }
            let swizzled: Vec<(ChildSlot, FrameIndex)> = {
                let view = NodeView::new(&parent);
                view.slots()
                    .filter_map(|slot| match view.child(slot) {
                        ChildRef::Frame(child) => Some((slot, child)),
                        ChildRef::Disk(_) => None,
                    })
                    .collect()
            };
            for (slot, child) in swizzled {
                let child_cb = &self.frame(child).cb;
                node::NodeViewMut::new(&mut parent).set_child(slot, ChildRef::Disk(child_cb.key().page));
                child_cb.set_swizzled(false);
                restored += 1;
            }
        }
        PoolCounters::add(&self.counters.unswizzles, restored);
        info!(unswizzled = restored, "bufferpool.swizzling.disabled");
    }

    fn swizzle_fixed(&self, parent: &mut PageGuard<'_>, child: &PageGuard<'_>) {
        let cb = &self.frame(child.frame_index()).cb;
        if cb.is_swizzled() {
            return;
        }
        let key = child.key();
        let Some(slot) = parent.node().find_child(ChildRef::Disk(key.page)) else {
            return;
        };
        if slot == ChildSlot::Foster {
            return;
        }
        cb.set_swizzled(true);
        self.table.set_parent(key, parent.frame_index());
        parent
            .node_mut()
            .set_child(slot, ChildRef::Frame(child.frame_index()));
        debug!(frame = child.frame_index().get(), page = %key, "bufferpool.swizzle");
    }

    /// Rewrites `slot` of `parent` to the swizzled form if the child is
    /// resident. Returns true when the slot is swizzled afterwards.
    pub fn swizzle_child(&self, parent: &mut PageGuard<'_>, slot: ChildSlot) -> bool {
        assert!(
            parent.is_exclusive(),
            "swizzling requires an exclusive parent latch"
        );
        if !self.swizzling_enabled() || slot == ChildSlot::Foster {
            return false;
        }
        let pid = match parent.node().child(slot) {
            ChildRef::Frame(_) => return true,
            ChildRef::Disk(pid) => pid,
        };
        let key = PageKey::new(parent.key().vol, pid);
        let Some(entry) = self.table.lookup(key) else {
            return false;
        };
        let cb = &self.frame(entry.frame).cb;
        if !cb.pin() {
            return false;
        }
        let swizzle = cb.is_used() && cb.key() == key && !cb.is_swizzled();
        if swizzle {
            cb.set_swizzled(true);
            self.table.set_parent(key, parent.frame_index());
            parent.node_mut().set_child(slot, ChildRef::Frame(entry.frame));
        }
        cb.unpin();
        swizzle
    }

    /// [`BufferPool::swizzle_child`] for several slots; returns how many are
    /// swizzled afterwards.
    pub fn swizzle_children(&self, parent: &mut PageGuard<'_>, slots: &[ChildSlot]) -> usize {
        slots
            .iter()
            .filter(|&&slot| self.swizzle_child(parent, slot))
            .count()
    }

    /// True if `page` is reachable through a swizzled pointer.
    pub fn is_swizzled(&self, page: &PageGuard<'_>) -> bool {
        self.frame(page.frame_index()).cb.is_swizzled()
    }

    /// Disk page id behind a slot value. `child` must have been read under
    /// the parent latch.
    pub fn normalize_shpid(&self, child: ChildRef) -> PageId {
        match child {
            ChildRef::Disk(pid) => pid,
            ChildRef::Frame(idx) => self.frame(idx).cb.key().page,
        }
    }

    /// Marks an EX-latched page dirty at the log's current LSN.
    pub fn set_dirty(&self, page: &mut PageGuard<'_>) {
        let lsn = self.log.curr_lsn();
        self.set_page_lsn(page, lsn);
    }

    /// Stamps an update at `lsn` on an EX-latched page.
    pub fn set_page_lsn(&self, page: &mut PageGuard<'_>, lsn: Lsn) {
        assert!(page.is_exclusive(), "page LSN updated without EX latch");
        if lsn > page.header_lsn() {
            page::write_lsn(page.data_mut(), lsn);
        }
        self.frame(page.frame_index()).cb.set_page_lsn(lsn);
    }

    /// Best-effort dirty check for a resident page; never blocks.
    pub fn is_dirty(&self, key: PageKey) -> bool {
        self.table
            .lookup(key)
            .map(|entry| self.frame(entry.frame).is_dirty())
            .unwrap_or(false)
    }

    /// Frame holding `key`, if resident.
    pub fn lookup(&self, key: PageKey) -> Option<FrameIndex> {
        let entry = self.table.lookup(key)?;
        let cb = &self.frame(entry.frame).cb;
        (cb.is_used() && cb.key() == key).then_some(entry.frame)
    }

    /// Pin state of a resident page.
    pub fn pin_state(&self, key: PageKey) -> Option<PinState> {
        self.lookup(key).map(|idx| self.frame(idx).cb.pin_state())
    }

    /// Handshake state of a resident page.
    pub fn flush_state(&self, key: PageKey) -> Option<FlushState> {
        self.lookup(key).map(|idx| self.frame(idx).cb.flush_state())
    }

    /// Orders writes so that `page` reaches the volume only after
    /// `dependency` has. Refuses cycles and a second dependency while the
    /// first is still active.
    pub fn register_write_order_dependency(
        &self,
        page: &PageGuard<'_>,
        dependency: &PageGuard<'_>,
    ) -> bool {
        assert!(page.is_exclusive(), "dependency registered without EX latch");
        let idx = page.frame_index();
        let dep_idx = dependency.frame_index();
        if idx == dep_idx {
            return false;
        }
        let cb = &self.frame(idx).cb;
        let dep_cb = &self.frame(dep_idx).cb;
        if !dep_cb.is_dirty_unlatched() {
            return true;
        }
        let dep_key = dependency.key();
        if let Some(existing) = cb.dependency() {
            if existing.frame == dep_idx && existing.key == dep_key {
                return true;
            }
            if self.dependency_active(existing) {
                return false;
            }
        }
        let mut cursor = dep_cb.dependency();
        let mut steps = 0;
        while let Some(next) = cursor {
            if steps > self.block_count() || !self.dependency_active(next) {
                break;
            }
            if next.frame == idx {
                debug!(frame = idx.get(), dep = dep_idx.get(), "bufferpool.dependency.cycle");
                return false;
            }
            cursor = self.frame(next.frame).cb.dependency();
            steps += 1;
        }
        cb.set_dependency(Dependency {
            frame: dep_idx,
            key: dep_key,
            lsn: dep_cb.rec_lsn(),
        });
        true
    }

    /// True while the target of `dep` still has to be written first.
    pub(crate) fn dependency_active(&self, dep: Dependency) -> bool {
        let Some(frame) = self.frames.get(dep.frame.as_usize()) else {
            return false;
        };
        let cb = &frame.cb;
        if !cb.pin() {
            return false;
        }
        let active = cb.is_used()
            && cb.key() == dep.key
            && cb.is_dirty_unlatched()
            && cb.rec_lsn() <= dep.lsn;
        cb.unpin();
        active
    }

    /// Latch-free scan of every dirty frame, for checkpoints.
    pub fn get_rec_lsn(&self) -> Vec<DirtyPage> {
        self.frame_indices()
            .filter_map(|idx| {
                let cb = &self.frame(idx).cb;
                (cb.is_used() && cb.is_dirty_unlatched()).then(|| DirtyPage {
                    key: cb.key(),
                    rec_lsn: cb.rec_lsn(),
                    page_lsn: cb.page_lsn(),
                })
            })
            .collect()
    }

    /// Smallest `rec_lsn` among dirty frames.
    pub fn min_rec_lsn(&self) -> Option<Lsn> {
        self.get_rec_lsn().into_iter().map(|page| page.rec_lsn).min()
    }

    /// Registers the cleaner woken from the eviction path.
    pub fn register_cleaner(&self, cleaner: Weak<dyn PageCleaner>) {
        *self.cleaner.write() = Some(cleaner);
    }

    /// Wakes the registered cleaner, if any.
    pub fn wakeup_cleaner(&self, block: bool) {
        let cleaner = self.cleaner.read().as_ref().and_then(Weak::upgrade);
        if let Some(cleaner) = cleaner {
            cleaner.wakeup(block);
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::from_counters(&self.counters);
        stats.free_frames = self.free.len() as u64;
        for idx in self.frame_indices() {
            let cb = &self.frame(idx).cb;
            if cb.is_used() {
                stats.used_frames += 1;
                if cb.is_dirty_unlatched() {
                    stats.dirty_frames += 1;
                }
            }
        }
        stats
    }
}
