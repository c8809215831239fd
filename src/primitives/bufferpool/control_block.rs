use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU32, AtomicU64, Ordering};

use crate::types::{FrameIndex, Lsn, PageId, PageKey, StoreId, VolumeId};

const PIN_EVICTING: i32 = -1;

/// Observable state of a frame's pin count.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinState {
    /// The frame is free or being evicted; treat it as absent.
    Evicting,
    /// Number of current holders.
    Pinned(u32),
}

/// Where a frame stands in the cleaner handshake.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlushState {
    /// The volume holds the latest image.
    Clean,
    /// Updated since the last write; `rec_lsn` is the first such update.
    Dirty {
        /// Recovery LSN.
        rec_lsn: Lsn,
    },
    /// A snapshot up to `lsn` has been taken but its write has not been
    /// confirmed.
    PendingFlush {
        /// Page LSN captured by the snapshot.
        lsn: Lsn,
    },
}

/// A registered write-order dependency.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dependency {
    /// Frame the target lived in at registration.
    pub frame: FrameIndex,
    /// Target page.
    pub key: PageKey,
    /// Target's `rec_lsn` at registration.
    pub lsn: Lsn,
}

/// Per-frame bookkeeping.
///
/// Only `pin_count` (and the reference hints) change without the frame
/// latch; everything else is written by the latch holder or by the single
/// evictor after it won the `0 -> -1` pin transition.
pub struct ControlBlock {
    vol: AtomicU16,
    page: AtomicU32,
    store: AtomicU32,
    pin_count: AtomicI32,
    used: AtomicBool,
    swizzled: AtomicBool,
    page_lsn: AtomicU64,
    persisted_lsn: AtomicU64,
    rec_lsn: AtomicU64,
    next_persisted_lsn: AtomicU64,
    next_rec_lsn: AtomicU64,
    ref_count: AtomicU16,
    ref_count_ex: AtomicU16,
    dependency_idx: AtomicU32,
    dependency_vol: AtomicU16,
    dependency_page: AtomicU32,
    dependency_lsn: AtomicU64,
}

impl ControlBlock {
    /// A free control block.
    pub(crate) fn new() -> Self {
        Self {
            vol: AtomicU16::new(0),
            page: AtomicU32::new(0),
            store: AtomicU32::new(0),
            pin_count: AtomicI32::new(PIN_EVICTING),
            used: AtomicBool::new(false),
            swizzled: AtomicBool::new(false),
            page_lsn: AtomicU64::new(0),
            persisted_lsn: AtomicU64::new(0),
            rec_lsn: AtomicU64::new(0),
            next_persisted_lsn: AtomicU64::new(0),
            next_rec_lsn: AtomicU64::new(0),
            ref_count: AtomicU16::new(0),
            ref_count_ex: AtomicU16::new(0),
            dependency_idx: AtomicU32::new(0),
            dependency_vol: AtomicU16::new(0),
            dependency_page: AtomicU32::new(0),
            dependency_lsn: AtomicU64::new(0),
        }
    }

    /// Takes ownership of a free frame for `key`. The caller ends up
    /// holding one pin; the frame stays invisible to lookups until
    /// [`ControlBlock::publish`].
    pub(crate) fn init(&self, key: PageKey, store: StoreId, page_lsn: Lsn) {
        assert_eq!(
            self.pin_count.load(Ordering::Acquire),
            PIN_EVICTING,
            "frame initialized while not free"
        );
        self.vol.store(key.vol.0, Ordering::Relaxed);
        self.page.store(key.page.0, Ordering::Relaxed);
        self.store.store(store.0, Ordering::Relaxed);
        self.swizzled.store(false, Ordering::Relaxed);
        self.page_lsn.store(page_lsn.0, Ordering::Relaxed);
        self.persisted_lsn.store(page_lsn.0, Ordering::Relaxed);
        self.rec_lsn.store(0, Ordering::Relaxed);
        self.next_persisted_lsn.store(0, Ordering::Relaxed);
        self.next_rec_lsn.store(0, Ordering::Relaxed);
        self.ref_count.store(0, Ordering::Relaxed);
        self.ref_count_ex.store(0, Ordering::Relaxed);
        self.clear_dependency();
        self.pin_count.store(1, Ordering::Release);
    }

    /// Makes an initialized frame visible. Must be the last step of
    /// initialization.
    pub(crate) fn publish(&self) {
        self.used.store(true, Ordering::Release);
    }

    /// Gives back a frame that was initialized but lost the hash insert race.
    /// Waits out concurrent pinners, which back off once they see `used`
    /// is still false.
    pub(crate) fn release_uninstalled(&self) {
        debug_assert!(!self.is_used());
        while self
            .pin_count
            .compare_exchange_weak(1, PIN_EVICTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Page this frame holds.
    pub fn key(&self) -> PageKey {
        PageKey::new(
            VolumeId(self.vol.load(Ordering::Acquire)),
            PageId(self.page.load(Ordering::Acquire)),
        )
    }

    /// Store that owns the page.
    pub fn store(&self) -> StoreId {
        StoreId(self.store.load(Ordering::Acquire))
    }

    /// Increments the pin count unless the frame is being evicted.
    pub(crate) fn pin(&self) -> bool {
        let mut cur = self.pin_count.load(Ordering::Acquire);
        loop {
            if cur < 0 {
                return false;
            }
            match self.pin_count.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    /// Drops one pin.
    pub(crate) fn unpin(&self) {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "unpin below zero (pin count was {prev})");
    }

    /// Raw pin count; `-1` while evicting or free.
    pub fn pin_count(&self) -> i32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Pin count as a [`PinState`].
    pub fn pin_state(&self) -> PinState {
        match self.pin_count() {
            n if n < 0 => PinState::Evicting,
            n => PinState::Pinned(n as u32),
        }
    }

    /// Claims an unpinned frame for eviction.
    pub(crate) fn prepare_for_eviction(&self) -> bool {
        if self
            .pin_count
            .compare_exchange(0, PIN_EVICTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.used.store(false, Ordering::Release);
        true
    }

    /// Undoes [`ControlBlock::prepare_for_eviction`].
    pub(crate) fn cancel_eviction(&self) {
        self.used.store(true, Ordering::Release);
        let prev = self.pin_count.swap(0, Ordering::AcqRel);
        debug_assert_eq!(prev, PIN_EVICTING);
    }

    /// Resets an evicted frame. The pin count stays at `-1`.
    pub(crate) fn clear(&self) {
        debug_assert_eq!(self.pin_count(), PIN_EVICTING);
        self.used.store(false, Ordering::Release);
        self.swizzled.store(false, Ordering::Relaxed);
        self.vol.store(0, Ordering::Relaxed);
        self.page.store(0, Ordering::Relaxed);
        self.store.store(0, Ordering::Relaxed);
        for lsn in [
            &self.page_lsn,
            &self.persisted_lsn,
            &self.rec_lsn,
            &self.next_persisted_lsn,
            &self.next_rec_lsn,
        ] {
            lsn.store(0, Ordering::Relaxed);
        }
        self.ref_count.store(0, Ordering::Relaxed);
        self.ref_count_ex.store(0, Ordering::Relaxed);
        self.clear_dependency();
    }

    /// True while the frame holds a published page.
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    /// True if a parent slot (or the root table) points at this frame
    /// directly.
    pub fn is_swizzled(&self) -> bool {
        self.swizzled.load(Ordering::Acquire)
    }

    pub(crate) fn set_swizzled(&self, swizzled: bool) {
        self.swizzled.store(swizzled, Ordering::Release);
    }

    /// LSN of the last update applied to the frame.
    pub fn page_lsn(&self) -> Lsn {
        Lsn(self.page_lsn.load(Ordering::Acquire))
    }

    /// Highest LSN known to be on the volume.
    pub fn persisted_lsn(&self) -> Lsn {
        Lsn(self.persisted_lsn.load(Ordering::Acquire))
    }

    /// First LSN that dirtied the frame since it was last clean.
    pub fn rec_lsn(&self) -> Lsn {
        Lsn(self.rec_lsn.load(Ordering::Acquire))
    }

    /// Records an update. Caller holds the EX latch.
    pub(crate) fn set_page_lsn(&self, lsn: Lsn) {
        let cur = self.page_lsn.load(Ordering::Acquire);
        if lsn.0 <= cur {
            return;
        }
        if cur <= self.persisted_lsn.load(Ordering::Acquire) {
            self.rec_lsn.store(lsn.0, Ordering::Release);
        }
        self.page_lsn.store(lsn.0, Ordering::Release);
    }

    /// Dirty check without the latch.
    pub fn is_dirty_unlatched(&self) -> bool {
        self.page_lsn.load(Ordering::Acquire) > self.persisted_lsn.load(Ordering::Acquire)
    }

    /// Current handshake state.
    pub fn flush_state(&self) -> FlushState {
        if !self.is_dirty_unlatched() {
            return FlushState::Clean;
        }
        match self.next_persisted_lsn.load(Ordering::Acquire) {
            0 => FlushState::Dirty {
                rec_lsn: self.rec_lsn(),
            },
            lsn => FlushState::PendingFlush { lsn: Lsn(lsn) },
        }
    }

    /// First half of the cleaner handshake: remember what the snapshot
    /// about to be written covers. Caller holds at least the SH latch.
    pub fn mark_persisted_lsn(&self) -> Lsn {
        let lsn = self.page_lsn.load(Ordering::Acquire);
        self.next_rec_lsn.store(lsn, Ordering::Relaxed);
        self.next_persisted_lsn.store(lsn, Ordering::Release);
        Lsn(lsn)
    }

    /// Second half: the snapshot reached the volume.
    pub fn notify_write(&self) {
        let next = self.next_persisted_lsn.swap(0, Ordering::AcqRel);
        if next == 0 {
            return;
        }
        self.persisted_lsn.fetch_max(next, Ordering::AcqRel);
        let next_rec = self.next_rec_lsn.swap(0, Ordering::AcqRel);
        // Updates after the snapshot are all newer than it.
        self.rec_lsn.store(next_rec, Ordering::Release);
    }

    /// Drops a snapshot mark whose write never happened. Returns true if
    /// a mark was pending.
    pub(crate) fn abort_write(&self) -> bool {
        let next = self.next_persisted_lsn.swap(0, Ordering::AcqRel);
        self.next_rec_lsn.store(0, Ordering::Release);
        next != 0
    }

    /// Counts a fix.
    pub(crate) fn hit(&self, exclusive: bool) {
        saturating_inc(&self.ref_count);
        if exclusive {
            saturating_inc(&self.ref_count_ex);
        }
    }

    /// Reference hint.
    pub fn ref_count(&self) -> u16 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Exclusive reference hint.
    pub fn ref_count_ex(&self) -> u16 {
        self.ref_count_ex.load(Ordering::Relaxed)
    }

    /// Lowers the reference hint by `by`, saturating at zero.
    pub(crate) fn decay_refs(&self, by: u16) {
        let _ = self
            .ref_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(by))
            });
    }

    /// Forgets both reference hints.
    pub(crate) fn reset_refs(&self) {
        self.ref_count.store(0, Ordering::Relaxed);
        self.ref_count_ex.store(0, Ordering::Relaxed);
    }

    /// Registered write-order dependency, if any.
    pub fn dependency(&self) -> Option<Dependency> {
        let frame = FrameIndex::from_raw(self.dependency_idx.load(Ordering::Acquire))?;
        Some(Dependency {
            frame,
            key: PageKey::new(
                VolumeId(self.dependency_vol.load(Ordering::Relaxed)),
                PageId(self.dependency_page.load(Ordering::Relaxed)),
            ),
            lsn: Lsn(self.dependency_lsn.load(Ordering::Relaxed)),
        })
    }

    pub(crate) fn set_dependency(&self, dep: Dependency) {
        self.dependency_vol.store(dep.key.vol.0, Ordering::Relaxed);
        self.dependency_page.store(dep.key.page.0, Ordering::Relaxed);
        self.dependency_lsn.store(dep.lsn.0, Ordering::Relaxed);
        self.dependency_idx.store(dep.frame.get(), Ordering::Release);
    }

    pub(crate) fn clear_dependency(&self) {
        self.dependency_idx.store(0, Ordering::Release);
    }
}

fn saturating_inc(counter: &AtomicU16) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        (v < u16::MAX).then(|| v + 1)
    });
}
