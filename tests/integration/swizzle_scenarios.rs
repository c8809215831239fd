//! End-to-end fix, swizzle and eviction scenarios on a small pool.

#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::*;
use swizzlepool::primitives::bufferpool::{
    BufferPool, EvictUrgency, FixOptions, FlushState, LatchMode, PinState,
};
use swizzlepool::primitives::volume::{MemVolume, Volume};
use swizzlepool::primitives::wal::{LogRecord, MemLog};
use swizzlepool::types::node::ChildSlot;
use swizzlepool::types::{ChildRef, Lsn, PageId, PageKey, PoolError, StoreId};

fn flat_pool(blocks: usize, leaves: u32) -> (BufferPool, Arc<MemVolume>, Arc<MemLog>, Vec<PageId>) {
    let volume = Arc::new(MemVolume::new(PAGE_SIZE));
    let tree = build_flat_tree(&*volume, leaves);
    let log = Arc::new(MemLog::new());
    let pool = open_pool(options(blocks), volume.clone(), log.clone(), tree.root);
    (pool, volume, log, tree.leaves)
}

#[test]
fn scenario_a_eviction_unswizzles_and_raises_emlsn() {
    let (pool, _, log, leaves) = flat_pool(8, 2);
    let slot = ChildSlot::Child(0);

    let root = pool.fix_root(VOL, STORE, LatchMode::Shared, false).unwrap();
    assert_eq!(root.pin_count(), 1);
    let mut shared_root = root;
    let child_ref = shared_root.node().child(slot);
    let mut child = pool
        .fix_nonroot(&mut shared_root, child_ref, FixOptions::exclusive())
        .unwrap();
    assert_eq!(child.pin_count(), 1);
    assert!(!pool.is_swizzled(&child));
    drop(shared_root);

    let mut root = pool
        .fix_root(VOL, STORE, LatchMode::Exclusive, false)
        .unwrap();
    assert!(pool.swizzle_child(&mut root, slot));
    assert!(pool.is_swizzled(&child));
    let swizzled = root.node().child(slot);
    assert_eq!(swizzled, ChildRef::Frame(child.frame_index()));
    assert_eq!(pool.normalize_shpid(swizzled), leaves[0]);
    drop(root);

    let lsn = log.append_update(child.key());
    pool.set_page_lsn(&mut child, lsn);
    let child_lsn = child.page_lsn();
    let key = child.key();
    drop(child);
    assert_eq!(pool.pin_state(key), Some(PinState::Pinned(0)));

    pool.force_all().unwrap();
    let report = pool.evict_blocks(EvictUrgency::Complete, 1).unwrap();
    assert_eq!(report.evicted, 1);
    assert!(pool.lookup(key).is_none());

    let root = pool.fix_root(VOL, STORE, LatchMode::Shared, false).unwrap();
    assert_eq!(root.node().child(slot), ChildRef::Disk(leaves[0]));
    assert!(root.node().emlsn(slot) >= child_lsn);
    assert!(log
        .records()
        .iter()
        .any(|r| matches!(r, LogRecord::ChildEmlsn { child, .. } if *child == leaves[0])));
}

#[test]
fn scenario_b_pinned_frame_survives_complete_sweep() {
    let (pool, _, _, leaves) = flat_pool(8, 2);
    let key = PageKey::new(VOL, leaves[1]);
    let pin = {
        let mut root = pool.fix_root(VOL, STORE, LatchMode::Shared, false).unwrap();
        let child_ref = root.node().child(ChildSlot::Child(1));
        let child = pool
            .fix_nonroot(&mut root, child_ref, FixOptions::shared())
            .unwrap();
        pool.pin_for_refix(&child)
    };
    assert_eq!(pool.pin_state(key), Some(PinState::Pinned(1)));

    let report = pool.evict_blocks(EvictUrgency::Complete, 8).unwrap();
    assert_eq!(report.evicted, 0);
    assert!(pool.lookup(key).is_some());

    pool.unpin_for_refix(pin);
    let report = pool.evict_blocks(EvictUrgency::Complete, 8).unwrap();
    assert_eq!(report.evicted, 1);
    assert!(pool.lookup(key).is_none());
    assert_eq!(pool.stats().evictions, 1);
}

#[test]
fn scenario_c_capacity_errors() {
    let (pool, _, _, leaves) = flat_pool(2, 2);
    let a_key = PageKey::new(VOL, leaves[0]);
    let b_key = PageKey::new(VOL, leaves[1]);

    let a = {
        let mut root = pool.fix_root(VOL, STORE, LatchMode::Shared, false).unwrap();
        let child_ref = root.node().child(ChildSlot::Child(0));
        pool.fix_nonroot(&mut root, child_ref, FixOptions::shared())
            .unwrap()
    };
    assert_eq!(pool.stats().free_frames, 0);

    let err = pool
        .fix_direct(b_key, FixOptions::shared().evict(false))
        .unwrap_err();
    assert!(matches!(err, PoolError::PoolFull));

    let err = pool.fix_direct(b_key, FixOptions::shared()).unwrap_err();
    assert!(matches!(err, PoolError::FrameNotFound));
    assert!(err.is_retryable());

    drop(a);
    let b = pool.fix_direct(b_key, FixOptions::shared()).unwrap();
    assert_eq!(b.page_id(), leaves[1]);
    assert!(pool.lookup(a_key).is_none());
}

#[test]
fn scenario_d_handshake_states() {
    let (pool, _, log, leaves) = flat_pool(8, 1);
    let key = PageKey::new(VOL, leaves[0]);
    let mut page = pool.fix_direct(key, FixOptions::exclusive()).unwrap();
    assert_eq!(pool.flush_state(key), Some(FlushState::Clean));
    let lsn = log.append_update(key);
    pool.set_page_lsn(&mut page, lsn);
    let idx = page.frame_index();
    drop(page);

    let cb = pool.control_block(idx);
    assert!(pool.is_dirty(key));
    assert_eq!(pool.flush_state(key), Some(FlushState::Dirty { rec_lsn: lsn }));
    assert_eq!(cb.mark_persisted_lsn(), lsn);
    assert!(pool.is_dirty(key));
    cb.notify_write();
    assert!(!pool.is_dirty(key));
    assert_eq!(pool.flush_state(key), Some(FlushState::Clean));
    assert_eq!(cb.persisted_lsn(), cb.page_lsn());
}

#[test]
fn swizzling_disabled_keeps_disk_ids() {
    let volume = Arc::new(MemVolume::new(PAGE_SIZE));
    let tree = build_flat_tree(&*volume, 3);
    let pool = open_pool(
        options(8).with_swizzling(false),
        volume,
        Arc::new(MemLog::new()),
        tree.root,
    );
    let mut root = pool
        .fix_root(VOL, STORE, LatchMode::Exclusive, false)
        .unwrap();
    for n in 0..3 {
        let child_ref = root.node().child(ChildSlot::Child(n));
        let child = pool
            .fix_nonroot(&mut root, child_ref, FixOptions::shared())
            .unwrap();
        assert!(!pool.is_swizzled(&child));
    }
    assert!(!root.node().has_swizzled_child());
    assert!(!pool.swizzle_child(&mut root, ChildSlot::Child(0)));
    assert_eq!(pool.stats().swizzled_hits, 0);
}

#[test]
#[should_panic(expected = "exclusive parent latch")]
fn swizzle_under_shared_parent_panics() {
    let (pool, _, _, _) = flat_pool(8, 1);
    let mut root = pool.fix_root(VOL, STORE, LatchMode::Shared, false).unwrap();
    pool.swizzle_child(&mut root, ChildSlot::Child(0));
}

#[test]
fn inner_nodes_are_evicted_only_when_enabled() {
    for enabled in [false, true] {
        let volume = Arc::new(MemVolume::new(PAGE_SIZE));
        let tree = build_tree(&*volume, 2);
        let pool = open_pool(
            options(16).with_evict_inner_nodes(enabled),
            volume,
            Arc::new(MemLog::new()),
            tree.root,
        );
        {
            let mut root = pool
                .fix_root(VOL, STORE, LatchMode::Exclusive, false)
                .unwrap();
            let inner_ref = root.node().child(ChildSlot::Child(0));
            let inner = pool
                .fix_nonroot(&mut root, inner_ref, FixOptions::shared())
                .unwrap();
            assert!(!inner.node().is_leaf());
        }
        let report = pool.evict_blocks(EvictUrgency::Complete, 4).unwrap();
        let inner_key = PageKey::new(VOL, tree.inner[0]);
        if enabled {
            assert_eq!(report.evicted, 1);
            assert!(pool.lookup(inner_key).is_none());
        } else {
            assert_eq!(report.evicted, 0);
            assert!(pool.lookup(inner_key).is_some());
            assert!(pool.stats().skipped_not_leaf > 0);
        }
    }
}

#[test]
fn inner_node_with_swizzled_child_stays() {
    let volume = Arc::new(MemVolume::new(PAGE_SIZE));
    let tree = build_tree(&*volume, 2);
    let pool = open_pool(
        options(16).with_evict_inner_nodes(true),
        volume,
        Arc::new(MemLog::new()),
        tree.root,
    );
    let leaf_pin = {
        let mut root = pool
            .fix_root(VOL, STORE, LatchMode::Exclusive, false)
            .unwrap();
        let inner_ref = root.node().child(ChildSlot::Child(1));
        let mut inner = pool
            .fix_nonroot(&mut root, inner_ref, FixOptions::exclusive())
            .unwrap();
        let leaf_ref = inner.node().child(ChildSlot::Child(0));
        let leaf = pool
            .fix_nonroot(&mut inner, leaf_ref, FixOptions::shared())
            .unwrap();
        assert!(pool.is_swizzled(&leaf));
        pool.pin_for_refix(&leaf)
    };
    let report = pool.evict_blocks(EvictUrgency::Complete, 4).unwrap();
    assert_eq!(report.evicted, 0);
    assert!(pool.lookup(PageKey::new(VOL, tree.inner[1])).is_some());

    drop(leaf_pin);
    // Leaf goes first, which leaves the inner node without swizzled children.
    let report = pool.evict_blocks(EvictUrgency::Complete, 4).unwrap();
    assert_eq!(report.evicted, 2);
}

#[test]
fn corrupt_leaf_is_never_served() {
    let (pool, volume, _, leaves) = flat_pool(4, 2);
    volume.corrupt(leaves[1], MARKER_OFFSET, 0xEE);
    let free = pool.stats().free_frames;
    let mut root = pool.fix_root(VOL, STORE, LatchMode::Exclusive, false).unwrap();
    let child_ref = root.node().child(ChildSlot::Child(1));
    let err = pool
        .fix_nonroot(&mut root, child_ref, FixOptions::shared())
        .unwrap_err();
    assert!(matches!(err, PoolError::Corruption(_)));
    assert_eq!(root.node().child(ChildSlot::Child(1)), ChildRef::Disk(leaves[1]));
    drop(root);
    assert_eq!(pool.stats().free_frames, free);
    assert!(pool.lookup(PageKey::new(VOL, leaves[1])).is_none());
}

#[test]
fn virgin_root_and_children_reach_the_volume() {
    init_tracing();
    let volume = Arc::new(MemVolume::new(PAGE_SIZE));
    let log = Arc::new(MemLog::new());
    let pool = BufferPool::new(options(8), log.clone()).unwrap();
    pool.install_volume(VOL, volume.clone(), &[]).unwrap();

    let store = StoreId(42);
    {
        let mut root = pool.fix_virgin_root(VOL, store, PageId(10)).unwrap();
        assert!(root.is_exclusive());
        assert!(pool.is_swizzled(&root));
        let slot = root
            .node_mut()
            .push_child(ChildRef::Disk(PageId(11)), Lsn::NULL)
            .unwrap();
        let child_ref = root.node().child(slot);
        let mut leaf = pool
            .fix_nonroot(&mut root, child_ref, FixOptions::exclusive().virgin(true))
            .unwrap();
        leaf.data_mut()[MARKER_OFFSET] = 11;
        pool.set_dirty(&mut leaf);
        drop(leaf);
        pool.set_dirty(&mut root);
    }
    assert!(matches!(
        pool.fix_virgin_root(VOL, store, PageId(12)),
        Err(PoolError::Invalid(_))
    ));
    assert_eq!(pool.root_page_id(VOL, store), Some(PageId(10)));
    assert_eq!(pool.get_rec_lsn().len(), 2);

    let report = pool.force_volume(VOL).unwrap();
    assert_eq!(report.pages_written, 2);
    // Pages 10 and 11 are adjacent.
    assert_eq!(report.write_calls, 1);
    assert!(pool.min_rec_lsn().is_none());

    let image = volume.page_image(PageId(11)).unwrap();
    assert_eq!(image[MARKER_OFFSET], 11);
    let root_image = volume.page_image(PageId(10)).unwrap();
    assert_eq!(
        swizzlepool::types::node::NodeView::new(&root_image).child(ChildSlot::Child(0)),
        ChildRef::Disk(PageId(11))
    );
    assert_eq!(volume.io_stats().pages_written, 2);
}
