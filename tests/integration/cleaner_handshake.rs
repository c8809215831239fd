//! Background cleaner and eviction cooperating through the write handshake.

#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use swizzlepool::primitives::bufferpool::{
    BackgroundCleaner, FixOptions, FlushState, LatchMode, PageCleaner,
};
use swizzlepool::primitives::volume::{MemVolume, Volume};
use swizzlepool::primitives::wal::{LogManager, MemLog};
use swizzlepool::types::node::ChildSlot;
use swizzlepool::types::{Lsn, PageKey, Result};

fn retry<T>(mut op: impl FnMut() -> Result<T>) -> T {
    loop {
        match op() {
            Ok(value) => return value,
            Err(err) if err.is_retryable() => thread::sleep(Duration::from_millis(1)),
            Err(err) => panic!("unexpected pool error: {err}"),
        }
    }
}

#[test]
fn eviction_waits_for_cleaner_instead_of_failing() {
    let volume = Arc::new(MemVolume::new(PAGE_SIZE));
    let tree = build_tree(&*volume, 3);
    let log = Arc::new(MemLog::new());
    let pool = Arc::new(open_pool(
        options(6).with_evict_retry_sleep_ms(5),
        volume.clone(),
        log.clone(),
        tree.root,
    ));
    let cleaner = BackgroundCleaner::start(&pool);

    // Every leaf is dirtied right after its fix, so frames only come back
    // once the cleaner has written them.
    for (i, _) in tree.inner.iter().enumerate() {
        for (j, &pid) in tree.leaves_of(i).iter().enumerate() {
            let mut leaf = retry(|| {
                let mut root = pool.fix_root(VOL, STORE, LatchMode::Shared, false)?;
                let inner_ref = root.node().child(ChildSlot::Child(i as u16));
                let mut inner = pool.fix_nonroot(&mut root, inner_ref, FixOptions::shared())?;
                drop(root);
                let leaf_ref = inner.node().child(ChildSlot::Child(j as u16));
                pool.fix_nonroot(&mut inner, leaf_ref, FixOptions::exclusive())
            });
            assert_eq!(leaf.page_id(), pid);
            leaf.data_mut()[MARKER_OFFSET] = 0xA0 | pid.0 as u8;
            let lsn = log.append_update(leaf.key());
            pool.set_page_lsn(&mut leaf, lsn);
        }
    }
    pool.wakeup_cleaner(true);
    assert!(pool.get_rec_lsn().is_empty());
    assert!(cleaner.pages_written() >= tree.leaves.len() as u64);
    assert!(log.durable_lsn() >= Lsn(tree.leaves.len() as u64));

    for &pid in &tree.leaves {
        let image = volume.page_image(pid).unwrap();
        assert_eq!(image[MARKER_OFFSET], 0xA0 | pid.0 as u8);
    }
    let stats = pool.stats();
    assert!(stats.evictions >= (tree.leaves.len() - 2) as u64, "{stats}");
    assert!(stats.emlsn_updates >= stats.evictions);
}

#[test]
fn persisted_lsn_never_moves_backwards() {
    let volume = Arc::new(MemVolume::new(PAGE_SIZE));
    let tree = build_flat_tree(&*volume, 1);
    let log = Arc::new(MemLog::new());
    let pool = Arc::new(open_pool(options(4), volume, log.clone(), tree.root));
    let cleaner = BackgroundCleaner::start(&pool);
    let key = PageKey::new(VOL, tree.leaves[0]);

    let mut last = Lsn::NULL;
    for _ in 0..20 {
        {
            let mut leaf = pool.fix_direct(key, FixOptions::exclusive()).unwrap();
            let lsn = log.append_update(key);
            pool.set_page_lsn(&mut leaf, lsn);
        }
        cleaner.wakeup(true);
        let idx = pool.lookup(key).unwrap();
        let cb = pool.control_block(idx);
        assert!(cb.persisted_lsn() >= last);
        assert!(cb.persisted_lsn() <= cb.page_lsn());
        last = cb.persisted_lsn();
        assert_eq!(pool.flush_state(key), Some(FlushState::Clean));
    }
    assert!(cleaner.passes() >= 20);
}

#[test]
fn latched_page_is_retried_on_a_later_pass() {
    let volume = Arc::new(MemVolume::new(PAGE_SIZE));
    let tree = build_flat_tree(&*volume, 2);
    let log = Arc::new(MemLog::new());
    let pool = Arc::new(open_pool(options(8), volume, log.clone(), tree.root));
    let cleaner = BackgroundCleaner::start(&pool);
    let key = PageKey::new(VOL, tree.leaves[1]);

    let mut leaf = pool.fix_direct(key, FixOptions::exclusive()).unwrap();
    let lsn = log.append_update(key);
    pool.set_page_lsn(&mut leaf, lsn);
    cleaner.wakeup(true);
    // Still latched by us, so the pass had to skip it.
    assert!(pool.is_dirty(key));
    drop(leaf);

    cleaner.wakeup(true);
    assert!(!pool.is_dirty(key));
}
