//! Buffer pool over file volumes, configured from TOML.

#![allow(missing_docs)]

mod common;

use std::fs;
use std::sync::Arc;

use common::*;
use swizzlepool::primitives::bufferpool::{BufferPool, FixOptions, LatchMode, PoolOptions};
use swizzlepool::primitives::volume::{FileVolume, Volume};
use swizzlepool::primitives::wal::MemLog;
use swizzlepool::types::node::ChildSlot;
use swizzlepool::types::{PageKey, PoolError, VolumeId};
use tempfile::tempdir;

#[test]
fn options_file_drives_the_pool() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("pool.toml");
    fs::write(
        &config,
        "block_count = 8\npage_size = 4096\nswizzling = false\nevict_retry_sleep_ms = 1\n",
    )
    .unwrap();
    let options = PoolOptions::load(&config).unwrap();
    assert_eq!(options.block_count, 8);
    assert!(!options.swizzling);

    let volume: Arc<dyn Volume> =
        Arc::new(FileVolume::open(dir.path().join("tree.vol"), PAGE_SIZE).unwrap());
    let tree = build_tree(&*volume, 3);
    let pool = open_pool(options, volume, Arc::new(MemLog::new()), tree.root);
    assert!(!pool.swizzling_enabled());

    // More leaves than frames: every leaf is read, most of them evicted.
    for (i, _) in tree.inner.iter().enumerate() {
        for (j, &pid) in tree.leaves_of(i).iter().enumerate() {
            let mut root = pool.fix_root(VOL, STORE, LatchMode::Shared, false).unwrap();
            let inner_ref = root.node().child(ChildSlot::Child(i as u16));
            let mut inner = pool
                .fix_nonroot(&mut root, inner_ref, FixOptions::shared())
                .unwrap();
            drop(root);
            let leaf_ref = inner.node().child(ChildSlot::Child(j as u16));
            let leaf = pool
                .fix_nonroot(&mut inner, leaf_ref, FixOptions::shared())
                .unwrap();
            assert_eq!(leaf.data()[MARKER_OFFSET], pid.0 as u8);
        }
    }
    let stats = pool.stats();
    assert_eq!(stats.swizzled_hits, 0);
    assert!(stats.evictions > 0, "{stats}");
    assert!(stats.hit_ratio() > 0.0);
}

#[test]
fn dirty_pages_persist_across_pools() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.vol");
    let tree = {
        let volume = FileVolume::open(&path, PAGE_SIZE).unwrap();
        build_flat_tree(&volume, 4)
    };

    {
        let volume: Arc<dyn Volume> = Arc::new(FileVolume::open(&path, PAGE_SIZE).unwrap());
        let log = Arc::new(MemLog::new());
        let pool = open_pool(options(8), volume, log.clone(), tree.root);
        for &pid in &tree.leaves {
            let key = PageKey::new(VOL, pid);
            let mut leaf = pool.fix_direct(key, FixOptions::exclusive()).unwrap();
            leaf.data_mut()[MARKER_OFFSET] = 0xF0 | pid.0 as u8;
            let lsn = log.append_update(key);
            pool.set_page_lsn(&mut leaf, lsn);
        }
        let report = pool.force_volume(VOL).unwrap();
        assert_eq!(report.pages_written, tree.leaves.len());
        assert_eq!(report.write_calls, 1);
        pool.uninstall_volume(VOL).unwrap();
        assert_eq!(pool.stats().used_frames, 0);
        assert!(matches!(pool.force_volume(VOL), Err(PoolError::NotFound)));
    }

    let volume: Arc<dyn Volume> = Arc::new(FileVolume::open(&path, PAGE_SIZE).unwrap());
    let pool = open_pool(options(8), volume, Arc::new(MemLog::new()), tree.root);
    for &pid in &tree.leaves {
        let leaf = pool
            .fix_direct(PageKey::new(VOL, pid), FixOptions::shared())
            .unwrap();
        assert_eq!(leaf.data()[MARKER_OFFSET], 0xF0 | pid.0 as u8);
        assert!(leaf.header_lsn() > swizzlepool::types::Lsn::NULL);
    }
}

#[test]
fn install_rejects_mismatched_volumes() {
    let dir = tempdir().unwrap();
    let pool = BufferPool::new(options(4), Arc::new(MemLog::new())).unwrap();
    let small: Arc<dyn Volume> =
        Arc::new(FileVolume::open(dir.path().join("a.vol"), PAGE_SIZE * 2).unwrap());
    assert!(matches!(
        pool.install_volume(VolumeId(3), small, &[]),
        Err(PoolError::Invalid(_))
    ));

    // A root that was never written cannot be loaded, and the failed
    // install leaves nothing behind.
    let empty: Arc<dyn Volume> =
        Arc::new(FileVolume::open(dir.path().join("b.vol"), PAGE_SIZE).unwrap());
    assert!(pool
        .install_volume(VolumeId(3), empty.clone(), &[(STORE, swizzlepool::types::PageId(1))])
        .is_err());
    assert_eq!(pool.root_page_id(VolumeId(3), STORE), None);
    pool.install_volume(VolumeId(3), empty, &[]).unwrap();
}
