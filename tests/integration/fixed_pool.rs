//! Fixed small-page pool over a file volume.

#![allow(missing_docs)]

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{init_tracing, PAGE_SIZE};
use swizzlepool::primitives::bufferpool::{format_region, FixedPool, FixedPoolOptions};
use swizzlepool::primitives::volume::{FileVolume, Volume};
use swizzlepool::types::page::PageTag;
use swizzlepool::types::{PageId, PoolError, StoreId};
use tempfile::tempdir;

const START: PageId = PageId(1);
const COUNT: u32 = 6;

fn options() -> FixedPoolOptions {
    FixedPoolOptions {
        page_size: PAGE_SIZE as u32,
        page_count: COUNT,
    }
}

#[test]
fn changes_survive_remount() {
    init_tracing();
    let dir = tempdir().unwrap();
    let path = dir.path().join("fixed.vol");
    {
        let volume = FileVolume::open(&path, PAGE_SIZE).unwrap();
        format_region(&volume, START, COUNT as usize, StoreId(0), PageTag::StoreNode).unwrap();
    }

    {
        let volume: Arc<dyn Volume> = Arc::new(FileVolume::open(&path, PAGE_SIZE).unwrap());
        let pool = FixedPool::mount(volume.clone(), START, &options()).unwrap();
        assert_eq!(volume.io_stats().read_calls, 1);
        assert_eq!(volume.io_stats().pages_read, COUNT as u64);
        pool.page(PageId(2)).unwrap().data_mut()[100..104].copy_from_slice(b"root");
        pool.page(PageId(6)).unwrap().data_mut()[100] = 6;
        assert!(pool.is_dirty(PageId(2)));
        assert!(!pool.is_dirty(PageId(3)));
        assert_eq!(pool.flush().unwrap(), 2);
        assert_eq!(volume.io_stats().write_calls, 2);
    }

    let volume: Arc<dyn Volume> = Arc::new(FileVolume::open(&path, PAGE_SIZE).unwrap());
    let pool = FixedPool::mount(volume, START, &options()).unwrap();
    assert_eq!(&pool.page(PageId(2)).unwrap().data()[100..104], b"root");
    assert_eq!(pool.page(PageId(6)).unwrap().data()[100], 6);
    assert!(matches!(pool.page(PageId(7)), Err(PoolError::NotFound)));
}

#[test]
fn concurrent_mutators_and_flushes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fixed.vol");
    let volume: Arc<dyn Volume> = Arc::new(FileVolume::open(&path, PAGE_SIZE).unwrap());
    format_region(&*volume, START, COUNT as usize, StoreId(0), PageTag::Alloc).unwrap();
    let pool = Arc::new(FixedPool::mount(volume.clone(), START, &options()).unwrap());

    const ROUNDS: u64 = 200;
    let barrier = Arc::new(Barrier::new(COUNT as usize + 1));
    let mut handles = Vec::new();
    for n in 0..COUNT {
        let pool = Arc::clone(&pool);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            let pid = PageId(START.0 + n);
            barrier.wait();
            for _ in 0..ROUNDS {
                let mut page = pool.page(pid).unwrap();
                let at = PAGE_SIZE - 8;
                let value = u64::from_be_bytes(page.data()[at..].try_into().unwrap());
                page.data_mut()[at..].copy_from_slice(&(value + 1).to_be_bytes());
            }
        }));
    }
    let flusher = {
        let pool = Arc::clone(&pool);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            (0..20).map(|_| pool.flush().unwrap()).sum::<usize>()
        })
    };
    for handle in handles {
        handle.join().unwrap();
    }
    flusher.join().unwrap();
    pool.flush().unwrap();
    drop(pool);

    let pool = FixedPool::mount(volume, START, &options()).unwrap();
    for n in 0..COUNT {
        let page = pool.page(PageId(START.0 + n)).unwrap();
        let value = u64::from_be_bytes(page.data()[PAGE_SIZE - 8..].try_into().unwrap());
        assert_eq!(value, ROUNDS);
    }
}

#[test]
fn mount_rejects_wrong_region() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fixed.vol");
    let volume: Arc<dyn Volume> = Arc::new(FileVolume::open(&path, PAGE_SIZE).unwrap());
    format_region(&*volume, START, COUNT as usize, StoreId(0), PageTag::Alloc).unwrap();
    // Off by one page: ids no longer line up, and the last page is missing.
    assert!(FixedPool::mount(volume.clone(), PageId(0), &options()).is_err());
    assert!(matches!(
        FixedPool::mount(volume.clone(), PageId(2), &options()),
        Err(PoolError::Corruption(_)) | Err(PoolError::Io(_))
    ));
    let bad = FixedPoolOptions {
        page_size: 4096,
        page_count: 0,
    };
    assert!(matches!(
        FixedPool::mount(volume, START, &bad),
        Err(PoolError::Config(_))
    ));
}
