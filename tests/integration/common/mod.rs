#![allow(dead_code)]

use std::sync::{Arc, Once};

use swizzlepool::primitives::bufferpool::{BufferPool, PoolOptions};
use swizzlepool::primitives::volume::Volume;
use swizzlepool::primitives::wal::LogManager;
use swizzlepool::types::node::{self, NodeViewMut, LEAF_LEVEL};
use swizzlepool::types::page;
use swizzlepool::types::{ChildRef, Lsn, PageId, StoreId, VolumeId};
use tracing_subscriber::EnvFilter;

pub const PAGE_SIZE: usize = 4096;
pub const VOL: VolumeId = VolumeId(1);
pub const STORE: StoreId = StoreId(7);
/// Byte past the node pointer area that leaves use as a payload marker.
pub const MARKER_OFFSET: usize = PAGE_SIZE - 8;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("swizzlepool=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// Writes a formatted node whose marker byte holds the low bits of `pid`.
pub fn write_node(volume: &dyn Volume, pid: PageId, level: u16, children: &[PageId]) {
    let mut buf = vec![0u8; volume.page_size()];
    node::format_node(&mut buf, pid, STORE, level).unwrap();
    {
        let mut view = NodeViewMut::new(&mut buf);
        for &child in children {
            view.push_child(ChildRef::Disk(child), Lsn::NULL).unwrap();
        }
    }
    buf[MARKER_OFFSET] = pid.0 as u8;
    page::stamp_crc32(&mut buf);
    volume.write_many_pages(pid, &buf, 1).unwrap();
}

/// Page ids of a three-level tree written by [`build_tree`].
#[derive(Clone, Debug)]
pub struct Tree {
    pub root: PageId,
    pub inner: Vec<PageId>,
    pub leaves: Vec<PageId>,
}

impl Tree {
    /// Leaves below `inner[i]`.
    pub fn leaves_of(&self, i: usize) -> &[PageId] {
        let fanout = self.leaves.len() / self.inner.len();
        &self.leaves[i * fanout..(i + 1) * fanout]
    }
}

/// Root page 1 over `fanout` inner nodes, each over `fanout` leaves. Page
/// ids are assigned breadth first.
pub fn build_tree(volume: &dyn Volume, fanout: u32) -> Tree {
    let root = PageId(1);
    let inner: Vec<PageId> = (0..fanout).map(|i| PageId(2 + i)).collect();
    let first_leaf = 2 + fanout;
    let leaves: Vec<PageId> = (0..fanout * fanout).map(|i| PageId(first_leaf + i)).collect();
    write_node(volume, root, LEAF_LEVEL + 2, &inner);
    for (i, &pid) in inner.iter().enumerate() {
        let fan = fanout as usize;
        write_node(volume, pid, LEAF_LEVEL + 1, &leaves[i * fan..(i + 1) * fan]);
    }
    for &pid in &leaves {
        write_node(volume, pid, LEAF_LEVEL, &[]);
    }
    Tree {
        root,
        inner,
        leaves,
    }
}

/// Root page 1 directly over `count` leaves.
pub fn build_flat_tree(volume: &dyn Volume, count: u32) -> Tree {
    let root = PageId(1);
    let leaves: Vec<PageId> = (0..count).map(|i| PageId(2 + i)).collect();
    write_node(volume, root, LEAF_LEVEL + 1, &leaves);
    for &pid in &leaves {
        write_node(volume, pid, LEAF_LEVEL, &[]);
    }
    Tree {
        root,
        inner: Vec::new(),
        leaves,
    }
}

pub fn options(blocks: usize) -> PoolOptions {
    PoolOptions::default()
        .with_block_count(blocks)
        .with_page_size(PAGE_SIZE as u32)
        .with_evict_retry_sleep_ms(1)
        .with_evict_max_rounds(4)
        .with_cleaner_interval_ms(0)
}

pub fn open_pool(
    options: PoolOptions,
    volume: Arc<dyn Volume>,
    log: Arc<dyn LogManager>,
    root: PageId,
) -> BufferPool {
    init_tracing();
    let pool = BufferPool::new(options, log).unwrap();
    pool.install_volume(VOL, volume, &[(STORE, root)]).unwrap();
    pool
}
