//! Always-resident pool for small metadata regions.
//!
//! The pages are read once at mount and stay put: no hash index, no pins,
//! no eviction. Mutators share the checkpoint lock; [`FixedPool::flush`]
//! takes it exclusively so the images it writes are consistent with each
//! other.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::validate_page_size;
use crate::primitives::volume::Volume;
use crate::types::page::{self, PageHeader, PageTag, DEFAULT_PAGE_SIZE};
use crate::types::{PageId, PoolError, Result, StoreId};

/// Shape of a fixed region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixedPoolOptions {
    /// Page size in bytes.
    pub page_size: u32,
    /// Pages in the region.
    pub page_count: u32,
}

impl Default for FixedPoolOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_count: 8,
        }
    }
}

impl FixedPoolOptions {
    /// Rejects shapes the pool cannot mount.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_size)?;
        if self.page_count == 0 {
            return Err(PoolError::Config("page_count must be positive".into()));
        }
        Ok(())
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(text).map_err(|err| PoolError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| PoolError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }
}

/// Fixed, non-evicting page pool over a contiguous volume region.
pub struct FixedPool {
    volume: Arc<dyn Volume>,
    start: PageId,
    page_size: usize,
    pages: Box<[Mutex<Box<[u8]>>]>,
    dirty: Box<[AtomicBool]>,
    checkpoint: RwLock<()>,
}

/// Access to one fixed page. Holds the shared side of the checkpoint lock.
pub struct FixedPageGuard<'a> {
    pid: PageId,
    page: MutexGuard<'a, Box<[u8]>>,
    dirty: &'a AtomicBool,
    _checkpoint: RwLockReadGuard<'a, ()>,
}

impl FixedPageGuard<'_> {
    /// Page id.
    pub fn page_id(&self) -> PageId {
        self.pid
    }

    /// Page image.
    pub fn data(&self) -> &[u8] {
        &self.page
    }

    /// Mutable page image; flags the page for the next flush.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty.store(true, Ordering::Release);
        &mut self.page
    }
}

/// Writes `count` freshly formatted pages starting at `start`.
pub fn format_region(
    volume: &dyn Volume,
    start: PageId,
    count: usize,
    store: StoreId,
    tag: PageTag,
) -> Result<()> {
    let page_size = volume.page_size();
    let mut buf = vec![0u8; page_size * count];
    for (i, image) in buf.chunks_exact_mut(page_size).enumerate() {
        page::format(image, PageId(start.0 + i as u32), store, tag)?;
        page::stamp_crc32(image);
    }
    volume.write_many_pages(start, &buf, count)?;
    volume.sync()
}

impl FixedPool {
    /// Reads the whole region in one call and validates every page.
    pub fn mount(
        volume: Arc<dyn Volume>,
        start: PageId,
        options: &FixedPoolOptions,
    ) -> Result<Self> {
        options.validate()?;
        let page_size = options.page_size as usize;
        if volume.page_size() != page_size {
            return Err(PoolError::Invalid("volume page size differs from pool"));
        }
        let count = options.page_count as usize;
        let mut buf = vec![0u8; page_size * count];
        volume.read_many_pages(start, &mut buf, count)?;
        let mut pages = Vec::with_capacity(count);
        for (i, image) in buf.chunks_exact(page_size).enumerate() {
            let header = PageHeader::decode(image)?;
            if header.page_id != PageId(start.0 + i as u32) {
                return Err(PoolError::Corruption("page id mismatch"));
            }
            page::verify_crc32(image)?;
            pages.push(Mutex::new(image.to_vec().into_boxed_slice()));
        }
        info!(start = start.0, pages = count, "fixedpool.mount");
        Ok(Self {
            volume,
            start,
            page_size,
            pages: pages.into_boxed_slice(),
            dirty: (0..count).map(|_| AtomicBool::new(false)).collect(),
            checkpoint: RwLock::new(()),
        })
    }

    /// First page of the region.
    pub fn start(&self) -> PageId {
        self.start
    }

    /// Pages in the region.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn slot(&self, pid: PageId) -> Result<usize> {
        pid.0
            .checked_sub(self.start.0)
            .map(|n| n as usize)
            .filter(|&n| n < self.pages.len())
            .ok_or(PoolError::NotFound)
    }

    /// Locks page `pid`. A caller may hold guards on several pages at once.
    pub fn page(&self, pid: PageId) -> Result<FixedPageGuard<'_>> {
        let slot = self.slot(pid)?;
        // Recursive so a second guard never queues behind a waiting flush
        // that is itself waiting on the first guard.
        let checkpoint = self.checkpoint.read_recursive();
        Ok(FixedPageGuard {
            pid,
            page: self.pages[slot].lock(),
            dirty: &self.dirty[slot],
            _checkpoint: checkpoint,
        })
    }

    /// True if `pid` changed since the last flush.
    pub fn is_dirty(&self, pid: PageId) -> bool {
        self.slot(pid)
            .map(|slot| self.dirty[slot].load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Writes the flagged pages, grouped into contiguous runs, and clears
    /// the flags. Returns the number of pages written.
    pub fn flush(&self) -> Result<usize> {
        let _checkpoint = self.checkpoint.write();
        let mut written = 0;
        let mut slot = 0;
        while slot < self.pages.len() {
            if !self.dirty[slot].load(Ordering::Acquire) {
                slot += 1;
                continue;
            }
            let first = slot;
            let mut buf = Vec::new();
            while slot < self.pages.len() && self.dirty[slot].load(Ordering::Acquire) {
                let mut image = self.pages[slot].lock();
                page::stamp_crc32(&mut image);
                buf.extend_from_slice(&image);
                slot += 1;
            }
            let count = slot - first;
            debug_assert_eq!(buf.len(), count * self.page_size);
            self.volume
                .write_many_pages(PageId(self.start.0 + first as u32), &buf, count)?;
            for flag in &self.dirty[first..slot] {
                flag.store(false, Ordering::Release);
            }
            written += count;
        }
        if written > 0 {
            self.volume.sync()?;
            debug!(pages = written, "fixedpool.flush");
        }
        Ok(written)
    }
}
