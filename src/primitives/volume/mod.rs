#![forbid(unsafe_code)]
//! Page-granular device access.
//!
//! A volume is a flat array of pages addressed by [`PageId`]; page `n` lives
//! at byte offset `n * page_size`. Both implementations are synchronous and
//! count the pages they move so tests and the stress tool can see how much
//! I/O a workload caused.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{PageId, PoolError, Result};

/// Page I/O counters reported by a volume.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VolumeIoStats {
    /// Pages read.
    pub pages_read: u64,
    /// Pages written.
    pub pages_written: u64,
    /// `read_many_pages` calls.
    pub read_calls: u64,
    /// `write_many_pages` calls.
    pub write_calls: u64,
}

#[derive(Default)]
struct IoCounters {
    pages_read: AtomicU64,
    pages_written: AtomicU64,
    read_calls: AtomicU64,
    write_calls: AtomicU64,
}

impl IoCounters {
    fn record_read(&self, count: usize) {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        self.pages_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_write(&self, count: usize) {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        self.pages_written.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> VolumeIoStats {
        VolumeIoStats {
            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            read_calls: self.read_calls.load(Ordering::Relaxed),
            write_calls: self.write_calls.load(Ordering::Relaxed),
        }
    }
}

/// Synchronous page device consumed by the buffer pool.
pub trait Volume: Send + Sync {
    /// Size of every page on this volume.
    fn page_size(&self) -> usize;
    /// Reads `count` consecutive pages starting at `start` into `dst`.
    fn read_many_pages(&self, start: PageId, dst: &mut [u8], count: usize) -> Result<()>;
    /// Writes `count` consecutive pages starting at `start` from `src`.
    fn write_many_pages(&self, start: PageId, src: &[u8], count: usize) -> Result<()>;
    /// Makes previous writes durable.
    fn sync(&self) -> Result<()>;
    /// Page I/O performed so far.
    fn io_stats(&self) -> VolumeIoStats {
        VolumeIoStats::default()
    }
}

fn check_span(page_size: usize, buf_len: usize, count: usize) -> Result<()> {
    if count == 0 {
        return Err(PoolError::Invalid("page count must be positive"));
    }
    if buf_len != page_size * count {
        return Err(PoolError::Invalid("buffer length does not match page count"));
    }
    Ok(())
}

/// Volume backed by a single file.
pub struct FileVolume {
    io: Arc<dyn FileIo>,
    page_size: usize,
    counters: IoCounters,
}

impl FileVolume {
    /// Opens (or creates) the file at `path`.
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> Result<Self> {
        let io = StdFileIo::open(path)?;
        Ok(Self::with_io(Arc::new(io), page_size))
    }

    /// Wraps an existing [`FileIo`].
    pub fn with_io(io: Arc<dyn FileIo>, page_size: usize) -> Self {
        Self {
            io,
            page_size,
            counters: IoCounters::default(),
        }
    }

    fn offset(&self, pid: PageId) -> u64 {
        pid.0 as u64 * self.page_size as u64
    }

    /// Number of whole pages currently in the file.
    pub fn page_count(&self) -> Result<u64> {
        Ok(self.io.len()? / self.page_size as u64)
    }
}

impl Volume for FileVolume {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_many_pages(&self, start: PageId, dst: &mut [u8], count: usize) -> Result<()> {
        check_span(self.page_size, dst.len(), count)?;
        self.io.read_at(self.offset(start), dst)?;
        self.counters.record_read(count);
        Ok(())
    }

    fn write_many_pages(&self, start: PageId, src: &[u8], count: usize) -> Result<()> {
        check_span(self.page_size, src.len(), count)?;
        self.io.write_at(self.offset(start), src)?;
        self.counters.record_write(count);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    fn io_stats(&self) -> VolumeIoStats {
        self.counters.snapshot()
    }
}

/// In-memory volume. Reads of never-written pages fail like a short file.
pub struct MemVolume {
    page_size: usize,
    bytes: Mutex<Vec<u8>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    counters: IoCounters,
}

impl MemVolume {
    /// Creates an empty volume.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            bytes: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            counters: IoCounters::default(),
        }
    }

    /// Makes every subsequent read fail with an I/O error until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    /// Makes every subsequent write fail with an I/O error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Copy of the stored image of `pid`, if it was ever written.
    pub fn page_image(&self, pid: PageId) -> Option<Vec<u8>> {
        let bytes = self.bytes.lock();
        let start = pid.0 as usize * self.page_size;
        bytes.get(start..start + self.page_size).map(<[u8]>::to_vec)
    }

    /// Overwrites raw bytes of a stored page, bypassing the counters.
    pub fn corrupt(&self, pid: PageId, offset: usize, value: u8) {
        let mut bytes = self.bytes.lock();
        let at = pid.0 as usize * self.page_size + offset;
        if let Some(byte) = bytes.get_mut(at) {
            *byte = value;
        }
    }
}

impl Volume for MemVolume {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn read_many_pages(&self, start: PageId, dst: &mut [u8], count: usize) -> Result<()> {
        check_span(self.page_size, dst.len(), count)?;
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected read failure").into());
        }
        let bytes = self.bytes.lock();
        let begin = start.0 as usize * self.page_size;
        let src = bytes.get(begin..begin + dst.len()).ok_or_else(|| {
            PoolError::from(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of volume",
            ))
        })?;
        dst.copy_from_slice(src);
        self.counters.record_read(count);
        Ok(())
    }

    fn write_many_pages(&self, start: PageId, src: &[u8], count: usize) -> Result<()> {
        check_span(self.page_size, src.len(), count)?;
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into());
        }
        let mut bytes = self.bytes.lock();
        let begin = start.0 as usize * self.page_size;
        let end = begin + src.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[begin..end].copy_from_slice(src);
        self.counters.record_write(count);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn io_stats(&self) -> VolumeIoStats {
        self.counters.snapshot()
    }
}
