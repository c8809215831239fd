#![forbid(unsafe_code)]
//! Log manager contract used by the buffer pool, plus an in-memory log.
//!
//! The pool never formats log records. It asks the log three things: which
//! LSN the next record will receive, how far the log is durable, and to
//! make it durable up to some LSN before a dirty page reaches the volume.
//! Eviction additionally needs one logged system transaction, the update
//! of a parent's end-marker LSN for the child being dropped.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::types::node::ChildSlot;
use crate::types::{Lsn, PageId, PageKey, PoolError, Result};

/// Write-ahead log as seen by the buffer pool.
pub trait LogManager: Send + Sync {
    /// LSN the next appended record will get; greater than every LSN handed
    /// out so far.
    fn curr_lsn(&self) -> Lsn;
    /// Highest LSN known to be on stable storage.
    fn durable_lsn(&self) -> Lsn;
    /// Makes the log durable at least up to `upto`.
    fn flush(&self, upto: Lsn) -> Result<()>;
    /// Logs the end-marker update of `parent`'s `slot` for `child` and
    /// returns the record's LSN. The caller applies the update to the page
    /// while holding the parent EX latch.
    fn log_child_emlsn_update(
        &self,
        parent: PageKey,
        slot: ChildSlot,
        child: PageId,
        emlsn: Lsn,
    ) -> Result<Lsn>;
}

/// Record kept by [`MemLog`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogRecord {
    /// Opaque page update issued by a caller.
    PageUpdate {
        /// Record LSN.
        lsn: Lsn,
        /// Updated page.
        page: PageKey,
    },
    /// Parent end-marker update logged on eviction.
    ChildEmlsn {
        /// Record LSN.
        lsn: Lsn,
        /// Parent page.
        parent: PageKey,
        /// Slot within the parent.
        slot: ChildSlot,
        /// Evicted child.
        child: PageId,
        /// New end-marker LSN.
        emlsn: Lsn,
    },
}

impl LogRecord {
    /// Record LSN.
    pub fn lsn(&self) -> Lsn {
        match self {
            LogRecord::PageUpdate { lsn, .. } | LogRecord::ChildEmlsn { lsn, .. } => *lsn,
        }
    }
}

/// Counters reported by [`MemLog::stats`].
#[derive(Clone, Debug, Default)]
pub struct LogStats {
    /// Records appended.
    pub records: u64,
    /// `flush` calls that advanced the durable LSN.
    pub flushes: u64,
    /// Current durable LSN.
    pub durable_lsn: Lsn,
}

impl fmt::Display for LogStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "records={} flushes={} durable_lsn={}",
            self.records, self.flushes, self.durable_lsn
        )
    }
}

/// In-memory [`LogManager`] that hands out consecutive LSNs starting at 1.
pub struct MemLog {
    next: AtomicU64,
    durable: AtomicU64,
    flushes: AtomicU64,
    fail_emlsn_updates: AtomicBool,
    records: Mutex<Vec<LogRecord>>,
}

impl Default for MemLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            durable: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            fail_emlsn_updates: AtomicBool::new(false),
            records: Mutex::new(Vec::new()),
        }
    }

    fn append(&self, build: impl FnOnce(Lsn) -> LogRecord) -> Lsn {
        let mut records = self.records.lock();
        let lsn = Lsn(self.next.fetch_add(1, Ordering::AcqRel));
        records.push(build(lsn));
        lsn
    }

    /// Appends an opaque update record for `page` and returns its LSN.
    pub fn append_update(&self, page: PageKey) -> Lsn {
        self.append(|lsn| LogRecord::PageUpdate { lsn, page })
    }

    /// Makes subsequent end-marker updates fail, as a full log would.
    pub fn set_fail_emlsn_updates(&self, fail: bool) {
        self.fail_emlsn_updates.store(fail, Ordering::Release);
    }

    /// Snapshot of every record appended so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Counters.
    pub fn stats(&self) -> LogStats {
        LogStats {
            records: self.next.load(Ordering::Acquire) - 1,
            flushes: self.flushes.load(Ordering::Relaxed),
            durable_lsn: self.durable_lsn(),
        }
    }
}

impl LogManager for MemLog {
    fn curr_lsn(&self) -> Lsn {
        Lsn(self.next.load(Ordering::Acquire))
    }

    fn durable_lsn(&self) -> Lsn {
        Lsn(self.durable.load(Ordering::Acquire))
    }

    fn flush(&self, upto: Lsn) -> Result<()> {
        let last = self.next.load(Ordering::Acquire) - 1;
        let target = upto.0.min(last);
        let prev = self.durable.fetch_max(target, Ordering::AcqRel);
        if target > prev {
            self.flushes.fetch_add(1, Ordering::Relaxed);
            debug!(from = prev, to = target, "wal.mem.flush");
        }
        Ok(())
    }

    fn log_child_emlsn_update(
        &self,
        parent: PageKey,
        slot: ChildSlot,
        child: PageId,
        emlsn: Lsn,
    ) -> Result<Lsn> {
        if self.fail_emlsn_updates.load(Ordering::Acquire) {
            return Err(PoolError::Io(io::Error::new(
                io::ErrorKind::Other,
                "log rejected end-marker update",
            )));
        }
        Ok(self.append(|lsn| LogRecord::ChildEmlsn {
            lsn,
            parent,
            slot,
            child,
            emlsn,
        }))
    }
}
