#![forbid(unsafe_code)]
//! Identifiers, log sequence numbers, errors, and the on-disk page metadata
//! shared by every layer of the pool.

use std::fmt;

pub mod node;
pub mod page;
pub mod slot;

pub use slot::{ChildRef, FrameIndex, SWIZZLED_PID_BIT};

/// Disk page number within a volume.
///
/// The high bit is reserved for the swizzled slot encoding, so legal page
/// ids never exceed [`PageId::MAX`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u32);

impl PageId {
    /// Page number that never names a real page.
    pub const NULL: PageId = PageId(0);
    /// Largest page number that can be stored in a child slot.
    pub const MAX: PageId = PageId(SWIZZLED_PID_BIT - 1);

    /// Returns true for the null page number.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Log sequence number.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The LSN older than every record.
    pub const NULL: Lsn = Lsn(0);

    /// Returns true for [`Lsn::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Store (index) number within a volume.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct StoreId(pub u32);

/// Volume number.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct VolumeId(pub u16);

/// Fully qualified page identity used as the hash index key.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageKey {
    /// Volume holding the page.
    pub vol: VolumeId,
    /// Page number within the volume.
    pub page: PageId,
}

impl PageKey {
    /// Builds a key from its parts.
    pub const fn new(vol: VolumeId, page: PageId) -> Self {
        Self { vol, page }
    }
}

/// Errors surfaced by the buffer pool and its collaborators.
#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    /// Underlying device failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A page image failed validation after a read.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// The caller passed something the pool cannot act on.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The requested volume, store, or page is not registered.
    #[error("not found")]
    NotFound,
    /// A conditional latch attempt found the latch busy.
    #[error("latch would block")]
    WouldBlock,
    /// No free frame and eviction was disabled for the call.
    #[error("buffer pool full")]
    PoolFull,
    /// Eviction gave up after escalating through every urgency level.
    #[error("no evictable frame found")]
    FrameNotFound,
    /// Configuration could not be parsed or failed validation.
    #[error("config: {0}")]
    Config(String),
}

impl PoolError {
    /// True for latch contention under a conditional fix.
    pub fn is_would_block(&self) -> bool {
        matches!(self, PoolError::WouldBlock)
    }

    /// True when retrying the logical operation from scratch may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PoolError::WouldBlock | PoolError::FrameNotFound | PoolError::PoolFull
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PoolError>;

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.vol, self.page)
    }
}
