//! Swizzlepool: a B-tree buffer pool with pointer swizzling.
//!
//! Pages are fixed through [`BufferPool`] and released by dropping the
//! returned [`PageGuard`]. Child pointers in parent pages are rewritten to
//! frame indices while the child is resident, a clock sweeper reclaims
//! clean leaves without blocking, and a [`BackgroundCleaner`] writes dirty
//! frames back through a two-phase handshake.

#![warn(missing_docs)]

pub mod primitives;
pub mod types;

pub use primitives::bufferpool::{
    BackgroundCleaner, BufferPool, FixOptions, FixedPool, FixedPoolOptions, LatchMode,
    PageCleaner, PageGuard, PoolOptions, PoolStats,
};
pub use primitives::volume::{FileVolume, MemVolume, Volume};
pub use primitives::wal::{LogManager, MemLog};
pub use types::{ChildRef, FrameIndex, Lsn, PageId, PageKey, PoolError, Result, StoreId, VolumeId};
