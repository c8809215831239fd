//! Swizzle-aware buffer pool.
//!
//! Frames live in one fixed array. A fix pins the frame, then latches it;
//! a parent held exclusively has its child slot rewritten to the frame
//! index ("swizzled") so later traversals skip the hash index. The clock
//! sweeper in [`evict`] reclaims unpinned clean leaves, unswizzling the
//! parent slot and raising its end-marker LSN as it goes. Dirty frames are
//! written by the [`flush`] passes, usually driven by a
//! [`BackgroundCleaner`].

mod cleaner;
mod config;
mod control_block;
pub mod evict;
mod fixed;
pub mod flush;
mod frame;
mod freelist;
mod guard;
mod hashtable;
mod pool;
mod stats;

pub use cleaner::{BackgroundCleaner, PageCleaner};
pub use config::PoolOptions;
pub use control_block::{ControlBlock, Dependency, FlushState, PinState};
pub use evict::{EvictUrgency, EvictionReport};
pub use fixed::{format_region, FixedPageGuard, FixedPool, FixedPoolOptions};
pub use flush::FlushReport;
pub use frame::LatchMode;
pub use guard::{FixOptions, PageGuard, RefixPin};
pub use pool::{BufferPool, DirtyPage};
pub use stats::PoolStats;
