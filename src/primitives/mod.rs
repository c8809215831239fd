//! Building blocks of the pool.
//!
//! Includes positioned file I/O, page volumes, the log manager interface,
//! and the buffer pool itself.

/// I/O abstractions and utilities.
///
/// Positioned reads and writes over a file handle.
pub mod io;

/// Page-addressed storage devices.
pub mod volume;

/// Log manager interface and an in-memory log.
pub mod wal;

/// Swizzle-aware buffer pool, eviction, flushing, and the fixed pool.
pub mod bufferpool;
