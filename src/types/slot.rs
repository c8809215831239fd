#![forbid(unsafe_code)]
//! Child slot encoding.
//!
//! A parent page stores each child pointer in a 32-bit slot. A slot holds
//! either the child's disk page id or, once the child is resident and
//! swizzled, its frame index tagged with [`SWIZZLED_PID_BIT`]. Code outside
//! the pool only ever sees the decoded [`ChildRef`].

use std::fmt;

use super::PageId;

/// Tag bit marking a slot that holds a frame index instead of a page id.
pub const SWIZZLED_PID_BIT: u32 = 0x8000_0000;

/// Index of a frame in the pool's frame array. Index 0 is never valid.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct FrameIndex(u32);

impl FrameIndex {
    /// Wraps a raw index. Panics on 0 or on values that collide with the tag bit.
    pub fn new(raw: u32) -> Self {
        assert!(raw != 0, "frame index 0 is reserved");
        assert!(raw & SWIZZLED_PID_BIT == 0, "frame index overflows slot");
        Self(raw)
    }

    /// Returns `None` for the reserved index 0.
    pub fn from_raw(raw: u32) -> Option<Self> {
        (raw != 0 && raw & SWIZZLED_PID_BIT == 0).then_some(Self(raw))
    }

    /// Raw index.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Raw index as an array offset.
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Decoded child pointer.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ChildRef {
    /// The child lives on disk (or is resident but not swizzled).
    Disk(PageId),
    /// The child is resident in the given frame and the slot is swizzled.
    Frame(FrameIndex),
}

impl ChildRef {
    /// Decodes a raw slot value. A zero slot decodes as `Disk(PageId::NULL)`.
    pub fn from_raw(raw: u32) -> Self {
        if raw & SWIZZLED_PID_BIT != 0 {
            ChildRef::Frame(FrameIndex(raw & !SWIZZLED_PID_BIT))
        } else {
            ChildRef::Disk(PageId(raw))
        }
    }

    /// Encodes into the compact slot form.
    pub fn to_raw(self) -> u32 {
        match self {
            ChildRef::Disk(pid) => {
                debug_assert!(pid <= PageId::MAX, "page id collides with swizzle bit");
                pid.0
            }
            ChildRef::Frame(idx) => idx.0 | SWIZZLED_PID_BIT,
        }
    }

    /// True for the swizzled form.
    pub fn is_swizzled(self) -> bool {
        matches!(self, ChildRef::Frame(_))
    }

    /// Disk id when not swizzled.
    pub fn disk(self) -> Option<PageId> {
        match self {
            ChildRef::Disk(pid) => Some(pid),
            ChildRef::Frame(_) => None,
        }
    }

    /// True for an empty slot.
    pub fn is_null(self) -> bool {
        matches!(self, ChildRef::Disk(pid) if pid.is_null())
    }
}

/// True when a raw slot value carries the swizzle tag.
pub fn is_swizzled_raw(raw: u32) -> bool {
    raw & SWIZZLED_PID_BIT != 0
}
