#![forbid(unsafe_code)]
//! Pointer view of a B-tree node.
//!
//! The pool never interprets keys or records. It only needs the node level,
//! the child pointer slots with their end-marker LSNs, and the foster
//! (side) pointer. Those live right after the page header:
//!
//! ```text
//! 32..34  level (1 = leaf)
//! 34..36  child slot count
//! 36..40  reserved
//! 40..44  foster slot
//! 48..56  foster end-marker LSN
//! 56..    child slots, 16 bytes each: slot value (4), pad (4), EMLSN (8)
//! ```

use core::convert::TryInto;
use core::ops::Range;

use super::page::{self, PageTag, PAGE_HDR_LEN};
use super::{ChildRef, Lsn, PageId, PoolError, Result, StoreId};

const LEVEL: Range<usize> = PAGE_HDR_LEN..PAGE_HDR_LEN + 2;
const CHILD_COUNT: Range<usize> = PAGE_HDR_LEN + 2..PAGE_HDR_LEN + 4;
const FOSTER: usize = PAGE_HDR_LEN + 8;
const FOSTER_EMLSN: usize = PAGE_HDR_LEN + 16;
const SLOTS_START: usize = PAGE_HDR_LEN + 24;
const SLOT_LEN: usize = 16;

/// Level value of a leaf node.
pub const LEAF_LEVEL: u16 = 1;

/// Position of a child pointer within a node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChildSlot {
    /// The foster (side) pointer.
    Foster,
    /// The n-th regular child pointer.
    Child(u16),
}

fn slot_offsets(slot: ChildSlot) -> (usize, usize) {
    match slot {
        ChildSlot::Foster => (FOSTER, FOSTER_EMLSN),
        ChildSlot::Child(n) => {
            let base = SLOTS_START + n as usize * SLOT_LEN;
            (base, base + 8)
        }
    }
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(buf[at..at + 4].try_into().unwrap())
}

fn get_u64(buf: &[u8], at: usize) -> u64 {
    u64::from_be_bytes(buf[at..at + 8].try_into().unwrap())
}

/// Number of child slots a page of `page_len` bytes can hold.
pub fn slot_capacity(page_len: usize) -> usize {
    page_len.saturating_sub(SLOTS_START) / SLOT_LEN
}

/// Formats `buf` as an empty B-tree node at `level`.
pub fn format_node(buf: &mut [u8], page_id: PageId, store: StoreId, level: u16) -> Result<()> {
    page::format(buf, page_id, store, PageTag::BTree)?;
    NodeViewMut::new(buf).format(level);
    Ok(())
}

/// Read-only view over a B-tree page image.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    buf: &'a [u8],
}

impl<'a> NodeView<'a> {
    /// Wraps a full page image.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Node level; leaves are level 1.
    pub fn level(&self) -> u16 {
        u16::from_be_bytes(self.buf[LEVEL].try_into().unwrap())
    }

    /// True for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        self.level() <= LEAF_LEVEL
    }

    /// Number of regular child slots.
    pub fn child_count(&self) -> u16 {
        u16::from_be_bytes(self.buf[CHILD_COUNT].try_into().unwrap())
    }

    /// Foster pointer, if any.
    pub fn foster(&self) -> Option<ChildRef> {
        let child = ChildRef::from_raw(get_u32(self.buf, FOSTER));
        (!child.is_null()).then_some(child)
    }

    /// Child pointer stored in `slot`.
    pub fn child(&self, slot: ChildSlot) -> ChildRef {
        self.check(slot);
        ChildRef::from_raw(get_u32(self.buf, slot_offsets(slot).0))
    }

    /// End-marker LSN stored for `slot`.
    pub fn emlsn(&self, slot: ChildSlot) -> Lsn {
        self.check(slot);
        Lsn(get_u64(self.buf, slot_offsets(slot).1))
    }

    /// Every occupied slot, regular children first.
    pub fn slots(&self) -> impl Iterator<Item = ChildSlot> + 'a {
        let foster = self.foster().map(|_| ChildSlot::Foster);
        (0..self.child_count()).map(ChildSlot::Child).chain(foster)
    }

    /// Slot holding exactly `target`, in either form.
    pub fn find_child(&self, target: ChildRef) -> Option<ChildSlot> {
        let view = *self;
        self.slots().find(|&slot| view.child(slot) == target)
    }

    /// True if any slot is in swizzled form.
    pub fn has_swizzled_child(&self) -> bool {
        let view = *self;
        self.slots().any(|slot| view.child(slot).is_swizzled())
    }

    /// Checks an image just read from disk: the slot array fits the page
    /// and no slot is in swizzled form, since frame numbers never reach the
    /// volume.
    pub fn validate_stored(&self) -> Result<()> {
        if self.child_count() as usize > slot_capacity(self.buf.len()) {
            return Err(PoolError::Corruption("child slot count exceeds page"));
        }
        if self.has_swizzled_child() {
            return Err(PoolError::Corruption("swizzled pointer in stored page"));
        }
        Ok(())
    }

    fn check(&self, slot: ChildSlot) {
        if let ChildSlot::Child(n) = slot {
            assert!(
                n < self.child_count(),
                "child slot {n} out of range ({})",
                self.child_count()
            );
        }
    }
}

/// Mutable view over a B-tree page image.
pub struct NodeViewMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> NodeViewMut<'a> {
    /// Wraps a full page image.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    /// Read-only view of the same image.
    pub fn view(&self) -> NodeView<'_> {
        NodeView::new(self.buf)
    }

    /// Resets the node area to an empty node at `level`.
    pub fn format(&mut self, level: u16) {
        self.buf[PAGE_HDR_LEN..SLOTS_START].fill(0);
        self.buf[LEVEL].copy_from_slice(&level.to_be_bytes());
    }

    /// Appends a child slot.
    pub fn push_child(&mut self, child: ChildRef, emlsn: Lsn) -> Result<ChildSlot> {
        let count = self.view().child_count();
        if count as usize >= slot_capacity(self.buf.len()) {
            return Err(PoolError::Invalid("node has no free child slot"));
        }
        self.buf[CHILD_COUNT].copy_from_slice(&(count + 1).to_be_bytes());
        let slot = ChildSlot::Child(count);
        self.set_child(slot, child);
        self.set_emlsn(slot, emlsn);
        Ok(slot)
    }

    /// Overwrites the pointer in `slot`.
    pub fn set_child(&mut self, slot: ChildSlot, child: ChildRef) {
        self.view().check(slot);
        let at = slot_offsets(slot).0;
        self.buf[at..at + 4].copy_from_slice(&child.to_raw().to_be_bytes());
    }

    /// Overwrites the end-marker LSN of `slot`.
    pub fn set_emlsn(&mut self, slot: ChildSlot, lsn: Lsn) {
        self.view().check(slot);
        let at = slot_offsets(slot).1;
        self.buf[at..at + 8].copy_from_slice(&lsn.0.to_be_bytes());
    }

    /// Installs or clears the foster pointer.
    pub fn set_foster(&mut self, foster: Option<(ChildRef, Lsn)>) {
        let (child, emlsn) = foster.unwrap_or((ChildRef::from_raw(0), Lsn::NULL));
        self.buf[FOSTER..FOSTER + 4].copy_from_slice(&child.to_raw().to_be_bytes());
        self.buf[FOSTER_EMLSN..FOSTER_EMLSN + 8].copy_from_slice(&emlsn.0.to_be_bytes());
    }
}
