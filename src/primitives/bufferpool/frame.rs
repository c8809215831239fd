use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::control_block::ControlBlock;

/// Latch mode requested by a fix.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum LatchMode {
    /// Readers share the frame.
    #[default]
    Shared,
    /// Single writer.
    Exclusive,
}

pub(crate) enum Latched<'a> {
    Shared(RwLockReadGuard<'a, Box<[u8]>>),
    Exclusive(RwLockWriteGuard<'a, Box<[u8]>>),
}

impl<'a> Latched<'a> {
    pub(crate) fn mode(&self) -> LatchMode {
        match self {
            Latched::Shared(_) => LatchMode::Shared,
            Latched::Exclusive(_) => LatchMode::Exclusive,
        }
    }

    pub(crate) fn data(&self) -> &[u8] {
        match self {
            Latched::Shared(guard) => guard,
            Latched::Exclusive(guard) => guard,
        }
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        match self {
            Latched::Exclusive(guard) => guard,
            Latched::Shared(_) => panic!("page latched shared"),
        }
    }

    pub(crate) fn downgrade(self) -> Self {
        match self {
            Latched::Exclusive(guard) => Latched::Shared(RwLockWriteGuard::downgrade(guard)),
            shared => shared,
        }
    }
}

/// A page-sized buffer with its latch and control block.
pub(crate) struct Frame {
    pub(crate) cb: ControlBlock,
    latch: RwLock<Box<[u8]>>,
}

impl Frame {
    pub(crate) fn new(page_size: usize) -> Self {
        Self {
            cb: ControlBlock::new(),
            latch: RwLock::new(vec![0u8; page_size].into_boxed_slice()),
        }
    }

    pub(crate) fn latch(&self, mode: LatchMode) -> Latched<'_> {
        match mode {
            LatchMode::Shared => Latched::Shared(self.latch.read()),
            LatchMode::Exclusive => Latched::Exclusive(self.latch.write()),
        }
    }

    pub(crate) fn try_latch(&self, mode: LatchMode) -> Option<Latched<'_>> {
        match mode {
            LatchMode::Shared => self.latch.try_read().map(Latched::Shared),
            LatchMode::Exclusive => self.latch.try_write().map(Latched::Exclusive),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.latch.read()
    }

    pub(crate) fn try_read(&self) -> Option<RwLockReadGuard<'_, Box<[u8]>>> {
        self.latch.try_read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.latch.write()
    }

    pub(crate) fn try_write(&self) -> Option<RwLockWriteGuard<'_, Box<[u8]>>> {
        self.latch.try_write()
    }

    /// Never blocks; a busy latch reports dirty.
    pub(crate) fn is_dirty(&self) -> bool {
        match self.latch.try_read() {
            Some(_guard) => self.cb.is_dirty_unlatched(),
            None => true,
        }
    }
}
