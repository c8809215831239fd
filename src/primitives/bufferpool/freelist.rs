use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::types::FrameIndex;

struct Chain {
    /// `next[0]` is the head; `next[i]` links frame `i`. Zero terminates.
    next: Box<[u32]>,
    len: usize,
}

/// Free frames as a singly linked list embedded in an array.
pub(crate) struct FreeList {
    chain: Mutex<Chain>,
    len_hint: AtomicUsize,
}

impl FreeList {
    /// All frames `1..=block_count` start out free.
    pub(crate) fn new(block_count: usize) -> Self {
        let mut next = vec![0u32; block_count + 1].into_boxed_slice();
        for i in 0..block_count {
            next[i] = (i + 1) as u32;
        }
        Self {
            chain: Mutex::new(Chain {
                next,
                len: block_count,
            }),
            len_hint: AtomicUsize::new(block_count),
        }
    }

    pub(crate) fn pop(&self) -> Option<FrameIndex> {
        if self.len_hint.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut chain = self.chain.lock();
        let head = chain.next[0];
        let idx = FrameIndex::from_raw(head)?;
        chain.next[0] = chain.next[head as usize];
        chain.next[head as usize] = 0;
        chain.len -= 1;
        self.len_hint.store(chain.len, Ordering::Release);
        Some(idx)
    }

    pub(crate) fn push(&self, idx: FrameIndex) {
        let mut chain = self.chain.lock();
        debug_assert!(chain.len < chain.next.len() - 1, "free list overflow");
        chain.next[idx.as_usize()] = chain.next[0];
        chain.next[0] = idx.get();
        chain.len += 1;
        self.len_hint.store(chain.len, Ordering::Release);
    }

    pub(crate) fn len(&self) -> usize {
        self.len_hint.load(Ordering::Acquire)
    }
}
