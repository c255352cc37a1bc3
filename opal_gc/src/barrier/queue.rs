//! Per-thread barrier log buffers and their queue sets.
//!
//! Both barriers log into per-thread buffers with the same index protocol:
//! the thread block holds a buffer base pointer and an index counting bytes
//! remaining. An enqueue decrements the index by eight and stores at
//! `buffer + index`, so the buffer fills from the top down and an index of
//! zero means exhausted. The generated fast path performs exactly that
//! sequence; when it finds the index at zero it calls into
//! [`BarrierQueueSet::handle_zero_index_for`], which seals the full buffer
//! for the collector and installs a fresh one.
//!
//! A queue set owns the sealed buffers behind a mutex and hands them to the
//! collector in bulk via [`BarrierQueueSet::drain`].

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::thread::ThreadLocalBlock;

/// Which of the two per-thread queues a set manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Snapshot-at-the-beginning pre-value log.
    Satb,
    /// Dirty-card address log.
    DirtyCard,
}

impl QueueKind {
    fn index<'a>(&self, block: &'a mut ThreadLocalBlock) -> &'a mut u64 {
        match self {
            QueueKind::Satb => &mut block.satb_index,
            QueueKind::DirtyCard => &mut block.card_index,
        }
    }

    fn buffer<'a>(&self, block: &'a mut ThreadLocalBlock) -> &'a mut u64 {
        match self {
            QueueKind::Satb => &mut block.satb_buffer,
            QueueKind::DirtyCard => &mut block.card_buffer,
        }
    }
}

/// A queue set: fresh-buffer allocation, zero-index refill, sealed buffers.
pub struct BarrierQueueSet {
    kind: QueueKind,
    capacity_words: usize,
    completed: Mutex<Vec<Box<[u64]>>>,
    refills: AtomicUsize,
}

impl BarrierQueueSet {
    /// Creates a SATB queue set with the given buffer capacity in words.
    pub fn new_satb(capacity_words: usize) -> Self {
        Self::new(QueueKind::Satb, capacity_words)
    }

    /// Creates a dirty-card queue set with the given buffer capacity in words.
    pub fn new_dirty_card(capacity_words: usize) -> Self {
        Self::new(QueueKind::DirtyCard, capacity_words)
    }

    fn new(kind: QueueKind, capacity_words: usize) -> Self {
        assert!(capacity_words > 0, "queue buffers need at least one slot");
        BarrierQueueSet {
            kind,
            capacity_words,
            completed: Mutex::new(Vec::new()),
            refills: AtomicUsize::new(0),
        }
    }

    /// Buffer capacity in words.
    pub fn capacity_words(&self) -> usize {
        self.capacity_words
    }

    /// How often a thread ran its buffer dry and got a fresh one.
    pub fn refill_count(&self) -> usize {
        self.refills.load(Ordering::Relaxed)
    }

    fn install_fresh(&self, block: &mut ThreadLocalBlock) {
        let buffer = vec![0u64; self.capacity_words].into_boxed_slice();
        let ptr = Box::into_raw(buffer) as *mut u64;
        *self.kind.buffer(block) = ptr as u64;
        *self.kind.index(block) = (self.capacity_words * 8) as u64;
    }

    /// Gives a thread its first buffer.
    pub fn attach(&self, block: &mut ThreadLocalBlock) {
        assert_eq!(*self.kind.buffer(block), 0, "thread already has a buffer");
        self.install_fresh(block);
    }

    /// Refill entry point reached when the generated fast path finds the
    /// index at zero: seals the full buffer and installs a fresh one.
    pub fn handle_zero_index_for(&self, block: &mut ThreadLocalBlock) {
        debug_assert_eq!(*self.kind.index(block), 0, "buffer is not exhausted");
        let ptr = *self.kind.buffer(block) as *mut u64;
        assert!(!ptr.is_null(), "refill on a detached thread");
        // A zero index means every slot holds an entry.
        let sealed = unsafe {
            Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, self.capacity_words))
        };
        self.completed.lock().push(sealed);
        self.refills.fetch_add(1, Ordering::Relaxed);
        self.install_fresh(block);
    }

    /// Reference implementation of the generated enqueue fast path.
    ///
    /// Returns `false` when the buffer is exhausted; the caller is then
    /// expected to refill and retry, exactly as the generated code does.
    pub fn try_enqueue(&self, block: &mut ThreadLocalBlock, value: u64) -> bool {
        let index = *self.kind.index(block);
        if index == 0 {
            return false;
        }
        let index = index - 8;
        *self.kind.index(block) = index;
        let ptr = *self.kind.buffer(block) as *mut u64;
        unsafe { ptr.add(index as usize / 8).write(value) };
        true
    }

    /// Seals whatever the thread has logged so far and detaches its buffer.
    ///
    /// Called at safepoints and on thread exit. Only the occupied tail of
    /// the buffer carries entries.
    pub fn flush(&self, block: &mut ThreadLocalBlock) {
        let ptr = *self.kind.buffer(block) as *mut u64;
        if ptr.is_null() {
            return;
        }
        let index = (*self.kind.index(block) / 8) as usize;
        let buffer = unsafe {
            Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr, self.capacity_words))
        };
        if index < self.capacity_words {
            self.completed
                .lock()
                .push(buffer[index..].to_vec().into_boxed_slice());
        }
        *self.kind.buffer(block) = 0;
        *self.kind.index(block) = 0;
    }

    /// Hands every sealed buffer's entries to the collector.
    pub fn drain(&self) -> Vec<u64> {
        let mut sealed = Vec::new();
        std::mem::swap(&mut sealed, &mut *self.completed.lock());
        sealed.into_iter().flat_map(|b| b.into_vec()).collect()
    }
}
