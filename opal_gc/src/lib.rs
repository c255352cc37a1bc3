//! Opal collector runtime.
//!
//! This crate is the collector-facing half of the Opal emission layer: the
//! data structures that the generated write-barrier code reads and writes.
//!
//! - **Card table**: a byte-per-card map over the heap with clean, dirty and
//!   young sentinel values. The post-write barrier computes card addresses
//!   from a biased base so that `base + (addr >> shift)` lands directly on
//!   the card byte.
//! - **Barrier queues**: per-thread SATB and dirty-card log buffers with the
//!   decrement-then-store index protocol, and the queue sets that refill a
//!   buffer when the generated fast path finds the index at zero.
//! - **Thread-local layout**: the byte offsets inside a thread's barrier
//!   block that the emitters bake into generated code.
//!
//! The emission layer (`opal_jit`) consumes the layout descriptors exported
//! here; the collector proper consumes the sealed buffers.

#![warn(missing_docs)]

pub mod barrier;
pub mod thread;

pub use barrier::card_table::{
    CardTable, CardTableLayout, CARD_CLEAN, CARD_DIRTY, CARD_SHIFT, CARD_YOUNG,
};
pub use barrier::queue::{BarrierQueueSet, QueueKind};
pub use thread::{FlagWidth, ThreadLocalBlock, ThreadLocalLayout};
