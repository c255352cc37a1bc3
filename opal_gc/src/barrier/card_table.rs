//! Byte-per-card table over the heap.
//!
//! Each card covers `1 << card_shift` bytes of heap. The generated
//! post-barrier computes a card address as `biased_base + (addr >> shift)`,
//! so the table exposes a *biased* base: the card array's address minus the
//! shifted heap base. Card bytes hold one of three sentinels: clean, dirty,
//! or young (cards in regions the collector scavenges anyway and never wants
//! logged).

use std::sync::atomic::{AtomicU8, Ordering};

/// Card has no interesting pointers recorded.
pub const CARD_CLEAN: u8 = 0;
/// Card holds at least one logged cross-region store.
pub const CARD_DIRTY: u8 = 1;
/// Card belongs to a young region; stores into it are never logged.
pub const CARD_YOUNG: u8 = 2;

/// Default card granularity: 512 bytes of heap per card byte.
pub const CARD_SHIFT: u32 = 9;

/// The constants generated code needs to address and test cards.
#[derive(Debug, Clone, Copy)]
pub struct CardTableLayout {
    /// Biased card array base: `card_addr = biased_base + (addr >> shift)`.
    pub biased_base: u64,
    /// log2 of the card size in bytes.
    pub card_shift: u32,
    /// Sentinel byte for young cards.
    pub young: u8,
    /// Sentinel byte for dirty cards.
    pub dirty: u8,
}

/// Host-side card table covering `[heap_base, heap_base + heap_size)`.
pub struct CardTable {
    cards: Box<[AtomicU8]>,
    heap_base: u64,
    card_shift: u32,
}

impl CardTable {
    /// Creates a clean table for the given heap range.
    ///
    /// # Panics
    ///
    /// Panics if `heap_size` is not card-aligned.
    pub fn new(heap_base: u64, heap_size: usize) -> Self {
        Self::with_shift(heap_base, heap_size, CARD_SHIFT)
    }

    /// Creates a clean table with an explicit card granularity.
    pub fn with_shift(heap_base: u64, heap_size: usize, card_shift: u32) -> Self {
        let card_size = 1usize << card_shift;
        assert!(
            heap_size % card_size == 0,
            "heap size {heap_size:#x} not a multiple of the card size {card_size:#x}"
        );
        let cards = (0..heap_size >> card_shift)
            .map(|_| AtomicU8::new(CARD_CLEAN))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        CardTable {
            cards,
            heap_base,
            card_shift,
        }
    }

    /// Number of cards in the table.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True if the table covers no heap.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Card index covering the given heap address.
    pub fn index_of(&self, addr: u64) -> usize {
        debug_assert!(addr >= self.heap_base);
        ((addr - self.heap_base) >> self.card_shift) as usize
    }

    /// Biased base for generated code.
    ///
    /// The bias is computed with wrapping arithmetic; the sum
    /// `biased_base + (addr >> shift)` wraps back into the card array for
    /// every address the table covers.
    pub fn biased_base(&self) -> u64 {
        (self.cards.as_ptr() as u64).wrapping_sub(self.heap_base >> self.card_shift)
    }

    /// Layout descriptor for the emitters.
    pub fn layout(&self) -> CardTableLayout {
        CardTableLayout {
            biased_base: self.biased_base(),
            card_shift: self.card_shift,
            young: CARD_YOUNG,
            dirty: CARD_DIRTY,
        }
    }

    /// Marks the card covering `addr` dirty.
    pub fn dirty(&self, addr: u64) {
        self.cards[self.index_of(addr)].store(CARD_DIRTY, Ordering::Release);
    }

    /// Marks every card in `[addr, addr + len)` young.
    pub fn mark_young(&self, addr: u64, len: usize) {
        let first = self.index_of(addr);
        let last = self.index_of(addr + len as u64 - 1);
        for card in &self.cards[first..=last] {
            card.store(CARD_YOUNG, Ordering::Release);
        }
    }

    /// Reads the sentinel for the card covering `addr`.
    pub fn card_at(&self, addr: u64) -> u8 {
        self.cards[self.index_of(addr)].load(Ordering::Acquire)
    }

    /// True if the card covering `addr` is dirty.
    pub fn is_dirty(&self, addr: u64) -> bool {
        self.card_at(addr) == CARD_DIRTY
    }

    /// Resets every card to clean.
    pub fn clear_all(&self) {
        for card in self.cards.iter() {
            card.store(CARD_CLEAN, Ordering::Release);
        }
    }

    /// Visits the heap base address of every dirty card.
    pub fn for_each_dirty(&self, mut f: impl FnMut(u64)) {
        for (i, card) in self.cards.iter().enumerate() {
            if card.load(Ordering::Acquire) == CARD_DIRTY {
                f(self.heap_base + ((i as u64) << self.card_shift));
            }
        }
    }

    /// Number of dirty cards.
    pub fn dirty_count(&self) -> usize {
        self.cards
            .iter()
            .filter(|c| c.load(Ordering::Acquire) == CARD_DIRTY)
            .count()
    }
}
