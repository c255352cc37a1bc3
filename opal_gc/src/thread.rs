//! Per-thread barrier state and its layout descriptor.
//!
//! Every mutator thread carries a small block of barrier state that the
//! generated fast paths address with 12-bit immediate offsets off the thread
//! register. The emitters never see the block type itself, only a
//! [`ThreadLocalLayout`] naming the offsets, so a host runtime with a
//! different thread structure can still drive the same generated code.

/// Width of the SATB active flag as read by generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagWidth {
    /// One byte, loaded with `lbu`.
    Byte,
    /// Four bytes, loaded with `lwu`.
    Word,
}

/// Byte offsets of the barrier fields inside a thread's barrier block.
///
/// All offsets are relative to the thread register and must fit a signed
/// 12-bit immediate; the emitters assert this.
#[derive(Debug, Clone, Copy)]
pub struct ThreadLocalLayout {
    /// Offset of the SATB active flag.
    pub satb_active: i32,
    /// Offset of the SATB buffer index (bytes remaining, u64).
    pub satb_index: i32,
    /// Offset of the SATB buffer base pointer.
    pub satb_buffer: i32,
    /// Offset of the dirty-card buffer index (bytes remaining, u64).
    pub card_index: i32,
    /// Offset of the dirty-card buffer base pointer.
    pub card_buffer: i32,
    /// How wide the active flag is.
    pub flag_width: FlagWidth,
}

impl ThreadLocalLayout {
    /// The layout of [`ThreadLocalBlock`].
    pub const fn standard() -> Self {
        ThreadLocalLayout {
            satb_active: 0,
            satb_index: 8,
            satb_buffer: 16,
            card_index: 24,
            card_buffer: 32,
            flag_width: FlagWidth::Byte,
        }
    }
}

impl Default for ThreadLocalLayout {
    fn default() -> Self {
        Self::standard()
    }
}

/// The reference barrier block, laid out per [`ThreadLocalLayout::standard`].
///
/// The index fields count bytes remaining in the buffer: a fresh buffer
/// starts at the buffer's byte capacity, an enqueue decrements by eight and
/// stores at `buffer + index`, and zero means exhausted. Simulator tests
/// copy this block into guest memory byte for byte; the little-endian field
/// order makes the one-byte flag read land on the low byte of `satb_active`.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct ThreadLocalBlock {
    /// Non-zero while concurrent marking wants pre-values logged.
    pub satb_active: u64,
    /// Bytes remaining in the SATB buffer.
    pub satb_index: u64,
    /// Base address of the SATB buffer.
    pub satb_buffer: u64,
    /// Bytes remaining in the dirty-card buffer.
    pub card_index: u64,
    /// Base address of the dirty-card buffer.
    pub card_buffer: u64,
}

impl ThreadLocalBlock {
    /// Size of the block in bytes.
    pub const SIZE: usize = 40;

    /// Serializes the block into its in-memory representation.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        for (i, field) in [
            self.satb_active,
            self.satb_index,
            self.satb_buffer,
            self.card_index,
            self.card_buffer,
        ]
        .into_iter()
        .enumerate()
        {
            out[i * 8..i * 8 + 8].copy_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Reads a block back from its in-memory representation.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let field = |i: usize| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            u64::from_le_bytes(buf)
        };
        ThreadLocalBlock {
            satb_active: field(0),
            satb_index: field(1),
            satb_buffer: field(2),
            card_index: field(3),
            card_buffer: field(4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_layout_matches_block_fields() {
        let layout = ThreadLocalLayout::standard();
        let block = ThreadLocalBlock {
            satb_active: 1,
            satb_index: 2,
            satb_buffer: 3,
            card_index: 4,
            card_buffer: 5,
        };
        let bytes = block.to_bytes();
        let read = |off: i32| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[off as usize..off as usize + 8]);
            u64::from_le_bytes(buf)
        };
        assert_eq!(read(layout.satb_active), 1);
        assert_eq!(read(layout.satb_index), 2);
        assert_eq!(read(layout.satb_buffer), 3);
        assert_eq!(read(layout.card_index), 4);
        assert_eq!(read(layout.card_buffer), 5);
    }

    #[test]
    fn byte_flag_lands_on_low_byte() {
        let block = ThreadLocalBlock {
            satb_active: 1,
            ..Default::default()
        };
        assert_eq!(block.to_bytes()[0], 1);
    }

    #[test]
    fn round_trips_through_bytes() {
        let block = ThreadLocalBlock {
            satb_active: 1,
            satb_index: 0x100,
            satb_buffer: 0xdead_0000,
            card_index: 0x80,
            card_buffer: 0xbeef_0000,
        };
        let back = ThreadLocalBlock::from_bytes(&block.to_bytes());
        assert_eq!(back.satb_buffer, 0xdead_0000);
        assert_eq!(back.card_index, 0x80);
    }
}
