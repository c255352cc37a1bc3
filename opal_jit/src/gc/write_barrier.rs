//! Inline write-barrier emission.
//!
//! Two fast paths bracket every reference store:
//!
//! - **Pre-barrier** (snapshot-at-the-beginning): while marking is active,
//!   the value about to be overwritten is logged to the thread's SATB
//!   buffer so the concurrent marker still traces it.
//! - **Post-barrier** (card marking): a store that creates a cross-region
//!   pointer dirties the card covering the slot and logs the card address
//!   for concurrent refinement. Same-region stores, null stores, and stores
//!   into young or already-dirty cards are filtered out inline.
//!
//! Both enqueues use the decrement-then-store index protocol; an exhausted
//! buffer routes to a shared slow stub (see [`super::stubs`]) that refills
//! through a runtime trampoline and retries. The stub call uses red-zone
//! slots below `sp`, so the fast paths never need a frame.
//!
//! Layouts are baked in at emission time: thread-block offsets must fit the
//! 12-bit displacement of a single load, while the card-table base is
//! materialized with `li`.

use opal_gc::{CardTableLayout, FlagWidth, ThreadLocalLayout};

use crate::backend::riscv::assembler::{Assembler, RegisterOrConstant};
use crate::backend::riscv::encoder::{fence_bits, is_simm12};
use crate::backend::riscv::registers::{assert_different, CallingConvention, Gpr};

/// Zero-based guest addresses of the runtime entries the generated code
/// calls through trampolines.
#[derive(Debug, Clone, Copy)]
pub struct BarrierRuntime {
    /// `satb_refill(thread)`: seal the full SATB buffer, install a fresh one.
    pub satb_refill: u64,
    /// `card_refill(thread)`: same for the dirty-card buffer.
    pub card_refill: u64,
    /// `array_pre(addr, count)`: log every pre-value of a bulk array copy.
    pub array_pre: u64,
    /// `array_post(addr, count)`: dirty every card a bulk copy touched.
    pub array_post: u64,
}

/// Compressed reference encoding: `ref = base + (narrow << shift)`.
///
/// Null stays the all-zero bit pattern in both representations.
#[derive(Debug, Clone, Copy)]
pub struct NarrowRefLayout {
    /// Heap base added after shifting. Zero for zero-based encoding.
    pub base: u64,
    /// Left shift applied to the stored 32-bit value.
    pub shift: u32,
}

/// Entry addresses of the shared slow stubs, generated once per barrier
/// configuration (see [`super::stubs`]).
#[derive(Debug, Clone, Copy)]
pub struct BarrierStubs {
    /// Pre-barrier enqueue stub. Reads the pre-value from the red zone.
    pub pre_slow: u64,
    /// Post-barrier card stub. Takes the store address in the stub scratch
    /// register.
    pub post_slow: u64,
}

/// Properties of one reference access, combined with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessFlags(u8);

impl AccessFlags {
    /// No special properties.
    pub const NONE: AccessFlags = AccessFlags(0);
    /// The value is known non-null; null filters are skipped.
    pub const NOT_NULL: AccessFlags = AccessFlags(1 << 0);
    /// The destination holds no previous value worth logging, so the whole
    /// pre-barrier is skipped (freshly allocated objects).
    pub const DEST_UNINITIALIZED: AccessFlags = AccessFlags(1 << 1);
    /// Weak-reference load: the loaded referent must be logged so marking
    /// does not lose it.
    pub const WEAK: AccessFlags = AccessFlags(1 << 2);
    /// Phantom-strength load, same logging requirement as [`Self::WEAK`].
    pub const PHANTOM: AccessFlags = AccessFlags(1 << 3);
    /// Array element access: the post-barrier must mark the element's own
    /// card, not the object header's.
    pub const ARRAY: AccessFlags = AccessFlags(1 << 4);

    /// Whether every flag in `other` is set.
    pub const fn contains(self, other: AccessFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for AccessFlags {
    type Output = AccessFlags;
    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        AccessFlags(self.0 | rhs.0)
    }
}

// Red-zone map, offsets from sp. The fast paths use the two top slots, the
// stubs the next two, and a refill spreads the volatile save area below.
pub(crate) const RA_SPILL: i32 = -8;
pub(crate) const PRE_VAL_SLOT: i32 = -16;
pub(crate) const STUB_SPILL0: i32 = -24;
pub(crate) const STUB_SPILL1: i32 = -32;
pub(crate) const VOLATILE_SAVE: i32 = -32 - 16 * 8;

const _: () = assert!(-VOLATILE_SAVE <= CallingConvention::RED_ZONE_BYTES);

const THREAD: Gpr = CallingConvention::THREAD;
const SCRATCH: Gpr = CallingConvention::STUB_SCRATCH;

/// A complete barrier configuration: everything the emitters bake into
/// generated code.
#[derive(Debug, Clone, Copy)]
pub struct BarrierSet {
    /// Thread-block field offsets.
    pub thread: ThreadLocalLayout,
    /// Card table constants.
    pub card: CardTableLayout,
    /// log2 of the heap region size; stores within one region are filtered.
    pub region_shift: u32,
    /// Compressed-reference layout, if references are stored narrow.
    pub narrow: Option<NarrowRefLayout>,
    /// Runtime trampoline entries.
    pub runtime: BarrierRuntime,
}

impl BarrierSet {
    fn check_thread_offsets(&self) {
        for off in [
            self.thread.satb_active,
            self.thread.satb_index,
            self.thread.satb_buffer,
            self.thread.card_index,
            self.thread.card_buffer,
        ] {
            assert!(is_simm12(off as i64), "thread-block offset {off} out of reach");
        }
    }

    pub(crate) fn load_satb_active(&self, asm: &mut Assembler, d: Gpr) {
        match self.thread.flag_width {
            FlagWidth::Byte => asm.lbu(d, THREAD, self.thread.satb_active),
            FlagWidth::Word => asm.lwu(d, THREAD, self.thread.satb_active),
        }
    }

    /// Emits the SATB pre-barrier.
    ///
    /// With `obj` given, the previous value is loaded from `base + offset`
    /// into `pre_val` (clobbering it); otherwise `pre_val` must already hold
    /// the previous value and is only read. `tmp1` and `tmp2` are clobbered.
    /// [`AccessFlags::DEST_UNINITIALIZED`] suppresses the barrier entirely.
    pub fn emit_pre_barrier(
        &self,
        asm: &mut Assembler,
        stubs: BarrierStubs,
        obj: Option<(Gpr, RegisterOrConstant)>,
        pre_val: Gpr,
        tmp1: Gpr,
        tmp2: Gpr,
        flags: AccessFlags,
    ) {
        if flags.contains(AccessFlags::DEST_UNINITIALIZED) {
            return;
        }
        self.check_thread_offsets();
        assert_different(&[pre_val, tmp1, tmp2, THREAD, Gpr::Sp, SCRATCH]);

        let filtered = asm.create_label();
        let runtime = asm.create_label();

        self.load_satb_active(asm, tmp1);
        asm.beqz(tmp1, filtered);

        if let Some((base, offset)) = obj {
            if self.narrow.is_some() {
                asm.lwu_indexed(pre_val, Some(base), offset);
            } else {
                asm.ld_indexed(pre_val, Some(base), offset);
            }
        }
        if !flags.contains(AccessFlags::NOT_NULL) {
            asm.beqz(pre_val, filtered);
        }
        if let (Some(narrow), Some(_)) = (self.narrow, obj) {
            asm.slli(pre_val, pre_val, narrow.shift);
            if narrow.base != 0 {
                asm.li(tmp1, narrow.base as i64);
                asm.add(pre_val, pre_val, tmp1);
            }
        }

        asm.ld(tmp1, THREAD, self.thread.satb_index);
        asm.beqz(tmp1, runtime);
        asm.addi(tmp1, tmp1, -8);
        asm.sd(tmp1, THREAD, self.thread.satb_index);
        asm.ld(tmp2, THREAD, self.thread.satb_buffer);
        asm.add(tmp2, tmp2, tmp1);
        asm.sd(pre_val, tmp2, 0);
        asm.j(filtered);

        asm.bind_label(runtime);
        asm.sd(Gpr::Ra, Gpr::Sp, RA_SPILL);
        asm.sd(pre_val, Gpr::Sp, PRE_VAL_SLOT);
        asm.li(SCRATCH, stubs.pre_slow as i64);
        asm.jalr(Gpr::Ra, SCRATCH, 0);
        asm.ld(Gpr::Ra, Gpr::Sp, RA_SPILL);

        asm.bind_label(filtered);
    }

    /// Emits the card-marking post-barrier for a store of `new_val` at
    /// `store_addr`.
    ///
    /// All three temporaries are clobbered; `store_addr` and `new_val` are
    /// preserved. The slow path additionally clobbers the stub scratch
    /// register.
    pub fn emit_post_barrier(
        &self,
        asm: &mut Assembler,
        stubs: BarrierStubs,
        store_addr: Gpr,
        new_val: Gpr,
        tmp1: Gpr,
        tmp2: Gpr,
        tmp3: Gpr,
        flags: AccessFlags,
    ) {
        self.check_thread_offsets();
        assert_different(&[store_addr, new_val, tmp1, tmp2, tmp3, THREAD, Gpr::Sp, SCRATCH]);

        let filtered = asm.create_label();
        let runtime = asm.create_label();

        // Same-region filter: the xor clears every bit below the region
        // boundary difference.
        asm.xor(tmp1, store_addr, new_val);
        asm.srli(tmp1, tmp1, self.region_shift);
        asm.beqz(tmp1, filtered);
        if !flags.contains(AccessFlags::NOT_NULL) {
            asm.beqz(new_val, filtered);
        }

        asm.srli(tmp1, store_addr, self.card.card_shift);
        asm.li(tmp2, self.card.biased_base as i64);
        asm.add(tmp1, tmp1, tmp2);

        asm.lbu(tmp3, tmp1, 0);
        asm.li(tmp2, self.card.young as i64);
        asm.beq(tmp3, tmp2, filtered);

        // StoreLoad: the reference store must be visible before the card is
        // re-examined.
        asm.fence(fence_bits::W, fence_bits::R);
        asm.lbu(tmp3, tmp1, 0);
        asm.li(tmp2, self.card.dirty as i64);
        asm.beq(tmp3, tmp2, filtered);

        asm.ld(tmp3, THREAD, self.thread.card_index);
        asm.beqz(tmp3, runtime);
        asm.sb(tmp2, tmp1, 0);
        asm.addi(tmp3, tmp3, -8);
        asm.sd(tmp3, THREAD, self.thread.card_index);
        asm.ld(tmp2, THREAD, self.thread.card_buffer);
        asm.add(tmp2, tmp2, tmp3);
        asm.sd(tmp1, tmp2, 0);
        asm.j(filtered);

        asm.bind_label(runtime);
        asm.sd(Gpr::Ra, Gpr::Sp, RA_SPILL);
        asm.mv(SCRATCH, store_addr);
        asm.li(tmp1, stubs.post_slow as i64);
        asm.jalr(Gpr::Ra, tmp1, 0);
        asm.ld(Gpr::Ra, Gpr::Sp, RA_SPILL);

        asm.bind_label(filtered);
    }

    /// Emits a complete barriered reference store of `val` (or null when
    /// `None`) into `base + offset`.
    ///
    /// For [`AccessFlags::ARRAY`] accesses the card of the element itself
    /// must be marked, so the slot address is folded into `base`, clobbering
    /// it. Header-offset stores mark the card of the object start instead,
    /// which imprecise card scanning tolerates. All temporaries are
    /// clobbered.
    pub fn emit_ref_store(
        &self,
        asm: &mut Assembler,
        stubs: BarrierStubs,
        base: Gpr,
        offset: RegisterOrConstant,
        val: Option<Gpr>,
        tmp1: Gpr,
        tmp2: Gpr,
        tmp3: Gpr,
        flags: AccessFlags,
    ) {
        assert_different(&[base, tmp1, tmp2, tmp3, THREAD, Gpr::Sp]);
        if let Some(v) = val {
            assert_different(&[base, v, tmp1, tmp2, tmp3]);
        }

        self.emit_pre_barrier(asm, stubs, Some((base, offset)), tmp1, tmp2, tmp3, flags);

        match (val, self.narrow) {
            (None, Some(_)) => asm.sw_indexed(Gpr::Zero, Some(base), offset, Some(tmp2)),
            (None, None) => asm.sd_indexed(Gpr::Zero, Some(base), offset, Some(tmp2)),
            (Some(v), None) => asm.sd_indexed(v, Some(base), offset, Some(tmp2)),
            (Some(v), Some(narrow)) => {
                let store_null = asm.create_label();
                let done = asm.create_label();
                if !flags.contains(AccessFlags::NOT_NULL) {
                    asm.beqz(v, store_null);
                }
                if narrow.base != 0 {
                    asm.li(tmp3, narrow.base as i64);
                    asm.sub(tmp1, v, tmp3);
                    asm.srli(tmp1, tmp1, narrow.shift);
                } else {
                    asm.srli(tmp1, v, narrow.shift);
                }
                asm.sw_indexed(tmp1, Some(base), offset, Some(tmp2));
                if !flags.contains(AccessFlags::NOT_NULL) {
                    asm.j(done);
                    asm.bind_label(store_null);
                    asm.sw_indexed(Gpr::Zero, Some(base), offset, Some(tmp2));
                    asm.bind_label(done);
                }
            }
        }

        if let Some(v) = val {
            if flags.contains(AccessFlags::ARRAY) {
                match offset {
                    RegisterOrConstant::Constant(0) => {}
                    RegisterOrConstant::Constant(c) => {
                        let _ = asm.add_const_optimized(base, base, c, Some(tmp1), false);
                    }
                    RegisterOrConstant::Register(r) => asm.add(base, base, r),
                }
            }
            self.emit_post_barrier(asm, stubs, base, v, tmp1, tmp2, tmp3, flags);
        }
    }

    /// Emits a barriered reference load from `base + offset` into `dst`.
    ///
    /// For weak and phantom loads the loaded referent is logged through the
    /// pre-barrier, so a referent observed by the mutator can never be
    /// missed by concurrent marking.
    pub fn emit_ref_load(
        &self,
        asm: &mut Assembler,
        stubs: BarrierStubs,
        dst: Gpr,
        base: Gpr,
        offset: RegisterOrConstant,
        tmp1: Gpr,
        tmp2: Gpr,
        flags: AccessFlags,
    ) {
        assert_different(&[dst, tmp1, tmp2, THREAD, Gpr::Sp]);

        let done = asm.create_label();
        if let Some(narrow) = self.narrow {
            asm.lwu_indexed(dst, Some(base), offset);
            if !flags.contains(AccessFlags::NOT_NULL) {
                asm.beqz(dst, done);
            }
            asm.slli(dst, dst, narrow.shift);
            if narrow.base != 0 {
                asm.li(tmp1, narrow.base as i64);
                asm.add(dst, dst, tmp1);
            }
        } else {
            asm.ld_indexed(dst, Some(base), offset);
        }

        if flags.contains(AccessFlags::WEAK) || flags.contains(AccessFlags::PHANTOM) {
            // The pre-barrier null-filters, so no explicit check here.
            self.emit_pre_barrier(asm, stubs, None, dst, tmp1, tmp2, AccessFlags::NONE);
        }
        asm.bind_label(done);
    }

    /// Emits resolution of a tagged runtime handle in `value`.
    ///
    /// Bit 0 tags weak handles. The handle is dereferenced in place; a weak
    /// handle's referent is additionally logged through the pre-barrier.
    pub fn emit_resolve_handle(
        &self,
        asm: &mut Assembler,
        stubs: BarrierStubs,
        value: Gpr,
        tmp1: Gpr,
        tmp2: Gpr,
    ) {
        assert_different(&[value, tmp1, tmp2, THREAD, Gpr::Sp]);

        let done = asm.create_label();
        asm.beqz(value, done);
        asm.andi(tmp1, value, 1);
        asm.andi(tmp2, value, -2);
        asm.ld(value, tmp2, 0);
        asm.beqz(tmp1, done);
        self.emit_pre_barrier(asm, stubs, None, value, tmp1, tmp2, AccessFlags::NONE);
        asm.bind_label(done);
    }

    /// Emits the pre-barrier for a bulk array store over `count` reference
    /// slots starting at `addr`: when marking is active, every previous
    /// value is logged through one runtime call.
    ///
    /// Clobbers the stub scratch register; everything else is preserved by
    /// the volatile save area around the call.
    pub fn emit_array_pre_barrier(
        &self,
        asm: &mut Assembler,
        addr: Gpr,
        count: Gpr,
        flags: AccessFlags,
    ) {
        if flags.contains(AccessFlags::DEST_UNINITIALIZED) {
            return;
        }
        self.check_thread_offsets();
        assert_different(&[addr, count, THREAD, Gpr::Sp, SCRATCH]);

        let filtered = asm.create_label();
        self.load_satb_active(asm, SCRATCH);
        asm.beqz(SCRATCH, filtered);
        asm.beqz(count, filtered);

        asm.save_volatile_gprs(Gpr::Sp, VOLATILE_SAVE);
        asm.mv(SCRATCH, count);
        asm.mv(Gpr::A0, addr);
        asm.mv(Gpr::A1, SCRATCH);
        asm.li(Gpr::T0, self.runtime.array_pre as i64);
        asm.jalr(Gpr::Ra, Gpr::T0, 0);
        asm.restore_volatile_gprs(Gpr::Sp, VOLATILE_SAVE);

        asm.bind_label(filtered);
    }

    /// Emits the post-barrier for a bulk array store: one runtime call that
    /// dirties and logs every card the copied range covers.
    pub fn emit_array_post_barrier(&self, asm: &mut Assembler, addr: Gpr, count: Gpr) {
        assert_different(&[addr, count, THREAD, Gpr::Sp, SCRATCH]);

        let filtered = asm.create_label();
        asm.beqz(count, filtered);

        asm.save_volatile_gprs(Gpr::Sp, VOLATILE_SAVE);
        asm.mv(SCRATCH, count);
        asm.mv(Gpr::A0, addr);
        asm.mv(Gpr::A1, SCRATCH);
        asm.li(Gpr::T0, self.runtime.array_post as i64);
        asm.jalr(Gpr::Ra, Gpr::T0, 0);
        asm.restore_volatile_gprs(Gpr::Sp, VOLATILE_SAVE);

        asm.bind_label(filtered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opal_gc::{CARD_DIRTY, CARD_YOUNG};

    fn test_set() -> BarrierSet {
        BarrierSet {
            thread: ThreadLocalLayout::standard(),
            card: CardTableLayout {
                biased_base: 0x7000_0000,
                card_shift: 9,
                young: CARD_YOUNG,
                dirty: CARD_DIRTY,
            },
            region_shift: 20,
            narrow: None,
            runtime: BarrierRuntime {
                satb_refill: 0x2000_0000,
                card_refill: 0x2000_0100,
                array_pre: 0x2000_0200,
                array_post: 0x2000_0300,
            },
        }
    }

    fn stubs() -> BarrierStubs {
        BarrierStubs { pre_slow: 0x3000_0000, post_slow: 0x3000_0400 }
    }

    #[test]
    fn uninitialized_dest_emits_nothing() {
        let mut asm = Assembler::new();
        test_set().emit_pre_barrier(
            &mut asm,
            stubs(),
            None,
            Gpr::A0,
            Gpr::T0,
            Gpr::T1,
            AccessFlags::DEST_UNINITIALIZED,
        );
        assert!(asm.finish().is_empty());
    }

    #[test]
    fn not_null_skips_the_null_filter() {
        let mut asm = Assembler::new();
        test_set().emit_pre_barrier(
            &mut asm,
            stubs(),
            None,
            Gpr::A0,
            Gpr::T0,
            Gpr::T1,
            AccessFlags::NONE,
        );
        let with_filter = asm.finish().len();

        let mut asm = Assembler::new();
        test_set().emit_pre_barrier(
            &mut asm,
            stubs(),
            None,
            Gpr::A0,
            Gpr::T0,
            Gpr::T1,
            AccessFlags::NOT_NULL,
        );
        assert_eq!(asm.finish().len(), with_filter - 4);
    }

    #[test]
    fn flag_width_selects_the_load() {
        use crate::backend::riscv::encoder::{funct3_of, opcode, opcode_of};

        let mut set = test_set();
        let mut asm = Assembler::new();
        set.emit_pre_barrier(&mut asm, stubs(), None, Gpr::A0, Gpr::T0, Gpr::T1, AccessFlags::NONE);
        let code = asm.finish();
        let first = u32::from_le_bytes([code[0], code[1], code[2], code[3]]);
        assert_eq!(opcode_of(first), opcode::LOAD);
        assert_eq!(funct3_of(first), 0b100); // lbu

        set.thread.flag_width = FlagWidth::Word;
        let mut asm = Assembler::new();
        set.emit_pre_barrier(&mut asm, stubs(), None, Gpr::A0, Gpr::T0, Gpr::T1, AccessFlags::NONE);
        let code = asm.finish();
        let first = u32::from_le_bytes([code[0], code[1], code[2], code[3]]);
        assert_eq!(funct3_of(first), 0b110); // lwu
    }

    #[test]
    #[should_panic(expected = "conflicting operands")]
    fn overlapping_temporaries_are_rejected() {
        let mut asm = Assembler::new();
        test_set().emit_post_barrier(
            &mut asm,
            stubs(),
            Gpr::A0,
            Gpr::A1,
            Gpr::T0,
            Gpr::T0,
            Gpr::T2,
            AccessFlags::NONE,
        );
    }

    #[test]
    fn flags_compose() {
        let f = AccessFlags::NOT_NULL | AccessFlags::ARRAY;
        assert!(f.contains(AccessFlags::NOT_NULL));
        assert!(f.contains(AccessFlags::ARRAY));
        assert!(!f.contains(AccessFlags::WEAK));
    }
}
