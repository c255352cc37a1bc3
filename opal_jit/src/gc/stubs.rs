//! Shared out-of-line barrier slow stubs.
//!
//! One stub per barrier per configuration, generated once and called from
//! every inline fast path. Both stubs run frameless in the caller's red
//! zone and preserve every register except the stub scratch:
//!
//! - The **pre stub** is entered with the pre-value in its red-zone slot.
//!   It re-checks the marking flag, then enqueues with the usual protocol;
//!   an exhausted buffer saves the volatile registers, calls the SATB
//!   refill trampoline with the thread pointer, restores, and retries.
//! - The **post stub** is entered with the store address in the stub
//!   scratch register. It recomputes the card address and re-runs the whole
//!   filter chain against current memory, so a card that became young or
//!   dirty since the inline check is still handled correctly, then dirties,
//!   enqueues, and refills the same way.

use super::write_barrier::{
    BarrierSet, PRE_VAL_SLOT, STUB_SPILL0, STUB_SPILL1, VOLATILE_SAVE,
};
use crate::backend::riscv::assembler::{Assembler, Label};
use crate::backend::riscv::encoder::fence_bits;
use crate::backend::riscv::registers::{CallingConvention, Gpr};

const THREAD: Gpr = CallingConvention::THREAD;
const SCRATCH: Gpr = CallingConvention::STUB_SCRATCH;

impl BarrierSet {
    fn emit_refill_call(&self, asm: &mut Assembler, entry: u64, restart: Label) {
        asm.save_volatile_gprs(Gpr::Sp, VOLATILE_SAVE);
        asm.mv(Gpr::A0, THREAD);
        asm.li(Gpr::T0, entry as i64);
        asm.jalr(Gpr::Ra, Gpr::T0, 0);
        asm.restore_volatile_gprs(Gpr::Sp, VOLATILE_SAVE);
        asm.j(restart);
    }

    /// Emits the pre-barrier slow stub at the current buffer position.
    ///
    /// Returns the stub's entry offset within the buffer.
    pub fn emit_pre_barrier_slow_stub(&self, asm: &mut Assembler) -> usize {
        let entry = asm.offset();
        let leave = asm.create_label();
        let restart = asm.create_label();
        let refill = asm.create_label();

        asm.sd(Gpr::T0, Gpr::Sp, STUB_SPILL0);
        asm.sd(Gpr::T1, Gpr::Sp, STUB_SPILL1);

        // Marking may have finished since the inline check.
        self.load_satb_active(asm, Gpr::T0);
        asm.beqz(Gpr::T0, leave);

        asm.bind_label(restart);
        asm.ld(Gpr::T0, THREAD, self.thread.satb_index);
        asm.beqz(Gpr::T0, refill);
        asm.addi(Gpr::T0, Gpr::T0, -8);
        asm.sd(Gpr::T0, THREAD, self.thread.satb_index);
        asm.ld(Gpr::T1, THREAD, self.thread.satb_buffer);
        asm.add(Gpr::T1, Gpr::T1, Gpr::T0);
        asm.ld(SCRATCH, Gpr::Sp, PRE_VAL_SLOT);
        asm.sd(SCRATCH, Gpr::T1, 0);

        asm.bind_label(leave);
        asm.ld(Gpr::T0, Gpr::Sp, STUB_SPILL0);
        asm.ld(Gpr::T1, Gpr::Sp, STUB_SPILL1);
        asm.ret();

        asm.bind_label(refill);
        self.emit_refill_call(asm, self.runtime.satb_refill, restart);

        entry
    }

    /// Emits the post-barrier slow stub at the current buffer position.
    ///
    /// Returns the stub's entry offset within the buffer.
    pub fn emit_post_barrier_slow_stub(&self, asm: &mut Assembler) -> usize {
        let entry = asm.offset();
        let leave = asm.create_label();
        let restart = asm.create_label();
        let refill = asm.create_label();

        asm.sd(Gpr::T0, Gpr::Sp, STUB_SPILL0);
        asm.sd(Gpr::T1, Gpr::Sp, STUB_SPILL1);

        // Card address from the store address in the scratch register.
        asm.srli(Gpr::T0, SCRATCH, self.card.card_shift);
        asm.li(Gpr::T1, self.card.biased_base as i64);
        asm.add(SCRATCH, Gpr::T1, Gpr::T0);

        asm.lbu(Gpr::T0, SCRATCH, 0);
        asm.li(Gpr::T1, self.card.young as i64);
        asm.beq(Gpr::T0, Gpr::T1, leave);

        asm.fence(fence_bits::W, fence_bits::R);
        asm.lbu(Gpr::T0, SCRATCH, 0);
        asm.li(Gpr::T1, self.card.dirty as i64);
        asm.beq(Gpr::T0, Gpr::T1, leave);
        asm.sb(Gpr::T1, SCRATCH, 0);

        asm.bind_label(restart);
        asm.ld(Gpr::T0, THREAD, self.thread.card_index);
        asm.beqz(Gpr::T0, refill);
        asm.addi(Gpr::T0, Gpr::T0, -8);
        asm.sd(Gpr::T0, THREAD, self.thread.card_index);
        asm.ld(Gpr::T1, THREAD, self.thread.card_buffer);
        asm.add(Gpr::T1, Gpr::T1, Gpr::T0);
        asm.sd(SCRATCH, Gpr::T1, 0);

        asm.bind_label(leave);
        asm.ld(Gpr::T0, Gpr::Sp, STUB_SPILL0);
        asm.ld(Gpr::T1, Gpr::Sp, STUB_SPILL1);
        asm.ret();

        asm.bind_label(refill);
        self.emit_refill_call(asm, self.runtime.card_refill, restart);

        entry
    }
}
