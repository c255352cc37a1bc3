//! Atomic read-modify-write sequences, executed on the simulator.

mod common;

use common::{simulator, CODE, DATA};
use opal_jit::backend::riscv::assembler::{Assembler, MemOrder};
use opal_jit::backend::riscv::registers::Gpr;

#[test]
fn cmpxchg_d_succeeds_on_match() {
    let mut asm = Assembler::new();
    asm.cmpxchg_d(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::A3, Gpr::T0, MemOrder::AcqRel);
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 0x1111);
    sim.machine.set_reg(Gpr::A1, DATA);
    sim.machine.set_reg(Gpr::A2, 0x1111);
    sim.machine.set_reg(Gpr::A3, 0x2222);
    assert_eq!(sim.run(CODE).unwrap(), 0x1111);
    assert_eq!(sim.machine.mem.read_u64(DATA), 0x2222);
}

#[test]
fn cmpxchg_d_fails_on_mismatch() {
    let mut asm = Assembler::new();
    asm.cmpxchg_d(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::A3, Gpr::T0, MemOrder::AcqRel);
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 0x9999);
    sim.machine.set_reg(Gpr::A1, DATA);
    sim.machine.set_reg(Gpr::A2, 0x1111);
    sim.machine.set_reg(Gpr::A3, 0x2222);
    // The previous value comes back and memory is untouched.
    assert_eq!(sim.run(CODE).unwrap(), 0x9999);
    assert_eq!(sim.machine.mem.read_u64(DATA), 0x9999);
}

#[test]
fn cmpxchg_w_compares_sign_extended() {
    let mut asm = Assembler::new();
    asm.cmpxchg_w(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::A3, Gpr::T0, MemOrder::Relaxed);
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 0xdead_0000_8000_0000);
    sim.machine.set_reg(Gpr::A1, DATA);
    sim.machine.set_reg(Gpr::A2, 0xffff_ffff_8000_0000);
    sim.machine.set_reg(Gpr::A3, 7);
    assert_eq!(sim.run(CODE).unwrap(), 0xffff_ffff_8000_0000);
    // Only the low word is replaced.
    assert_eq!(sim.machine.mem.read_u64(DATA), 0xdead_0000_0000_0007);
}

#[test]
fn cmpxchg_b_replaces_only_its_byte() {
    let mut asm = Assembler::new();
    asm.cmpxchg_b(
        Gpr::A0,
        Gpr::A1,
        Gpr::A2,
        Gpr::A3,
        [Gpr::T0, Gpr::T1, Gpr::T2, Gpr::T3],
        MemOrder::AcqRel,
    );
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 0x8877_6655_4433_2211);
    sim.machine.set_reg(Gpr::A1, DATA + 2); // byte value 0x33
    sim.machine.set_reg(Gpr::A2, 0x33);
    sim.machine.set_reg(Gpr::A3, 0xee);
    assert_eq!(sim.run(CODE).unwrap(), 0x33);
    assert_eq!(sim.machine.mem.read_u64(DATA), 0x8877_6655_44ee_2211);
}

#[test]
fn cmpxchg_b_failure_preserves_neighbors() {
    let mut asm = Assembler::new();
    asm.cmpxchg_b(
        Gpr::A0,
        Gpr::A1,
        Gpr::A2,
        Gpr::A3,
        [Gpr::T0, Gpr::T1, Gpr::T2, Gpr::T3],
        MemOrder::Relaxed,
    );
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 0x8877_6655_4433_2211);
    sim.machine.set_reg(Gpr::A1, DATA + 1);
    sim.machine.set_reg(Gpr::A2, 0x99); // slot holds 0x22
    sim.machine.set_reg(Gpr::A3, 0xee);
    assert_eq!(sim.run(CODE).unwrap(), 0x22);
    assert_eq!(sim.machine.mem.read_u64(DATA), 0x8877_6655_4433_2211);
}

#[test]
fn xchg_d_returns_previous_value() {
    let mut asm = Assembler::new();
    asm.xchg_d(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::T0, MemOrder::AcqRel);
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 0xaaaa);
    sim.machine.set_reg(Gpr::A1, DATA);
    sim.machine.set_reg(Gpr::A2, 0xbbbb);
    assert_eq!(sim.run(CODE).unwrap(), 0xaaaa);
    assert_eq!(sim.machine.mem.read_u64(DATA), 0xbbbb);
}

#[test]
fn xchg_w_truncates_to_the_word() {
    let mut asm = Assembler::new();
    asm.xchg_w(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::T0, MemOrder::Relaxed);
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 0x1234_5678_9abc_def0);
    sim.machine.set_reg(Gpr::A1, DATA);
    sim.machine.set_reg(Gpr::A2, 0x1_0000_0007);
    // lr.w sign-extends the previous word.
    assert_eq!(sim.run(CODE).unwrap(), 0xffff_ffff_9abc_def0);
    assert_eq!(sim.machine.mem.read_u64(DATA), 0x1234_5678_0000_0007);
}

#[test]
fn add_and_fetch_d_accumulates() {
    let mut asm = Assembler::new();
    asm.add_and_fetch_d(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::T0, MemOrder::AcqRel);
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 100);
    sim.machine.set_reg(Gpr::A1, DATA);
    sim.machine.set_reg(Gpr::A2, 42);
    assert_eq!(sim.run(CODE).unwrap(), 142);
    assert_eq!(sim.machine.mem.read_u64(DATA), 142);
}

#[test]
fn add_and_fetch_w_wraps_at_32_bits() {
    let mut asm = Assembler::new();
    asm.add_and_fetch_w(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::T0, MemOrder::Relaxed);
    asm.ret();
    let code = asm.finish();

    let mut sim = simulator(&code);
    sim.machine.mem.write_u64(DATA, 0xffff_ffff);
    sim.machine.set_reg(Gpr::A1, DATA);
    sim.machine.set_reg(Gpr::A2, 1);
    sim.run(CODE).unwrap();
    assert_eq!(sim.machine.mem.read_u64(DATA) as u32, 0);
}
