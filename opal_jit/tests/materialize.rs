//! Constant materialization, executed on the simulator.

mod common;

use common::{simulator, CODE};
use opal_jit::backend::riscv::assembler::{Assembler, MAX_LOAD_IMM_WORDS};
use opal_jit::backend::riscv::registers::Gpr;

fn run_li(imm: i64) -> u64 {
    let mut asm = Assembler::new();
    asm.li(Gpr::A0, imm);
    let words = asm.offset() / 4;
    assert!(
        words <= MAX_LOAD_IMM_WORDS,
        "li {imm:#x} took {words} instructions"
    );
    asm.ret();
    let code = asm.finish();
    simulator(&code).run(CODE).unwrap()
}

#[test]
fn simm12_values() {
    for imm in [0i64, 1, -1, 42, 0x7ff, -0x800] {
        assert_eq!(run_li(imm), imm as u64, "imm={imm:#x}");
    }
}

#[test]
fn values_needing_lui() {
    for imm in [0x800i64, 0xfff, 0x1000, 0x12345, 0x7ffff800, -0x12345678] {
        assert_eq!(run_li(imm), imm as u64, "imm={imm:#x}");
    }
}

#[test]
fn carry_at_the_split_boundary() {
    // Low halves in 0x800..0xfff force the borrow-adjust of the upper part.
    for imm in [0x12345fffi64, 0x7fffffff, 0x80000800u32 as i64, -0x7ffff801] {
        assert_eq!(run_li(imm), imm as u64, "imm={imm:#x}");
    }
}

#[test]
fn full_width_values() {
    let cases: [i64; 10] = [
        i64::MAX,
        i64::MIN,
        i64::MIN + 1,
        u64::MAX as i64,
        0x1234_5678_9abc_def0,
        -0x1234_5678_9abc_def0,
        0x8000_0000_0000_0000u64 as i64,
        0x0000_7fff_ffff_f800,
        0x7fff_ffff_ffff_f7ff,
        0x0123_4567_89ab_cdef,
    ];
    for imm in cases {
        assert_eq!(run_li(imm), imm as u64, "imm={imm:#x}");
    }
}

#[test]
fn shifted_values_use_the_trailing_zero_strip() {
    for imm in [
        0xdead_beef_0000_0000u64 as i64,
        0x0000_0012_3456_0000,
        0x4000_0000_0000_0000,
        -0x0000_4321_0000_0000,
    ] {
        assert_eq!(run_li(imm), imm as u64, "imm={imm:#x}");
    }
}

#[test]
fn load_const_residual_folds_back() {
    for imm in [0x12345678i64, 0x7fff_f800, 0x1234_5678_9abc_d123, -0x765432] {
        let mut asm = Assembler::new();
        let rest = asm.load_const_optimized(Gpr::A0, imm, None, true);
        asm.addi(Gpr::A0, Gpr::A0, rest);
        asm.ret();
        let code = asm.finish();
        assert_eq!(simulator(&code).run(CODE).unwrap(), imm as u64, "imm={imm:#x}");
    }
}

#[test]
fn add_const_residual_folds_back() {
    let base = 0x1_2000i64;
    for delta in [0x1234i64, -0x1234, 0x7f_ffff, 0x1234_5678] {
        let mut asm = Assembler::new();
        asm.li(Gpr::A0, base);
        let rest = asm.add_const_optimized(Gpr::A1, Gpr::A0, delta, None, true);
        asm.addi(Gpr::A1, Gpr::A1, rest);
        asm.mv(Gpr::A0, Gpr::A1);
        asm.ret();
        let code = asm.finish();
        assert_eq!(
            simulator(&code).run(CODE).unwrap(),
            (base + delta) as u64,
            "delta={delta:#x}"
        );
    }
}

#[test]
fn add_const_with_aliasing_source_needs_tmp() {
    let mut asm = Assembler::new();
    asm.li(Gpr::A0, 0x5000);
    let rest = asm.add_const_optimized(Gpr::A0, Gpr::A0, 0x1234_5000, Some(Gpr::T0), true);
    asm.addi(Gpr::A0, Gpr::A0, rest);
    asm.ret();
    let code = asm.finish();
    assert_eq!(simulator(&code).run(CODE).unwrap(), 0x1234_a000);
}
