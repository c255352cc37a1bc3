#![allow(dead_code)]
//! Shared simulator harness.
//!
//! Every suite builds code with the assembler, places it in guest memory,
//! and executes it on the reference simulator. The memory map is one
//! megabyte with code at the bottom, a data area in the middle, and the
//! stack at the top so the red zone below `sp` stays mapped.

use opal_jit::backend::riscv::registers::Gpr;
use opal_jit::sim::{GuestMemory, Simulator};

pub const BASE: u64 = 0x1_0000;
pub const SIZE: usize = 0x10_0000;
pub const CODE: u64 = BASE;
pub const DATA: u64 = 0x4_0000;
pub const STACK: u64 = BASE + SIZE as u64;

/// Simulator with `code` installed at [`CODE`] and `sp` at the top of guest
/// memory.
pub fn simulator(code: &[u8]) -> Simulator<'static> {
    let mut mem = GuestMemory::new(BASE, SIZE);
    mem.write_bytes(CODE, code);
    let mut sim = Simulator::new(mem);
    sim.machine.set_reg(Gpr::Sp, STACK);
    sim
}
