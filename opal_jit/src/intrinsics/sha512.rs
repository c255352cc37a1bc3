//! SHA-512 block compression generator.
//!
//! Same lane-zero discipline as the SHA-256 generator, scaled up to 64-bit
//! lanes: each vector holds two working values, the schedule window spans
//! eight registers, and one `calc` step extends the schedule by a pair of
//! words feeding two rounds.
//!
//! Calling convention matches [`super::sha256`] with a 128-byte block:
//!
//! - `a0` block pointer (arbitrary alignment)
//! - `a1` state pointer, eight little-endian doublewords (arbitrary alignment)
//! - `a2` byte offset of the current block (multi-block only)
//! - `a3` byte offset of the final block's start (multi-block only)
//!
//! The multi-block flavor advances by 128 per block while `a2 <= a3` and
//! returns the final offset in `a0`. Misaligned block pointers read up to 15
//! bytes past the last block.

use crate::backend::riscv::assembler::Assembler;
use crate::backend::riscv::registers::{Gpr, Vr};

use super::tables::IntrinsicTables;

const K: Gpr = Gpr::T0;
const J: Gpr = Gpr::T1;
const ALN: Gpr = Gpr::T2;
const OFT: Gpr = Gpr::T3;
const CNT: Gpr = Gpr::T4;

const BUF: Gpr = Gpr::A0;
const STATE: Gpr = Gpr::A1;
const OFS: Gpr = Gpr::A2;
const LIMIT: Gpr = Gpr::A3;

// Working variables a..h. The even registers double as the packed state
// pairs {a,b} {c,d} {e,f} {g,h} between blocks; the odd ones are dequeued
// from them at the top of each block.
const HS: [Vr; 8] = [
    Vr::V0,
    Vr::V1,
    Vr::V2,
    Vr::V3,
    Vr::V4,
    Vr::V5,
    Vr::V6,
    Vr::V7,
];

const CTL: Vr = Vr::V8;
const AUX: Vr = Vr::V9;

// Message schedule window w[j-16..j), two words per register.
const WS: [Vr; 8] = [
    Vr::V10,
    Vr::V11,
    Vr::V12,
    Vr::V13,
    Vr::V14,
    Vr::V15,
    Vr::V16,
    Vr::V17,
];

const KPW0: Vr = Vr::V18;
const KPW1: Vr = Vr::V19;

// Round temporaries, callee-saved half of the file.
const CH: Vr = Vr::V20;
const MAJ: Vr = Vr::V21;
const BSA: Vr = Vr::V22;
const BSE: Vr = Vr::V23;
const VT1: Vr = Vr::V24;
const VT2: Vr = Vr::V25;

const SAVED: [Vr; 6] = [Vr::V20, Vr::V21, Vr::V22, Vr::V23, Vr::V24, Vr::V25];

fn hs(rounds: usize, role: usize) -> Vr {
    HS[(8 + role - (rounds % 8)) % 8]
}

/// One compression round. `kpw` must hold `k[j] + w[j]` in lane zero.
fn emit_round(asm: &mut Assembler, rounds: &mut usize, kpw: Vr) {
    let a = hs(*rounds, 0);
    let b = hs(*rounds, 1);
    let c = hs(*rounds, 2);
    let d = hs(*rounds, 3);
    let e = hs(*rounds, 4);
    let f = hs(*rounds, 5);
    let g = hs(*rounds, 6);
    let h = hs(*rounds, 7);

    asm.vsel(CH, g, f, e);
    asm.vxor(MAJ, a, b);
    asm.vshasig_d(BSE, e, true, true);
    asm.vadd_d(VT2, CH, kpw);
    asm.vadd_d(VT1, h, BSE);
    asm.vsel(MAJ, b, c, MAJ);
    asm.vadd_d(VT2, VT1, VT2);
    asm.vshasig_d(BSA, a, true, false);
    asm.vadd_d(VT1, BSA, MAJ);
    asm.vadd_d(d, d, VT2);
    asm.vadd_d(h, VT2, VT1);

    *rounds += 1;
}

/// Extends the schedule by two words and stages `k + w` for two rounds.
/// `win` is the current window, oldest pair first; the new pair lands in
/// `win[0]`.
fn emit_calc_2w(asm: &mut Assembler, win: [Vr; 8]) {
    let w0 = win[0];
    let w1 = win[1];
    let w4 = win[4];
    let w5 = win[5];
    let w7 = win[7];

    asm.vlx(VT1, K, J);
    asm.addi(J, J, 16);
    // {w[j-15], w[j-14]} and {w[j-7], w[j-6]}.
    asm.vsrdq(VT2, w0, w1, 8);
    asm.vshasig_d(VT2, VT2, false, false);
    asm.vsrdq(CH, w4, w5, 8);
    asm.vadd_d(VT2, VT2, CH);
    asm.vadd_d(VT2, VT2, w0);
    asm.vshasig_d(CH, w7, false, true);
    asm.vadd_d(w0, VT2, CH);

    asm.vadd_d(KPW0, w0, VT1);
    asm.vsrdq(KPW1, KPW0, KPW0, 8);
}

/// Loads the state into the even `HS` registers as packed pairs.
fn emit_load_state(asm: &mut Assembler) {
    let aligned = asm.create_label();

    asm.andi(ALN, STATE, 0xF);
    asm.vlx(HS[0], STATE, Gpr::Zero);
    for n in 1..4 {
        asm.li(OFT, 16 * n as i64);
        asm.vlx(HS[2 * n], STATE, OFT);
    }
    asm.beqz(ALN, aligned);
    asm.vlpc(CTL, STATE, Gpr::Zero);
    asm.li(OFT, 64);
    asm.vlx(AUX, STATE, OFT);
    asm.vperm(HS[0], HS[0], HS[2], CTL);
    asm.vperm(HS[2], HS[2], HS[4], CTL);
    asm.vperm(HS[4], HS[4], HS[6], CTL);
    asm.vperm(HS[6], HS[6], AUX, CTL);
    asm.bind_label(aligned);
}

/// Loads one 128-byte block into `WS` and byte-swaps each doubleword.
///
/// The swap runs as three rotates (16-bit lanes by 8, 32-bit lanes by 16,
/// 64-bit lanes by 32) because the permute control register is still needed
/// for realignment at this point.
fn emit_load_block(asm: &mut Assembler) {
    let aligned = asm.create_label();

    asm.andi(ALN, BUF, 0xF);
    asm.vlx(WS[0], BUF, Gpr::Zero);
    for n in 1..8 {
        asm.li(OFT, 16 * n as i64);
        asm.vlx(WS[n], BUF, OFT);
    }
    asm.beqz(ALN, aligned);
    asm.vlpc(CTL, BUF, Gpr::Zero);
    asm.li(OFT, 128);
    asm.vlx(AUX, BUF, OFT);
    for n in 0..7 {
        asm.vperm(WS[n], WS[n], WS[n + 1], CTL);
    }
    asm.vperm(WS[7], WS[7], AUX, CTL);
    asm.bind_label(aligned);

    // Rotate amounts: 8 per halfword, then 16 per word, then 32 per
    // doubleword (a 64-bit rotate by a lane value of 2^32 reduces mod 64).
    asm.vsplti_h(AUX, 8);
    asm.vsplti_w(KPW0, 8);
    asm.vsplti_w(CH, 1);
    asm.vsll_w(KPW0, KPW0, CH);
    asm.vsll_w(KPW1, KPW0, CH);
    for w in WS {
        asm.vrl_h(w, w, AUX);
        asm.vrl_w(w, w, KPW0);
        asm.vrl_d(w, w, KPW1);
    }
}

/// Feed-forward into memory; leaves the packed pairs in the even `HS`
/// registers for the next block.
fn emit_update_state(asm: &mut Assembler) {
    let loaded = asm.create_label();
    let unaligned_store = asm.create_label();
    let stored = asm.create_label();

    // The schedule is dead here, so the initial state reloads into the even
    // WS registers.
    asm.andi(ALN, STATE, 0xF);
    asm.vlx(WS[0], STATE, Gpr::Zero);
    for n in 1..4 {
        asm.li(OFT, 16 * n as i64);
        asm.vlx(WS[2 * n], STATE, OFT);
    }
    asm.beqz(ALN, loaded);
    asm.vlpc(CTL, STATE, Gpr::Zero);
    asm.li(OFT, 64);
    asm.vlx(AUX, STATE, OFT);
    asm.vperm(WS[0], WS[0], WS[2], CTL);
    asm.vperm(WS[2], WS[2], WS[4], CTL);
    asm.vperm(WS[4], WS[4], WS[6], CTL);
    asm.vperm(WS[6], WS[6], AUX, CTL);
    asm.bind_label(loaded);

    // 80 rounds realign the roles. Pack lane zero of each pair of working
    // variables back into the even registers and add the initial state.
    for n in 0..4 {
        asm.vmrg_d(HS[2 * n], HS[2 * n], HS[2 * n + 1]);
        asm.vadd_d(HS[2 * n], WS[2 * n], HS[2 * n]);
    }

    asm.bnez(ALN, unaligned_store);
    asm.vsx(HS[0], STATE, Gpr::Zero);
    for n in 1..4 {
        asm.li(OFT, 16 * n as i64);
        asm.vsx(HS[2 * n], STATE, OFT);
    }
    asm.j(stored);
    asm.bind_label(unaligned_store);
    for n in 0..4 {
        asm.vmv_x_d(OFT, HS[2 * n], 0);
        asm.sd(OFT, STATE, 16 * n as i32);
        asm.vmv_x_d(OFT, HS[2 * n], 1);
        asm.sd(OFT, STATE, 16 * n as i32 + 8);
    }
    asm.bind_label(stored);
}

/// Emits the SHA-512 compression routine at the current buffer position.
///
/// Returns the routine's entry offset within the buffer.
pub fn emit_sha512_compress(
    asm: &mut Assembler,
    tables: &IntrinsicTables,
    multi_block: bool,
) -> usize {
    let entry = asm.offset();

    for (i, &v) in SAVED.iter().enumerate() {
        asm.li(OFT, -16 * (i as i64 + 1));
        asm.vsx(v, Gpr::Sp, OFT);
    }
    asm.li(K, tables.sha512_k as i64);
    emit_load_state(asm);

    asm.align(16);
    let block_loop = asm.create_label();
    asm.bind_label(block_loop);

    // Unpack b, d, f, h from the packed pairs.
    for n in 0..4 {
        asm.vsrdq(HS[2 * n + 1], HS[2 * n], HS[2 * n], 8);
    }

    emit_load_block(asm);

    let mut rounds = 0usize;

    // Rounds 0..16 straight from the loaded schedule.
    for n in 0..8 {
        if n == 0 {
            asm.vlx(KPW0, K, Gpr::Zero);
        } else {
            asm.li(OFT, 16 * n as i64);
            asm.vlx(KPW0, K, OFT);
        }
        asm.vadd_d(KPW0, KPW0, WS[n]);
        asm.vsrdq(KPW1, KPW0, KPW0, 8);
        emit_round(asm, &mut rounds, KPW0);
        emit_round(asm, &mut rounds, KPW1);
    }

    // Rounds 16..80, sixteen per trip.
    asm.li(J, 128);
    asm.li(CNT, 4);
    asm.align(16);
    let core_loop = asm.create_label();
    asm.bind_label(core_loop);
    for step in 0..8 {
        let mut win = [Vr::V0; 8];
        for (k, slot) in win.iter_mut().enumerate() {
            *slot = WS[(step + k) % 8];
        }
        emit_calc_2w(asm, win);
        emit_round(asm, &mut rounds, KPW0);
        emit_round(asm, &mut rounds, KPW1);
    }
    debug_assert_eq!(rounds % 8, 0);
    asm.addi(CNT, CNT, -1);
    asm.bnez(CNT, core_loop);

    emit_update_state(asm);

    if multi_block {
        let finished = asm.create_label();
        asm.addi(BUF, BUF, 128);
        asm.addi(OFS, OFS, 128);
        asm.bgtu(OFS, LIMIT, finished);
        asm.j(block_loop);
        asm.bind_label(finished);
        asm.mv(Gpr::A0, OFS);
    }

    for (i, &v) in SAVED.iter().enumerate() {
        asm.li(OFT, -16 * (i as i64 + 1));
        asm.vlx(v, Gpr::Sp, OFT);
    }
    asm.ret();

    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_emits() {
        let mut asm = Assembler::new();
        let tables = IntrinsicTables::new(0x1000, 0x2000);
        let entry = emit_sha512_compress(&mut asm, &tables, false);
        assert_eq!(entry, 0);
        let code = asm.finish();
        assert!(code.len() > 500 * 4);
        assert_eq!(code.len() % 4, 0);
    }

    #[test]
    fn multi_block_is_longer() {
        let tables = IntrinsicTables::new(0x1000, 0x2000);
        let mut single = Assembler::new();
        emit_sha512_compress(&mut single, &tables, false);
        let mut multi = Assembler::new();
        emit_sha512_compress(&mut multi, &tables, true);
        assert!(multi.finish().len() > single.finish().len());
    }
}
