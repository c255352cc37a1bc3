//! SHA-256 block compression generator.
//!
//! Emits a callable routine that compresses one 64-byte block (or, in the
//! multi-block flavor, a run of consecutive blocks) into an eight-word state
//! with the 128-bit vector unit. The data layout follows the lane-zero
//! discipline: every round keeps the working variable it cares about in lane
//! zero and shifts the packed `k + w` quad down one lane per round, so the
//! eight working variables never leave their registers.
//!
//! Calling convention:
//!
//! - `a0` block pointer (arbitrary alignment)
//! - `a1` state pointer, eight little-endian words (arbitrary alignment)
//! - `a2` byte offset of the current block (multi-block only)
//! - `a3` byte offset of the final block's start (multi-block only)
//!
//! The multi-block flavor advances `a0`/`a2` by 64 after each block and keeps
//! going while `a2 <= a3`, returning the final offset in `a0`. A misaligned
//! block pointer reads up to 15 bytes past the last block, so callers must
//! keep that much slack mapped.

use crate::backend::riscv::assembler::Assembler;
use crate::backend::riscv::registers::{Gpr, Vr};

use super::tables::IntrinsicTables;

// Scalar working set.
const K: Gpr = Gpr::T0;
const J: Gpr = Gpr::T1;
const ALN: Gpr = Gpr::T2;
const OFT: Gpr = Gpr::T3;
const CNT: Gpr = Gpr::T4;

const BUF: Gpr = Gpr::A0;
const STATE: Gpr = Gpr::A1;
const OFS: Gpr = Gpr::A2;
const LIMIT: Gpr = Gpr::A3;

// Round temporaries, all volatile.
const CH: Vr = Vr::V0;
const MAJ: Vr = Vr::V1;
const BSA: Vr = Vr::V2;
const BSE: Vr = Vr::V3;
const VT0: Vr = Vr::V4;
const VT1: Vr = Vr::V5;
const VT2: Vr = Vr::V6;
const VT3: Vr = Vr::V7;

// Permute control, rebuilt per phase.
const CTL: Vr = Vr::V8;

// Working variables a..h, one per register, rotated by round count.
const HS: [Vr; 8] = [
    Vr::V9,
    Vr::V10,
    Vr::V11,
    Vr::V12,
    Vr::V13,
    Vr::V14,
    Vr::V15,
    Vr::V16,
];

// Message schedule window w[j-16..j), four words per register.
const WS: [Vr; 4] = [Vr::V17, Vr::V18, Vr::V19, Vr::V20];

// Dequeued k+w quads for the first sixteen rounds.
const AUX: [Vr; 3] = [Vr::V21, Vr::V22, Vr::V23];

// Staged k+w for one four-round group.
const KPW: [Vr; 4] = [Vr::V24, Vr::V25, Vr::V26, Vr::V27];

// Callee-saved vector registers the routine touches.
const SAVED: [Vr; 8] = [
    Vr::V20,
    Vr::V21,
    Vr::V22,
    Vr::V23,
    Vr::V24,
    Vr::V25,
    Vr::V26,
    Vr::V27,
];

/// Working variable holding `role` (0 = a .. 7 = h) after `rounds` rounds.
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
    asm.vshasig_w(BSE, e, true, true);
    asm.vadd_w(VT2, CH, kpw);
    asm.vadd_w(VT1, h, BSE);
    asm.vsel(MAJ, b, c, MAJ);
    asm.vadd_w(VT3, VT1, VT2);
    asm.vshasig_w(BSA, a, true, false);
    asm.vadd_w(VT0, BSA, MAJ);
    asm.vadd_w(d, d, VT3);
    asm.vadd_w(h, VT3, VT0);

    *rounds += 1;
}

/// Extends the schedule by four words and stages `k + w` for the next four
/// rounds. `win` is the current window, oldest first; the new words land in
/// `win[0]`, which becomes the youngest register of the rotated window.
fn emit_calc_4w(asm: &mut Assembler, win: [Vr; 4]) {
    let [w0, w1, w2, w3] = win;

    asm.vlx(VT0, K, J);
    asm.addi(J, J, 16);
    // {w[j-15] .. w[j-12]} and {w[j-7] .. w[j-4]}.
    asm.vsrdq(VT1, w0, w1, 4);
    asm.vsrdq(VT2, w2, w3, 4);
    asm.vsrdq(VT3, w3, w3, 8);
    asm.vshasig_w(VT1, VT1, false, false);
    asm.vshasig_w(VT3, VT3, false, true);
    asm.vadd_w(VT2, VT1, VT2);
    asm.vadd_w(VT2, VT2, w0);
    // Lanes 0 and 1 of CH become w[j] and w[j+1]; their small sigmas feed
    // lanes 2 and 3.
    asm.vadd_w(CH, VT2, VT3);
    asm.vshasig_w(VT1, CH, false, true);
    asm.vmrg_d(VT3, VT3, VT1);
    asm.vadd_w(w0, VT2, VT3);

    asm.vadd_w(KPW[0], w0, VT0);
    asm.vsrdq(KPW[1], KPW[0], KPW[0], 4);
    asm.vsrdq(KPW[2], KPW[0], KPW[0], 8);
    asm.vsrdq(KPW[3], KPW[0], KPW[0], 12);
}

/// Builds the byte-swap permute control in `CTL`: byte `i` selects source
/// byte `i ^ 3`, flipping each word's endianness under `vperm`.
fn emit_bswap_ctl(asm: &mut Assembler) {
    asm.li(OFT, 8);
    asm.vlpc(VT0, OFT, Gpr::Zero);
    asm.vsplti_b(VT1, 11);
    asm.vxor(CTL, VT0, VT1);
}

/// Loads the eight state words packed into `HS[0]` (a..d) and `HS[4]` (e..h).
fn emit_load_state(asm: &mut Assembler) {
    let aligned = asm.create_label();

    asm.andi(ALN, STATE, 0xF);
    asm.li(OFT, 16);
    asm.vlx(HS[0], STATE, Gpr::Zero);
    asm.vlx(HS[4], STATE, OFT);
    asm.beqz(ALN, aligned);
    asm.vlpc(CTL, STATE, Gpr::Zero);
    asm.li(OFT, 32);
    asm.vlx(VT0, STATE, OFT);
    asm.vperm(HS[0], HS[0], HS[4], CTL);
    asm.vperm(HS[4], HS[4], VT0, CTL);
    asm.bind_label(aligned);
}

/// Loads one 64-byte block into `WS` and byte-swaps each word to host order.
fn emit_load_block(asm: &mut Assembler) {
    let aligned = asm.create_label();
    let loaded = asm.create_label();

    asm.andi(ALN, BUF, 0xF);
    asm.vlx(WS[0], BUF, Gpr::Zero);
    asm.beqz(ALN, aligned);
    // Realign through the next aligned vector at each step.
    asm.vlpc(CTL, BUF, Gpr::Zero);
    asm.li(OFT, 16);
    asm.vlx(WS[1], BUF, OFT);
    asm.vperm(WS[0], WS[0], WS[1], CTL);
    asm.li(OFT, 32);
    asm.vlx(WS[2], BUF, OFT);
    asm.vperm(WS[1], WS[1], WS[2], CTL);
    asm.li(OFT, 48);
    asm.vlx(WS[3], BUF, OFT);
    asm.vperm(WS[2], WS[2], WS[3], CTL);
    asm.li(OFT, 64);
    asm.vlx(VT0, BUF, OFT);
    asm.vperm(WS[3], WS[3], VT0, CTL);
    asm.j(loaded);
    asm.bind_label(aligned);
    asm.li(OFT, 16);
    asm.vlx(WS[1], BUF, OFT);
    asm.li(OFT, 32);
    asm.vlx(WS[2], BUF, OFT);
    asm.li(OFT, 48);
    asm.vlx(WS[3], BUF, OFT);
    asm.bind_label(loaded);

    emit_bswap_ctl(asm);
    for w in WS {
        asm.vperm(w, w, w, CTL);
    }
}

/// Adds the block's contribution back into the state in memory and leaves the
/// packed result in `HS[0]`/`HS[4]` for the next block.
fn emit_update_state(asm: &mut Assembler) {
    let loaded = asm.create_label();
    let unaligned_store = asm.create_label();
    let stored = asm.create_label();

    asm.andi(ALN, STATE, 0xF);
    asm.li(OFT, 16);
    asm.vlx(VT0, STATE, Gpr::Zero);
    asm.vlx(VT1, STATE, OFT);
    asm.beqz(ALN, loaded);
    asm.vlpc(CTL, STATE, Gpr::Zero);
    asm.li(OFT, 32);
    asm.vlx(VT2, STATE, OFT);
    asm.vperm(VT0, VT0, VT1, CTL);
    asm.vperm(VT1, VT1, VT2, CTL);
    asm.bind_label(loaded);

    // 64 rounds realign the roles, so a..h sit in HS[0..8] again. Gather
    // lane zero of each into two packed quads.
    asm.vzip_w(VT2, HS[0], HS[1]);
    asm.vzip_w(VT3, HS[2], HS[3]);
    asm.vmrg_d(VT2, VT2, VT3);
    asm.vzip_w(CH, HS[4], HS[5]);
    asm.vzip_w(MAJ, HS[6], HS[7]);
    asm.vmrg_d(CH, CH, MAJ);
    asm.vadd_w(HS[0], VT0, VT2);
    asm.vadd_w(HS[4], VT1, CH);

    asm.bnez(ALN, unaligned_store);
    asm.vsx(HS[0], STATE, Gpr::Zero);
    asm.li(OFT, 16);
    asm.vsx(HS[4], STATE, OFT);
    asm.j(stored);
    asm.bind_label(unaligned_store);
    asm.vmv_x_d(OFT, HS[0], 0);
    asm.sd(OFT, STATE, 0);
    asm.vmv_x_d(OFT, HS[0], 1);
    asm.sd(OFT, STATE, 8);
    asm.vmv_x_d(OFT, HS[4], 0);
    asm.sd(OFT, STATE, 16);
    asm.vmv_x_d(OFT, HS[4], 1);
    asm.sd(OFT, STATE, 24);
    asm.bind_label(stored);
}

/// Emits the SHA-256 compression routine at the current buffer position.
///
/// Returns the routine's entry offset within the buffer.
pub fn emit_sha256_compress(
    asm: &mut Assembler,
    tables: &IntrinsicTables,
    multi_block: bool,
) -> usize {
    let entry = asm.offset();

    for (i, &v) in SAVED.iter().enumerate() {
        asm.li(OFT, -16 * (i as i64 + 1));
        asm.vsx(v, Gpr::Sp, OFT);
    }
    asm.li(K, tables.sha256_k as i64);
    emit_load_state(asm);

    asm.align(16);
    let block_loop = asm.create_label();
    asm.bind_label(block_loop);

    // Unpack b..d and f..h from the packed state quads.
    asm.vsrdq(HS[1], HS[0], HS[0], 4);
    asm.vsrdq(HS[2], HS[0], HS[0], 8);
    asm.vsrdq(HS[3], HS[0], HS[0], 12);
    asm.vsrdq(HS[5], HS[4], HS[4], 4);
    asm.vsrdq(HS[6], HS[4], HS[4], 8);
    asm.vsrdq(HS[7], HS[4], HS[4], 12);

    emit_load_block(asm);

    let mut rounds = 0usize;

    // Rounds 0..16 straight from the loaded schedule.
    for n in 0..4 {
        if n == 0 {
            asm.vlx(KPW[n], K, Gpr::Zero);
        } else {
            asm.li(OFT, 16 * n as i64);
            asm.vlx(KPW[n], K, OFT);
        }
        asm.vadd_w(KPW[n], KPW[n], WS[n]);
    }
    for n in 0..4 {
        asm.vsrdq(AUX[0], KPW[n], KPW[n], 4);
        asm.vsrdq(AUX[1], KPW[n], KPW[n], 8);
        asm.vsrdq(AUX[2], KPW[n], KPW[n], 12);
        emit_round(asm, &mut rounds, KPW[n]);
        emit_round(asm, &mut rounds, AUX[0]);
        emit_round(asm, &mut rounds, AUX[1]);
        emit_round(asm, &mut rounds, AUX[2]);
    }

    // Rounds 16..64, sixteen per trip.
    asm.li(J, 64);
    asm.li(CNT, 3);
    asm.align(16);
    let core_loop = asm.create_label();
    asm.bind_label(core_loop);
    for step in 0..4 {
        let win = [
            WS[step % 4],
            WS[(step + 1) % 4],
            WS[(step + 2) % 4],
            WS[(step + 3) % 4],
        ];
        emit_calc_4w(asm, win);
        for kpw in KPW {
            emit_round(asm, &mut rounds, kpw);
        }
    }
    debug_assert_eq!(rounds % 8, 0);
    asm.addi(CNT, CNT, -1);
    asm.bnez(CNT, core_loop);

    emit_update_state(asm);

    if multi_block {
        let finished = asm.create_label();
        asm.addi(BUF, BUF, 64);
        asm.addi(OFS, OFS, 64);
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
        let entry = emit_sha256_compress(&mut asm, &tables, false);
        assert_eq!(entry, 0);
        let code = asm.finish();
        assert!(code.len() > 400 * 4);
        assert_eq!(code.len() % 4, 0);
    }

    #[test]
    fn multi_block_is_longer() {
        let tables = IntrinsicTables::new(0x1000, 0x2000);
        let mut single = Assembler::new();
        emit_sha256_compress(&mut single, &tables, false);
        let mut multi = Assembler::new();
        emit_sha256_compress(&mut multi, &tables, true);
        assert!(multi.finish().len() > single.finish().len());
    }
}
