//! Vector instruction encoder for the 128-bit permute extension.
//!
//! The target carries a small custom SIMD extension in the `custom-0` and
//! `custom-1` opcode spaces. Thirty-two 128-bit registers (`v0`..`v31`) hold
//! packed lanes in little-endian order: byte lane `i` occupies bits
//! `[8i+7 : 8i]`, halfword lane `i` bits `[16i+15 : 16i]`, word lane `i`
//! bits `[32i+31 : 32i]`, and doubleword lane `i` bits `[64i+63 : 64i]`.
//! Lane 0 is always the least significant lane.
//!
//! Three-operand instructions use the scalar R layout on the `VEC` opcode,
//! with `funct3` selecting an operation group and `funct7` the member:
//!
//! ```text
//! funct7[31:25] vs2[24:20] vs1[19:15] funct3[14:12] vd[11:7] 0001011
//! ```
//!
//! Four-operand instructions use the `VEC4` opcode with a third source (or a
//! byte-shift immediate) in the high field:
//!
//! ```text
//! vs3[31:27] 00[26:25] vs2[24:20] vs1[19:15] funct3[14:12] vd[11:7] 0101011
//! ```
//!
//! The doc comment on each encoding function below is the authoritative
//! description of that instruction's behavior; `sim::Simulator` executes
//! exactly what these comments say.
//!
//! # Performance Notes
//! - Memory forms force 16-byte alignment by masking the effective address,
//!   so the hardware never needs an unaligned vector path; misaligned input
//!   is handled in software with `vlpc` + `vperm`
//! - Sigma functions ship as one fused instruction per flavor because the
//!   rotate-rotate-shift-xor chains dominate hash round latency

use super::encoder::opcode;
use super::registers::{Gpr, Vr};

// =============================================================================
// Operation selectors
// =============================================================================

/// `funct3` group and `funct7` member values for the vector opcodes.
pub mod vfunct {
    /// Memory group: `vlx`, `vsx`, `vlpc`.
    pub const F3_MEM: u32 = 0b000;
    /// Bitwise group: `vxor`, `vand`, `vor`.
    pub const F3_BITWISE: u32 = 0b001;
    /// Lane-wise modular addition: `vadd.w`, `vadd.d`.
    pub const F3_ADD: u32 = 0b010;
    /// Lane-wise rotates and shifts: `vrl.h`, `vrl.w`, `vrl.d`, `vsll.w`.
    pub const F3_SHIFT: u32 = 0b011;
    /// Lane rearrangement: `vzip.w`, `vmrg.d`.
    pub const F3_REARRANGE: u32 = 0b100;
    /// Immediate splats: `vsplti.b`, `vsplti.h`, `vsplti.w`.
    pub const F3_SPLAT: u32 = 0b101;
    /// Fused SHA sigma functions: `vshasig.w`, `vshasig.d`.
    pub const F3_SHASIG: u32 = 0b110;
    /// Lane extraction to a scalar register: `vmv.x.d`.
    pub const F3_MOVE: u32 = 0b111;

    pub const MEM_VLX: u32 = 0x00;
    pub const MEM_VSX: u32 = 0x01;
    pub const MEM_VLPC: u32 = 0x02;

    pub const BITWISE_VXOR: u32 = 0x00;
    pub const BITWISE_VAND: u32 = 0x01;
    pub const BITWISE_VOR: u32 = 0x02;

    pub const ADD_W: u32 = 0x00;
    pub const ADD_D: u32 = 0x01;

    pub const SHIFT_VRL_H: u32 = 0x00;
    pub const SHIFT_VRL_W: u32 = 0x01;
    pub const SHIFT_VRL_D: u32 = 0x02;
    pub const SHIFT_VSLL_W: u32 = 0x03;

    pub const REARRANGE_VZIP_W: u32 = 0x00;
    pub const REARRANGE_VMRG_D: u32 = 0x01;

    pub const SPLAT_B: u32 = 0x00;
    pub const SPLAT_H: u32 = 0x01;
    pub const SPLAT_W: u32 = 0x02;

    pub const SHASIG_W: u32 = 0x00;
    pub const SHASIG_D: u32 = 0x01;

    pub const MOVE_VMV_X_D: u32 = 0x00;

    /// `funct3` values for the four-operand opcode.
    pub const F3_VPERM: u32 = 0b000;
    pub const F3_VSEL: u32 = 0b001;
    pub const F3_VSRDQ: u32 = 0b010;
}

/// Extract the vs3 field (or byte-shift immediate) of a four-operand word.
#[inline(always)]
pub const fn vs3_of(word: u32) -> u32 {
    word >> 27
}

// =============================================================================
// Field packers
// =============================================================================

#[inline(always)]
const fn vd(reg: Vr) -> u32 {
    reg.encoding() << 7
}

#[inline(always)]
const fn vs1(reg: Vr) -> u32 {
    reg.encoding() << 15
}

#[inline(always)]
const fn vs2(reg: Vr) -> u32 {
    reg.encoding() << 20
}

#[inline(always)]
const fn vec_r(f3: u32, f7: u32, d: u32, s1: u32, s2: u32) -> u32 {
    (f7 << 25) | (s2 << 20) | (s1 << 15) | (f3 << 12) | (d << 7) | opcode::VEC
}

#[inline(always)]
const fn vec_r4(f3: u32, s3: u32, d: Vr, a: Vr, b: Vr) -> u32 {
    (s3 << 27) | vs2(b) | vs1(a) | (f3 << 12) | vd(d) | opcode::VEC4
}

// =============================================================================
// Memory
// =============================================================================

/// `vlx vd, base, index`: load `vd` from the 16-byte-aligned effective
/// address `(x[base] + x[index]) & !0xF`. The low four address bits are
/// ignored, never trapped on.
#[inline(always)]
pub const fn encode_vlx(d: Vr, base: Gpr, index: Gpr) -> u32 {
    vec_r(vfunct::F3_MEM, vfunct::MEM_VLX, d.encoding(), base.encoding(), index.encoding())
}

/// `vsx vs, base, index`: store `vs` to the 16-byte-aligned effective
/// address `(x[base] + x[index]) & !0xF`. The data register travels in the
/// `vd` slot.
#[inline(always)]
pub const fn encode_vsx(src: Vr, base: Gpr, index: Gpr) -> u32 {
    vec_r(vfunct::F3_MEM, vfunct::MEM_VSX, src.encoding(), base.encoding(), index.encoding())
}

/// `vlpc vd, base, index`: build the permute control for realigning a
/// misaligned stream. With `sh = (x[base] + x[index]) & 0xF`, byte lane `i`
/// of `vd` becomes `(sh + i) & 0x1F`. Feeding the result to `vperm` over two
/// adjacent aligned loads extracts the 16 misaligned bytes.
#[inline(always)]
pub const fn encode_vlpc(d: Vr, base: Gpr, index: Gpr) -> u32 {
    vec_r(vfunct::F3_MEM, vfunct::MEM_VLPC, d.encoding(), base.encoding(), index.encoding())
}

// =============================================================================
// Bitwise
// =============================================================================

/// `vxor vd, va, vb`: bitwise exclusive or of the full 128 bits.
#[inline(always)]
pub const fn encode_vxor(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_BITWISE, vfunct::BITWISE_VXOR, d.encoding(), a.encoding(), b.encoding())
}

/// `vand vd, va, vb`: bitwise and of the full 128 bits.
#[inline(always)]
pub const fn encode_vand(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_BITWISE, vfunct::BITWISE_VAND, d.encoding(), a.encoding(), b.encoding())
}

/// `vor vd, va, vb`: bitwise or of the full 128 bits. `vor vd, vs, vs` is
/// the canonical register copy.
#[inline(always)]
pub const fn encode_vor(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_BITWISE, vfunct::BITWISE_VOR, d.encoding(), a.encoding(), b.encoding())
}

// =============================================================================
// Arithmetic
// =============================================================================

/// `vadd.w vd, va, vb`: modular addition of the four 32-bit word lanes.
#[inline(always)]
pub const fn encode_vadd_w(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_ADD, vfunct::ADD_W, d.encoding(), a.encoding(), b.encoding())
}

/// `vadd.d vd, va, vb`: modular addition of the two 64-bit doubleword lanes.
#[inline(always)]
pub const fn encode_vadd_d(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_ADD, vfunct::ADD_D, d.encoding(), a.encoding(), b.encoding())
}

// =============================================================================
// Rotates and shifts
// =============================================================================

/// `vrl.h vd, va, vb`: rotate each 16-bit lane of `va` left by the amount in
/// the corresponding lane of `vb`, reduced modulo 16.
#[inline(always)]
pub const fn encode_vrl_h(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_SHIFT, vfunct::SHIFT_VRL_H, d.encoding(), a.encoding(), b.encoding())
}

/// `vrl.w vd, va, vb`: rotate each 32-bit lane of `va` left by the amount in
/// the corresponding lane of `vb`, reduced modulo 32.
#[inline(always)]
pub const fn encode_vrl_w(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_SHIFT, vfunct::SHIFT_VRL_W, d.encoding(), a.encoding(), b.encoding())
}

/// `vrl.d vd, va, vb`: rotate each 64-bit lane of `va` left by the amount in
/// the corresponding lane of `vb`, reduced modulo 64.
#[inline(always)]
pub const fn encode_vrl_d(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_SHIFT, vfunct::SHIFT_VRL_D, d.encoding(), a.encoding(), b.encoding())
}

/// `vsll.w vd, va, vb`: shift each 32-bit lane of `va` left by the amount in
/// the corresponding lane of `vb`, reduced modulo 32. Vacated bits fill with
/// zero.
#[inline(always)]
pub const fn encode_vsll_w(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_SHIFT, vfunct::SHIFT_VSLL_W, d.encoding(), a.encoding(), b.encoding())
}

// =============================================================================
// Lane rearrangement
// =============================================================================

/// `vzip.w vd, va, vb`: interleave the low word lanes of the two sources,
/// `vd = { va.w0, vb.w0, va.w1, vb.w1 }`.
#[inline(always)]
pub const fn encode_vzip_w(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_REARRANGE, vfunct::REARRANGE_VZIP_W, d.encoding(), a.encoding(), b.encoding())
}

/// `vmrg.d vd, va, vb`: merge the low doublewords, `vd = { va.d0, vb.d0 }`.
#[inline(always)]
pub const fn encode_vmrg_d(d: Vr, a: Vr, b: Vr) -> u32 {
    vec_r(vfunct::F3_REARRANGE, vfunct::REARRANGE_VMRG_D, d.encoding(), a.encoding(), b.encoding())
}

// =============================================================================
// Splats
// =============================================================================

#[inline(always)]
const fn splat_imm5(imm: i32) -> u32 {
    assert!(imm >= -16 && imm <= 15, "splat immediate out of 5-bit range");
    (imm as u32) & 0x1F
}

/// `vsplti.b vd, imm`: broadcast the sign-extended 5-bit immediate to all
/// sixteen byte lanes.
#[inline(always)]
pub const fn encode_vsplti_b(d: Vr, imm: i32) -> u32 {
    vec_r(vfunct::F3_SPLAT, vfunct::SPLAT_B, d.encoding(), splat_imm5(imm), 0)
}

/// `vsplti.h vd, imm`: broadcast the sign-extended 5-bit immediate to all
/// eight halfword lanes.
#[inline(always)]
pub const fn encode_vsplti_h(d: Vr, imm: i32) -> u32 {
    vec_r(vfunct::F3_SPLAT, vfunct::SPLAT_H, d.encoding(), splat_imm5(imm), 0)
}

/// `vsplti.w vd, imm`: broadcast the sign-extended 5-bit immediate to all
/// four word lanes.
#[inline(always)]
pub const fn encode_vsplti_w(d: Vr, imm: i32) -> u32 {
    vec_r(vfunct::F3_SPLAT, vfunct::SPLAT_W, d.encoding(), splat_imm5(imm), 0)
}

// =============================================================================
// SHA sigma
// =============================================================================

/// `vshasig.w vd, va, ctl`: apply one SHA-256 sigma function to each 32-bit
/// lane. `ctl` bit 1 selects the big (uppercase) flavor, bit 0 the second
/// member of the pair:
///
/// ```text
/// ctl = 0b00  s0(x) = (x >>> 7)  ^ (x >>> 18) ^ (x >> 3)
/// ctl = 0b01  s1(x) = (x >>> 17) ^ (x >>> 19) ^ (x >> 10)
/// ctl = 0b10  S0(x) = (x >>> 2)  ^ (x >>> 13) ^ (x >>> 22)
/// ctl = 0b11  S1(x) = (x >>> 6)  ^ (x >>> 11) ^ (x >>> 25)
/// ```
#[inline(always)]
pub const fn encode_vshasig_w(d: Vr, a: Vr, big: bool, second: bool) -> u32 {
    let ctl = ((big as u32) << 1) | second as u32;
    vec_r(vfunct::F3_SHASIG, vfunct::SHASIG_W, d.encoding(), a.encoding(), ctl)
}

/// `vshasig.d vd, va, ctl`: apply one SHA-512 sigma function to each 64-bit
/// lane, with the same `ctl` selection as `vshasig.w`:
///
/// ```text
/// ctl = 0b00  s0(x) = (x >>> 1)  ^ (x >>> 8)  ^ (x >> 7)
/// ctl = 0b01  s1(x) = (x >>> 19) ^ (x >>> 61) ^ (x >> 6)
/// ctl = 0b10  S0(x) = (x >>> 28) ^ (x >>> 34) ^ (x >>> 39)
/// ctl = 0b11  S1(x) = (x >>> 14) ^ (x >>> 18) ^ (x >>> 41)
/// ```
#[inline(always)]
pub const fn encode_vshasig_d(d: Vr, a: Vr, big: bool, second: bool) -> u32 {
    let ctl = ((big as u32) << 1) | second as u32;
    vec_r(vfunct::F3_SHASIG, vfunct::SHASIG_D, d.encoding(), a.encoding(), ctl)
}

// =============================================================================
// Lane extraction
// =============================================================================

/// `vmv.x.d rd, va, lane`: copy doubleword lane 0 or 1 of `va` into the
/// scalar register `rd`. The lane index travels in the `vs2` slot.
#[inline(always)]
pub const fn encode_vmv_x_d(d: Gpr, a: Vr, lane: u32) -> u32 {
    assert!(lane < 2, "doubleword lane index out of range");
    vec_r(vfunct::F3_MOVE, vfunct::MOVE_VMV_X_D, d.encoding(), a.encoding(), lane)
}

// =============================================================================
// Four-operand forms
// =============================================================================

/// `vperm vd, va, vb, vc`: full byte gather over the 32-byte pool formed by
/// `va` (bytes 0..15) followed by `vb` (bytes 16..31). Byte lane `i` of `vd`
/// becomes `pool[vc[i] & 0x1F]`.
#[inline(always)]
pub const fn encode_vperm(d: Vr, a: Vr, b: Vr, c: Vr) -> u32 {
    vec_r4(vfunct::F3_VPERM, c.encoding(), d, a, b)
}

/// `vsel vd, va, vb, vc`: bitwise select, `vd = (va & !vc) | (vb & vc)`.
/// Each result bit comes from `vb` where the mask bit is set and from `va`
/// where it is clear.
#[inline(always)]
pub const fn encode_vsel(d: Vr, a: Vr, b: Vr, c: Vr) -> u32 {
    vec_r4(vfunct::F3_VSEL, c.encoding(), d, a, b)
}

/// `vsrdq vd, va, vb, sh`: byte-wise funnel shift. Over the 32-byte pool of
/// `va` then `vb`, byte lane `i` of `vd` becomes `pool[i + sh]` with
/// `sh` in `0..=15`. With `va == vb` this rotates a single register right by
/// `sh` bytes, which is how lane deques are built.
#[inline(always)]
pub const fn encode_vsrdq(d: Vr, a: Vr, b: Vr, sh: u32) -> u32 {
    assert!(sh < 16, "funnel shift amount out of range");
    vec_r4(vfunct::F3_VSRDQ, sh, d, a, b)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::super::encoder::{funct3_of, funct7_of, opcode_of, rd_of, rs1_of, rs2_of};
    use super::*;

    #[test]
    fn memory_forms() {
        assert_eq!(encode_vlx(Vr::V2, Gpr::A0, Gpr::A1), 0x00B5010B);
        assert_eq!(encode_vsx(Vr::V3, Gpr::A0, Gpr::Zero), 0x0205018B);
        let w = encode_vlpc(Vr::V31, Gpr::T0, Gpr::T1);
        assert_eq!(opcode_of(w), 0x0B);
        assert_eq!(funct3_of(w), vfunct::F3_MEM);
        assert_eq!(funct7_of(w), vfunct::MEM_VLPC);
        assert_eq!(rd_of(w), 31);
        assert_eq!(rs1_of(w), 5);
        assert_eq!(rs2_of(w), 6);
    }

    #[test]
    fn bitwise_forms() {
        assert_eq!(encode_vxor(Vr::V1, Vr::V2, Vr::V3), 0x0031108B);
        let w = encode_vor(Vr::V7, Vr::V7, Vr::V7);
        assert_eq!(funct7_of(w), vfunct::BITWISE_VOR);
        assert_eq!(rd_of(w), rs1_of(w));
        assert_eq!(rs1_of(w), rs2_of(w));
    }

    #[test]
    fn add_forms() {
        assert_eq!(encode_vadd_w(Vr::V4, Vr::V5, Vr::V6), 0x0062A20B);
        let w = encode_vadd_d(Vr::V4, Vr::V5, Vr::V6);
        assert_eq!(funct7_of(w), vfunct::ADD_D);
    }

    #[test]
    fn splat_encodes_signed_immediate() {
        assert_eq!(encode_vsplti_b(Vr::V7, -1), 0x000FD38B);
        let w = encode_vsplti_w(Vr::V0, 15);
        assert_eq!(rs1_of(w), 15);
        let w = encode_vsplti_h(Vr::V0, -16);
        assert_eq!(rs1_of(w), 16);
    }

    #[test]
    #[should_panic]
    fn splat_rejects_wide_immediate() {
        let _ = encode_vsplti_b(Vr::V0, 16);
    }

    #[test]
    fn sigma_control_bits() {
        assert_eq!(encode_vshasig_w(Vr::V1, Vr::V2, true, false), 0x0021608B);
        assert_eq!(rs2_of(encode_vshasig_w(Vr::V0, Vr::V0, false, false)), 0b00);
        assert_eq!(rs2_of(encode_vshasig_w(Vr::V0, Vr::V0, false, true)), 0b01);
        assert_eq!(rs2_of(encode_vshasig_d(Vr::V0, Vr::V0, true, true)), 0b11);
        assert_eq!(funct7_of(encode_vshasig_d(Vr::V0, Vr::V0, true, true)), vfunct::SHASIG_D);
    }

    #[test]
    fn lane_move_selects_lane() {
        assert_eq!(encode_vmv_x_d(Gpr::A0, Vr::V3, 1), 0x0011F50B);
        assert_eq!(rs2_of(encode_vmv_x_d(Gpr::A0, Vr::V3, 0)), 0);
    }

    #[test]
    #[should_panic]
    fn lane_move_rejects_wide_lane() {
        let _ = encode_vmv_x_d(Gpr::A0, Vr::V3, 2);
    }

    #[test]
    fn four_operand_forms() {
        assert_eq!(encode_vperm(Vr::V1, Vr::V2, Vr::V3, Vr::V4), 0x203100AB);
        assert_eq!(encode_vsrdq(Vr::V1, Vr::V2, Vr::V3, 12), 0x603120AB);
        let w = encode_vsel(Vr::V9, Vr::V10, Vr::V11, Vr::V12);
        assert_eq!(opcode_of(w), 0x2B);
        assert_eq!(funct3_of(w), vfunct::F3_VSEL);
        assert_eq!(vs3_of(w), 12);
        assert_eq!(rs1_of(w), 10);
        assert_eq!(rs2_of(w), 11);
        assert_eq!(rd_of(w), 9);
    }

    #[test]
    #[should_panic]
    fn funnel_shift_rejects_wide_amount() {
        let _ = encode_vsrdq(Vr::V0, Vr::V0, Vr::V0, 16);
    }
}
