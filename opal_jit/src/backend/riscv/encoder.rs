//! Scalar instruction encoder for the RV64 target.
//!
//! Every instruction is a single little-endian 32-bit word built from one of
//! six field layouts:
//!
//! ```text
//! R: funct7[31:25] rs2[24:20] rs1[19:15] funct3[14:12] rd[11:7]  opcode[6:0]
//! I: imm12[31:20]             rs1[19:15] funct3[14:12] rd[11:7]  opcode[6:0]
//! S: imm[11:5]     rs2[24:20] rs1[19:15] funct3[14:12] imm[4:0]  opcode[6:0]
//! B: imm[12|10:5]  rs2[24:20] rs1[19:15] funct3[14:12] imm[4:1|11] opcode
//! U: imm[31:12]                                        rd[11:7]  opcode[6:0]
//! J: imm[20|10:1|11|19:12]                             rd[11:7]  opcode[6:0]
//! ```
//!
//! Immediate encoders assert range and alignment; a displacement that does
//! not fit its field is a fatal code-generation error, never silently
//! truncated.
//!
//! # Performance Notes
//! - All encoding functions are `const fn` and `#[inline]`
//! - Branch-field masks are derived by encoding an all-ones displacement, so
//!   each field layout is written down exactly once

use super::registers::Gpr;

// =============================================================================
// Opcodes
// =============================================================================

/// Major opcode field values (bits 6:0).
pub mod opcode {
    pub const LOAD: u32 = 0x03;
    pub const MISC_MEM: u32 = 0x0F;
    pub const OP_IMM: u32 = 0x13;
    pub const AUIPC: u32 = 0x17;
    pub const OP_IMM_32: u32 = 0x1B;
    pub const STORE: u32 = 0x23;
    pub const AMO: u32 = 0x2F;
    pub const OP: u32 = 0x33;
    pub const LUI: u32 = 0x37;
    pub const OP_32: u32 = 0x3B;
    pub const BRANCH: u32 = 0x63;
    pub const JALR: u32 = 0x67;
    pub const JAL: u32 = 0x6F;
    pub const SYSTEM: u32 = 0x73;
    /// Custom space used by the vector extension (3-operand forms).
    pub const VEC: u32 = 0x0B;
    /// Custom space used by the vector extension (4-operand forms).
    pub const VEC4: u32 = 0x2B;
}

/// Extract the major opcode of an encoded word.
#[inline(always)]
pub const fn opcode_of(word: u32) -> u32 {
    word & 0x7F
}

/// Extract the rd field of an encoded word.
#[inline(always)]
pub const fn rd_of(word: u32) -> u32 {
    (word >> 7) & 0x1F
}

/// Extract the rs1 field of an encoded word.
#[inline(always)]
pub const fn rs1_of(word: u32) -> u32 {
    (word >> 15) & 0x1F
}

/// Extract the rs2 field of an encoded word.
#[inline(always)]
pub const fn rs2_of(word: u32) -> u32 {
    (word >> 20) & 0x1F
}

/// Extract the funct3 field of an encoded word.
#[inline(always)]
pub const fn funct3_of(word: u32) -> u32 {
    (word >> 12) & 0x7
}

/// Extract the funct7 field of an encoded word.
#[inline(always)]
pub const fn funct7_of(word: u32) -> u32 {
    word >> 25
}

// =============================================================================
// Range predicates
// =============================================================================

/// Whether `value` fits a signed immediate of `bits` width.
#[inline(always)]
pub const fn is_simm(value: i64, bits: u32) -> bool {
    let bound = 1i64 << (bits - 1);
    value >= -bound && value < bound
}

/// Whether `value` fits the 12-bit signed immediate of I/S-form instructions.
#[inline(always)]
pub const fn is_simm12(value: i64) -> bool {
    is_simm(value, 12)
}

// =============================================================================
// Field packers
// =============================================================================

#[inline(always)]
const fn rd(reg: Gpr) -> u32 {
    reg.encoding() << 7
}

#[inline(always)]
const fn rs1(reg: Gpr) -> u32 {
    reg.encoding() << 15
}

#[inline(always)]
const fn rs2(reg: Gpr) -> u32 {
    reg.encoding() << 20
}

#[inline(always)]
const fn funct3(f: u32) -> u32 {
    f << 12
}

#[inline(always)]
const fn funct7(f: u32) -> u32 {
    f << 25
}

// =============================================================================
// Immediate encoders
// =============================================================================

/// Encode a 12-bit signed immediate into the I-form field.
#[inline]
pub const fn imm_i(imm: i32) -> u32 {
    assert!(is_simm(imm as i64, 12), "immediate out of i-form range");
    ((imm as u32) & 0xFFF) << 20
}

/// Encode a 12-bit signed immediate into the S-form field pair.
#[inline]
pub const fn imm_s(imm: i32) -> u32 {
    assert!(is_simm(imm as i64, 12), "offset out of s-form range");
    let imm = imm as u32;
    (((imm >> 5) & 0x7F) << 25) | ((imm & 0x1F) << 7)
}

/// Encode a 13-bit signed, 2-aligned branch displacement into the B-form
/// field group.
#[inline]
pub const fn imm_b(disp: i32) -> u32 {
    assert!(is_simm(disp as i64, 13), "branch displacement out of range");
    assert!(disp & 1 == 0, "branch displacement must be 2-aligned");
    let d = disp as u32;
    (((d >> 12) & 0x1) << 31) | (((d >> 5) & 0x3F) << 25) | (((d >> 1) & 0xF) << 8)
        | (((d >> 11) & 0x1) << 7)
}

/// Encode a 20-bit upper immediate into the U-form field.
#[inline]
pub const fn imm_u(imm: u32) -> u32 {
    assert!(imm < (1 << 20), "upper immediate out of range");
    imm << 12
}

/// Encode a 21-bit signed, 2-aligned jump displacement into the J-form
/// field group.
#[inline]
pub const fn imm_j(disp: i32) -> u32 {
    assert!(is_simm(disp as i64, 21), "jump displacement out of range");
    assert!(disp & 1 == 0, "jump displacement must be 2-aligned");
    let d = disp as u32;
    (((d >> 20) & 0x1) << 31) | (((d >> 1) & 0x3FF) << 21) | (((d >> 11) & 0x1) << 20)
        | (((d >> 12) & 0xFF) << 12)
}

#[inline(always)]
const fn sext(value: u32, bits: u32) -> i32 {
    ((value << (32 - bits)) as i32) >> (32 - bits)
}

/// Decode the I-form immediate of an encoded word.
#[inline]
pub const fn decode_imm_i(word: u32) -> i32 {
    sext(word >> 20, 12)
}

/// Decode the B-form branch displacement of an encoded word.
#[inline]
pub const fn decode_imm_b(word: u32) -> i32 {
    let d = (((word >> 31) & 0x1) << 12)
        | (((word >> 7) & 0x1) << 11)
        | (((word >> 25) & 0x3F) << 5)
        | (((word >> 8) & 0xF) << 1);
    sext(d, 13)
}

/// Decode the J-form jump displacement of an encoded word.
#[inline]
pub const fn decode_imm_j(word: u32) -> i32 {
    let d = (((word >> 31) & 0x1) << 20)
        | (((word >> 12) & 0xFF) << 12)
        | (((word >> 20) & 0x1) << 11)
        | (((word >> 21) & 0x3FF) << 1);
    sext(d, 21)
}

// =============================================================================
// Format encoders
// =============================================================================

/// Encode an R-form instruction.
#[inline]
pub const fn encode_r(op: u32, f3: u32, f7: u32, d: Gpr, s1: Gpr, s2: Gpr) -> u32 {
    funct7(f7) | rs2(s2) | rs1(s1) | funct3(f3) | rd(d) | op
}

/// Encode an I-form instruction.
#[inline]
pub const fn encode_i(op: u32, f3: u32, d: Gpr, s1: Gpr, imm: i32) -> u32 {
    imm_i(imm) | rs1(s1) | funct3(f3) | rd(d) | op
}

/// Encode an S-form instruction.
#[inline]
pub const fn encode_s(op: u32, f3: u32, s1: Gpr, s2: Gpr, imm: i32) -> u32 {
    imm_s(imm) | rs2(s2) | rs1(s1) | funct3(f3) | op
}

/// Encode a B-form instruction.
#[inline]
pub const fn encode_b(op: u32, f3: u32, s1: Gpr, s2: Gpr, disp: i32) -> u32 {
    imm_b(disp) | rs2(s2) | rs1(s1) | funct3(f3) | op
}

/// Encode a U-form instruction.
#[inline]
pub const fn encode_u(op: u32, d: Gpr, imm: u32) -> u32 {
    imm_u(imm) | rd(d) | op
}

/// Encode a J-form instruction.
#[inline]
pub const fn encode_j(op: u32, d: Gpr, disp: i32) -> u32 {
    imm_j(disp) | rd(d) | op
}

// =============================================================================
// Instruction encoders: ALU
// =============================================================================

macro_rules! op_imm {
    ($name:ident, $f3:expr) => {
        #[doc = concat!("Encode `", stringify!($name), " rd, rs1, imm`.")]
        #[inline]
        pub const fn $name(d: Gpr, s: Gpr, imm: i32) -> u32 {
            encode_i(opcode::OP_IMM, $f3, d, s, imm)
        }
    };
}

op_imm!(encode_addi, 0b000);
op_imm!(encode_slti, 0b010);
op_imm!(encode_sltiu, 0b011);
op_imm!(encode_xori, 0b100);
op_imm!(encode_ori, 0b110);
op_imm!(encode_andi, 0b111);

/// Encode `addiw rd, rs1, imm` (32-bit add, sign-extended result).
#[inline]
pub const fn encode_addiw(d: Gpr, s: Gpr, imm: i32) -> u32 {
    encode_i(opcode::OP_IMM_32, 0b000, d, s, imm)
}

#[inline]
const fn shift_imm64(shamt: u32) -> i32 {
    assert!(shamt < 64, "shift amount out of range");
    shamt as i32
}

/// Encode `slli rd, rs1, shamt` (64-bit).
#[inline]
pub const fn encode_slli(d: Gpr, s: Gpr, shamt: u32) -> u32 {
    encode_i(opcode::OP_IMM, 0b001, d, s, shift_imm64(shamt))
}

/// Encode `srli rd, rs1, shamt` (64-bit logical).
#[inline]
pub const fn encode_srli(d: Gpr, s: Gpr, shamt: u32) -> u32 {
    encode_i(opcode::OP_IMM, 0b101, d, s, shift_imm64(shamt))
}

/// Encode `srai rd, rs1, shamt` (64-bit arithmetic).
#[inline]
pub const fn encode_srai(d: Gpr, s: Gpr, shamt: u32) -> u32 {
    encode_i(opcode::OP_IMM, 0b101, d, s, shift_imm64(shamt) | 0x400)
}

/// Encode `slliw rd, rs1, shamt` (32-bit).
#[inline]
pub const fn encode_slliw(d: Gpr, s: Gpr, shamt: u32) -> u32 {
    assert!(shamt < 32, "shift amount out of range");
    encode_i(opcode::OP_IMM_32, 0b001, d, s, shamt as i32)
}

/// Encode `srliw rd, rs1, shamt` (32-bit logical).
#[inline]
pub const fn encode_srliw(d: Gpr, s: Gpr, shamt: u32) -> u32 {
    assert!(shamt < 32, "shift amount out of range");
    encode_i(opcode::OP_IMM_32, 0b101, d, s, shamt as i32)
}

/// Encode `sraiw rd, rs1, shamt` (32-bit arithmetic).
#[inline]
pub const fn encode_sraiw(d: Gpr, s: Gpr, shamt: u32) -> u32 {
    assert!(shamt < 32, "shift amount out of range");
    encode_i(opcode::OP_IMM_32, 0b101, d, s, shamt as i32 | 0x400)
}

macro_rules! op_rrr {
    ($name:ident, $op:expr, $f3:expr, $f7:expr) => {
        #[doc = concat!("Encode `", stringify!($name), " rd, rs1, rs2`.")]
        #[inline]
        pub const fn $name(d: Gpr, s1: Gpr, s2: Gpr) -> u32 {
            encode_r($op, $f3, $f7, d, s1, s2)
        }
    };
}

op_rrr!(encode_add, opcode::OP, 0b000, 0b0000000);
op_rrr!(encode_sub, opcode::OP, 0b000, 0b0100000);
op_rrr!(encode_sll, opcode::OP, 0b001, 0b0000000);
op_rrr!(encode_slt, opcode::OP, 0b010, 0b0000000);
op_rrr!(encode_sltu, opcode::OP, 0b011, 0b0000000);
op_rrr!(encode_xor, opcode::OP, 0b100, 0b0000000);
op_rrr!(encode_srl, opcode::OP, 0b101, 0b0000000);
op_rrr!(encode_sra, opcode::OP, 0b101, 0b0100000);
op_rrr!(encode_or, opcode::OP, 0b110, 0b0000000);
op_rrr!(encode_and, opcode::OP, 0b111, 0b0000000);
op_rrr!(encode_addw, opcode::OP_32, 0b000, 0b0000000);
op_rrr!(encode_subw, opcode::OP_32, 0b000, 0b0100000);
op_rrr!(encode_sllw, opcode::OP_32, 0b001, 0b0000000);
op_rrr!(encode_srlw, opcode::OP_32, 0b101, 0b0000000);
op_rrr!(encode_sraw, opcode::OP_32, 0b101, 0b0100000);

/// Encode `lui rd, imm20`.
#[inline]
pub const fn encode_lui(d: Gpr, imm20: u32) -> u32 {
    encode_u(opcode::LUI, d, imm20)
}

/// Encode `auipc rd, imm20`.
#[inline]
pub const fn encode_auipc(d: Gpr, imm20: u32) -> u32 {
    encode_u(opcode::AUIPC, d, imm20)
}

// =============================================================================
// Instruction encoders: loads and stores
// =============================================================================

macro_rules! load {
    ($name:ident, $f3:expr) => {
        #[doc = concat!("Encode `", stringify!($name), " rd, offset(rs1)`.")]
        #[inline]
        pub const fn $name(d: Gpr, base: Gpr, offset: i32) -> u32 {
            encode_i(opcode::LOAD, $f3, d, base, offset)
        }
    };
}

load!(encode_lb, 0b000);
load!(encode_lh, 0b001);
load!(encode_lw, 0b010);
load!(encode_ld, 0b011);
load!(encode_lbu, 0b100);
load!(encode_lhu, 0b101);
load!(encode_lwu, 0b110);

macro_rules! store {
    ($name:ident, $f3:expr) => {
        #[doc = concat!("Encode `", stringify!($name), " rs2, offset(rs1)`.")]
        #[inline]
        pub const fn $name(src: Gpr, base: Gpr, offset: i32) -> u32 {
            encode_s(opcode::STORE, $f3, base, src, offset)
        }
    };
}

store!(encode_sb, 0b000);
store!(encode_sh, 0b001);
store!(encode_sw, 0b010);
store!(encode_sd, 0b011);

// =============================================================================
// Instruction encoders: control transfer
// =============================================================================

macro_rules! branch {
    ($name:ident, $f3:expr) => {
        #[doc = concat!("Encode `", stringify!($name), " rs1, rs2, disp`.")]
        #[inline]
        pub const fn $name(s1: Gpr, s2: Gpr, disp: i32) -> u32 {
            encode_b(opcode::BRANCH, $f3, s1, s2, disp)
        }
    };
}

branch!(encode_beq, 0b000);
branch!(encode_bne, 0b001);
branch!(encode_blt, 0b100);
branch!(encode_bge, 0b101);
branch!(encode_bltu, 0b110);
branch!(encode_bgeu, 0b111);

/// Encode `jal rd, disp`.
#[inline]
pub const fn encode_jal(d: Gpr, disp: i32) -> u32 {
    encode_j(opcode::JAL, d, disp)
}

/// Encode `jalr rd, rs1, offset`.
#[inline]
pub const fn encode_jalr(d: Gpr, base: Gpr, offset: i32) -> u32 {
    encode_i(opcode::JALR, 0b000, d, base, offset)
}

// =============================================================================
// Instruction encoders: fences, system, atomics
// =============================================================================

/// Memory-access kinds for fence predecessor/successor sets.
pub mod fence_bits {
    pub const W: u32 = 0b0001;
    pub const R: u32 = 0b0010;
    pub const RW: u32 = R | W;
    pub const IORW: u32 = 0b1111;
}

/// Encode `fence pred, succ`.
#[inline]
pub const fn encode_fence(pred: u32, succ: u32) -> u32 {
    assert!(pred <= 0xF && succ <= 0xF, "fence set out of range");
    (pred << 24) | (succ << 20) | funct3(0b000) | opcode::MISC_MEM
}

/// Encode `ecall`.
#[inline]
pub const fn encode_ecall() -> u32 {
    opcode::SYSTEM
}

/// Encode `ebreak`.
#[inline]
pub const fn encode_ebreak() -> u32 {
    (1 << 20) | opcode::SYSTEM
}

#[inline]
const fn encode_amo(funct5: u32, f3: u32, d: Gpr, addr: Gpr, src: Gpr, aq: bool, rl: bool) -> u32 {
    (funct5 << 27)
        | ((aq as u32) << 26)
        | ((rl as u32) << 25)
        | rs2(src)
        | rs1(addr)
        | funct3(f3)
        | rd(d)
        | opcode::AMO
}

/// Encode `lr.w rd, (rs1)`.
#[inline]
pub const fn encode_lr_w(d: Gpr, addr: Gpr, aq: bool, rl: bool) -> u32 {
    encode_amo(0b00010, 0b010, d, addr, Gpr::Zero, aq, rl)
}

/// Encode `sc.w rd, rs2, (rs1)`.
#[inline]
pub const fn encode_sc_w(d: Gpr, src: Gpr, addr: Gpr, aq: bool, rl: bool) -> u32 {
    encode_amo(0b00011, 0b010, d, addr, src, aq, rl)
}

/// Encode `lr.d rd, (rs1)`.
#[inline]
pub const fn encode_lr_d(d: Gpr, addr: Gpr, aq: bool, rl: bool) -> u32 {
    encode_amo(0b00010, 0b011, d, addr, Gpr::Zero, aq, rl)
}

/// Encode `sc.d rd, rs2, (rs1)`.
#[inline]
pub const fn encode_sc_d(d: Gpr, src: Gpr, addr: Gpr, aq: bool, rl: bool) -> u32 {
    encode_amo(0b00011, 0b011, d, addr, src, aq, rl)
}

/// Encode `amoswap.w rd, rs2, (rs1)`.
#[inline]
pub const fn encode_amoswap_w(d: Gpr, src: Gpr, addr: Gpr, aq: bool, rl: bool) -> u32 {
    encode_amo(0b00001, 0b010, d, addr, src, aq, rl)
}

/// Encode `amoswap.d rd, rs2, (rs1)`.
#[inline]
pub const fn encode_amoswap_d(d: Gpr, src: Gpr, addr: Gpr, aq: bool, rl: bool) -> u32 {
    encode_amo(0b00001, 0b011, d, addr, src, aq, rl)
}

/// Encode `amoadd.w rd, rs2, (rs1)`.
#[inline]
pub const fn encode_amoadd_w(d: Gpr, src: Gpr, addr: Gpr, aq: bool, rl: bool) -> u32 {
    encode_amo(0b00000, 0b010, d, addr, src, aq, rl)
}

/// Encode `amoadd.d rd, rs2, (rs1)`.
#[inline]
pub const fn encode_amoadd_d(d: Gpr, src: Gpr, addr: Gpr, aq: bool, rl: bool) -> u32 {
    encode_amo(0b00000, 0b011, d, addr, src, aq, rl)
}

// =============================================================================
// Branch-class decode and patching
// =============================================================================

/// Classes of instruction that embed a patchable target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchClass {
    /// Conditional branch: 13-bit displacement (B-form).
    Conditional,
    /// Register-indirect jump: 12-bit immediate (I-form).
    IndirectJump,
    /// Unconditional jump: 21-bit displacement (J-form).
    Jump,
}

impl BranchClass {
    /// Classify an encoded word by its opcode.
    #[inline]
    pub const fn decode(word: u32) -> Option<BranchClass> {
        match opcode_of(word) {
            opcode::BRANCH => Some(BranchClass::Conditional),
            opcode::JALR => Some(BranchClass::IndirectJump),
            opcode::JAL => Some(BranchClass::Jump),
            _ => None,
        }
    }
}

/// Rewrite the target field of a previously emitted branch so that it
/// transfers to `dest_pos`.
///
/// `inst_pos` is the byte offset the instruction was emitted at; both
/// positions are relative to the same code-buffer base. The branch class is
/// re-derived from the word itself. Fatal if the word is not a branch or the
/// displacement does not fit its field.
#[track_caller]
pub fn patched_branch(dest_pos: usize, inst: u32, inst_pos: usize) -> u32 {
    let disp = dest_pos as i64 - inst_pos as i64;
    assert!(
        is_simm(disp, 32),
        "branch displacement overflows the code buffer"
    );
    let disp = disp as i32;
    let (mask, value) = match BranchClass::decode(inst) {
        // Encoding an all-ones displacement lights every field bit, which is
        // exactly the field mask for that class.
        Some(BranchClass::Conditional) => (imm_b(-2), imm_b(disp)),
        Some(BranchClass::IndirectJump) => (imm_i(-1), imm_i(disp)),
        Some(BranchClass::Jump) => (imm_j(-2), imm_j(disp)),
        None => panic!("cannot patch non-branch instruction {inst:#010x}"),
    };
    (inst & !mask) | value
}

/// Absolute target offset of an emitted branch at `inst_pos`.
///
/// Inverse of [`patched_branch`]:
/// `branch_destination(patched_branch(t, w, p), p) == t`.
#[track_caller]
pub fn branch_destination(inst: u32, inst_pos: usize) -> usize {
    let disp = match BranchClass::decode(inst) {
        Some(BranchClass::Conditional) => decode_imm_b(inst),
        Some(BranchClass::IndirectJump) => decode_imm_i(inst),
        Some(BranchClass::Jump) => decode_imm_j(inst),
        None => panic!("cannot read target of non-branch instruction {inst:#010x}"),
    };
    (inst_pos as i64 + disp as i64) as usize
}

// =============================================================================
// Tests
// =============================================================================
