//! Word-to-instruction decode.
//!
//! One tagged variant per executable operation, grouped so the execute loop
//! stays a dense match. Decode is total over the subset the assembler emits;
//! any other word is reported, never skipped.

use crate::backend::riscv::encoder::{
    decode_imm_b, decode_imm_i, decode_imm_j, funct3_of, funct7_of, opcode, opcode_of, rd_of,
    rs1_of, rs2_of,
};
use crate::backend::riscv::simd::{vfunct, vs3_of};

/// Integer ALU operation, shared by the immediate and register forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
}

/// Scalar memory access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemWidth {
    B,
    H,
    W,
    D,
}

impl MemWidth {
    /// Access size in bytes.
    pub fn bytes(self) -> usize {
        match self {
            MemWidth::B => 1,
            MemWidth::H => 2,
            MemWidth::W => 4,
            MemWidth::D => 8,
        }
    }
}

/// Conditional branch comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

/// Bitwise vector operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VBitOp {
    Xor,
    And,
    Or,
}

/// Lane width for vector rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotLanes {
    H,
    W,
    D,
}

/// Lane width for immediate splats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplatLanes {
    B,
    H,
    W,
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Lui { rd: u8, imm: i64 },
    Auipc { rd: u8, imm: i64 },
    /// Immediate ALU op. For shifts `imm` carries the shift amount.
    AluImm { op: AluOp, word: bool, rd: u8, rs1: u8, imm: i64 },
    AluReg { op: AluOp, word: bool, rd: u8, rs1: u8, rs2: u8 },
    Load { width: MemWidth, signed: bool, rd: u8, rs1: u8, offset: i64 },
    Store { width: MemWidth, rs2: u8, rs1: u8, offset: i64 },
    Branch { cond: BranchCond, rs1: u8, rs2: u8, disp: i64 },
    Jal { rd: u8, disp: i64 },
    Jalr { rd: u8, rs1: u8, offset: i64 },
    Fence,
    Ecall,
    Ebreak,
    LoadReserved { word: bool, rd: u8, rs1: u8 },
    StoreConditional { word: bool, rd: u8, rs2: u8, rs1: u8 },
    AmoSwap { word: bool, rd: u8, rs2: u8, rs1: u8 },
    AmoAdd { word: bool, rd: u8, rs2: u8, rs1: u8 },
    Vlx { vd: u8, rs1: u8, rs2: u8 },
    Vsx { vs: u8, rs1: u8, rs2: u8 },
    Vlpc { vd: u8, rs1: u8, rs2: u8 },
    VBitwise { op: VBitOp, vd: u8, va: u8, vb: u8 },
    /// `wide` selects doubleword lanes over word lanes.
    VAdd { wide: bool, vd: u8, va: u8, vb: u8 },
    VRotl { lanes: RotLanes, vd: u8, va: u8, vb: u8 },
    VSllW { vd: u8, va: u8, vb: u8 },
    VZipW { vd: u8, va: u8, vb: u8 },
    VMrgD { vd: u8, va: u8, vb: u8 },
    VSplat { lanes: SplatLanes, vd: u8, imm: i8 },
    VShaSig { wide: bool, vd: u8, va: u8, big: bool, second: bool },
    VMvXD { rd: u8, va: u8, lane: u8 },
    VPerm { vd: u8, va: u8, vb: u8, vc: u8 },
    VSel { vd: u8, va: u8, vb: u8, vc: u8 },
    VSrdq { vd: u8, va: u8, vb: u8, sh: u8 },
}

fn alu_from_f3(f3: u32, sub_sra: bool) -> Option<AluOp> {
    Some(match (f3, sub_sra) {
        (0b000, false) => AluOp::Add,
        (0b000, true) => AluOp::Sub,
        (0b001, false) => AluOp::Sll,
        (0b010, false) => AluOp::Slt,
        (0b011, false) => AluOp::Sltu,
        (0b100, false) => AluOp::Xor,
        (0b101, false) => AluOp::Srl,
        (0b101, true) => AluOp::Sra,
        (0b110, false) => AluOp::Or,
        (0b111, false) => AluOp::And,
        _ => return None,
    })
}

/// Decode one instruction word. `None` means the word is not part of the
/// emitted subset.
pub fn decode(word: u32) -> Option<Instr> {
    let rd = rd_of(word) as u8;
    let rs1 = rs1_of(word) as u8;
    let rs2 = rs2_of(word) as u8;
    let f3 = funct3_of(word);
    let f7 = funct7_of(word);

    match opcode_of(word) {
        opcode::LUI => Some(Instr::Lui { rd, imm: ((word & 0xFFFF_F000) as i32) as i64 }),
        opcode::AUIPC => Some(Instr::Auipc { rd, imm: ((word & 0xFFFF_F000) as i32) as i64 }),
        opcode::OP_IMM => {
            let (op, imm) = match f3 {
                0b001 => (AluOp::Sll, (rs2_of(word) | ((f7 & 1) << 5)) as i64),
                0b101 => {
                    let shamt = (rs2_of(word) | ((f7 & 1) << 5)) as i64;
                    if word & 0x4000_0000 != 0 {
                        (AluOp::Sra, shamt)
                    } else {
                        (AluOp::Srl, shamt)
                    }
                }
                _ => (alu_from_f3(f3, false)?, decode_imm_i(word) as i64),
            };
            Some(Instr::AluImm { op, word: false, rd, rs1, imm })
        }
        opcode::OP_IMM_32 => {
            let (op, imm) = match f3 {
                0b000 => (AluOp::Add, decode_imm_i(word) as i64),
                0b001 => (AluOp::Sll, rs2_of(word) as i64),
                0b101 => {
                    if word & 0x4000_0000 != 0 {
                        (AluOp::Sra, rs2_of(word) as i64)
                    } else {
                        (AluOp::Srl, rs2_of(word) as i64)
                    }
                }
                _ => return None,
            };
            Some(Instr::AluImm { op, word: true, rd, rs1, imm })
        }
        opcode::OP => {
            let op = match f7 {
                0b0000000 => alu_from_f3(f3, false)?,
                0b0100000 => alu_from_f3(f3, true)?,
                _ => return None,
            };
            Some(Instr::AluReg { op, word: false, rd, rs1, rs2 })
        }
        opcode::OP_32 => {
            let op = match (f3, f7) {
                (0b000, 0b0000000) => AluOp::Add,
                (0b000, 0b0100000) => AluOp::Sub,
                (0b001, 0b0000000) => AluOp::Sll,
                (0b101, 0b0000000) => AluOp::Srl,
                (0b101, 0b0100000) => AluOp::Sra,
                _ => return None,
            };
            Some(Instr::AluReg { op, word: true, rd, rs1, rs2 })
        }
        opcode::LOAD => {
            let (width, signed) = match f3 {
                0b000 => (MemWidth::B, true),
                0b001 => (MemWidth::H, true),
                0b010 => (MemWidth::W, true),
                0b011 => (MemWidth::D, false),
                0b100 => (MemWidth::B, false),
                0b101 => (MemWidth::H, false),
                0b110 => (MemWidth::W, false),
                _ => return None,
            };
            Some(Instr::Load { width, signed, rd, rs1, offset: decode_imm_i(word) as i64 })
        }
        opcode::STORE => {
            let width = match f3 {
                0b000 => MemWidth::B,
                0b001 => MemWidth::H,
                0b010 => MemWidth::W,
                0b011 => MemWidth::D,
                _ => return None,
            };
            let raw = (((word >> 25) & 0x7F) << 5) | ((word >> 7) & 0x1F);
            let offset = (((raw << 20) as i32) >> 20) as i64;
            Some(Instr::Store { width, rs2, rs1, offset })
        }
        opcode::BRANCH => {
            let cond = match f3 {
                0b000 => BranchCond::Eq,
                0b001 => BranchCond::Ne,
                0b100 => BranchCond::Lt,
                0b101 => BranchCond::Ge,
                0b110 => BranchCond::Ltu,
                0b111 => BranchCond::Geu,
                _ => return None,
            };
            Some(Instr::Branch { cond, rs1, rs2, disp: decode_imm_b(word) as i64 })
        }
        opcode::JAL => Some(Instr::Jal { rd, disp: decode_imm_j(word) as i64 }),
        opcode::JALR if f3 == 0 => {
            Some(Instr::Jalr { rd, rs1, offset: decode_imm_i(word) as i64 })
        }
        opcode::MISC_MEM if f3 == 0 => Some(Instr::Fence),
        opcode::SYSTEM => match word >> 20 {
            0 => Some(Instr::Ecall),
            1 => Some(Instr::Ebreak),
            _ => None,
        },
        opcode::AMO => {
            let word_width = match f3 {
                0b010 => true,
                0b011 => false,
                _ => return None,
            };
            match f7 >> 2 {
                0b00010 if rs2 == 0 => Some(Instr::LoadReserved { word: word_width, rd, rs1 }),
                0b00011 => Some(Instr::StoreConditional { word: word_width, rd, rs2, rs1 }),
                0b00001 => Some(Instr::AmoSwap { word: word_width, rd, rs2, rs1 }),
                0b00000 => Some(Instr::AmoAdd { word: word_width, rd, rs2, rs1 }),
                _ => None,
            }
        }
        opcode::VEC => match f3 {
            vfunct::F3_MEM => match f7 {
                vfunct::MEM_VLX => Some(Instr::Vlx { vd: rd, rs1, rs2 }),
                vfunct::MEM_VSX => Some(Instr::Vsx { vs: rd, rs1, rs2 }),
                vfunct::MEM_VLPC => Some(Instr::Vlpc { vd: rd, rs1, rs2 }),
                _ => None,
            },
            vfunct::F3_BITWISE => {
                let op = match f7 {
                    vfunct::BITWISE_VXOR => VBitOp::Xor,
                    vfunct::BITWISE_VAND => VBitOp::And,
                    vfunct::BITWISE_VOR => VBitOp::Or,
                    _ => return None,
                };
                Some(Instr::VBitwise { op, vd: rd, va: rs1, vb: rs2 })
            }
            vfunct::F3_ADD => match f7 {
                vfunct::ADD_W => Some(Instr::VAdd { wide: false, vd: rd, va: rs1, vb: rs2 }),
                vfunct::ADD_D => Some(Instr::VAdd { wide: true, vd: rd, va: rs1, vb: rs2 }),
                _ => None,
            },
            vfunct::F3_SHIFT => match f7 {
                vfunct::SHIFT_VRL_H => {
                    Some(Instr::VRotl { lanes: RotLanes::H, vd: rd, va: rs1, vb: rs2 })
                }
                vfunct::SHIFT_VRL_W => {
                    Some(Instr::VRotl { lanes: RotLanes::W, vd: rd, va: rs1, vb: rs2 })
                }
                vfunct::SHIFT_VRL_D => {
                    Some(Instr::VRotl { lanes: RotLanes::D, vd: rd, va: rs1, vb: rs2 })
                }
                vfunct::SHIFT_VSLL_W => Some(Instr::VSllW { vd: rd, va: rs1, vb: rs2 }),
                _ => None,
            },
            vfunct::F3_REARRANGE => match f7 {
                vfunct::REARRANGE_VZIP_W => Some(Instr::VZipW { vd: rd, va: rs1, vb: rs2 }),
                vfunct::REARRANGE_VMRG_D => Some(Instr::VMrgD { vd: rd, va: rs1, vb: rs2 }),
                _ => None,
            },
            vfunct::F3_SPLAT => {
                let lanes = match f7 {
                    vfunct::SPLAT_B => SplatLanes::B,
                    vfunct::SPLAT_H => SplatLanes::H,
                    vfunct::SPLAT_W => SplatLanes::W,
                    _ => return None,
                };
                let imm = ((rs1 << 3) as i8) >> 3;
                Some(Instr::VSplat { lanes, vd: rd, imm })
            }
            vfunct::F3_SHASIG => {
                let wide = match f7 {
                    vfunct::SHASIG_W => false,
                    vfunct::SHASIG_D => true,
                    _ => return None,
                };
                Some(Instr::VShaSig {
                    wide,
                    vd: rd,
                    va: rs1,
                    big: rs2 & 0b10 != 0,
                    second: rs2 & 0b01 != 0,
                })
            }
            vfunct::F3_MOVE if f7 == vfunct::MOVE_VMV_X_D && rs2 < 2 => {
                Some(Instr::VMvXD { rd, va: rs1, lane: rs2 })
            }
            _ => None,
        },
        opcode::VEC4 => {
            let s3 = vs3_of(word) as u8;
            match f3 {
                vfunct::F3_VPERM => Some(Instr::VPerm { vd: rd, va: rs1, vb: rs2, vc: s3 }),
                vfunct::F3_VSEL => Some(Instr::VSel { vd: rd, va: rs1, vb: rs2, vc: s3 }),
                vfunct::F3_VSRDQ => Some(Instr::VSrdq { vd: rd, va: rs1, vb: rs2, sh: s3 }),
                _ => None,
            }
        }
        _ => None,
    }
}
