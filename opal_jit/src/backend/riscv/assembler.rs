//! RV64 assembler for code emission.
//!
//! `Assembler` owns the growing code buffer and the label table. Emission is
//! strictly append-only: every mnemonic method encodes one 32-bit word and
//! pushes it at the current end. Control flow goes through [`Label`] handles,
//! which may be referenced before they are bound; each forward reference is
//! recorded and rewritten in place when `bind_label` learns the target.
//!
//! On top of the raw mnemonics sit three macro layers:
//!
//! - [`Assembler::li`] and friends materialize arbitrary 64-bit constants
//!   from position-independent instruction sequences,
//! - the `*_indexed` accessors accept a [`RegisterOrConstant`] offset and
//!   pick the cheapest addressing sequence,
//! - the atomic emitters wrap load-reserved/store-conditional loops in the
//!   fence discipline selected by [`MemOrder`].
//!
//! # Performance Considerations
//! - Forward-reference lists live in a `SmallVec` sized for the common case
//!   of one or two uses per label, so typical emission never allocates for
//!   patching
//! - `li` never emits more than [`MAX_LOAD_IMM_WORDS`] instructions and
//!   collapses to a single `addi` for 12-bit values

use smallvec::SmallVec;

use super::encoder::{self, fence_bits};
use super::memory::ExecutableBuffer;
use super::registers::{assert_different, CallingConvention, Gpr, Vr};
use super::simd;

/// Upper bound on the number of instructions `li` may emit for one constant.
pub const MAX_LOAD_IMM_WORDS: usize = 16;

// =============================================================================
// Labels
// =============================================================================

/// Handle for a position in the code buffer.
///
/// Created with [`Assembler::create_label`], given a position with
/// [`Assembler::bind_label`]. A label may be referenced by any number of
/// branches before or after binding, but may be bound exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(u32);

impl Label {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

enum LabelState {
    /// Not yet bound; holds the buffer offsets of referencing branches.
    Unbound(SmallVec<[u32; 4]>),
    /// Bound to a buffer offset.
    Bound(u32),
}

// =============================================================================
// Memory order
// =============================================================================

/// Ordering strength for the atomic sequence emitters.
///
/// Release-class orders emit a full fence before the atomic loop and
/// acquire-class orders one after it; `Relaxed` emits neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOrder {
    /// No ordering beyond the atomicity of the access itself.
    Relaxed,
    /// Later accesses cannot move before the atomic.
    Acquire,
    /// Earlier accesses cannot move after the atomic.
    Release,
    /// Both directions.
    AcqRel,
}

// =============================================================================
// Register-or-constant offsets
// =============================================================================

/// Operand that is either a register or a known constant.
///
/// The indexed accessors take the addressing offset in this form and choose
/// the shortest instruction sequence for the combination they are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOrConstant {
    /// The operand lives in a register.
    Register(Gpr),
    /// The operand is a constant known at emission time.
    Constant(i64),
}

impl RegisterOrConstant {
    /// Whether this operand holds a constant.
    #[inline]
    pub fn is_constant(self) -> bool {
        matches!(self, RegisterOrConstant::Constant(_))
    }

    /// Whether this operand holds a register.
    #[inline]
    pub fn is_register(self) -> bool {
        matches!(self, RegisterOrConstant::Register(_))
    }

    /// The constant value, or zero when holding a register.
    #[inline]
    pub fn constant_or_zero(self) -> i64 {
        match self {
            RegisterOrConstant::Constant(c) => c,
            RegisterOrConstant::Register(_) => 0,
        }
    }
}

impl From<Gpr> for RegisterOrConstant {
    #[inline]
    fn from(reg: Gpr) -> Self {
        RegisterOrConstant::Register(reg)
    }
}

impl From<i64> for RegisterOrConstant {
    #[inline]
    fn from(value: i64) -> Self {
        RegisterOrConstant::Constant(value)
    }
}

#[inline(always)]
const fn sext12(value: u64) -> i32 {
    ((value as i32) << 20) >> 20
}

#[track_caller]
fn require_tmp(tmp: Option<Gpr>) -> Gpr {
    match tmp {
        Some(reg) => reg,
        None => panic!("temp register required to form this address"),
    }
}

// =============================================================================
// Mnemonic generation
// =============================================================================

macro_rules! insn_rri {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " rd, rs1, imm`.")]
        #[inline]
        pub fn $name(&mut self, d: Gpr, s1: Gpr, imm: i32) {
            self.emit($enc(d, s1, imm));
        }
    )*};
}

macro_rules! insn_shift {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " rd, rs1, shamt`.")]
        #[inline]
        pub fn $name(&mut self, d: Gpr, s1: Gpr, shamt: u32) {
            self.emit($enc(d, s1, shamt));
        }
    )*};
}

macro_rules! insn_rrr {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " rd, rs1, rs2`.")]
        #[inline]
        pub fn $name(&mut self, d: Gpr, s1: Gpr, s2: Gpr) {
            self.emit($enc(d, s1, s2));
        }
    )*};
}

macro_rules! insn_load {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " rd, offset(base)`.")]
        #[inline]
        pub fn $name(&mut self, d: Gpr, base: Gpr, offset: i32) {
            self.emit($enc(d, base, offset));
        }
    )*};
}

macro_rules! insn_store {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " rs2, offset(base)`.")]
        #[inline]
        pub fn $name(&mut self, src: Gpr, base: Gpr, offset: i32) {
            self.emit($enc(src, base, offset));
        }
    )*};
}

macro_rules! insn_branch {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " rs1, rs2, target`.")]
        #[inline]
        pub fn $name(&mut self, s1: Gpr, s2: Gpr, target: Label) {
            self.emit_branch(target, |disp| $enc(s1, s2, disp));
        }
    )*};
}

macro_rules! insn_amo {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " rd, rs2, (rs1)`.")]
        #[inline]
        pub fn $name(&mut self, d: Gpr, src: Gpr, addr: Gpr, aq: bool, rl: bool) {
            self.emit($enc(d, src, addr, aq, rl));
        }
    )*};
}

macro_rules! insn_vrr {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " vd, va, vb`.")]
        #[inline]
        pub fn $name(&mut self, d: Vr, a: Vr, b: Vr) {
            self.emit($enc(d, a, b));
        }
    )*};
}

macro_rules! insn_vsplat {
    ($($name:ident => $enc:path),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($name), " vd, imm`.")]
        #[inline]
        pub fn $name(&mut self, d: Vr, imm: i32) {
            self.emit($enc(d, imm));
        }
    )*};
}

// The indexed accessors pick one of five sequences from the operand shape:
//
//   constant offset, no base      load the constant, access with the 12-bit
//                                 remainder folded into the displacement
//   small constant, base          single access off the base register
//   large constant, base          add the constant to the base, access with
//                                 the 12-bit remainder
//   register offset, no base      access off the offset register directly
//   register offset, base         add the two registers, then access
//
// Loads scratch their own destination for the address arithmetic. Stores
// cannot, so every row that needs address arithmetic requires `tmp` and
// panics without one.

macro_rules! insn_load_indexed {
    ($($name:ident => $insn:ident),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($insn),
            "` from `base` plus a register-or-constant offset.")]
        pub fn $name(&mut self, d: Gpr, base: Option<Gpr>, offset: RegisterOrConstant) {
            match (offset, base) {
                (RegisterOrConstant::Constant(c), None) => {
                    let rest = self.load_const_optimized(d, c, None, true);
                    self.$insn(d, d, rest);
                }
                (RegisterOrConstant::Constant(c), Some(b)) if encoder::is_simm12(c) => {
                    self.$insn(d, b, c as i32);
                }
                (RegisterOrConstant::Constant(c), Some(b)) => {
                    let rest = self.add_const_optimized(d, b, c, None, true);
                    self.$insn(d, d, rest);
                }
                (RegisterOrConstant::Register(r), None) => {
                    self.$insn(d, r, 0);
                }
                (RegisterOrConstant::Register(r), Some(b)) => {
                    self.add(d, r, b);
                    self.$insn(d, d, 0);
                }
            }
        }
    )*};
}

macro_rules! insn_store_indexed {
    ($($name:ident => $insn:ident),* $(,)?) => {$(
        #[doc = concat!("Emit `", stringify!($insn),
            "` to `base` plus a register-or-constant offset. `tmp` is \
             required whenever the address does not fit one instruction.")]
        pub fn $name(
            &mut self,
            src: Gpr,
            base: Option<Gpr>,
            offset: RegisterOrConstant,
            tmp: Option<Gpr>,
        ) {
            match (offset, base) {
                (RegisterOrConstant::Constant(c), None) => {
                    let tmp = require_tmp(tmp);
                    let rest = self.load_const_optimized(tmp, c, None, true);
                    self.$insn(src, tmp, rest);
                }
                (RegisterOrConstant::Constant(c), Some(b)) if encoder::is_simm12(c) => {
                    self.$insn(src, b, c as i32);
                }
                (RegisterOrConstant::Constant(c), Some(b)) => {
                    let tmp = require_tmp(tmp);
                    let rest = self.add_const_optimized(tmp, b, c, None, true);
                    self.$insn(src, tmp, rest);
                }
                (RegisterOrConstant::Register(r), None) => {
                    self.$insn(src, r, 0);
                }
                (RegisterOrConstant::Register(r), Some(b)) => {
                    let tmp = require_tmp(tmp);
                    self.add(tmp, r, b);
                    self.$insn(src, tmp, 0);
                }
            }
        }
    )*};
}

// =============================================================================
// Assembler
// =============================================================================

/// Code buffer for emitting RV64 instructions.
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<LabelState>,
}

impl Assembler {
    /// Create a new assembler.
    pub fn new() -> Self {
        Self { code: Vec::new(), labels: Vec::new() }
    }

    /// Create a new assembler with a pre-sized code buffer.
    pub fn with_capacity(bytes: usize) -> Self {
        Self { code: Vec::with_capacity(bytes), labels: Vec::new() }
    }

    /// Current end of the buffer, which is where the next instruction lands.
    #[inline]
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// The emitted code so far.
    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Append one encoded instruction word.
    #[inline]
    pub fn emit(&mut self, word: u32) {
        self.code.extend_from_slice(&word.to_le_bytes());
    }

    #[inline]
    fn read_word(&self, pos: usize) -> u32 {
        let bytes = [self.code[pos], self.code[pos + 1], self.code[pos + 2], self.code[pos + 3]];
        u32::from_le_bytes(bytes)
    }

    #[inline]
    fn write_word(&mut self, pos: usize, word: u32) {
        self.code[pos..pos + 4].copy_from_slice(&word.to_le_bytes());
    }

    /// Get the assembled code, checking that no referenced label is missing.
    pub fn finish(self) -> Vec<u8> {
        for (index, state) in self.labels.iter().enumerate() {
            if let LabelState::Unbound(sites) = state {
                assert!(sites.is_empty(), "label L{index} referenced but never bound");
            }
        }
        self.code
    }

    /// Finish and move the code into an executable mapping.
    pub fn finalize_executable(self) -> std::io::Result<ExecutableBuffer> {
        ExecutableBuffer::from_code(&self.finish())
    }

    // =========================================================================
    // Labels
    // =========================================================================

    /// Create a fresh, unbound label.
    pub fn create_label(&mut self) -> Label {
        let index = self.labels.len() as u32;
        self.labels.push(LabelState::Unbound(SmallVec::new()));
        Label(index)
    }

    /// Bind `label` to the current buffer position and resolve every branch
    /// already referring to it.
    #[track_caller]
    pub fn bind_label(&mut self, label: Label) {
        let here = self.offset();
        let state = std::mem::replace(&mut self.labels[label.index()], LabelState::Bound(here as u32));
        match state {
            LabelState::Bound(_) => panic!("{label:?} bound twice"),
            LabelState::Unbound(sites) => {
                for site in sites {
                    let pos = site as usize;
                    let patched = encoder::patched_branch(here, self.read_word(pos), pos);
                    self.write_word(pos, patched);
                }
            }
        }
    }

    /// The bound position of `label`, if it has one yet.
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        match self.labels[label.index()] {
            LabelState::Bound(pos) => Some(pos as usize),
            LabelState::Unbound(_) => None,
        }
    }

    fn emit_branch(&mut self, target: Label, encode: impl FnOnce(i32) -> u32) {
        let pos = self.offset();
        let disp = match &mut self.labels[target.index()] {
            LabelState::Bound(dest) => *dest as i64 - pos as i64,
            LabelState::Unbound(sites) => {
                sites.push(pos as u32);
                0
            }
        };
        self.emit(encode(disp as i32));
    }

    // =========================================================================
    // Scalar mnemonics
    // =========================================================================

    insn_rri! {
        addi => encoder::encode_addi,
        slti => encoder::encode_slti,
        sltiu => encoder::encode_sltiu,
        xori => encoder::encode_xori,
        ori => encoder::encode_ori,
        andi => encoder::encode_andi,
        addiw => encoder::encode_addiw,
    }

    insn_shift! {
        slli => encoder::encode_slli,
        srli => encoder::encode_srli,
        srai => encoder::encode_srai,
        slliw => encoder::encode_slliw,
        srliw => encoder::encode_srliw,
        sraiw => encoder::encode_sraiw,
    }

    insn_rrr! {
        add => encoder::encode_add,
        sub => encoder::encode_sub,
        sll => encoder::encode_sll,
        slt => encoder::encode_slt,
        sltu => encoder::encode_sltu,
        xor => encoder::encode_xor,
        srl => encoder::encode_srl,
        sra => encoder::encode_sra,
        or => encoder::encode_or,
        and => encoder::encode_and,
        addw => encoder::encode_addw,
        subw => encoder::encode_subw,
        sllw => encoder::encode_sllw,
        srlw => encoder::encode_srlw,
        sraw => encoder::encode_sraw,
    }

    /// Emit `lui rd, imm20`. The operand is the raw 20-bit field.
    #[inline]
    pub fn lui(&mut self, d: Gpr, imm20: u32) {
        self.emit(encoder::encode_lui(d, imm20));
    }

    /// Emit `auipc rd, imm20`.
    #[inline]
    pub fn auipc(&mut self, d: Gpr, imm20: u32) {
        self.emit(encoder::encode_auipc(d, imm20));
    }

    insn_load! {
        lb => encoder::encode_lb,
        lh => encoder::encode_lh,
        lw => encoder::encode_lw,
        ld => encoder::encode_ld,
        lbu => encoder::encode_lbu,
        lhu => encoder::encode_lhu,
        lwu => encoder::encode_lwu,
    }

    insn_store! {
        sb => encoder::encode_sb,
        sh => encoder::encode_sh,
        sw => encoder::encode_sw,
        sd => encoder::encode_sd,
    }

    insn_branch! {
        beq => encoder::encode_beq,
        bne => encoder::encode_bne,
        blt => encoder::encode_blt,
        bge => encoder::encode_bge,
        bltu => encoder::encode_bltu,
        bgeu => encoder::encode_bgeu,
    }

    /// Emit `jal rd, target`.
    #[inline]
    pub fn jal(&mut self, d: Gpr, target: Label) {
        self.emit_branch(target, |disp| encoder::encode_jal(d, disp));
    }

    /// Emit `jalr rd, offset(base)`.
    #[inline]
    pub fn jalr(&mut self, d: Gpr, base: Gpr, offset: i32) {
        self.emit(encoder::encode_jalr(d, base, offset));
    }

    /// Emit `fence pred, succ` with [`fence_bits`] operands.
    #[inline]
    pub fn fence(&mut self, pred: u32, succ: u32) {
        self.emit(encoder::encode_fence(pred, succ));
    }

    /// Emit `ecall`.
    #[inline]
    pub fn ecall(&mut self) {
        self.emit(encoder::encode_ecall());
    }

    /// Emit `ebreak`.
    #[inline]
    pub fn ebreak(&mut self) {
        self.emit(encoder::encode_ebreak());
    }

    /// Emit `lr.w rd, (rs1)`.
    #[inline]
    pub fn lr_w(&mut self, d: Gpr, addr: Gpr, aq: bool, rl: bool) {
        self.emit(encoder::encode_lr_w(d, addr, aq, rl));
    }

    /// Emit `lr.d rd, (rs1)`.
    #[inline]
    pub fn lr_d(&mut self, d: Gpr, addr: Gpr, aq: bool, rl: bool) {
        self.emit(encoder::encode_lr_d(d, addr, aq, rl));
    }

    insn_amo! {
        sc_w => encoder::encode_sc_w,
        sc_d => encoder::encode_sc_d,
        amoswap_w => encoder::encode_amoswap_w,
        amoswap_d => encoder::encode_amoswap_d,
        amoadd_w => encoder::encode_amoadd_w,
        amoadd_d => encoder::encode_amoadd_d,
    }

    // =========================================================================
    // Pseudo instructions
    // =========================================================================

    /// Emit `nop`.
    #[inline]
    pub fn nop(&mut self) {
        self.addi(Gpr::Zero, Gpr::Zero, 0);
    }

    /// Emit `mv rd, rs`.
    #[inline]
    pub fn mv(&mut self, d: Gpr, s: Gpr) {
        self.addi(d, s, 0);
    }

    /// Emit `not rd, rs`.
    #[inline]
    pub fn not(&mut self, d: Gpr, s: Gpr) {
        self.xori(d, s, -1);
    }

    /// Emit `neg rd, rs`.
    #[inline]
    pub fn neg(&mut self, d: Gpr, s: Gpr) {
        self.sub(d, Gpr::Zero, s);
    }

    /// Emit `sext.w rd, rs`.
    #[inline]
    pub fn sext_w(&mut self, d: Gpr, s: Gpr) {
        self.addiw(d, s, 0);
    }

    /// Emit `seqz rd, rs`.
    #[inline]
    pub fn seqz(&mut self, d: Gpr, s: Gpr) {
        self.sltiu(d, s, 1);
    }

    /// Emit `snez rd, rs`.
    #[inline]
    pub fn snez(&mut self, d: Gpr, s: Gpr) {
        self.sltu(d, Gpr::Zero, s);
    }

    /// Emit `beqz rs, target`.
    #[inline]
    pub fn beqz(&mut self, s: Gpr, target: Label) {
        self.beq(s, Gpr::Zero, target);
    }

    /// Emit `bnez rs, target`.
    #[inline]
    pub fn bnez(&mut self, s: Gpr, target: Label) {
        self.bne(s, Gpr::Zero, target);
    }

    /// Emit `bgtu rs1, rs2, target`.
    #[inline]
    pub fn bgtu(&mut self, s1: Gpr, s2: Gpr, target: Label) {
        self.bltu(s2, s1, target);
    }

    /// Emit `bleu rs1, rs2, target`.
    #[inline]
    pub fn bleu(&mut self, s1: Gpr, s2: Gpr, target: Label) {
        self.bgeu(s2, s1, target);
    }

    /// Emit `j target`.
    #[inline]
    pub fn j(&mut self, target: Label) {
        self.jal(Gpr::Zero, target);
    }

    /// Emit `jr rs`.
    #[inline]
    pub fn jr(&mut self, s: Gpr) {
        self.jalr(Gpr::Zero, s, 0);
    }

    /// Emit `ret`.
    #[inline]
    pub fn ret(&mut self) {
        self.jalr(Gpr::Zero, Gpr::Ra, 0);
    }

    /// Pad with `nop` until the buffer position is `alignment`-aligned, so
    /// execution may fall through the padding.
    pub fn align(&mut self, alignment: usize) {
        assert!(
            alignment.is_power_of_two() && alignment % 4 == 0,
            "alignment must be a word-multiple power of two"
        );
        while self.offset() % alignment != 0 {
            self.nop();
        }
    }

    // =========================================================================
    // Constant materialization
    // =========================================================================

    /// Load a 64-bit immediate into `rd` with a position-independent
    /// sequence of at most [`MAX_LOAD_IMM_WORDS`] instructions.
    pub fn li(&mut self, d: Gpr, imm: i64) {
        let start = self.offset();
        self.load_imm(d, imm);
        debug_assert!(
            self.offset() - start <= MAX_LOAD_IMM_WORDS * 4,
            "immediate {imm:#x} took more than {MAX_LOAD_IMM_WORDS} instructions"
        );
    }

    fn load_imm(&mut self, d: Gpr, imm: i64) {
        if (-0x800..0x800).contains(&imm) {
            self.addi(d, Gpr::Zero, imm as i32);
            return;
        }

        let uimm = imm as u64;
        let mut value = uimm;

        // Shift amount restored after the final value is built. Only applied
        // outside the 32-bit range, where trailing zeros are free savings.
        let mut sha = 0u32;
        if imm < i32::MIN as i64 || imm > i32::MAX as i64 {
            while value & 1 == 0 {
                sha += 1;
                value >>= 1;
            }
        }

        let low = value & 0xfff;
        let mut mid = value >> 12;
        if low >= 0x800 {
            // addi sign-extends, so borrow one from the mid section
            mid += 1;
        }

        // Shift amount restored after the mid section is loaded.
        let mut shb = 0u32;
        if mid >= 0x100000 && mid >> 51 == 0 {
            while mid & 1 == 0 {
                shb += 1;
                mid >>= 1;
            }
        }

        let mut high = mid >> 20;
        mid &= 0xfffff;
        if mid >= 0x80000 {
            high += 1;
        }
        high &= 0xffff_ffff;

        if high == 0 {
            if mid != 0 {
                self.lui(d, mid as u32);
                if shb != 0 {
                    self.slli(d, d, shb);
                }
            }
            if low != 0 {
                self.addi(d, if mid != 0 { d } else { Gpr::Zero }, sext12(low));
                if sha != 0 {
                    self.slli(d, d, sha);
                }
            }
            return;
        }

        if imm < 0 {
            self.load_imm(d, imm.wrapping_neg());
            self.sub(d, Gpr::Zero, d);
            return;
        }

        // When all else fails, load by parts.
        let mut rest = uimm;
        let mut sha = 0u32;
        while rest & 1 == 0 {
            sha += 1;
            rest >>= 1;
        }
        let low = rest & 0xfff;
        let mut upper = rest ^ low;
        if low >= 0x800 {
            upper = upper.wrapping_add(0x1000);
        }
        // The lowest non-zero 12 bits are cleared, so the recursion is finite.
        self.load_imm(d, upper as i64);
        if low != 0 {
            self.addi(d, d, sext12(low));
        }
        if sha != 0 {
            self.slli(d, d, sha);
        }
    }

    /// Load a 64-bit constant. `tmp` may be given to increase scheduling
    /// freedom and must differ from `d`.
    pub fn load_const(&mut self, d: Gpr, imm: i64, tmp: Option<Gpr>) {
        let _ = self.load_const_optimized(d, imm, tmp, false);
    }

    /// Load a 64-bit constant, optionally leaving a 12-bit remainder.
    ///
    /// With `return_simm12_rest` set, only the upper part of `imm` is
    /// loaded into `d` and the signed 12-bit remainder is returned for the
    /// caller to fold into a following load, store, or `addi` displacement.
    pub fn load_const_optimized(
        &mut self,
        d: Gpr,
        imm: i64,
        tmp: Option<Gpr>,
        return_simm12_rest: bool,
    ) -> i32 {
        if let Some(t) = tmp {
            assert_different(&[d, t]);
        }

        if !return_simm12_rest {
            self.li(d, imm);
            return 0;
        }

        let uimm = imm as u64;
        let low = uimm & 0xfff;
        let mut high = uimm >> 12;
        let mut rest = 0i32;
        if low >= 0x800 {
            rest = low as i32 - 0x1000;
            high = high.wrapping_add(1);
        }
        self.li(d, high.wrapping_shl(12) as i64);
        rest
    }

    /// Compute `d = s + imm`, optionally leaving a 12-bit remainder.
    ///
    /// Only one addition involving `s` is emitted, keeping the dependent
    /// latency on `s` to a single instruction. `tmp` is required when `s`
    /// aliases `d` and must always differ from `s`.
    pub fn add_const_optimized(
        &mut self,
        d: Gpr,
        s: Gpr,
        imm: i64,
        tmp: Option<Gpr>,
        return_simm12_rest: bool,
    ) -> i32 {
        assert!(s != d || tmp.is_some(), "need a temp register when source aliases destination");
        if let Some(t) = tmp {
            assert!(t != s, "temp register must differ from the source");
        }

        if (-0x800..0x800).contains(&imm) {
            if return_simm12_rest && s == d {
                return imm as i32;
            }
            self.addi(d, s, imm as i32);
            return 0;
        }

        let tmp = tmp.unwrap_or(d);
        let (tmp1, tmp2) = if d != tmp && d != s { (d, Some(tmp)) } else { (tmp, None) };
        let rest = self.load_const_optimized(tmp1, imm, tmp2, return_simm12_rest);
        self.add(d, tmp1, s);
        rest
    }

    // =========================================================================
    // Indexed accessors
    // =========================================================================

    insn_load_indexed! {
        ld_indexed => ld,
        lw_indexed => lw,
        lwu_indexed => lwu,
        lh_indexed => lh,
        lhu_indexed => lhu,
        lb_indexed => lb,
        lbu_indexed => lbu,
    }

    insn_store_indexed! {
        sd_indexed => sd,
        sw_indexed => sw,
        sh_indexed => sh,
        sb_indexed => sb,
    }

    /// Emit `d = offset + s1` for a register-or-constant offset. A constant
    /// offset must fit 12 signed bits.
    pub fn add_indexed(&mut self, d: Gpr, offset: RegisterOrConstant, s1: Gpr) {
        match offset {
            RegisterOrConstant::Constant(c) => {
                assert!(encoder::is_simm12(c), "constant offset too big");
                self.addi(d, s1, c as i32);
            }
            RegisterOrConstant::Register(r) => self.add(d, r, s1),
        }
    }

    // =========================================================================
    // Atomic sequences
    // =========================================================================

    fn pre_atomic_fence(&mut self, order: MemOrder) {
        match order {
            MemOrder::Relaxed | MemOrder::Acquire => {}
            MemOrder::Release | MemOrder::AcqRel => self.fence(fence_bits::IORW, fence_bits::IORW),
        }
    }

    fn post_atomic_fence(&mut self, order: MemOrder) {
        match order {
            MemOrder::Relaxed | MemOrder::Release => {}
            MemOrder::Acquire | MemOrder::AcqRel => self.fence(fence_bits::IORW, fence_bits::IORW),
        }
    }

    /// Emit a 32-bit compare-and-exchange on the word at `(addr)`.
    ///
    /// Leaves the previous value in `result`; the exchange happened iff
    /// `result` equals `compare`. A plain load guards the reservation loop so
    /// a failing compare never acquires the line for writing. Operands are
    /// compared in sign-extended 32-bit form.
    pub fn cmpxchg_w(
        &mut self,
        result: Gpr,
        addr: Gpr,
        compare: Gpr,
        exchange: Gpr,
        scratch: Gpr,
        order: MemOrder,
    ) {
        assert_different(&[result, addr, compare, exchange, scratch]);
        self.pre_atomic_fence(order);
        let retry = self.create_label();
        let done = self.create_label();
        self.lw(result, addr, 0);
        self.bne(result, compare, done);
        self.bind_label(retry);
        self.lr_w(result, addr, false, false);
        self.bne(result, compare, done);
        self.sc_w(scratch, exchange, addr, false, false);
        self.bnez(scratch, retry);
        self.bind_label(done);
        self.post_atomic_fence(order);
    }

    /// Emit a 64-bit compare-and-exchange on the doubleword at `(addr)`.
    ///
    /// Same protocol as [`Assembler::cmpxchg_w`].
    pub fn cmpxchg_d(
        &mut self,
        result: Gpr,
        addr: Gpr,
        compare: Gpr,
        exchange: Gpr,
        scratch: Gpr,
        order: MemOrder,
    ) {
        assert_different(&[result, addr, compare, exchange, scratch]);
        self.pre_atomic_fence(order);
        let retry = self.create_label();
        let done = self.create_label();
        self.ld(result, addr, 0);
        self.bne(result, compare, done);
        self.bind_label(retry);
        self.lr_d(result, addr, false, false);
        self.bne(result, compare, done);
        self.sc_d(scratch, exchange, addr, false, false);
        self.bnez(scratch, retry);
        self.bind_label(done);
        self.post_atomic_fence(order);
    }

    /// Emit a byte compare-and-exchange at `(addr)` over the containing
    /// aligned word, since reservations only exist at word granularity.
    ///
    /// `compare` and `exchange` must hold zero-extended byte values. The
    /// previous byte lands zero-extended in `result`. Scratch registers are
    /// used for the aligned base, the bit shift, the byte-replacement mask,
    /// and the working word; the store-conditional status reuses the word
    /// scratch.
    pub fn cmpxchg_b(
        &mut self,
        result: Gpr,
        addr: Gpr,
        compare: Gpr,
        exchange: Gpr,
        scratch: [Gpr; 4],
        order: MemOrder,
    ) {
        let [base, shift, mask, word] = scratch;
        assert_different(&[result, addr, compare, exchange, base, shift, mask, word]);
        self.pre_atomic_fence(order);
        let retry = self.create_label();
        let done = self.create_label();
        self.andi(base, addr, -4);
        self.andi(shift, addr, 3);
        self.slli(shift, shift, 3);
        // XORing (compare ^ exchange) << shift into the word replaces the
        // byte only when it still holds `compare`.
        self.xor(mask, compare, exchange);
        self.sll(mask, mask, shift);
        self.lbu(result, addr, 0);
        self.bne(result, compare, done);
        self.bind_label(retry);
        self.lr_w(word, base, false, false);
        self.srl(result, word, shift);
        self.andi(result, result, 0xff);
        self.bne(result, compare, done);
        self.xor(word, word, mask);
        self.sc_w(word, word, base, false, false);
        self.bnez(word, retry);
        self.bind_label(done);
        self.post_atomic_fence(order);
    }

    /// Emit an unconditional 32-bit exchange, leaving the previous word in
    /// `result`.
    pub fn xchg_w(&mut self, result: Gpr, addr: Gpr, exchange: Gpr, scratch: Gpr, order: MemOrder) {
        assert_different(&[result, addr, exchange, scratch]);
        self.pre_atomic_fence(order);
        let retry = self.create_label();
        self.bind_label(retry);
        self.lr_w(result, addr, false, false);
        self.sc_w(scratch, exchange, addr, false, false);
        self.bnez(scratch, retry);
        self.post_atomic_fence(order);
    }

    /// Emit an unconditional 64-bit exchange, leaving the previous
    /// doubleword in `result`.
    pub fn xchg_d(&mut self, result: Gpr, addr: Gpr, exchange: Gpr, scratch: Gpr, order: MemOrder) {
        assert_different(&[result, addr, exchange, scratch]);
        self.pre_atomic_fence(order);
        let retry = self.create_label();
        self.bind_label(retry);
        self.lr_d(result, addr, false, false);
        self.sc_d(scratch, exchange, addr, false, false);
        self.bnez(scratch, retry);
        self.post_atomic_fence(order);
    }

    /// Emit an atomic 32-bit add, leaving the new value in `result`.
    pub fn add_and_fetch_w(
        &mut self,
        result: Gpr,
        addr: Gpr,
        delta: Gpr,
        scratch: Gpr,
        order: MemOrder,
    ) {
        assert_different(&[result, addr, delta, scratch]);
        self.pre_atomic_fence(order);
        let retry = self.create_label();
        self.bind_label(retry);
        self.lr_w(result, addr, false, false);
        self.addw(result, result, delta);
        self.sc_w(scratch, result, addr, false, false);
        self.bnez(scratch, retry);
        self.post_atomic_fence(order);
    }

    /// Emit an atomic 64-bit add, leaving the new value in `result`.
    pub fn add_and_fetch_d(
        &mut self,
        result: Gpr,
        addr: Gpr,
        delta: Gpr,
        scratch: Gpr,
        order: MemOrder,
    ) {
        assert_different(&[result, addr, delta, scratch]);
        self.pre_atomic_fence(order);
        let retry = self.create_label();
        self.bind_label(retry);
        self.lr_d(result, addr, false, false);
        self.add(result, result, delta);
        self.sc_d(scratch, result, addr, false, false);
        self.bnez(scratch, retry);
        self.post_atomic_fence(order);
    }

    // =========================================================================
    // Register save areas
    // =========================================================================

    /// Store every volatile integer register to `offset(base)` upward, one
    /// doubleword per register. Covers 16 registers, 128 bytes.
    pub fn save_volatile_gprs(&mut self, base: Gpr, offset: i32) {
        let mut slot = offset;
        for reg in CallingConvention::VOLATILE_GPRS.iter() {
            self.sd(reg, base, slot);
            slot += 8;
        }
    }

    /// Reload every volatile integer register from the save area written by
    /// [`Assembler::save_volatile_gprs`].
    pub fn restore_volatile_gprs(&mut self, base: Gpr, offset: i32) {
        let mut slot = offset;
        for reg in CallingConvention::VOLATILE_GPRS.iter() {
            self.ld(reg, base, slot);
            slot += 8;
        }
    }

    // =========================================================================
    // Vector mnemonics
    // =========================================================================

    /// Emit `vlx vd, (base + index)`.
    #[inline]
    pub fn vlx(&mut self, d: Vr, base: Gpr, index: Gpr) {
        self.emit(simd::encode_vlx(d, base, index));
    }

    /// Emit `vsx vs, (base + index)`.
    #[inline]
    pub fn vsx(&mut self, src: Vr, base: Gpr, index: Gpr) {
        self.emit(simd::encode_vsx(src, base, index));
    }

    /// Emit `vlpc vd, (base + index)`.
    #[inline]
    pub fn vlpc(&mut self, d: Vr, base: Gpr, index: Gpr) {
        self.emit(simd::encode_vlpc(d, base, index));
    }

    insn_vrr! {
        vxor => simd::encode_vxor,
        vand => simd::encode_vand,
        vor => simd::encode_vor,
        vadd_w => simd::encode_vadd_w,
        vadd_d => simd::encode_vadd_d,
        vrl_h => simd::encode_vrl_h,
        vrl_w => simd::encode_vrl_w,
        vrl_d => simd::encode_vrl_d,
        vsll_w => simd::encode_vsll_w,
        vzip_w => simd::encode_vzip_w,
        vmrg_d => simd::encode_vmrg_d,
    }

    insn_vsplat! {
        vsplti_b => simd::encode_vsplti_b,
        vsplti_h => simd::encode_vsplti_h,
        vsplti_w => simd::encode_vsplti_w,
    }

    /// Emit `vshasig.w vd, va` for the selected sigma flavor.
    #[inline]
    pub fn vshasig_w(&mut self, d: Vr, a: Vr, big: bool, second: bool) {
        self.emit(simd::encode_vshasig_w(d, a, big, second));
    }

    /// Emit `vshasig.d vd, va` for the selected sigma flavor.
    #[inline]
    pub fn vshasig_d(&mut self, d: Vr, a: Vr, big: bool, second: bool) {
        self.emit(simd::encode_vshasig_d(d, a, big, second));
    }

    /// Emit `vmv.x.d rd, va, lane`.
    #[inline]
    pub fn vmv_x_d(&mut self, d: Gpr, a: Vr, lane: u32) {
        self.emit(simd::encode_vmv_x_d(d, a, lane));
    }

    /// Emit `vperm vd, va, vb, vc`.
    #[inline]
    pub fn vperm(&mut self, d: Vr, a: Vr, b: Vr, c: Vr) {
        self.emit(simd::encode_vperm(d, a, b, c));
    }

    /// Emit `vsel vd, va, vb, vc`.
    #[inline]
    pub fn vsel(&mut self, d: Vr, a: Vr, b: Vr, c: Vr) {
        self.emit(simd::encode_vsel(d, a, b, c));
    }

    /// Emit `vsrdq vd, va, vb, sh`.
    #[inline]
    pub fn vsrdq(&mut self, d: Vr, a: Vr, b: Vr, sh: u32) {
        self.emit(simd::encode_vsrdq(d, a, b, sh));
    }

    /// Emit a vector register copy.
    #[inline]
    pub fn vmr(&mut self, d: Vr, s: Vr) {
        self.vor(d, s, s);
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::riscv::encoder::{
        branch_destination, encode_addi, encode_andi, encode_beq, encode_jal, encode_lui,
        encode_lw, encode_sd, opcode, opcode_of,
    };

    fn words(asm: Assembler) -> Vec<u32> {
        let code = asm.finish();
        code.chunks_exact(4).map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
    }

    #[test]
    fn backward_branch_resolves_immediately() {
        let mut asm = Assembler::new();
        let top = asm.create_label();
        asm.bind_label(top);
        asm.nop();
        asm.nop();
        asm.beq(Gpr::A0, Gpr::A1, top);
        let code = words(asm);
        assert_eq!(code[2], encode_beq(Gpr::A0, Gpr::A1, -8));
    }

    #[test]
    fn forward_branch_is_patched_on_bind() {
        let mut asm = Assembler::new();
        let out = asm.create_label();
        asm.beq(Gpr::A0, Gpr::A1, out);
        asm.nop();
        asm.bind_label(out);
        let code = words(asm);
        assert_eq!(code[0], encode_beq(Gpr::A0, Gpr::A1, 8));
        assert_eq!(branch_destination(code[0], 0), 8);
    }

    #[test]
    fn one_label_patches_every_reference() {
        let mut asm = Assembler::new();
        let out = asm.create_label();
        asm.beqz(Gpr::A0, out);
        asm.bnez(Gpr::A1, out);
        asm.j(out);
        asm.bind_label(out);
        let code = words(asm);
        assert_eq!(branch_destination(code[0], 0), 12);
        assert_eq!(branch_destination(code[1], 4), 12);
        assert_eq!(code[2], encode_jal(Gpr::Zero, 4));
    }

    #[test]
    fn jump_and_link_records_return_register() {
        let mut asm = Assembler::new();
        let target = asm.create_label();
        asm.jal(Gpr::Ra, target);
        asm.bind_label(target);
        let code = words(asm);
        assert_eq!(code[0], encode_jal(Gpr::Ra, 4));
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn binding_twice_panics() {
        let mut asm = Assembler::new();
        let label = asm.create_label();
        asm.bind_label(label);
        asm.bind_label(label);
    }

    #[test]
    #[should_panic(expected = "never bound")]
    fn finishing_with_dangling_reference_panics() {
        let mut asm = Assembler::new();
        let label = asm.create_label();
        asm.beqz(Gpr::A0, label);
        let _ = asm.finish();
    }

    #[test]
    fn unused_label_is_fine() {
        let mut asm = Assembler::new();
        let _ = asm.create_label();
        asm.nop();
        assert_eq!(words(asm).len(), 1);
    }

    #[test]
    fn align_pads_with_nops() {
        let mut asm = Assembler::new();
        asm.nop();
        asm.align(16);
        assert_eq!(asm.offset(), 16);
        let code = words(asm);
        assert!(code.iter().all(|&w| w == encode_addi(Gpr::Zero, Gpr::Zero, 0)));
    }

    #[test]
    fn li_small_values_take_one_instruction() {
        for imm in [0i64, 1, -1, 0x7ff, -0x800] {
            let mut asm = Assembler::new();
            asm.li(Gpr::A0, imm);
            let code = words(asm);
            assert_eq!(code, vec![encode_addi(Gpr::A0, Gpr::Zero, imm as i32)], "imm={imm:#x}");
        }
    }

    #[test]
    fn li_uses_lui_for_32_bit_values() {
        let mut asm = Assembler::new();
        asm.li(Gpr::A0, 0x12345678);
        let code = words(asm);
        assert_eq!(code[0], encode_lui(Gpr::A0, 0x12345));
        assert_eq!(code[1], encode_addi(Gpr::A0, Gpr::A0, 0x678));
    }

    #[test]
    fn li_borrows_from_upper_for_large_low_part() {
        let mut asm = Assembler::new();
        asm.li(Gpr::A0, 0x800);
        let code = words(asm);
        assert_eq!(code, vec![encode_lui(Gpr::A0, 1), encode_addi(Gpr::A0, Gpr::A0, -0x800)]);
    }

    #[test]
    fn li_negative_32_bit_value_uses_sign_extending_lui() {
        let mut asm = Assembler::new();
        asm.li(Gpr::A0, -0x1000);
        let code = words(asm);
        assert_eq!(code, vec![encode_lui(Gpr::A0, 0xFFFFF)]);
    }

    #[test]
    fn li_strips_trailing_zeros_of_wide_values() {
        let mut asm = Assembler::new();
        asm.li(Gpr::A0, i64::MIN);
        let code = words(asm);
        assert_eq!(code.len(), 2);
        assert_eq!(code[0], encode_addi(Gpr::A0, Gpr::Zero, 1));
        assert_eq!(opcode_of(code[1]), opcode::OP_IMM);
    }

    #[test]
    fn li_never_exceeds_the_sequence_bound() {
        let worst = [
            0x5555_5555_5555_5555u64 as i64,
            0xAAAA_AAAA_AAAA_AAAAu64 as i64,
            0x7FFF_FFFF_FFFF_FFFF,
            0x0123_4567_89AB_CDEF,
            -0x0123_4567_89AB_CDEF,
        ];
        for imm in worst {
            let mut asm = Assembler::new();
            asm.li(Gpr::A0, imm);
            assert!(asm.offset() <= MAX_LOAD_IMM_WORDS * 4, "imm={imm:#x}");
        }
    }

    #[test]
    fn load_const_optimized_splits_remainder() {
        let mut asm = Assembler::new();
        let rest = asm.load_const_optimized(Gpr::A0, 0x12345678, None, true);
        assert_eq!(rest, 0x678);
        let code = words(asm);
        assert_eq!(code, vec![encode_lui(Gpr::A0, 0x12345)]);
    }

    #[test]
    fn load_const_optimized_wraps_for_minus_one() {
        let mut asm = Assembler::new();
        let rest = asm.load_const_optimized(Gpr::A0, -1, None, true);
        assert_eq!(rest, -1);
        let code = words(asm);
        assert_eq!(code, vec![encode_addi(Gpr::A0, Gpr::Zero, 0)]);
    }

    #[test]
    fn add_const_optimized_small_in_place_returns_remainder() {
        let mut asm = Assembler::new();
        let rest = asm.add_const_optimized(Gpr::A0, Gpr::A0, 0x40, Some(Gpr::T0), true);
        assert_eq!(rest, 0x40);
        assert_eq!(asm.offset(), 0);
    }

    #[test]
    fn add_const_optimized_emits_single_addition_on_source() {
        let mut asm = Assembler::new();
        let rest = asm.add_const_optimized(Gpr::A0, Gpr::A1, 0x12345678, None, true);
        assert_eq!(rest, 0x678);
        let code = words(asm);
        assert_eq!(code.len(), 2);
        assert_eq!(code[0], encode_lui(Gpr::A0, 0x12345));
        assert_eq!(opcode_of(code[1]), opcode::OP);
    }

    #[test]
    #[should_panic(expected = "temp register")]
    fn add_const_optimized_rejects_aliased_operands_without_tmp() {
        let mut asm = Assembler::new();
        asm.add_const_optimized(Gpr::A0, Gpr::A0, 0x12345678, None, false);
    }

    #[test]
    fn indexed_load_with_small_constant_is_one_word() {
        let mut asm = Assembler::new();
        asm.lw_indexed(Gpr::A0, Some(Gpr::A1), RegisterOrConstant::Constant(64));
        let code = words(asm);
        assert_eq!(code, vec![encode_lw(Gpr::A0, Gpr::A1, 64)]);
    }

    #[test]
    fn indexed_load_with_register_offset_adds_then_accesses() {
        let mut asm = Assembler::new();
        asm.ld_indexed(Gpr::A0, Some(Gpr::A1), RegisterOrConstant::Register(Gpr::A2));
        let code = words(asm);
        assert_eq!(code.len(), 2);
        assert_eq!(opcode_of(code[0]), opcode::OP);
        assert_eq!(code[1], crate::backend::riscv::encoder::encode_ld(Gpr::A0, Gpr::A0, 0));
    }

    #[test]
    fn indexed_load_scratches_destination_for_large_constant() {
        let mut asm = Assembler::new();
        asm.ld_indexed(Gpr::A0, Some(Gpr::A1), RegisterOrConstant::Constant(0x12345678));
        let code = words(asm);
        assert_eq!(code[0], encode_lui(Gpr::A0, 0x12345));
        assert_eq!(opcode_of(code[1]), opcode::OP);
        assert_eq!(code[2], crate::backend::riscv::encoder::encode_ld(Gpr::A0, Gpr::A0, 0x678));
    }

    #[test]
    fn indexed_load_without_base_folds_remainder() {
        let mut asm = Assembler::new();
        asm.ld_indexed(Gpr::A0, None, RegisterOrConstant::Constant(0x12345678));
        let code = words(asm);
        assert_eq!(code.len(), 2);
        assert_eq!(code[0], encode_lui(Gpr::A0, 0x12345));
        assert_eq!(code[1], crate::backend::riscv::encoder::encode_ld(Gpr::A0, Gpr::A0, 0x678));
    }

    #[test]
    fn indexed_store_uses_tmp_for_address() {
        let mut asm = Assembler::new();
        asm.sd_indexed(
            Gpr::A0,
            Some(Gpr::A1),
            RegisterOrConstant::Register(Gpr::A2),
            Some(Gpr::T0),
        );
        let code = words(asm);
        assert_eq!(code.len(), 2);
        assert_eq!(code[1], encode_sd(Gpr::A0, Gpr::T0, 0));
    }

    #[test]
    fn indexed_store_with_small_constant_needs_no_tmp() {
        let mut asm = Assembler::new();
        asm.sd_indexed(Gpr::A0, Some(Gpr::A1), RegisterOrConstant::Constant(-8), None);
        let code = words(asm);
        assert_eq!(code, vec![encode_sd(Gpr::A0, Gpr::A1, -8)]);
    }

    #[test]
    #[should_panic(expected = "temp register required")]
    fn indexed_store_without_needed_tmp_panics() {
        let mut asm = Assembler::new();
        asm.sd_indexed(Gpr::A0, Some(Gpr::A1), RegisterOrConstant::Constant(0x12345678), None);
    }

    #[test]
    fn cmpxchg_w_emits_guarded_reservation_loop() {
        let mut asm = Assembler::new();
        asm.cmpxchg_w(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::A3, Gpr::T0, MemOrder::Relaxed);
        let code = words(asm);
        assert_eq!(code.len(), 6);
        assert_eq!(code[0], encode_lw(Gpr::A0, Gpr::A1, 0));
        assert_eq!(opcode_of(code[2]), opcode::AMO);
        assert_eq!(opcode_of(code[4]), opcode::AMO);
    }

    #[test]
    fn cmpxchg_fences_follow_the_order() {
        let mut asm = Assembler::new();
        asm.cmpxchg_d(Gpr::A0, Gpr::A1, Gpr::A2, Gpr::A3, Gpr::T0, MemOrder::AcqRel);
        let code = words(asm);
        assert_eq!(code.len(), 8);
        assert_eq!(opcode_of(code[0]), opcode::MISC_MEM);
        assert_eq!(opcode_of(code[7]), opcode::MISC_MEM);
    }

    #[test]
    #[should_panic(expected = "conflicting operands")]
    fn cmpxchg_rejects_aliased_registers() {
        let mut asm = Assembler::new();
        asm.cmpxchg_w(Gpr::A0, Gpr::A1, Gpr::A0, Gpr::A3, Gpr::T0, MemOrder::Relaxed);
    }

    #[test]
    fn byte_cmpxchg_masks_within_the_aligned_word() {
        let mut asm = Assembler::new();
        asm.cmpxchg_b(
            Gpr::A0,
            Gpr::A1,
            Gpr::A2,
            Gpr::A3,
            [Gpr::T0, Gpr::T1, Gpr::T2, Gpr::T3],
            MemOrder::AcqRel,
        );
        let code = words(asm);
        assert_eq!(code[1], encode_andi(Gpr::T0, Gpr::A1, -4));
        assert_eq!(code.len(), 17);
    }

    #[test]
    fn volatile_save_area_covers_sixteen_registers() {
        let mut asm = Assembler::new();
        asm.save_volatile_gprs(Gpr::Sp, -128);
        assert_eq!(asm.offset(), 16 * 4);
        let mut asm = Assembler::new();
        asm.restore_volatile_gprs(Gpr::Sp, -128);
        assert_eq!(asm.offset(), 16 * 4);
    }

    #[test]
    fn vector_mnemonics_match_raw_encodings() {
        let mut asm = Assembler::new();
        asm.vxor(Vr::V1, Vr::V2, Vr::V3);
        asm.vmr(Vr::V4, Vr::V5);
        asm.vsrdq(Vr::V6, Vr::V7, Vr::V7, 8);
        let code = words(asm);
        assert_eq!(code[0], simd::encode_vxor(Vr::V1, Vr::V2, Vr::V3));
        assert_eq!(code[1], simd::encode_vor(Vr::V4, Vr::V5, Vr::V5));
        assert_eq!(code[2], simd::encode_vsrdq(Vr::V6, Vr::V7, Vr::V7, 8));
    }
}
