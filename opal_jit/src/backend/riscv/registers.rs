//! Register definitions and ABI conventions for the RV64 target.
//!
//! This module provides:
//! - General-purpose register (GPR) definitions with hardware encodings
//! - Vector register definitions for the 128-bit SIMD extension
//! - The fixed calling convention the generated code runs under
//!
//! # Performance Considerations
//! - All register types are `Copy` with `#[repr(u8)]` for zero-cost encoding
//! - Register sets use bitfields for O(1) membership testing
//! - Convention tables are const-evaluated

use std::fmt;

// =============================================================================
// General-Purpose Registers (GPR)
// =============================================================================

/// RV64 general-purpose register, named by ABI role.
///
/// The discriminant is the 5-bit hardware encoding used directly in the
/// rd/rs1/rs2 instruction fields. `Zero` reads as zero and ignores writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Zero = 0,
    Ra = 1,
    Sp = 2,
    Gp = 3,
    Tp = 4,
    T0 = 5,
    T1 = 6,
    T2 = 7,
    S0 = 8,
    S1 = 9,
    A0 = 10,
    A1 = 11,
    A2 = 12,
    A3 = 13,
    A4 = 14,
    A5 = 15,
    A6 = 16,
    A7 = 17,
    S2 = 18,
    S3 = 19,
    S4 = 20,
    S5 = 21,
    S6 = 22,
    S7 = 23,
    S8 = 24,
    S9 = 25,
    S10 = 26,
    S11 = 27,
    T3 = 28,
    T4 = 29,
    T5 = 30,
    T6 = 31,
}

impl Gpr {
    /// All 32 general-purpose registers in encoding order.
    pub const ALL: [Gpr; 32] = [
        Gpr::Zero,
        Gpr::Ra,
        Gpr::Sp,
        Gpr::Gp,
        Gpr::Tp,
        Gpr::T0,
        Gpr::T1,
        Gpr::T2,
        Gpr::S0,
        Gpr::S1,
        Gpr::A0,
        Gpr::A1,
        Gpr::A2,
        Gpr::A3,
        Gpr::A4,
        Gpr::A5,
        Gpr::A6,
        Gpr::A7,
        Gpr::S2,
        Gpr::S3,
        Gpr::S4,
        Gpr::S5,
        Gpr::S6,
        Gpr::S7,
        Gpr::S8,
        Gpr::S9,
        Gpr::S10,
        Gpr::S11,
        Gpr::T3,
        Gpr::T4,
        Gpr::T5,
        Gpr::T6,
    ];

    /// ABI names indexed by encoding.
    pub const NAMES: [&'static str; 32] = [
        "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3",
        "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
        "t3", "t4", "t5", "t6",
    ];

    /// Get the 5-bit hardware encoding.
    #[inline(always)]
    pub const fn encoding(self) -> u32 {
        self as u32
    }

    /// Convert from an encoding value if valid.
    #[inline]
    pub const fn from_encoding(enc: u32) -> Option<Gpr> {
        if enc < 32 {
            // Discriminants are exactly 0..32 in declaration order.
            Some(Gpr::ALL[enc as usize])
        } else {
            None
        }
    }

    /// Get the ABI name.
    #[inline]
    pub const fn name(self) -> &'static str {
        Gpr::NAMES[self as usize]
    }

    /// Whether writes to this register are discarded.
    #[inline(always)]
    pub const fn is_zero(self) -> bool {
        matches!(self, Gpr::Zero)
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Vector Registers
// =============================================================================

/// 128-bit vector register of the SIMD extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Vr {
    V0 = 0,
    V1 = 1,
    V2 = 2,
    V3 = 3,
    V4 = 4,
    V5 = 5,
    V6 = 6,
    V7 = 7,
    V8 = 8,
    V9 = 9,
    V10 = 10,
    V11 = 11,
    V12 = 12,
    V13 = 13,
    V14 = 14,
    V15 = 15,
    V16 = 16,
    V17 = 17,
    V18 = 18,
    V19 = 19,
    V20 = 20,
    V21 = 21,
    V22 = 22,
    V23 = 23,
    V24 = 24,
    V25 = 25,
    V26 = 26,
    V27 = 27,
    V28 = 28,
    V29 = 29,
    V30 = 30,
    V31 = 31,
}

impl Vr {
    /// All 32 vector registers in encoding order.
    pub const ALL: [Vr; 32] = [
        Vr::V0,
        Vr::V1,
        Vr::V2,
        Vr::V3,
        Vr::V4,
        Vr::V5,
        Vr::V6,
        Vr::V7,
        Vr::V8,
        Vr::V9,
        Vr::V10,
        Vr::V11,
        Vr::V12,
        Vr::V13,
        Vr::V14,
        Vr::V15,
        Vr::V16,
        Vr::V17,
        Vr::V18,
        Vr::V19,
        Vr::V20,
        Vr::V21,
        Vr::V22,
        Vr::V23,
        Vr::V24,
        Vr::V25,
        Vr::V26,
        Vr::V27,
        Vr::V28,
        Vr::V29,
        Vr::V30,
        Vr::V31,
    ];

    /// Get the 5-bit hardware encoding.
    #[inline(always)]
    pub const fn encoding(self) -> u32 {
        self as u32
    }

    /// Convert from an encoding value if valid.
    #[inline]
    pub const fn from_encoding(enc: u32) -> Option<Vr> {
        if enc < 32 {
            Some(Vr::ALL[enc as usize])
        } else {
            None
        }
    }

    /// Whether this register is preserved across calls.
    #[inline(always)]
    pub const fn is_callee_saved(self) -> bool {
        self.encoding() >= 20
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.encoding())
    }
}

// =============================================================================
// Register Sets (Bitfield)
// =============================================================================

/// A set of GPRs using a 32-bit bitfield for O(1) operations.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct GprSet(u32);

impl GprSet {
    /// Empty register set.
    pub const EMPTY: GprSet = GprSet(0);

    /// All 32 registers.
    pub const ALL: GprSet = GprSet(u32::MAX);

    /// Create a set containing a single register.
    #[inline(always)]
    pub const fn singleton(reg: Gpr) -> Self {
        GprSet(1 << reg.encoding())
    }

    /// Create from a raw bitmask.
    #[inline(always)]
    pub const fn from_bits(bits: u32) -> Self {
        GprSet(bits)
    }

    /// Get the raw bitmask.
    #[inline(always)]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if the set contains a register.
    #[inline(always)]
    pub const fn contains(self, reg: Gpr) -> bool {
        (self.0 & (1 << reg.encoding())) != 0
    }

    /// Add a register to the set.
    #[inline(always)]
    pub const fn insert(self, reg: Gpr) -> Self {
        GprSet(self.0 | (1 << reg.encoding()))
    }

    /// Remove a register from the set.
    #[inline(always)]
    pub const fn remove(self, reg: Gpr) -> Self {
        GprSet(self.0 & !(1 << reg.encoding()))
    }

    /// Union of two sets.
    #[inline(always)]
    pub const fn union(self, other: GprSet) -> Self {
        GprSet(self.0 | other.0)
    }

    /// Difference (self - other).
    #[inline(always)]
    pub const fn difference(self, other: GprSet) -> Self {
        GprSet(self.0 & !other.0)
    }

    /// Check if the set is empty.
    #[inline(always)]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Count the registers in the set.
    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterate over registers in the set (ascending encoding order).
    pub fn iter(self) -> impl Iterator<Item = Gpr> {
        (0..32).filter_map(move |i| {
            if (self.0 & (1 << i)) != 0 {
                Gpr::from_encoding(i)
            } else {
                None
            }
        })
    }
}

impl fmt::Debug for GprSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GprSet{{")?;
        let mut first = true;
        for reg in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{reg}")?;
            first = false;
        }
        write!(f, "}}")
    }
}

/// A set of vector registers using a 32-bit bitfield.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct VrSet(u32);

impl VrSet {
    /// Empty register set.
    pub const EMPTY: VrSet = VrSet(0);

    /// All 32 registers.
    pub const ALL: VrSet = VrSet(u32::MAX);

    /// Create a set containing a single register.
    #[inline(always)]
    pub const fn singleton(reg: Vr) -> Self {
        VrSet(1 << reg.encoding())
    }

    /// Create from a raw bitmask.
    #[inline(always)]
    pub const fn from_bits(bits: u32) -> Self {
        VrSet(bits)
    }

    /// Check if the set contains a register.
    #[inline(always)]
    pub const fn contains(self, reg: Vr) -> bool {
        (self.0 & (1 << reg.encoding())) != 0
    }

    /// Add a register to the set.
    #[inline(always)]
    pub const fn insert(self, reg: Vr) -> Self {
        VrSet(self.0 | (1 << reg.encoding()))
    }

    /// Count the registers in the set.
    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Iterate over registers in the set (ascending encoding order).
    pub fn iter(self) -> impl Iterator<Item = Vr> {
        (0..32).filter_map(move |i| {
            if (self.0 & (1 << i)) != 0 {
                Vr::from_encoding(i)
            } else {
                None
            }
        })
    }
}

// =============================================================================
// Calling Convention
// =============================================================================

/// The fixed calling convention all generated code runs under.
///
/// Unlike a host-ABI abstraction there is exactly one convention here: the
/// runtime, the barrier stubs and the intrinsic stubs all agree on it.
pub struct CallingConvention;

impl CallingConvention {
    /// Integer argument registers in order.
    pub const INT_ARGS: [Gpr; 8] = [
        Gpr::A0,
        Gpr::A1,
        Gpr::A2,
        Gpr::A3,
        Gpr::A4,
        Gpr::A5,
        Gpr::A6,
        Gpr::A7,
    ];

    /// Integer return register.
    pub const INT_RET: Gpr = Gpr::A0;

    /// Register that carries the thread pointer in generated code.
    pub const THREAD: Gpr = Gpr::S7;

    /// Scratch register out-of-line stubs receive arguments in and may
    /// clobber without saving.
    pub const STUB_SCRATCH: Gpr = Gpr::T6;

    /// Caller-saved GPRs: ra, t0-t6, a0-a7.
    pub const VOLATILE_GPRS: GprSet = GprSet::from_bits(
        (1 << 1)            // ra
            | (0b111 << 5)  // t0-t2
            | (0xFF << 10)  // a0-a7
            | (0xF << 28), // t3-t6
    );

    /// Callee-saved GPRs: sp, gp, tp, s0-s11.
    pub const CALLEE_SAVED_GPRS: GprSet = GprSet::from_bits(
        (0b111 << 2)        // sp, gp, tp
            | (0b11 << 8)   // s0, s1
            | (0x3FF << 18), // s2-s11
    );

    /// Caller-saved vector registers: v0-v19.
    pub const VOLATILE_VRS: VrSet = VrSet::from_bits(0x000F_FFFF);

    /// Callee-saved vector registers: v20-v31.
    pub const CALLEE_SAVED_VRS: VrSet = VrSet::from_bits(0xFFF0_0000);

    /// Stack alignment requirement in bytes.
    pub const STACK_ALIGN: usize = 16;

    /// Scratch area below the stack pointer that leaf code may use without
    /// adjusting sp. Sized for the largest vector spill set plus stub slots.
    pub const RED_ZONE_BYTES: i32 = 256;
}

/// Assert that all given registers are pairwise distinct.
///
/// Register aliasing between the operands of a macro expansion corrupts the
/// generated code, so it is a generation-time fatal error.
#[track_caller]
pub fn assert_different(regs: &[Gpr]) {
    for (i, a) in regs.iter().enumerate() {
        for b in &regs[i + 1..] {
            assert!(a != b, "register {a} used for two conflicting operands");
        }
    }
}

/// Assert that all given vector registers are pairwise distinct.
#[track_caller]
pub fn assert_different_vrs(regs: &[Vr]) {
    for (i, a) in regs.iter().enumerate() {
        for b in &regs[i + 1..] {
            assert!(a != b, "vector register {a} used for two conflicting operands");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpr_encoding() {
        assert_eq!(Gpr::Zero.encoding(), 0);
        assert_eq!(Gpr::Ra.encoding(), 1);
        assert_eq!(Gpr::A0.encoding(), 10);
        assert_eq!(Gpr::S7.encoding(), 23);
        assert_eq!(Gpr::T6.encoding(), 31);
    }

    #[test]
    fn test_gpr_round_trip() {
        for reg in Gpr::ALL {
            assert_eq!(Gpr::from_encoding(reg.encoding()), Some(reg));
        }
        assert_eq!(Gpr::from_encoding(32), None);
    }

    #[test]
    fn test_gpr_names() {
        assert_eq!(Gpr::Zero.name(), "zero");
        assert_eq!(Gpr::S11.name(), "s11");
        assert_eq!(format!("{}", Gpr::A5), "a5");
    }

    #[test]
    fn test_vr_round_trip() {
        for reg in Vr::ALL {
            assert_eq!(Vr::from_encoding(reg.encoding()), Some(reg));
        }
        assert_eq!(Vr::from_encoding(40), None);
    }

    #[test]
    fn test_vr_callee_saved_split() {
        assert!(!Vr::V19.is_callee_saved());
        assert!(Vr::V20.is_callee_saved());
        assert!(Vr::V31.is_callee_saved());
    }

    #[test]
    fn test_gpr_set_operations() {
        let set = GprSet::EMPTY.insert(Gpr::A0).insert(Gpr::T0).insert(Gpr::S2);

        assert!(set.contains(Gpr::A0));
        assert!(set.contains(Gpr::T0));
        assert!(set.contains(Gpr::S2));
        assert!(!set.contains(Gpr::A1));
        assert_eq!(set.count(), 3);

        let removed = set.remove(Gpr::T0);
        assert!(!removed.contains(Gpr::T0));
        assert_eq!(removed.count(), 2);
    }

    #[test]
    fn test_gpr_set_iter_order() {
        let set = GprSet::EMPTY.insert(Gpr::T6).insert(Gpr::Ra).insert(Gpr::A3);
        let regs: Vec<_> = set.iter().collect();
        assert_eq!(regs, vec![Gpr::Ra, Gpr::A3, Gpr::T6]);
    }

    #[test]
    fn test_convention_partition() {
        // Every register except zero is either volatile or callee-saved.
        let vol = CallingConvention::VOLATILE_GPRS;
        let saved = CallingConvention::CALLEE_SAVED_GPRS;
        assert_eq!(vol.bits() & saved.bits(), 0);
        assert_eq!(vol.union(saved).count(), 31);
        assert!(!vol.union(saved).contains(Gpr::Zero));
    }

    #[test]
    fn test_convention_roles() {
        assert!(CallingConvention::CALLEE_SAVED_GPRS.contains(CallingConvention::THREAD));
        assert!(CallingConvention::VOLATILE_GPRS.contains(CallingConvention::STUB_SCRATCH));
        assert_eq!(CallingConvention::INT_ARGS[0], CallingConvention::INT_RET);
    }

    #[test]
    fn test_vr_convention_partition() {
        let vol = CallingConvention::VOLATILE_VRS;
        let saved = CallingConvention::CALLEE_SAVED_VRS;
        assert_eq!(vol.count() + saved.count(), 32);
        for reg in saved.iter() {
            assert!(reg.is_callee_saved());
        }
    }

    #[test]
    fn test_assert_different_ok() {
        assert_different(&[Gpr::A0, Gpr::A1, Gpr::T0]);
    }

    #[test]
    #[should_panic(expected = "conflicting operands")]
    fn test_assert_different_panics() {
        assert_different(&[Gpr::A0, Gpr::A1, Gpr::A0]);
    }
}
