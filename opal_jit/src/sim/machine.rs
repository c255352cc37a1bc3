//! Guest memory, machine state, and the execute loop.

use rustc_hash::FxHashMap;

use super::decode::{self, AluOp, BranchCond, Instr, MemWidth, RotLanes, SplatLanes, VBitOp};
use crate::backend::riscv::registers::{Gpr, Vr};

/// Sentinel return address: jumping here ends the run.
pub const RETURN_TO_HOST: u64 = 0xFFFF_FFFF_FFFF_F000;

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// The word at `pc` is not part of the emitted subset.
    InvalidInstruction {
        /// Faulting program counter.
        pc: u64,
        /// The undecodable word.
        word: u32,
    },
    /// A data or fetch access fell outside guest memory.
    MemoryFault {
        /// First byte of the faulting access.
        addr: u64,
        /// Access size in bytes.
        len: usize,
        /// Program counter of the access.
        pc: u64,
    },
    /// A jump or branch produced a target that is not word-aligned.
    MisalignedTarget {
        /// Program counter of the jump.
        pc: u64,
        /// The misaligned target.
        target: u64,
    },
    /// The instruction budget ran out, which usually means emitted code
    /// looped forever.
    BudgetExhausted {
        /// The configured budget.
        limit: u64,
    },
    /// A registered host call reported an error.
    HostCallFault {
        /// Guest address the call was registered at.
        addr: u64,
        /// The host's description of the failure.
        message: String,
    },
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::InvalidInstruction { pc, word } => {
                write!(f, "invalid instruction {word:#010x} at pc {pc:#x}")
            }
            SimError::MemoryFault { addr, len, pc } => {
                write!(f, "{len}-byte access at {addr:#x} outside guest memory (pc {pc:#x})")
            }
            SimError::MisalignedTarget { pc, target } => {
                write!(f, "misaligned jump target {target:#x} (pc {pc:#x})")
            }
            SimError::BudgetExhausted { limit } => {
                write!(f, "instruction budget of {limit} exhausted")
            }
            SimError::HostCallFault { addr, message } => {
                write!(f, "host call at {addr:#x} failed: {message}")
            }
        }
    }
}

impl std::error::Error for SimError {}

/// Flat guest memory at a fixed base address.
pub struct GuestMemory {
    base: u64,
    bytes: Vec<u8>,
}

impl GuestMemory {
    /// Allocates `size` zeroed bytes at guest address `base`.
    pub fn new(base: u64, size: usize) -> Self {
        GuestMemory { base, bytes: vec![0; size] }
    }

    /// Lowest mapped guest address.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// One past the highest mapped guest address.
    pub fn end(&self) -> u64 {
        self.base + self.bytes.len() as u64
    }

    fn range(&self, addr: u64, len: usize) -> Option<usize> {
        let off = addr.checked_sub(self.base)? as usize;
        if off.checked_add(len)? <= self.bytes.len() {
            Some(off)
        } else {
            None
        }
    }

    /// Checked read of `N` little-endian bytes.
    pub fn try_read<const N: usize>(&self, addr: u64) -> Option<[u8; N]> {
        let off = self.range(addr, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[off..off + N]);
        Some(out)
    }

    /// Checked write of `N` bytes.
    pub fn try_write<const N: usize>(&mut self, addr: u64, bytes: [u8; N]) -> Option<()> {
        let off = self.range(addr, N)?;
        self.bytes[off..off + N].copy_from_slice(&bytes);
        Some(())
    }

    /// Setup helper: copy bytes into guest memory.
    ///
    /// # Panics
    ///
    /// Panics when the range is unmapped; setup mistakes are programmer
    /// errors, not guest faults.
    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) {
        let off = self.range(addr, bytes.len()).expect("write outside guest memory");
        self.bytes[off..off + bytes.len()].copy_from_slice(bytes);
    }

    /// Setup helper: read a byte range back out.
    pub fn read_bytes(&self, addr: u64, len: usize) -> &[u8] {
        let off = self.range(addr, len).expect("read outside guest memory");
        &self.bytes[off..off + len]
    }

    /// Setup helper: read one little-endian u64.
    pub fn read_u64(&self, addr: u64) -> u64 {
        u64::from_le_bytes(self.try_read(addr).expect("read outside guest memory"))
    }

    /// Setup helper: write one little-endian u64.
    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write_bytes(addr, &value.to_le_bytes());
    }
}

/// Architectural state: integer and vector registers, pc, reservation.
pub struct Machine {
    /// Guest memory.
    pub mem: GuestMemory,
    /// Current program counter.
    pub pc: u64,
    x: [u64; 32],
    v: [u128; 32],
    reservation: Option<u64>,
}

impl Machine {
    /// Creates a machine over the given memory with all registers zero.
    pub fn new(mem: GuestMemory) -> Self {
        Machine { mem, pc: 0, x: [0; 32], v: [0; 32], reservation: None }
    }

    /// Reads an integer register.
    pub fn reg(&self, r: Gpr) -> u64 {
        self.x[r.encoding() as usize]
    }

    /// Writes an integer register. Writes to `zero` are discarded.
    pub fn set_reg(&mut self, r: Gpr, value: u64) {
        if !r.is_zero() {
            self.x[r.encoding() as usize] = value;
        }
    }

    /// Reads a vector register.
    pub fn vreg(&self, r: Vr) -> u128 {
        self.v[r.encoding() as usize]
    }

    /// Writes a vector register.
    pub fn set_vreg(&mut self, r: Vr, value: u128) {
        self.v[r.encoding() as usize] = value;
    }

    #[inline]
    fn xr(&self, i: u8) -> u64 {
        self.x[i as usize]
    }

    #[inline]
    fn set_xr(&mut self, i: u8, value: u64) {
        if i != 0 {
            self.x[i as usize] = value;
        }
    }

    #[inline]
    fn vr(&self, i: u8) -> u128 {
        self.v[i as usize]
    }

    #[inline]
    fn set_vr(&mut self, i: u8, value: u128) {
        self.v[i as usize] = value;
    }

    fn load(&self, addr: u64, width: MemWidth, signed: bool) -> Option<u64> {
        Some(match (width, signed) {
            (MemWidth::B, false) => u8::from_le_bytes(self.mem.try_read(addr)?) as u64,
            (MemWidth::B, true) => i8::from_le_bytes(self.mem.try_read(addr)?) as i64 as u64,
            (MemWidth::H, false) => u16::from_le_bytes(self.mem.try_read(addr)?) as u64,
            (MemWidth::H, true) => i16::from_le_bytes(self.mem.try_read(addr)?) as i64 as u64,
            (MemWidth::W, false) => u32::from_le_bytes(self.mem.try_read(addr)?) as u64,
            (MemWidth::W, true) => i32::from_le_bytes(self.mem.try_read(addr)?) as i64 as u64,
            (MemWidth::D, _) => u64::from_le_bytes(self.mem.try_read(addr)?),
        })
    }

    fn store(&mut self, addr: u64, width: MemWidth, value: u64) -> Option<()> {
        match width {
            MemWidth::B => self.mem.try_write(addr, (value as u8).to_le_bytes()),
            MemWidth::H => self.mem.try_write(addr, (value as u16).to_le_bytes()),
            MemWidth::W => self.mem.try_write(addr, (value as u32).to_le_bytes()),
            MemWidth::D => self.mem.try_write(addr, value.to_le_bytes()),
        }
    }
}

// Lane helpers. A vector register is a u128 with lane 0 in the low bits.

fn words(v: u128) -> [u32; 4] {
    [v as u32, (v >> 32) as u32, (v >> 64) as u32, (v >> 96) as u32]
}

fn from_words(w: [u32; 4]) -> u128 {
    (w[0] as u128) | ((w[1] as u128) << 32) | ((w[2] as u128) << 64) | ((w[3] as u128) << 96)
}

fn dwords(v: u128) -> [u64; 2] {
    [v as u64, (v >> 64) as u64]
}

fn from_dwords(d: [u64; 2]) -> u128 {
    (d[0] as u128) | ((d[1] as u128) << 64)
}

fn vbyte(v: u128, i: usize) -> u8 {
    (v >> (8 * i)) as u8
}

fn sha256_sigma(x: u32, big: bool, second: bool) -> u32 {
    match (big, second) {
        (false, false) => x.rotate_right(7) ^ x.rotate_right(18) ^ (x >> 3),
        (false, true) => x.rotate_right(17) ^ x.rotate_right(19) ^ (x >> 10),
        (true, false) => x.rotate_right(2) ^ x.rotate_right(13) ^ x.rotate_right(22),
        (true, true) => x.rotate_right(6) ^ x.rotate_right(11) ^ x.rotate_right(25),
    }
}

fn sha512_sigma(x: u64, big: bool, second: bool) -> u64 {
    match (big, second) {
        (false, false) => x.rotate_right(1) ^ x.rotate_right(8) ^ (x >> 7),
        (false, true) => x.rotate_right(19) ^ x.rotate_right(61) ^ (x >> 6),
        (true, false) => x.rotate_right(28) ^ x.rotate_right(34) ^ x.rotate_right(39),
        (true, true) => x.rotate_right(14) ^ x.rotate_right(18) ^ x.rotate_right(41),
    }
}

/// Host closure run when control reaches its registered guest address.
pub type HostCall<'a> = Box<dyn FnMut(&mut Machine) -> Result<(), String> + 'a>;

/// The interpreter: machine state plus host-call table and budget.
pub struct Simulator<'a> {
    /// The simulated machine. Tests poke registers and memory directly.
    pub machine: Machine,
    host_calls: FxHashMap<u64, HostCall<'a>>,
    budget: u64,
}

impl<'a> Simulator<'a> {
    /// Default instruction budget per run.
    pub const DEFAULT_BUDGET: u64 = 16_000_000;

    /// Creates a simulator over the given guest memory.
    pub fn new(mem: GuestMemory) -> Self {
        Simulator {
            machine: Machine::new(mem),
            host_calls: FxHashMap::default(),
            budget: Self::DEFAULT_BUDGET,
        }
    }

    /// Caps the number of executed instructions per run.
    pub fn set_budget(&mut self, budget: u64) {
        self.budget = budget;
    }

    /// Registers a host closure at a guest address. When the pc reaches
    /// `addr` the closure runs against the machine and execution resumes at
    /// the address in `ra`, exactly like a call that returned.
    pub fn register_host_call(&mut self, addr: u64, call: impl FnMut(&mut Machine) -> Result<(), String> + 'a) {
        self.host_calls.insert(addr, Box::new(call));
    }

    /// Runs from `entry` until the code returns to the host, then yields the
    /// value left in `a0`.
    ///
    /// The return address register is preset to [`RETURN_TO_HOST`], so plain
    /// `ret` from the emitted routine ends the run.
    pub fn run(&mut self, entry: u64) -> Result<u64, SimError> {
        self.machine.pc = entry;
        self.machine.set_reg(Gpr::Ra, RETURN_TO_HOST);
        let mut executed = 0u64;

        loop {
            let pc = self.machine.pc;
            if pc == RETURN_TO_HOST {
                return Ok(self.machine.reg(Gpr::A0));
            }
            if executed >= self.budget {
                return Err(SimError::BudgetExhausted { limit: self.budget });
            }
            executed += 1;

            if let Some(call) = self.host_calls.get_mut(&pc) {
                call(&mut self.machine)
                    .map_err(|message| SimError::HostCallFault { addr: pc, message })?;
                self.machine.pc = self.machine.reg(Gpr::Ra);
                continue;
            }

            let word = u32::from_le_bytes(
                self.machine
                    .mem
                    .try_read(pc)
                    .ok_or(SimError::MemoryFault { addr: pc, len: 4, pc })?,
            );
            let instr = decode::decode(word)
                .ok_or(SimError::InvalidInstruction { pc, word })?;
            self.step(instr)?;
        }
    }

    fn jump(&mut self, target: u64) -> Result<(), SimError> {
        if target % 4 != 0 && target != RETURN_TO_HOST {
            return Err(SimError::MisalignedTarget { pc: self.machine.pc, target });
        }
        self.machine.pc = target;
        Ok(())
    }

    fn step(&mut self, instr: Instr) -> Result<(), SimError> {
        let m = &mut self.machine;
        let pc = m.pc;
        let mut next = pc.wrapping_add(4);

        let mem_fault = |addr: u64, len: usize| SimError::MemoryFault { addr, len, pc };

        match instr {
            Instr::Lui { rd, imm } => m.set_xr(rd, imm as u64),
            Instr::Auipc { rd, imm } => m.set_xr(rd, pc.wrapping_add(imm as u64)),
            Instr::AluImm { op, word, rd, rs1, imm } => {
                let value = alu(op, word, m.xr(rs1), imm as u64);
                m.set_xr(rd, value);
            }
            Instr::AluReg { op, word, rd, rs1, rs2 } => {
                let value = alu(op, word, m.xr(rs1), m.xr(rs2));
                m.set_xr(rd, value);
            }
            Instr::Load { width, signed, rd, rs1, offset } => {
                let addr = m.xr(rs1).wrapping_add(offset as u64);
                let value =
                    m.load(addr, width, signed).ok_or_else(|| mem_fault(addr, width.bytes()))?;
                m.set_xr(rd, value);
            }
            Instr::Store { width, rs2, rs1, offset } => {
                let addr = m.xr(rs1).wrapping_add(offset as u64);
                m.store(addr, width, m.xr(rs2)).ok_or_else(|| mem_fault(addr, width.bytes()))?;
            }
            Instr::Branch { cond, rs1, rs2, disp } => {
                let (a, b) = (m.xr(rs1), m.xr(rs2));
                let taken = match cond {
                    BranchCond::Eq => a == b,
                    BranchCond::Ne => a != b,
                    BranchCond::Lt => (a as i64) < b as i64,
                    BranchCond::Ge => (a as i64) >= b as i64,
                    BranchCond::Ltu => a < b,
                    BranchCond::Geu => a >= b,
                };
                if taken {
                    next = pc.wrapping_add(disp as u64);
                }
            }
            Instr::Jal { rd, disp } => {
                m.set_xr(rd, next);
                next = pc.wrapping_add(disp as u64);
            }
            Instr::Jalr { rd, rs1, offset } => {
                let target = m.xr(rs1).wrapping_add(offset as u64) & !1;
                m.set_xr(rd, next);
                next = target;
            }
            Instr::Fence => {
                // Single-threaded interpreter: ordering is always program order.
            }
            Instr::Ecall | Instr::Ebreak => {
                let word = if matches!(instr, Instr::Ecall) { 0x73 } else { 0x0010_0073 };
                return Err(SimError::InvalidInstruction { pc, word });
            }
            Instr::LoadReserved { word, rd, rs1 } => {
                let addr = m.xr(rs1);
                let width = if word { MemWidth::W } else { MemWidth::D };
                let value =
                    m.load(addr, width, word).ok_or_else(|| mem_fault(addr, width.bytes()))?;
                m.reservation = Some(addr);
                m.set_xr(rd, value);
            }
            Instr::StoreConditional { word, rd, rs2, rs1 } => {
                let addr = m.xr(rs1);
                let width = if word { MemWidth::W } else { MemWidth::D };
                if m.reservation.take() == Some(addr) {
                    m.store(addr, width, m.xr(rs2))
                        .ok_or_else(|| mem_fault(addr, width.bytes()))?;
                    m.set_xr(rd, 0);
                } else {
                    m.set_xr(rd, 1);
                }
            }
            Instr::AmoSwap { word, rd, rs2, rs1 } => {
                let addr = m.xr(rs1);
                let width = if word { MemWidth::W } else { MemWidth::D };
                let old =
                    m.load(addr, width, word).ok_or_else(|| mem_fault(addr, width.bytes()))?;
                m.store(addr, width, m.xr(rs2)).ok_or_else(|| mem_fault(addr, width.bytes()))?;
                m.set_xr(rd, old);
            }
            Instr::AmoAdd { word, rd, rs2, rs1 } => {
                let addr = m.xr(rs1);
                let width = if word { MemWidth::W } else { MemWidth::D };
                let old =
                    m.load(addr, width, word).ok_or_else(|| mem_fault(addr, width.bytes()))?;
                let sum = if word {
                    ((old as u32).wrapping_add(m.xr(rs2) as u32)) as u64
                } else {
                    old.wrapping_add(m.xr(rs2))
                };
                m.store(addr, width, sum).ok_or_else(|| mem_fault(addr, width.bytes()))?;
                m.set_xr(rd, old);
            }
            Instr::Vlx { vd, rs1, rs2 } => {
                let addr = m.xr(rs1).wrapping_add(m.xr(rs2)) & !0xF;
                let bytes: [u8; 16] = m.mem.try_read(addr).ok_or_else(|| mem_fault(addr, 16))?;
                m.set_vr(vd, u128::from_le_bytes(bytes));
            }
            Instr::Vsx { vs, rs1, rs2 } => {
                let addr = m.xr(rs1).wrapping_add(m.xr(rs2)) & !0xF;
                m.mem
                    .try_write(addr, m.vr(vs).to_le_bytes())
                    .ok_or_else(|| mem_fault(addr, 16))?;
            }
            Instr::Vlpc { vd, rs1, rs2 } => {
                let sh = m.xr(rs1).wrapping_add(m.xr(rs2)) & 0xF;
                let mut bytes = [0u8; 16];
                for (i, b) in bytes.iter_mut().enumerate() {
                    *b = ((sh as usize + i) & 0x1F) as u8;
                }
                m.set_vr(vd, u128::from_le_bytes(bytes));
            }
            Instr::VBitwise { op, vd, va, vb } => {
                let (a, b) = (m.vr(va), m.vr(vb));
                m.set_vr(
                    vd,
                    match op {
                        VBitOp::Xor => a ^ b,
                        VBitOp::And => a & b,
                        VBitOp::Or => a | b,
                    },
                );
            }
            Instr::VAdd { wide, vd, va, vb } => {
                let value = if wide {
                    let (a, b) = (dwords(m.vr(va)), dwords(m.vr(vb)));
                    from_dwords([a[0].wrapping_add(b[0]), a[1].wrapping_add(b[1])])
                } else {
                    let (a, b) = (words(m.vr(va)), words(m.vr(vb)));
                    from_words([
                        a[0].wrapping_add(b[0]),
                        a[1].wrapping_add(b[1]),
                        a[2].wrapping_add(b[2]),
                        a[3].wrapping_add(b[3]),
                    ])
                };
                m.set_vr(vd, value);
            }
            Instr::VRotl { lanes, vd, va, vb } => {
                let (a, b) = (m.vr(va), m.vr(vb));
                let value = match lanes {
                    RotLanes::H => {
                        let mut out = 0u128;
                        for i in 0..8 {
                            let lane = (a >> (16 * i)) as u16;
                            let amount = ((b >> (16 * i)) as u16) & 15;
                            out |= (lane.rotate_left(amount as u32) as u128) << (16 * i);
                        }
                        out
                    }
                    RotLanes::W => {
                        let (aw, bw) = (words(a), words(b));
                        from_words([
                            aw[0].rotate_left(bw[0] & 31),
                            aw[1].rotate_left(bw[1] & 31),
                            aw[2].rotate_left(bw[2] & 31),
                            aw[3].rotate_left(bw[3] & 31),
                        ])
                    }
                    RotLanes::D => {
                        let (ad, bd) = (dwords(a), dwords(b));
                        from_dwords([
                            ad[0].rotate_left((bd[0] & 63) as u32),
                            ad[1].rotate_left((bd[1] & 63) as u32),
                        ])
                    }
                };
                m.set_vr(vd, value);
            }
            Instr::VSllW { vd, va, vb } => {
                let (a, b) = (words(m.vr(va)), words(m.vr(vb)));
                m.set_vr(
                    vd,
                    from_words([
                        a[0] << (b[0] & 31),
                        a[1] << (b[1] & 31),
                        a[2] << (b[2] & 31),
                        a[3] << (b[3] & 31),
                    ]),
                );
            }
            Instr::VZipW { vd, va, vb } => {
                let (a, b) = (words(m.vr(va)), words(m.vr(vb)));
                m.set_vr(vd, from_words([a[0], b[0], a[1], b[1]]));
            }
            Instr::VMrgD { vd, va, vb } => {
                let (a, b) = (dwords(m.vr(va)), dwords(m.vr(vb)));
                m.set_vr(vd, from_dwords([a[0], b[0]]));
            }
            Instr::VSplat { lanes, vd, imm } => {
                let value = match lanes {
                    SplatLanes::B => {
                        let lane = imm as u8 as u128;
                        (0..16).fold(0u128, |acc, i| acc | (lane << (8 * i)))
                    }
                    SplatLanes::H => {
                        let lane = imm as i16 as u16 as u128;
                        (0..8).fold(0u128, |acc, i| acc | (lane << (16 * i)))
                    }
                    SplatLanes::W => {
                        let lane = imm as i32 as u32 as u128;
                        (0..4).fold(0u128, |acc, i| acc | (lane << (32 * i)))
                    }
                };
                m.set_vr(vd, value);
            }
            Instr::VShaSig { wide, vd, va, big, second } => {
                let value = if wide {
                    let a = dwords(m.vr(va));
                    from_dwords([
                        sha512_sigma(a[0], big, second),
                        sha512_sigma(a[1], big, second),
                    ])
                } else {
                    let a = words(m.vr(va));
                    from_words([
                        sha256_sigma(a[0], big, second),
                        sha256_sigma(a[1], big, second),
                        sha256_sigma(a[2], big, second),
                        sha256_sigma(a[3], big, second),
                    ])
                };
                m.set_vr(vd, value);
            }
            Instr::VMvXD { rd, va, lane } => {
                m.set_xr(rd, dwords(m.vr(va))[lane as usize]);
            }
            Instr::VPerm { vd, va, vb, vc } => {
                let (a, b, c) = (m.vr(va), m.vr(vb), m.vr(vc));
                let mut bytes = [0u8; 16];
                for (i, out) in bytes.iter_mut().enumerate() {
                    let sel = (vbyte(c, i) & 0x1F) as usize;
                    *out = if sel < 16 { vbyte(a, sel) } else { vbyte(b, sel - 16) };
                }
                m.set_vr(vd, u128::from_le_bytes(bytes));
            }
            Instr::VSel { vd, va, vb, vc } => {
                let (a, b, c) = (m.vr(va), m.vr(vb), m.vr(vc));
                m.set_vr(vd, (a & !c) | (b & c));
            }
            Instr::VSrdq { vd, va, vb, sh } => {
                let (a, b) = (m.vr(va), m.vr(vb));
                let mut bytes = [0u8; 16];
                for (i, out) in bytes.iter_mut().enumerate() {
                    let sel = i + sh as usize;
                    *out = if sel < 16 { vbyte(a, sel) } else { vbyte(b, sel - 16) };
                }
                m.set_vr(vd, u128::from_le_bytes(bytes));
            }
        }

        self.jump(next)
    }
}

fn alu(op: AluOp, word: bool, a: u64, b: u64) -> u64 {
    if word {
        let (a32, b32) = (a as u32, b as u32);
        let out = match op {
            AluOp::Add => a32.wrapping_add(b32),
            AluOp::Sub => a32.wrapping_sub(b32),
            AluOp::Sll => a32 << (b32 & 31),
            AluOp::Srl => a32 >> (b32 & 31),
            AluOp::Sra => ((a32 as i32) >> (b32 & 31)) as u32,
            _ => unreachable!("no 32-bit form"),
        };
        out as i32 as i64 as u64
    } else {
        match op {
            AluOp::Add => a.wrapping_add(b),
            AluOp::Sub => a.wrapping_sub(b),
            AluOp::Sll => a << (b & 63),
            AluOp::Slt => ((a as i64) < b as i64) as u64,
            AluOp::Sltu => (a < b) as u64,
            AluOp::Xor => a ^ b,
            AluOp::Srl => a >> (b & 63),
            AluOp::Sra => ((a as i64) >> (b & 63)) as u64,
            AluOp::Or => a | b,
            AluOp::And => a & b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::riscv::assembler::Assembler;
    use crate::backend::riscv::registers::{Gpr, Vr};

    const BASE: u64 = 0x10000;

    fn run(build: impl FnOnce(&mut Assembler)) -> Result<u64, SimError> {
        run_with(build, |_| {})
    }

    fn run_with(
        build: impl FnOnce(&mut Assembler),
        setup: impl FnOnce(&mut Machine),
    ) -> Result<u64, SimError> {
        let mut asm = Assembler::new();
        build(&mut asm);
        let code = asm.finish();
        let mut sim = Simulator::new(GuestMemory::new(BASE, 0x10000));
        sim.machine.mem.write_bytes(BASE, &code);
        sim.machine.set_reg(Gpr::Sp, BASE + 0xF000);
        setup(&mut sim.machine);
        sim.run(BASE)
    }

    #[test]
    fn returns_a0() {
        let got = run(|asm| {
            asm.li(Gpr::A0, 1234);
            asm.ret();
        });
        assert_eq!(got, Ok(1234));
    }

    #[test]
    fn arithmetic_and_branches() {
        // Sum 1..=10 with a loop.
        let got = run(|asm| {
            asm.li(Gpr::A0, 0);
            asm.li(Gpr::T0, 10);
            let loop_top = asm.create_label();
            asm.bind_label(loop_top);
            asm.add(Gpr::A0, Gpr::A0, Gpr::T0);
            asm.addi(Gpr::T0, Gpr::T0, -1);
            asm.bnez(Gpr::T0, loop_top);
            asm.ret();
        });
        assert_eq!(got, Ok(55));
    }

    #[test]
    fn word_ops_sign_extend() {
        let got = run(|asm| {
            asm.li(Gpr::A0, 0x7FFF_FFFF);
            asm.addiw(Gpr::A0, Gpr::A0, 1);
            asm.ret();
        });
        assert_eq!(got, Ok(0x8000_0000u32 as i32 as i64 as u64));
    }

    #[test]
    fn loads_and_stores() {
        let got = run_with(
            |asm| {
                asm.li(Gpr::T0, (BASE + 0x8000) as i64);
                asm.ld(Gpr::A0, Gpr::T0, 0);
                asm.sw(Gpr::A0, Gpr::T0, 8);
                asm.lw(Gpr::A0, Gpr::T0, 8);
                asm.ret();
            },
            |m| m.mem.write_u64(BASE + 0x8000, 0xFFFF_FFFF_8000_0001),
        );
        // sw truncates, lw sign-extends.
        assert_eq!(got, Ok(0xFFFF_FFFF_8000_0001));
    }

    #[test]
    fn unaligned_scalar_access_is_allowed() {
        let got = run_with(
            |asm| {
                asm.li(Gpr::T0, (BASE + 0x8003) as i64);
                asm.ld(Gpr::A0, Gpr::T0, 0);
                asm.ret();
            },
            |m| m.mem.write_bytes(BASE + 0x8003, &0x1122_3344_5566_7788u64.to_le_bytes()),
        );
        assert_eq!(got, Ok(0x1122_3344_5566_7788));
    }

    #[test]
    fn out_of_bounds_load_faults() {
        let got = run(|asm| {
            asm.li(Gpr::T0, 0x40);
            asm.ld(Gpr::A0, Gpr::T0, 0);
            asm.ret();
        });
        assert!(matches!(got, Err(SimError::MemoryFault { addr: 0x40, len: 8, .. })));
    }

    #[test]
    fn invalid_word_faults() {
        let mut sim = Simulator::new(GuestMemory::new(BASE, 0x1000));
        sim.machine.mem.write_bytes(BASE, &0xFFFF_FFFFu32.to_le_bytes());
        let got = sim.run(BASE);
        assert_eq!(got, Err(SimError::InvalidInstruction { pc: BASE, word: 0xFFFF_FFFF }));
    }

    #[test]
    fn budget_stops_infinite_loop() {
        let got = run_with(
            |asm| {
                let spin = asm.create_label();
                asm.bind_label(spin);
                asm.j(spin);
            },
            |_| {},
        );
        assert_eq!(got, Err(SimError::BudgetExhausted { limit: Simulator::DEFAULT_BUDGET }));
    }

    #[test]
    fn host_call_intercepts_and_returns() {
        let mut asm = Assembler::new();
        asm.li(Gpr::T0, 0x2000_0000);
        asm.sd(Gpr::Ra, Gpr::Sp, -8);
        asm.jalr(Gpr::Ra, Gpr::T0, 0);
        asm.ld(Gpr::Ra, Gpr::Sp, -8);
        asm.addi(Gpr::A0, Gpr::A0, 1);
        asm.ret();
        let code = asm.finish();

        let mut sim = Simulator::new(GuestMemory::new(BASE, 0x10000));
        sim.machine.mem.write_bytes(BASE, &code);
        sim.machine.set_reg(Gpr::Sp, BASE + 0xF000);
        sim.register_host_call(0x2000_0000, |m| {
            m.set_reg(Gpr::A0, 41);
            Ok(())
        });
        assert_eq!(sim.run(BASE), Ok(42));
    }

    #[test]
    fn host_call_fault_propagates() {
        let mut asm = Assembler::new();
        asm.li(Gpr::T0, 0x2000_0000);
        asm.jalr(Gpr::Zero, Gpr::T0, 0);
        let code = asm.finish();

        let mut sim = Simulator::new(GuestMemory::new(BASE, 0x1000));
        sim.machine.mem.write_bytes(BASE, &code);
        sim.register_host_call(0x2000_0000, |_| Err("no such handle".into()));
        let got = sim.run(BASE);
        assert!(matches!(got, Err(SimError::HostCallFault { addr: 0x2000_0000, .. })));
    }

    #[test]
    fn lr_sc_succeeds_on_matching_reservation() {
        let got = run_with(
            |asm| {
                asm.li(Gpr::T0, (BASE + 0x8000) as i64);
                asm.li(Gpr::T1, 7);
                asm.lr_d(Gpr::A0, Gpr::T0, false, false);
                asm.sc_d(Gpr::A0, Gpr::T1, Gpr::T0, false, false);
                asm.ret();
            },
            |_| {},
        );
        assert_eq!(got, Ok(0));
    }

    #[test]
    fn sc_without_reservation_fails() {
        let got = run(|asm| {
            asm.li(Gpr::T0, (BASE + 0x8000) as i64);
            asm.li(Gpr::T1, 7);
            asm.sc_d(Gpr::A0, Gpr::T1, Gpr::T0, false, false);
            asm.ret();
        });
        assert_eq!(got, Ok(1));
    }

    #[test]
    fn vector_memory_masks_alignment() {
        let got = run_with(
            |asm| {
                asm.li(Gpr::T0, (BASE + 0x8007) as i64);
                asm.vlx(Vr::V1, Gpr::T0, Gpr::Zero);
                asm.vmv_x_d(Gpr::A0, Vr::V1, 0);
                asm.ret();
            },
            |m| m.mem.write_u64(BASE + 0x8000, 0xAABB_CCDD_EEFF_0011),
        );
        assert_eq!(got, Ok(0xAABB_CCDD_EEFF_0011));
    }

    #[test]
    fn vlpc_vperm_realigns_a_misaligned_stream() {
        let got = run_with(
            |asm| {
                // t0 = misaligned source; extract 16 bytes starting there.
                asm.li(Gpr::T0, (BASE + 0x8005) as i64);
                asm.li(Gpr::T1, 16);
                asm.vlx(Vr::V1, Gpr::T0, Gpr::Zero);
                asm.vlx(Vr::V2, Gpr::T0, Gpr::T1);
                asm.vlpc(Vr::V3, Gpr::T0, Gpr::Zero);
                asm.vperm(Vr::V4, Vr::V1, Vr::V2, Vr::V3);
                asm.vmv_x_d(Gpr::A0, Vr::V4, 0);
                asm.ret();
            },
            |m| {
                let bytes: Vec<u8> = (0u8..48).collect();
                m.mem.write_bytes(BASE + 0x8000, &bytes);
            },
        );
        // Bytes 5..13 little-endian.
        assert_eq!(got, Ok(0x0C0B_0A09_0807_0605));
    }

    #[test]
    fn vsrdq_rotates_with_equal_sources() {
        let got = run_with(
            |asm| {
                asm.li(Gpr::T0, (BASE + 0x8000) as i64);
                asm.vlx(Vr::V1, Gpr::T0, Gpr::Zero);
                asm.vsrdq(Vr::V2, Vr::V1, Vr::V1, 4);
                asm.vmv_x_d(Gpr::A0, Vr::V2, 0);
                asm.ret();
            },
            |m| {
                m.mem.write_bytes(
                    BASE + 0x8000,
                    &[1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4],
                );
            },
        );
        // Word lane 0 becomes old lane 1, lane 1 old lane 2.
        assert_eq!(got, Ok(0x0303_0303_0202_0202));
    }

    #[test]
    fn sigma_matches_scalar_reference() {
        let x = 0x6a09_e667u32;
        let got = run_with(
            |asm| {
                asm.li(Gpr::T0, (BASE + 0x8000) as i64);
                asm.vlx(Vr::V1, Gpr::T0, Gpr::Zero);
                asm.vshasig_w(Vr::V2, Vr::V1, false, false);
                asm.vmv_x_d(Gpr::A0, Vr::V2, 0);
                asm.ret();
            },
            |m| m.mem.write_bytes(BASE + 0x8000, &(x as u128).to_le_bytes()),
        );
        let expect = x.rotate_right(7) ^ x.rotate_right(18) ^ (x >> 3);
        assert_eq!(got, Ok(expect as u64));
    }
}
