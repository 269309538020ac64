//! Assembler for x86-64
//!
//! Only the handful of instructions the code generator needs. Memory operands are always
//! `[base + disp8]`.

use std::fmt;

use crate::errors::GenerationError;

// Every instruction is traced; enable with RUST_LOG=hotloop_core::asm=trace
macro_rules! asm {
    ($($arg:tt)+) => {
        log::trace!(target: "hotloop_core::asm", $($arg)+)
    };
}

/// Reference to a 64-bit register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R64(pub u8);

/// Reference to the low 32-bits of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct R32(pub u8);

/// Reference to the low 8-bits of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg8(pub u8);

pub const RAX: R64 = R64(0);
pub const RCX: R64 = R64(1);
pub const RDX: R64 = R64(2);
pub const RBX: R64 = R64(3);
pub const RSP: R64 = R64(4);
pub const RBP: R64 = R64(5);
pub const RSI: R64 = R64(6);
pub const RDI: R64 = R64(7);
pub const R8: R64 = R64(8);
pub const R12: R64 = R64(12);
pub const R13: R64 = R64(13);
pub const R14: R64 = R64(14);

pub const EAX: R32 = R32(0);
pub const ESI: R32 = R32(6);

pub const AL: Reg8 = Reg8(0);

/// A byte in memory: `byte [base + disp]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: R64,
    pub disp: i8,
}

impl Mem {
    pub fn at(base: R64, disp: i8) -> Self {
        Mem { base, disp }
    }
}

/// Condition codes, as encoded in the low nibble of `Jcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    /// a.k.a. "equal"
    Zero = 0x4,
    NotZero = 0x5,
    Sign = 0x8,
}

/// How many bytes a branch displacement occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Rel8,
    Rel32,
}

/// A forward branch whose target is not known yet. Hand it back to
/// [X86_64Assembly::patch_to_here] once it is.
#[must_use = "an unpatched branch jumps to nowhere"]
#[derive(Debug)]
pub struct Fixup {
    /// Where the displacement field starts.
    at: usize,
    width: Width,
}

/// Generates x86-64 machine code.
pub struct X86_64Assembly {
    code: Vec<u8>,
    unresolved_branches: usize,
}

impl X86_64Assembly {
    pub fn new() -> Self {
        X86_64Assembly {
            code: Vec::new(),
            unresolved_branches: 0,
        }
    }

    /// Offset of the next instruction.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    /// The code so far. Branches might not be patched yet!
    pub fn machine_code(&self) -> &[u8] {
        &self.code[..]
    }

    /// Returns the machine code, provided every forward branch was patched.
    pub fn finish(self) -> Result<Vec<u8>, GenerationError> {
        if self.unresolved_branches > 0 {
            return Err(GenerationError::UnpatchedBranches(self.unresolved_branches));
        }

        Ok(self.code)
    }

    // Stack //////////////////////////////////////////////////////////////////////////////////////

    pub fn push(&mut self, r: R64) {
        asm!("push {}", r);
        self.emit_rex(false, 0, r.0);
        self.emit(&[0x50 + (r.0 & 7)]);
    }

    pub fn pop(&mut self, r: R64) {
        asm!("pop {}", r);
        self.emit_rex(false, 0, r.0);
        self.emit(&[0x58 + (r.0 & 7)]);
    }

    // Moves //////////////////////////////////////////////////////////////////////////////////////

    /// MOV r/m64, r64
    pub fn mov(&mut self, dst: R64, src: R64) {
        asm!("mov {}, {}", dst, src);
        self.emit_rex(true, src.0, dst.0);
        self.emit(&[0x89, modrm_direct(src.0, dst.0)]);
    }

    /// MOV r/m8, r8
    pub fn mov_store8(&mut self, mem: Mem, src: Reg8) {
        asm!("mov {}, {}", mem, src);
        // Without a REX prefix, 4..=7 would mean ah, ch, dh, bh.
        if src.0 >= 4 || mem.base.0 >= 8 {
            self.emit(&[rex(false, src.0, mem.base.0)]);
        }
        self.emit(&[0x88]);
        self.emit_modrm_mem(src.0, mem);
    }

    /// MOVZX r32, r/m8
    pub fn movzx(&mut self, dst: R32, mem: Mem) {
        asm!("movzx {}, {}", dst, mem);
        self.emit_rex(false, dst.0, mem.base.0);
        self.emit(&[0x0F, 0xB6]);
        self.emit_modrm_mem(dst.0, mem);
    }

    // Arithmetic /////////////////////////////////////////////////////////////////////////////////

    /// ADD r/m8, imm8
    pub fn add_mem8(&mut self, mem: Mem, imm: u8) {
        asm!("add {}, {:#04x}", mem, imm);
        self.emit_rex(false, 0, mem.base.0);
        self.emit(&[0x80]);
        self.emit_modrm_mem(0, mem);
        self.emit(&[imm]);
    }

    /// CMP r/m8, imm8
    pub fn cmp_mem8(&mut self, mem: Mem, imm: u8) {
        asm!("cmp {}, {:#04x}", mem, imm);
        self.emit_rex(false, 0, mem.base.0);
        self.emit(&[0x80]);
        self.emit_modrm_mem(7, mem);
        self.emit(&[imm]);
    }

    /// ADD r/m64, imm8 (sign-extended)
    pub fn add64(&mut self, dst: R64, imm: i8) {
        asm!("add {}, {}", dst, imm);
        self.emit_rex(true, 0, dst.0);
        self.emit(&[0x83, modrm_direct(0, dst.0), imm as u8]);
    }

    /// TEST r/m32, r32
    pub fn test32(&mut self, a: R32, b: R32) {
        asm!("test {}, {}", a, b);
        self.emit_rex(false, b.0, a.0);
        self.emit(&[0x85, modrm_direct(b.0, a.0)]);
    }

    // Control flow ///////////////////////////////////////////////////////////////////////////////

    /// CALL r/m64
    pub fn call(&mut self, target: R64) {
        asm!("call {}", target);
        self.emit_rex(false, 0, target.0);
        self.emit(&[0xFF, modrm_direct(2, target.0)]);
    }

    pub fn ret(&mut self) {
        asm!("ret");
        self.emit(&[0xC3]);
    }

    /// Unconditional jump to an offset that is already known.
    pub fn jmp(&mut self, target: usize) -> Result<(), GenerationError> {
        asm!("jmp {:#x}", target);
        self.emit(&[0xE9]);
        self.emit_rel32_to(target)
    }

    /// Conditional jump to an offset that is already known.
    pub fn jcc(&mut self, cond: Cond, target: usize) -> Result<(), GenerationError> {
        asm!("j{} {:#x}", cond, target);
        self.emit(&[0x0F, 0x80 | cond as u8]);
        self.emit_rel32_to(target)
    }

    /// Unconditional jump forwards, to be patched later.
    pub fn jmp_forward(&mut self, width: Width) -> Fixup {
        asm!("jmp <forward>");
        match width {
            Width::Rel8 => self.emit(&[0xEB]),
            Width::Rel32 => self.emit(&[0xE9]),
        }
        self.reserve_displacement(width)
    }

    /// Conditional jump forwards, to be patched later. Always uses a 32-bit displacement.
    pub fn jcc_forward(&mut self, cond: Cond) -> Fixup {
        asm!("j{} <forward>", cond);
        self.emit(&[0x0F, 0x80 | cond as u8]);
        self.reserve_displacement(Width::Rel32)
    }

    /// Makes a forward branch land on the next instruction emitted.
    pub fn patch_to_here(&mut self, fixup: Fixup) -> Result<(), GenerationError> {
        let Fixup { at, width } = fixup;
        let end_of_branch = at + width.len();
        let displacement = self.position() as i64 - end_of_branch as i64;

        match width {
            Width::Rel8 => {
                let rel = i8::try_from(displacement)
                    .map_err(|_| GenerationError::BranchOutOfRange(displacement))?;
                self.code[at] = rel as u8;
            }
            Width::Rel32 => {
                let rel = i32::try_from(displacement)
                    .map_err(|_| GenerationError::BranchOutOfRange(displacement))?;
                self.code[at..end_of_branch].copy_from_slice(&rel.to_le_bytes());
            }
        }

        asm!("; patched branch at {:#x} -> {:#x}", at, self.position());
        self.unresolved_branches -= 1;
        Ok(())
    }

    // Private methods ////////////////////////////////////////////////////////////////////////////

    fn emit(&mut self, bytes: &[u8]) {
        self.code.extend_from_slice(bytes);
    }

    /// Emits a REX prefix, but only if one is needed.
    fn emit_rex(&mut self, wide: bool, reg: u8, rm: u8) {
        let prefix = rex(wide, reg, rm);
        if prefix != REX {
            self.emit(&[prefix]);
        }
    }

    fn emit_modrm_mem(&mut self, reg: u8, mem: Mem) {
        let base = mem.base.0 & 7;
        // mod=00 with base 101 means rip-relative, so rbp and r13 always need a displacement.
        let with_displacement = mem.disp != 0 || base == 0b101;
        let mode = if with_displacement { 0b01 } else { 0b00 };

        self.emit(&[mode << 6 | (reg & 7) << 3 | base]);
        if base == 0b100 {
            // rsp and r12 need a SIB byte: no index, same base
            self.emit(&[0x24]);
        }
        if with_displacement {
            self.emit(&[mem.disp as u8]);
        }
    }

    fn emit_rel32_to(&mut self, target: usize) -> Result<(), GenerationError> {
        let end_of_branch = self.position() + 4;
        let displacement = target as i64 - end_of_branch as i64;
        let rel = i32::try_from(displacement)
            .map_err(|_| GenerationError::BranchOutOfRange(displacement))?;
        self.emit(&rel.to_le_bytes());
        Ok(())
    }

    fn reserve_displacement(&mut self, width: Width) -> Fixup {
        let at = self.position();
        // Recognizable garbage, in case it ever escapes unpatched.
        self.emit(&[0xDE, 0xAD, 0xBE, 0xEF][..width.len()]);
        self.unresolved_branches += 1;
        Fixup { at, width }
    }
}

impl Default for X86_64Assembly {
    fn default() -> Self {
        Self::new()
    }
}

impl Width {
    fn len(self) -> usize {
        match self {
            Width::Rel8 => 1,
            Width::Rel32 => 4,
        }
    }
}

const REX: u8 = 0b0100_0000;

fn rex(wide: bool, reg: u8, rm: u8) -> u8 {
    REX | (wide as u8) << 3 | (reg >> 3) << 2 | (rm >> 3)
}

fn modrm_direct(reg: u8, rm: u8) -> u8 {
    0b11 << 6 | (reg & 7) << 3 | (rm & 7)
}

/////////////////////////////////// Traits and implementations ////////////////////////////////////

const NAMES_64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

impl fmt::Display for R64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", NAMES_64[self.0 as usize & 15])
    }
}

impl fmt::Display for R32 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match NAMES_64[self.0 as usize & 15].strip_prefix('r') {
            Some(name) if self.0 < 8 => write!(f, "e{}", name),
            _ => write!(f, "r{}d", self.0),
        }
    }
}

impl fmt::Display for Reg8 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        const NAMES: [&str; 8] = ["al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil"];
        match NAMES.get(self.0 as usize) {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "r{}b", self.0),
        }
    }
}

impl fmt::Display for Mem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.disp {
            0 => write!(f, "byte [{}]", self.base),
            d if d < 0 => write!(f, "byte [{}-{}]", self.base, -(d as i16)),
            d => write!(f, "byte [{}+{}]", self.base, d),
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let suffix = match self {
            Cond::Zero => "z",
            Cond::NotZero => "nz",
            Cond::Sign => "s",
        };
        write!(f, "{}", suffix)
    }
}
