//! Decoded instruction representation.
//!
//! This module defines the data model produced by the decoder: prefix state, the
//! instruction class used for policy decisions, immediate sizing categories, the
//! destination-operand categories used by the register integrity checks, and the
//! [`DecodedInstruction`] struct itself.

use bitflags::bitflags;
use strum::Display;

bitflags! {
    /// Legacy and REX prefix state accumulated while scanning an instruction.
    ///
    /// One bit per recognized prefix byte, plus the individual REX payload bits.
    /// A repeated prefix byte sets the same bit again, which is how the decoder
    /// detects (harmless) duplication; the 14-byte cap bounds hostile prefix runs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PrefixFlags: u32 {
        /// F0
        const LOCK = 1 << 0;
        /// F2
        const REPNE = 1 << 1;
        /// F3
        const REP = 1 << 2;
        /// 2E
        const SEG_CS = 1 << 3;
        /// 36
        const SEG_SS = 1 << 4;
        /// 3E
        const SEG_DS = 1 << 5;
        /// 26
        const SEG_ES = 1 << 6;
        /// 64
        const SEG_FS = 1 << 7;
        /// 65
        const SEG_GS = 1 << 8;
        /// 66, selects 16-bit operands
        const DATA16 = 1 << 9;
        /// 67, selects 32-bit addressing
        const ADDR32 = 1 << 10;
        /// Any 40-4F byte was present
        const REX = 1 << 11;
        /// REX.W, promotes operands to 64 bit
        const REX_W = 1 << 12;
        /// REX.R, extends the ModRM reg field
        const REX_R = 1 << 13;
        /// REX.X, extends the SIB index field
        const REX_X = 1 << 14;
        /// REX.B, extends the ModRM rm / SIB base / opcode register field
        const REX_B = 1 << 15;
    }
}

/// Coarse instruction classification driving the validator's policy decisions.
///
/// Each decoded instruction carries exactly one class. The class answers two
/// questions: is the instruction ever acceptable inside the sandbox, and which
/// CPU feature must be present for it to execute. The mapping from opcode to
/// class lives in the decoder tables.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum InstClass {
    /// Recognized encoding that is never permitted in sandboxed code.
    Illegal,
    /// Byte pattern with no defined encoding; length is not trustworthy.
    Undefined,
    /// Privileged or ring-0 instruction (also never permitted).
    System,
    /// I/O port access (never permitted).
    IoPort,
    /// Plain baseline integer instruction.
    Baseline,
    /// Baseline instruction for which a LOCK prefix is acceptable.
    BaselineLock,
    /// Conditional-move family (CMOVcc), gated on the CMOV feature.
    Cmov,
    /// Canonical NOP or hint-NOP form.
    Nop,
    /// Instruction that traps deterministically (HLT, UD2); safe to keep.
    Trap,
    /// Direct branch with an 8-bit relative displacement.
    Jump8,
    /// Direct branch or call with a 16/32-bit relative displacement.
    JumpZ,
    /// Register-indirect jump through a ModRM operand (FF /4).
    IndirectJmp,
    /// Register-indirect call through a ModRM operand (FF /2).
    IndirectCall,
    /// Near return (C2/C3); returns must go through the guarded sequence instead.
    Return,
    /// x87 floating point (D8-DF escapes, FWAIT).
    X87,
    /// MMX instruction.
    Mmx,
    /// MMX form that the 66 prefix turns into the SSE2 form.
    MmxSse2,
    /// 3DNow! instruction.
    ThreeDNow,
    /// SSE instruction.
    Sse,
    /// SSE2 instruction.
    Sse2,
    /// SSE3 instruction.
    Sse3,
    /// SSSE3 instruction.
    Ssse3,
    /// SSE4.1 instruction.
    Sse41,
    /// SSE4.2 instruction.
    Sse42,
    /// Memory fences and cache control from the 0F AE group.
    SseFence,
    /// MOVBE, gated on its own CPUID bit.
    Movbe,
    /// POPCNT (F3 0F B8).
    Popcnt,
    /// LZCNT/TZCNT forms of BSR/BSF.
    Lzcnt,
    /// CMPXCHG8B (0F C7 /1 without REX.W).
    Cx8,
    /// CMPXCHG16B (0F C7 /1 with REX.W).
    Cx16,
    /// RDTSC.
    Rdtsc,
}

impl InstClass {
    /// Classes that are rejected outright, independent of CPU features.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            InstClass::Illegal
                | InstClass::Undefined
                | InstClass::System
                | InstClass::IoPort
                | InstClass::Return
        )
    }

    /// True for direct branches whose displacement names a code target.
    #[must_use]
    pub fn is_direct_branch(&self) -> bool {
        matches!(self, InstClass::Jump8 | InstClass::JumpZ)
    }

    /// True for register-indirect control transfers requiring the mask guard.
    #[must_use]
    pub fn is_indirect_transfer(&self) -> bool {
        matches!(self, InstClass::IndirectJmp | InstClass::IndirectCall)
    }
}

/// Immediate-operand sizing category from the opcode tables.
///
/// Most categories are fixed byte counts; the `V`/`Z` categories depend on the
/// effective operand size selected by the 66 prefix and REX.W.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmKind {
    /// No immediate operand.
    None,
    /// One byte.
    Fixed1,
    /// Two bytes.
    Fixed2,
    /// Three bytes (ENTER).
    Fixed3,
    /// Four bytes.
    Fixed4,
    /// Operand-size immediate: 2 bytes with the 66 prefix, otherwise 4.
    DataZ,
    /// Full-width move immediate (B8-BF): 2/4/8 bytes by operand size.
    MovDataV,
    /// Absolute memory offset operand (A0-A3): 8 bytes in 64-bit mode.
    AddrV,
    /// Group 3 (F6/F7): immediate present only for the TEST forms (/0, /1).
    Group3,
}

/// Destination-operand category, used for the reserved-register integrity rule.
///
/// The category names which encoding field selects the register the instruction
/// writes. `RmAndReg` covers exchange forms that write both operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestKind {
    /// No general-purpose register is written.
    None,
    /// ModRM rm field (extended by REX.B) is written.
    Rm,
    /// ModRM reg field (extended by REX.R) is written.
    Reg,
    /// Low three opcode bits (extended by REX.B) select the written register.
    OpcodeReg,
    /// Both ModRM operands are written (XCHG, XADD).
    RmAndReg,
}

/// A general-purpose 64-bit register number (0 = RAX .. 15 = R15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Gpr(pub u8);

impl Gpr {
    /// The reserved sandbox base register.
    pub const R15: Gpr = Gpr(15);
    /// The stack pointer.
    pub const RSP: Gpr = Gpr(4);
    /// The frame pointer.
    pub const RBP: Gpr = Gpr(5);
}

/// A fully decoded x86-64 instruction.
///
/// Field offsets (`disp_offset`, `imm_offset`) are relative to the instruction
/// start so the pair validator can compare and patch individual fields without
/// re-deriving the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInstruction {
    /// Offset of the first byte within the decoded buffer.
    pub offset: usize,
    /// Total encoded length in bytes, including prefixes. Always >= 1.
    pub length: u8,
    /// Number of prefix bytes (legacy + REX) preceding the opcode.
    pub prefix_len: u8,
    /// Number of opcode bytes (1 for single byte, 2 for 0F xx, 3 for 0F 38/3A xx).
    pub opcode_len: u8,
    /// The final opcode byte.
    pub opcode: u8,
    /// Policy classification.
    pub class: InstClass,
    /// Accumulated prefix state.
    pub prefixes: PrefixFlags,
    /// ModRM byte, when the encoding has one.
    pub modrm: Option<u8>,
    /// SIB byte, when the addressing mode requires one.
    pub sib: Option<u8>,
    /// Offset of the displacement field from the instruction start (0 if none).
    pub disp_offset: u8,
    /// Displacement length in bytes (0, 1, or 4).
    pub disp_len: u8,
    /// Offset of the immediate field from the instruction start (0 if none).
    pub imm_offset: u8,
    /// Immediate length in bytes.
    pub imm_len: u8,
    /// Signed immediate value (branch displacement for direct branches).
    pub imm_value: i64,
    /// Destination-register category resolved from the tables and groups.
    pub dest: DestKind,
    /// Bytes of implicit zero fill consumed past the end of the buffer.
    pub fill_len: u8,
}

impl DecodedInstruction {
    /// ModRM mod field (top two bits), if a ModRM byte is present.
    #[must_use]
    pub fn modrm_mod(&self) -> Option<u8> {
        self.modrm.map(|m| m >> 6)
    }

    /// ModRM reg field, if a ModRM byte is present.
    #[must_use]
    pub fn modrm_reg(&self) -> Option<u8> {
        self.modrm.map(|m| (m >> 3) & 7)
    }

    /// ModRM rm field, if a ModRM byte is present.
    #[must_use]
    pub fn modrm_rm(&self) -> Option<u8> {
        self.modrm.map(|m| m & 7)
    }

    /// The register written by the rm field, with its REX.B extension.
    #[must_use]
    pub fn rm_gpr(&self) -> Option<Gpr> {
        let rm = self.modrm_rm()?;
        let ext = if self.prefixes.contains(PrefixFlags::REX_B) {
            8
        } else {
            0
        };
        Some(Gpr(rm + ext))
    }

    /// The register selected by the reg field, with its REX.R extension.
    #[must_use]
    pub fn reg_gpr(&self) -> Option<Gpr> {
        let reg = self.modrm_reg()?;
        let ext = if self.prefixes.contains(PrefixFlags::REX_R) {
            8
        } else {
            0
        };
        Some(Gpr(reg + ext))
    }

    /// The register selected by the low opcode bits, with its REX.B extension.
    #[must_use]
    pub fn opcode_gpr(&self) -> Gpr {
        let ext = if self.prefixes.contains(PrefixFlags::REX_B) {
            8
        } else {
            0
        };
        Gpr((self.opcode & 7) + ext)
    }

    /// Returns the general-purpose registers this instruction writes.
    ///
    /// Register destinations behind a memory operand (mod != 3 rm) do not count;
    /// those are stores, not register writes.
    #[must_use]
    pub fn written_gprs(&self) -> [Option<Gpr>; 2] {
        let rm_is_register = self.modrm_mod() == Some(3);
        match self.dest {
            DestKind::None => [None, None],
            DestKind::Rm => {
                if rm_is_register {
                    [self.rm_gpr(), None]
                } else {
                    [None, None]
                }
            }
            DestKind::Reg => [self.reg_gpr(), None],
            DestKind::OpcodeReg => [Some(self.opcode_gpr()), None],
            DestKind::RmAndReg => {
                let rm = if rm_is_register { self.rm_gpr() } else { None };
                [rm, self.reg_gpr()]
            }
        }
    }

    /// For direct branches, the target offset relative to the decoded buffer.
    ///
    /// Returns `None` for non-branch instructions or when the arithmetic wraps.
    #[must_use]
    pub fn branch_target(&self) -> Option<i64> {
        if !self.class.is_direct_branch() {
            return None;
        }
        let next = self.offset as i64 + i64::from(self.length);
        next.checked_add(self.imm_value)
    }

    /// The register operand of a register-indirect jump or call (ModRM mod == 3).
    ///
    /// Returns `None` when the operand is a memory location (which the validator
    /// rejects separately) or the instruction is not an indirect transfer.
    #[must_use]
    pub fn indirect_target_gpr(&self) -> Option<Gpr> {
        if !self.class.is_indirect_transfer() || self.modrm_mod() != Some(3) {
            return None;
        }
        self.rm_gpr()
    }

    /// End offset (one past the last byte) within the decoded buffer.
    #[must_use]
    pub fn end(&self) -> usize {
        self.offset + self.length as usize
    }
}
