//! Static opcode tables for the x86-64 decoder.
//!
//! Four tables cover the encoding space: the one-byte map, the 0F two-byte map,
//! and the 0F 38 / 0F 3A three-byte maps. Each entry records the instruction
//! class, whether a ModRM byte follows, the immediate category, the destination
//! category, and the opcode-group number when the ModRM reg field refines the
//! entry. The tables are built at compile time; anything not explicitly listed
//! decodes as [`InstClass::Undefined`].
//!
//! The x87 escapes (D8-DF) are not table entries: every escape takes a ModRM
//! byte and no immediate, so the decoder handles them uniformly.

use super::instruction::{DestKind, ImmKind, InstClass};

/// Opcode groups whose ModRM reg field selects the actual operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpGroup {
    /// Not a group opcode.
    None,
    /// 80/81/83: ALU with immediate.
    G1,
    /// 8F: POP r/m.
    G1a,
    /// C0/C1/D0-D3: shifts and rotates.
    G2,
    /// F6/F7: TEST/NOT/NEG/MUL/IMUL/DIV/IDIV.
    G3,
    /// FE: INC/DEC r/m8.
    G4,
    /// FF: INC/DEC/CALL/JMP/PUSH.
    G5,
    /// 0F BA: BT/BTS/BTR/BTC with immediate.
    G8,
    /// 0F C7: CMPXCHG8B/16B.
    G9,
    /// C6/C7: MOV r/m, imm.
    G11,
    /// 0F AE: fences, FXSAVE/FXRSTOR, LDMXCSR/STMXCSR, CLFLUSH.
    G15,
    /// 0F 18-1F: hint NOPs.
    G16,
}

/// One opcode-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    /// Policy classification (possibly refined later by the group).
    pub class: InstClass,
    /// Whether a ModRM byte follows the opcode.
    pub modrm: bool,
    /// Immediate category.
    pub imm: ImmKind,
    /// Destination-register category.
    pub dest: DestKind,
    /// Group number when the reg field refines this entry.
    pub group: OpGroup,
}

impl OpInfo {
    /// The default table entry: an undefined encoding.
    pub const UNDEFINED: OpInfo = OpInfo {
        class: InstClass::Undefined,
        modrm: false,
        imm: ImmKind::None,
        dest: DestKind::None,
        group: OpGroup::None,
    };
}

const fn op(class: InstClass, modrm: bool, imm: ImmKind, dest: DestKind) -> OpInfo {
    OpInfo {
        class,
        modrm,
        imm,
        dest,
        group: OpGroup::None,
    }
}

const fn grp(group: OpGroup, imm: ImmKind) -> OpInfo {
    OpInfo {
        class: InstClass::Baseline,
        modrm: true,
        imm,
        dest: DestKind::None,
        group,
    }
}

/// The one-byte opcode map.
pub static ONE_BYTE: [OpInfo; 256] = build_one_byte();

/// The 0F two-byte opcode map.
pub static TWO_BYTE: [OpInfo; 256] = build_two_byte();

/// The 0F 38 three-byte opcode map.
pub static THREE_BYTE_38: [OpInfo; 256] = build_0f38();

/// The 0F 3A three-byte opcode map. Every defined entry takes an imm8.
pub static THREE_BYTE_3A: [OpInfo; 256] = build_0f3a();

#[allow(clippy::too_many_lines)]
const fn build_one_byte() -> [OpInfo; 256] {
    use DestKind::{None as DNone, OpcodeReg, Reg, Rm, RmAndReg};
    use InstClass::*;

    let mut t = [OpInfo::UNDEFINED; 256];

    // The eight classic ALU blocks: ADD OR ADC SBB AND SUB XOR CMP.
    let mut base = 0x00;
    while base <= 0x38 {
        // CMP writes no register destination.
        let d: DestKind = if base == 0x38 { DNone } else { Rm };
        let dr: DestKind = if base == 0x38 { DNone } else { Reg };
        t[base] = op(BaselineLock, true, ImmKind::None, d);
        t[base + 1] = op(BaselineLock, true, ImmKind::None, d);
        t[base + 2] = op(Baseline, true, ImmKind::None, dr);
        t[base + 3] = op(Baseline, true, ImmKind::None, dr);
        t[base + 4] = op(Baseline, false, ImmKind::Fixed1, DNone);
        t[base + 5] = op(Baseline, false, ImmKind::DataZ, DNone);
        base += 0x08;
    }

    // Encodings removed in 64-bit mode.
    let gone: [usize; 15] = [
        0x06, 0x07, 0x0E, 0x16, 0x17, 0x1E, 0x1F, 0x27, 0x2F, 0x37, 0x3F, 0x60, 0x61, 0x62, 0x82,
    ];
    let mut i = 0;
    while i < gone.len() {
        t[gone[i]] = op(Illegal, false, ImmKind::None, DNone);
        i += 1;
    }

    // 50-57 PUSH r64, 58-5F POP r64.
    let mut r = 0x50;
    while r <= 0x57 {
        t[r] = op(Baseline, false, ImmKind::None, DNone);
        t[r + 8] = op(Baseline, false, ImmKind::None, OpcodeReg);
        r += 1;
    }

    t[0x63] = op(Baseline, true, ImmKind::None, Reg); // MOVSXD
    t[0x68] = op(Baseline, false, ImmKind::DataZ, DNone); // PUSH immz
    t[0x69] = op(Baseline, true, ImmKind::DataZ, Reg); // IMUL r, r/m, immz
    t[0x6A] = op(Baseline, false, ImmKind::Fixed1, DNone); // PUSH imm8
    t[0x6B] = op(Baseline, true, ImmKind::Fixed1, Reg); // IMUL r, r/m, imm8

    // 6C-6F INS/OUTS.
    let mut io = 0x6C;
    while io <= 0x6F {
        t[io] = op(IoPort, false, ImmKind::None, DNone);
        io += 1;
    }

    // 70-7F Jcc rel8.
    let mut jcc = 0x70;
    while jcc <= 0x7F {
        t[jcc] = op(Jump8, false, ImmKind::Fixed1, DNone);
        jcc += 1;
    }

    t[0x80] = grp(OpGroup::G1, ImmKind::Fixed1);
    t[0x81] = grp(OpGroup::G1, ImmKind::DataZ);
    t[0x83] = grp(OpGroup::G1, ImmKind::Fixed1);
    t[0x84] = op(Baseline, true, ImmKind::None, DNone); // TEST
    t[0x85] = op(Baseline, true, ImmKind::None, DNone);
    t[0x86] = op(BaselineLock, true, ImmKind::None, RmAndReg); // XCHG
    t[0x87] = op(BaselineLock, true, ImmKind::None, RmAndReg);
    t[0x88] = op(Baseline, true, ImmKind::None, Rm); // MOV
    t[0x89] = op(Baseline, true, ImmKind::None, Rm);
    t[0x8A] = op(Baseline, true, ImmKind::None, Reg);
    t[0x8B] = op(Baseline, true, ImmKind::None, Reg);
    t[0x8C] = op(Illegal, true, ImmKind::None, DNone); // MOV r/m, sreg
    t[0x8D] = op(Baseline, true, ImmKind::None, Reg); // LEA
    t[0x8E] = op(Illegal, true, ImmKind::None, DNone); // MOV sreg, r/m
    t[0x8F] = grp(OpGroup::G1a, ImmKind::None);

    t[0x90] = op(Nop, false, ImmKind::None, DNone);
    let mut xchg = 0x91;
    while xchg <= 0x97 {
        t[xchg] = op(Baseline, false, ImmKind::None, OpcodeReg); // XCHG rAX, r
        xchg += 1;
    }
    t[0x98] = op(Baseline, false, ImmKind::None, DNone); // CBW/CWDE/CDQE
    t[0x99] = op(Baseline, false, ImmKind::None, DNone); // CWD/CDQ/CQO
    t[0x9B] = op(X87, false, ImmKind::None, DNone); // FWAIT
    t[0x9C] = op(Illegal, false, ImmKind::None, DNone); // PUSHF
    t[0x9D] = op(Illegal, false, ImmKind::None, DNone); // POPF
    t[0x9E] = op(Baseline, false, ImmKind::None, DNone); // SAHF
    t[0x9F] = op(Baseline, false, ImmKind::None, DNone); // LAHF

    // A0-A3 moffs forms: absolute addresses cannot be proven in range.
    let mut moffs = 0xA0;
    while moffs <= 0xA3 {
        t[moffs] = op(Illegal, false, ImmKind::AddrV, DNone);
        moffs += 1;
    }
    // A4-A7, AA-AF string operations: implicit rsi/rdi addressing bypasses the base.
    let strings: [usize; 10] = [0xA4, 0xA5, 0xA6, 0xA7, 0xAA, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF];
    i = 0;
    while i < strings.len() {
        t[strings[i]] = op(Illegal, false, ImmKind::None, DNone);
        i += 1;
    }
    t[0xA8] = op(Baseline, false, ImmKind::Fixed1, DNone); // TEST AL, imm8
    t[0xA9] = op(Baseline, false, ImmKind::DataZ, DNone); // TEST rAX, immz

    let mut movb = 0xB0;
    while movb <= 0xB7 {
        t[movb] = op(Baseline, false, ImmKind::Fixed1, OpcodeReg); // MOV r8, imm8
        movb += 1;
    }
    let mut movv = 0xB8;
    while movv <= 0xBF {
        t[movv] = op(Baseline, false, ImmKind::MovDataV, OpcodeReg); // MOV r, imm
        movv += 1;
    }

    t[0xC0] = grp(OpGroup::G2, ImmKind::Fixed1);
    t[0xC1] = grp(OpGroup::G2, ImmKind::Fixed1);
    t[0xC2] = op(Return, false, ImmKind::Fixed2, DNone);
    t[0xC3] = op(Return, false, ImmKind::None, DNone);
    t[0xC4] = op(Illegal, false, ImmKind::None, DNone); // LES (VEX not supported)
    t[0xC5] = op(Illegal, false, ImmKind::None, DNone); // LDS
    t[0xC6] = grp(OpGroup::G11, ImmKind::Fixed1);
    t[0xC7] = grp(OpGroup::G11, ImmKind::DataZ);
    t[0xC8] = op(Illegal, false, ImmKind::Fixed3, DNone); // ENTER
    t[0xC9] = op(Illegal, false, ImmKind::None, DNone); // LEAVE
    t[0xCA] = op(Illegal, false, ImmKind::Fixed2, DNone); // RETF imm16
    t[0xCB] = op(Illegal, false, ImmKind::None, DNone); // RETF
    t[0xCC] = op(System, false, ImmKind::None, DNone); // INT3
    t[0xCD] = op(System, false, ImmKind::Fixed1, DNone); // INT imm8
    t[0xCE] = op(Illegal, false, ImmKind::None, DNone); // INTO (removed)
    t[0xCF] = op(System, false, ImmKind::None, DNone); // IRET

    t[0xD0] = grp(OpGroup::G2, ImmKind::None);
    t[0xD1] = grp(OpGroup::G2, ImmKind::None);
    t[0xD2] = grp(OpGroup::G2, ImmKind::None);
    t[0xD3] = grp(OpGroup::G2, ImmKind::None);
    t[0xD7] = op(Illegal, false, ImmKind::None, DNone); // XLAT

    // E0-E3 LOOPcc/JRCXZ.
    let mut lp = 0xE0;
    while lp <= 0xE3 {
        t[lp] = op(Jump8, false, ImmKind::Fixed1, DNone);
        lp += 1;
    }
    t[0xE4] = op(IoPort, false, ImmKind::Fixed1, DNone);
    t[0xE5] = op(IoPort, false, ImmKind::Fixed1, DNone);
    t[0xE6] = op(IoPort, false, ImmKind::Fixed1, DNone);
    t[0xE7] = op(IoPort, false, ImmKind::Fixed1, DNone);
    t[0xE8] = op(JumpZ, false, ImmKind::DataZ, DNone); // CALL rel
    t[0xE9] = op(JumpZ, false, ImmKind::DataZ, DNone); // JMP rel
    t[0xEA] = op(Illegal, false, ImmKind::None, DNone); // JMP far (removed)
    t[0xEB] = op(Jump8, false, ImmKind::Fixed1, DNone);
    t[0xEC] = op(IoPort, false, ImmKind::None, DNone);
    t[0xED] = op(IoPort, false, ImmKind::None, DNone);
    t[0xEE] = op(IoPort, false, ImmKind::None, DNone);
    t[0xEF] = op(IoPort, false, ImmKind::None, DNone);

    t[0xF1] = op(System, false, ImmKind::None, DNone); // INT1
    t[0xF4] = op(Trap, false, ImmKind::None, DNone); // HLT
    t[0xF5] = op(Baseline, false, ImmKind::None, DNone); // CMC
    t[0xF6] = grp(OpGroup::G3, ImmKind::Group3);
    t[0xF7] = grp(OpGroup::G3, ImmKind::Group3);
    t[0xF8] = op(Baseline, false, ImmKind::None, DNone); // CLC
    t[0xF9] = op(Baseline, false, ImmKind::None, DNone); // STC
    t[0xFA] = op(System, false, ImmKind::None, DNone); // CLI
    t[0xFB] = op(System, false, ImmKind::None, DNone); // STI
    t[0xFC] = op(Baseline, false, ImmKind::None, DNone); // CLD
    t[0xFD] = op(Baseline, false, ImmKind::None, DNone); // STD
    t[0xFE] = grp(OpGroup::G4, ImmKind::None);
    t[0xFF] = grp(OpGroup::G5, ImmKind::None);

    t
}

#[allow(clippy::too_many_lines)]
const fn build_two_byte() -> [OpInfo; 256] {
    use DestKind::{None as DNone, OpcodeReg, Reg, Rm, RmAndReg};
    use InstClass::*;

    let mut t = [OpInfo::UNDEFINED; 256];

    t[0x00] = op(System, true, ImmKind::None, DNone); // SLDT/LLDT group
    t[0x01] = op(System, true, ImmKind::None, DNone); // SGDT/LGDT group
    t[0x02] = op(System, true, ImmKind::None, DNone); // LAR
    t[0x03] = op(System, true, ImmKind::None, DNone); // LSL
    t[0x05] = op(System, false, ImmKind::None, DNone); // SYSCALL
    t[0x06] = op(System, false, ImmKind::None, DNone); // CLTS
    t[0x07] = op(System, false, ImmKind::None, DNone); // SYSRET
    t[0x08] = op(System, false, ImmKind::None, DNone); // INVD
    t[0x09] = op(System, false, ImmKind::None, DNone); // WBINVD
    t[0x0B] = op(Trap, false, ImmKind::None, DNone); // UD2
    t[0x0D] = op(ThreeDNow, true, ImmKind::None, DNone); // PREFETCH
    t[0x0E] = op(ThreeDNow, false, ImmKind::None, DNone); // FEMMS
    t[0x0F] = op(ThreeDNow, true, ImmKind::Fixed1, DNone); // 3DNow! suffix opcode

    // 10-17 SSE move and unpack forms.
    let mut m = 0x10;
    while m <= 0x17 {
        t[m] = op(Sse, true, ImmKind::None, DNone);
        m += 1;
    }

    // 18-1F hint NOP space.
    let mut h = 0x18;
    while h <= 0x1F {
        t[h] = grp(OpGroup::G16, ImmKind::None);
        h += 1;
    }

    // 20-23 MOV to/from control and debug registers.
    let mut cr = 0x20;
    while cr <= 0x23 {
        t[cr] = op(System, true, ImmKind::None, DNone);
        cr += 1;
    }

    t[0x28] = op(Sse, true, ImmKind::None, DNone); // MOVAPS
    t[0x29] = op(Sse, true, ImmKind::None, DNone);
    t[0x2A] = op(Sse, true, ImmKind::None, DNone); // CVTSI2Sx
    t[0x2B] = op(Sse, true, ImmKind::None, DNone); // MOVNTPS
    t[0x2C] = op(Sse, true, ImmKind::None, Reg); // CVTTSx2SI r32/64
    t[0x2D] = op(Sse, true, ImmKind::None, Reg); // CVTSx2SI
    t[0x2E] = op(Sse, true, ImmKind::None, DNone); // UCOMISS
    t[0x2F] = op(Sse, true, ImmKind::None, DNone); // COMISS

    t[0x30] = op(System, false, ImmKind::None, DNone); // WRMSR
    t[0x31] = op(Rdtsc, false, ImmKind::None, DNone);
    t[0x32] = op(System, false, ImmKind::None, DNone); // RDMSR
    t[0x33] = op(System, false, ImmKind::None, DNone); // RDPMC
    t[0x34] = op(System, false, ImmKind::None, DNone); // SYSENTER
    t[0x35] = op(System, false, ImmKind::None, DNone); // SYSEXIT

    // 40-4F CMOVcc.
    let mut cm = 0x40;
    while cm <= 0x4F {
        t[cm] = op(Cmov, true, ImmKind::None, Reg);
        cm += 1;
    }

    t[0x50] = op(Sse, true, ImmKind::None, Reg); // MOVMSKPS r32
    let mut sse = 0x51;
    while sse <= 0x5F {
        t[sse] = op(Sse, true, ImmKind::None, DNone); // SQRTPS..MAXPS families
        sse += 1;
    }

    // 60-6F MMX/SSE2 pack and move forms.
    let mut mmx = 0x60;
    while mmx <= 0x6F {
        t[mmx] = op(MmxSse2, true, ImmKind::None, DNone);
        mmx += 1;
    }
    // 70-76 shuffles and compares; 70 takes an imm8.
    t[0x70] = op(MmxSse2, true, ImmKind::Fixed1, DNone);
    let mut pc = 0x71;
    while pc <= 0x73 {
        t[pc] = op(MmxSse2, true, ImmKind::Fixed1, DNone); // shift groups, imm8
        pc += 1;
    }
    t[0x74] = op(MmxSse2, true, ImmKind::None, DNone);
    t[0x75] = op(MmxSse2, true, ImmKind::None, DNone);
    t[0x76] = op(MmxSse2, true, ImmKind::None, DNone);
    t[0x77] = op(Mmx, false, ImmKind::None, DNone); // EMMS
    t[0x7E] = op(MmxSse2, true, ImmKind::None, Rm); // MOVD r/m, mm/xmm
    t[0x7F] = op(MmxSse2, true, ImmKind::None, DNone); // MOVQ/MOVDQA store

    // 80-8F Jcc rel32.
    let mut jcc = 0x80;
    while jcc <= 0x8F {
        t[jcc] = op(JumpZ, false, ImmKind::DataZ, DNone);
        jcc += 1;
    }
    // 90-9F SETcc r/m8.
    let mut setcc = 0x90;
    while setcc <= 0x9F {
        t[setcc] = op(Baseline, true, ImmKind::None, Rm);
        setcc += 1;
    }

    t[0xA0] = op(Illegal, false, ImmKind::None, DNone); // PUSH FS
    t[0xA1] = op(Illegal, false, ImmKind::None, DNone); // POP FS
    t[0xA2] = op(Baseline, false, ImmKind::None, DNone); // CPUID
    t[0xA3] = op(Baseline, true, ImmKind::None, DNone); // BT
    t[0xA4] = op(Baseline, true, ImmKind::Fixed1, Rm); // SHLD imm8
    t[0xA5] = op(Baseline, true, ImmKind::None, Rm); // SHLD cl
    t[0xA8] = op(Illegal, false, ImmKind::None, DNone); // PUSH GS
    t[0xA9] = op(Illegal, false, ImmKind::None, DNone); // POP GS
    t[0xAA] = op(System, false, ImmKind::None, DNone); // RSM
    t[0xAB] = op(BaselineLock, true, ImmKind::None, Rm); // BTS
    t[0xAC] = op(Baseline, true, ImmKind::Fixed1, Rm); // SHRD imm8
    t[0xAD] = op(Baseline, true, ImmKind::None, Rm); // SHRD cl
    t[0xAE] = grp(OpGroup::G15, ImmKind::None);
    t[0xAF] = op(Baseline, true, ImmKind::None, Reg); // IMUL r, r/m

    t[0xB0] = op(BaselineLock, true, ImmKind::None, Rm); // CMPXCHG
    t[0xB1] = op(BaselineLock, true, ImmKind::None, Rm);
    t[0xB2] = op(Illegal, true, ImmKind::None, DNone); // LSS
    t[0xB3] = op(BaselineLock, true, ImmKind::None, Rm); // BTR
    t[0xB4] = op(Illegal, true, ImmKind::None, DNone); // LFS
    t[0xB5] = op(Illegal, true, ImmKind::None, DNone); // LGS
    t[0xB6] = op(Baseline, true, ImmKind::None, Reg); // MOVZX
    t[0xB7] = op(Baseline, true, ImmKind::None, Reg);
    t[0xB8] = op(Popcnt, true, ImmKind::None, Reg); // POPCNT (F3 required)
    t[0xB9] = op(Undefined, true, ImmKind::None, DNone); // UD1
    t[0xBA] = grp(OpGroup::G8, ImmKind::Fixed1);
    t[0xBB] = op(BaselineLock, true, ImmKind::None, Rm); // BTC
    t[0xBC] = op(Baseline, true, ImmKind::None, Reg); // BSF / TZCNT
    t[0xBD] = op(Baseline, true, ImmKind::None, Reg); // BSR / LZCNT
    t[0xBE] = op(Baseline, true, ImmKind::None, Reg); // MOVSX
    t[0xBF] = op(Baseline, true, ImmKind::None, Reg);

    t[0xC0] = op(BaselineLock, true, ImmKind::None, RmAndReg); // XADD
    t[0xC1] = op(BaselineLock, true, ImmKind::None, RmAndReg);
    t[0xC2] = op(Sse, true, ImmKind::Fixed1, DNone); // CMPPS imm8
    t[0xC3] = op(Sse2, true, ImmKind::None, DNone); // MOVNTI
    t[0xC4] = op(MmxSse2, true, ImmKind::Fixed1, DNone); // PINSRW
    t[0xC5] = op(MmxSse2, true, ImmKind::Fixed1, Reg); // PEXTRW r32
    t[0xC6] = op(Sse, true, ImmKind::Fixed1, DNone); // SHUFPS
    t[0xC7] = grp(OpGroup::G9, ImmKind::None);
    let mut bs = 0xC8;
    while bs <= 0xCF {
        t[bs] = op(Baseline, false, ImmKind::None, OpcodeReg); // BSWAP r
        bs += 1;
    }

    // D0-FE MMX/SSE2 arithmetic block.
    let mut pd = 0xD0;
    while pd <= 0xFE {
        t[pd] = op(MmxSse2, true, ImmKind::None, DNone);
        pd += 1;
    }
    t[0xD0] = op(Sse3, true, ImmKind::None, DNone); // ADDSUBPS/PD
    t[0xD6] = op(Sse2, true, ImmKind::None, DNone); // MOVQ store
    t[0xD7] = op(MmxSse2, true, ImmKind::None, Reg); // PMOVMSKB r32
    t[0xE6] = op(Sse2, true, ImmKind::None, DNone); // CVTPD2DQ family
    t[0xF0] = op(Sse3, true, ImmKind::None, DNone); // LDDQU

    t
}

const fn build_0f38() -> [OpInfo; 256] {
    use DestKind::{None as DNone, Reg, Rm};
    use InstClass::*;

    let mut t = [OpInfo::UNDEFINED; 256];

    // 00-0B SSSE3 horizontal/shuffle block.
    let mut s = 0x00;
    while s <= 0x0B {
        t[s] = op(Ssse3, true, ImmKind::None, DNone);
        s += 1;
    }
    // 10-17, 20-25, 28-2B, 30-41 SSE4.1 block.
    let sse41: [usize; 30] = [
        0x10, 0x14, 0x15, 0x17, 0x20, 0x21, 0x22, 0x23, 0x24, 0x25, 0x28, 0x29, 0x2A, 0x2B, 0x30,
        0x31, 0x32, 0x33, 0x34, 0x35, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F, 0x40, 0x41,
    ];
    let mut i = 0;
    while i < sse41.len() {
        t[sse41[i]] = op(Sse41, true, ImmKind::None, DNone);
        i += 1;
    }
    t[0x1C] = op(Ssse3, true, ImmKind::None, DNone); // PABSB
    t[0x1D] = op(Ssse3, true, ImmKind::None, DNone); // PABSW
    t[0x1E] = op(Ssse3, true, ImmKind::None, DNone); // PABSD
    t[0x37] = op(Sse42, true, ImmKind::None, DNone); // PCMPGTQ
    t[0xF0] = op(Movbe, true, ImmKind::None, Reg); // MOVBE r, m / CRC32 with F2
    t[0xF1] = op(Movbe, true, ImmKind::None, Rm); // MOVBE m, r / CRC32 with F2

    t
}

const fn build_0f3a() -> [OpInfo; 256] {
    use DestKind::{None as DNone, Rm};
    use InstClass::*;

    let mut t = [OpInfo::UNDEFINED; 256];

    let sse41: [usize; 10] = [0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x20, 0x21, 0x22];
    let mut i = 0;
    while i < sse41.len() {
        t[sse41[i]] = op(Sse41, true, ImmKind::Fixed1, DNone);
        i += 1;
    }
    // Extract forms write a GPR or memory through rm.
    t[0x14] = op(Sse41, true, ImmKind::Fixed1, Rm); // PEXTRB
    t[0x15] = op(Sse41, true, ImmKind::Fixed1, Rm); // PEXTRW
    t[0x16] = op(Sse41, true, ImmKind::Fixed1, Rm); // PEXTRD/Q
    t[0x17] = op(Sse41, true, ImmKind::Fixed1, Rm); // EXTRACTPS
    t[0x0F] = op(Ssse3, true, ImmKind::Fixed1, DNone); // PALIGNR
    t[0x40] = op(Sse41, true, ImmKind::Fixed1, DNone); // DPPS
    t[0x41] = op(Sse41, true, ImmKind::Fixed1, DNone); // DPPD
    t[0x42] = op(Sse41, true, ImmKind::Fixed1, DNone); // MPSADBW
    let sse42: [usize; 4] = [0x60, 0x61, 0x62, 0x63];
    i = 0;
    while i < sse42.len() {
        t[sse42[i]] = op(Sse42, true, ImmKind::Fixed1, DNone); // PCMPxSTRx
        i += 1;
    }

    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_byte_map_spot_checks() {
        assert_eq!(ONE_BYTE[0x90].class, InstClass::Nop);
        assert_eq!(ONE_BYTE[0xC3].class, InstClass::Return);
        assert_eq!(ONE_BYTE[0xF4].class, InstClass::Trap);
        assert_eq!(ONE_BYTE[0xFF].group, OpGroup::G5);
        assert_eq!(ONE_BYTE[0x83].group, OpGroup::G1);
        assert_eq!(ONE_BYTE[0x83].imm, ImmKind::Fixed1);
        assert!(ONE_BYTE[0x89].modrm);
        assert_eq!(ONE_BYTE[0x89].dest, DestKind::Rm);
        assert_eq!(ONE_BYTE[0xB8].imm, ImmKind::MovDataV);
        assert_eq!(ONE_BYTE[0x06].class, InstClass::Illegal);
    }

    #[test]
    fn two_byte_map_spot_checks() {
        assert_eq!(TWO_BYTE[0x05].class, InstClass::System); // SYSCALL
        assert_eq!(TWO_BYTE[0x0B].class, InstClass::Trap); // UD2
        assert_eq!(TWO_BYTE[0x31].class, InstClass::Rdtsc);
        assert_eq!(TWO_BYTE[0x40].class, InstClass::Cmov);
        assert_eq!(TWO_BYTE[0x80].class, InstClass::JumpZ);
        assert_eq!(TWO_BYTE[0xAE].group, OpGroup::G15);
        assert_eq!(TWO_BYTE[0xC7].group, OpGroup::G9);
        assert_eq!(TWO_BYTE[0x77].class, InstClass::Mmx);
    }

    #[test]
    fn three_byte_maps_default_to_undefined() {
        assert_eq!(THREE_BYTE_38[0x80].class, InstClass::Undefined);
        assert_eq!(THREE_BYTE_38[0x00].class, InstClass::Ssse3);
        assert_eq!(THREE_BYTE_3A[0x0F].class, InstClass::Ssse3);
        assert_eq!(THREE_BYTE_3A[0x63].class, InstClass::Sse42);
        assert_eq!(THREE_BYTE_3A[0x63].imm, ImmKind::Fixed1);
    }
}
