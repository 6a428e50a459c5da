//! The variable-length x86-64 instruction decoder.
//!
//! [`decode`] consumes one instruction from a byte slice: prefix scan, opcode
//! dispatch through the static tables, ModRM/SIB/displacement parsing, group
//! refinement, and immediate extraction. Reads past the end of the slice
//! produce zero bytes, so a truncated trailing instruction always decodes to
//! the same result; the caller notices the overrun through
//! [`DecodedInstruction::fill_len`] or by comparing [`DecodedInstruction::end`]
//! against the region length.

use super::instruction::{DecodedInstruction, DestKind, ImmKind, InstClass, PrefixFlags};
use super::tables::{OpGroup, OpInfo, ONE_BYTE, THREE_BYTE_38, THREE_BYTE_3A, TWO_BYTE};

/// Hard cap on total instruction length, matching the hardware limit.
pub const MAX_INST_LENGTH: usize = 15;

/// Maximum number of prefix bytes tolerated before giving up on the stream.
pub const MAX_PREFIX_BYTES: usize = 14;

/// Reasons a byte sequence fails to decode. All of these are fatal to
/// validation; none of them can be stubbed out because the instruction length
/// is not trustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// No defined encoding starts with these bytes.
    #[error("undefined opcode at offset {offset:#x}")]
    UnknownOpcode {
        /// Offset of the instruction start within the decoded buffer.
        offset: usize,
    },
    /// Decoding began at or past the end of the buffer.
    #[error("instruction start {offset:#x} is outside the code region")]
    Truncated {
        /// Offset of the attempted instruction start.
        offset: usize,
    },
    /// More than [`MAX_PREFIX_BYTES`] prefix bytes in a row.
    #[error("too many prefix bytes at offset {offset:#x}")]
    TooManyPrefixes {
        /// Offset of the instruction start.
        offset: usize,
    },
    /// The full encoding exceeds [`MAX_INST_LENGTH`] bytes.
    #[error("instruction at offset {offset:#x} exceeds the length limit")]
    TooLong {
        /// Offset of the instruction start.
        offset: usize,
    },
}

/// Cursor over the code bytes with implicit zero fill past the end.
struct ByteReader<'a> {
    data: &'a [u8],
    start: usize,
    pos: usize,
    fill: u8,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8], offset: usize) -> Self {
        ByteReader {
            data,
            start: offset,
            pos: offset,
            fill: 0,
        }
    }

    fn next(&mut self) -> u8 {
        let byte = if self.pos < self.data.len() {
            self.data[self.pos]
        } else {
            self.fill += 1;
            0
        };
        self.pos += 1;
        byte
    }

    fn consumed(&self) -> usize {
        self.pos - self.start
    }
}

/// Decodes the instruction starting at `offset` within `code`.
///
/// # Errors
///
/// Returns a [`DecodeError`] when the bytes do not form a defined encoding,
/// the prefix run or total length exceeds the hardware limits, or `offset` is
/// outside the buffer.
pub fn decode(code: &[u8], offset: usize) -> Result<DecodedInstruction, DecodeError> {
    if offset >= code.len() {
        return Err(DecodeError::Truncated { offset });
    }
    let mut r = ByteReader::new(code, offset);

    // Prefix scan. A legacy prefix after a REX byte cancels the REX, matching
    // hardware behavior where REX must immediately precede the opcode.
    let mut prefixes = PrefixFlags::empty();
    let mut prefix_len = 0usize;
    let opcode0 = loop {
        if prefix_len > MAX_PREFIX_BYTES {
            return Err(DecodeError::TooManyPrefixes { offset });
        }
        let b = r.next();
        let legacy = match b {
            0xF0 => Some(PrefixFlags::LOCK),
            0xF2 => Some(PrefixFlags::REPNE),
            0xF3 => Some(PrefixFlags::REP),
            0x2E => Some(PrefixFlags::SEG_CS),
            0x36 => Some(PrefixFlags::SEG_SS),
            0x3E => Some(PrefixFlags::SEG_DS),
            0x26 => Some(PrefixFlags::SEG_ES),
            0x64 => Some(PrefixFlags::SEG_FS),
            0x65 => Some(PrefixFlags::SEG_GS),
            0x66 => Some(PrefixFlags::DATA16),
            0x67 => Some(PrefixFlags::ADDR32),
            _ => None,
        };
        if let Some(flag) = legacy {
            prefixes.insert(flag);
            prefixes.remove(
                PrefixFlags::REX
                    | PrefixFlags::REX_W
                    | PrefixFlags::REX_R
                    | PrefixFlags::REX_X
                    | PrefixFlags::REX_B,
            );
            prefix_len += 1;
        } else if (0x40..=0x4F).contains(&b) {
            prefixes.remove(
                PrefixFlags::REX_W | PrefixFlags::REX_R | PrefixFlags::REX_X | PrefixFlags::REX_B,
            );
            prefixes.insert(PrefixFlags::REX);
            if b & 0x08 != 0 {
                prefixes.insert(PrefixFlags::REX_W);
            }
            if b & 0x04 != 0 {
                prefixes.insert(PrefixFlags::REX_R);
            }
            if b & 0x02 != 0 {
                prefixes.insert(PrefixFlags::REX_X);
            }
            if b & 0x01 != 0 {
                prefixes.insert(PrefixFlags::REX_B);
            }
            prefix_len += 1;
        } else {
            break b;
        }
    };

    // Opcode dispatch.
    let (entry, opcode, opcode_len) = if opcode0 == 0x0F {
        let b2 = r.next();
        match b2 {
            0x38 => {
                let b3 = r.next();
                (THREE_BYTE_38[b3 as usize], b3, 3)
            }
            0x3A => {
                let b3 = r.next();
                (THREE_BYTE_3A[b3 as usize], b3, 3)
            }
            _ => (TWO_BYTE[b2 as usize], b2, 2),
        }
    } else if (0xD8..=0xDF).contains(&opcode0) {
        // Every x87 escape is uniform: one ModRM byte, no immediate.
        let x87 = OpInfo {
            class: InstClass::X87,
            modrm: true,
            imm: ImmKind::None,
            dest: DestKind::None,
            group: OpGroup::None,
        };
        (x87, opcode0, 1)
    } else {
        (ONE_BYTE[opcode0 as usize], opcode0, 1)
    };

    if entry.class == InstClass::Undefined {
        return Err(DecodeError::UnknownOpcode { offset });
    }

    let mut class = entry.class;
    let mut dest = entry.dest;
    let mut imm_kind = entry.imm;

    // ModRM, SIB, displacement.
    let mut modrm = None;
    let mut sib = None;
    let mut disp_offset = 0u8;
    let mut disp_len = 0u8;
    if entry.modrm {
        let m = r.next();
        modrm = Some(m);
        let mode = m >> 6;
        let rm = m & 7;
        if mode != 3 {
            if rm == 4 {
                let s = r.next();
                sib = Some(s);
                if mode == 0 && s & 7 == 5 {
                    disp_len = 4;
                }
            }
            match mode {
                0 if rm == 5 => disp_len = 4, // RIP-relative
                1 => disp_len = 1,
                2 => disp_len = 4,
                _ => {}
            }
        }
        if disp_len > 0 {
            disp_offset = r.consumed() as u8;
            for _ in 0..disp_len {
                r.next();
            }
        }
    }

    // Group refinement through the ModRM reg field.
    if entry.group != OpGroup::None {
        let reg = modrm.map_or(0, |m| (m >> 3) & 7);
        let mode = modrm.map_or(0, |m| m >> 6);
        match resolve_group(entry.group, reg, mode, opcode, prefixes) {
            Some((c, d, i)) => {
                class = c;
                dest = d;
                if let Some(kind) = i {
                    imm_kind = kind;
                }
            }
            None => return Err(DecodeError::UnknownOpcode { offset }),
        }
    }

    // Prefix-dependent class splits.
    class = match class {
        InstClass::MmxSse2 => {
            if prefixes
                .intersects(PrefixFlags::DATA16 | PrefixFlags::REP | PrefixFlags::REPNE)
            {
                InstClass::Sse2
            } else {
                InstClass::Mmx
            }
        }
        InstClass::Popcnt => {
            // Without the F3 prefix, 0F B8 has no defined encoding here.
            if prefixes.contains(PrefixFlags::REP) {
                InstClass::Popcnt
            } else {
                return Err(DecodeError::UnknownOpcode { offset });
            }
        }
        InstClass::Baseline if opcode_len == 2 && (opcode == 0xBC || opcode == 0xBD) => {
            // F3 turns BSF/BSR into TZCNT/LZCNT.
            if prefixes.contains(PrefixFlags::REP) {
                InstClass::Lzcnt
            } else {
                InstClass::Baseline
            }
        }
        InstClass::Movbe => {
            // F2 selects CRC32 from the same table slots.
            if prefixes.contains(PrefixFlags::REPNE) {
                dest = DestKind::Reg;
                InstClass::Sse42
            } else {
                InstClass::Movbe
            }
        }
        other => other,
    };

    // Immediate.
    let imm_len = imm_size(imm_kind, prefixes);
    let mut imm_offset = 0u8;
    let mut imm_value = 0i64;
    if imm_len > 0 {
        imm_offset = r.consumed() as u8;
        let mut raw = 0u64;
        for i in 0..imm_len {
            raw |= u64::from(r.next()) << (8 * u32::from(i));
        }
        let bits = 8 * u32::from(imm_len);
        if bits < 64 {
            // Sign extend from the immediate width.
            let shift = 64 - bits;
            imm_value = ((raw << shift) as i64) >> shift;
        } else {
            imm_value = raw as i64;
        }
    }

    let length = r.consumed();
    if length > MAX_INST_LENGTH {
        return Err(DecodeError::TooLong { offset });
    }

    Ok(DecodedInstruction {
        offset,
        length: length as u8,
        prefix_len: prefix_len as u8,
        opcode_len,
        opcode,
        class,
        prefixes,
        modrm,
        sib,
        disp_offset,
        disp_len,
        imm_offset,
        imm_len,
        imm_value,
        dest,
        fill_len: r.fill,
    })
}

/// Resolves a group opcode into its final class, destination, and immediate.
///
/// Returns `None` when the reg field selects an undefined slot.
fn resolve_group(
    group: OpGroup,
    reg: u8,
    mode: u8,
    opcode: u8,
    prefixes: PrefixFlags,
) -> Option<(InstClass, DestKind, Option<ImmKind>)> {
    use DestKind::{None as DNone, Rm};
    use InstClass::*;

    match group {
        OpGroup::None => None,
        OpGroup::G1 => {
            // /7 is CMP, which writes nothing.
            let d = if reg == 7 { DNone } else { Rm };
            Some((BaselineLock, d, None))
        }
        OpGroup::G1a => (reg == 0).then_some((Baseline, Rm, None)),
        OpGroup::G2 => {
            // /6 is the undocumented SHL alias.
            (reg != 6).then_some((Baseline, Rm, None))
        }
        OpGroup::G3 => match reg {
            0 | 1 => {
                // TEST r/m, imm.
                let imm = if opcode == 0xF6 {
                    ImmKind::Fixed1
                } else {
                    ImmKind::DataZ
                };
                Some((Baseline, DNone, Some(imm)))
            }
            2 | 3 => Some((BaselineLock, Rm, Some(ImmKind::None))), // NOT/NEG
            _ => Some((Baseline, DNone, Some(ImmKind::None))),      // MUL/IMUL/DIV/IDIV
        },
        OpGroup::G4 => (reg <= 1).then_some((BaselineLock, Rm, None)),
        OpGroup::G5 => match reg {
            0 | 1 => Some((BaselineLock, Rm, None)), // INC/DEC
            2 => Some((IndirectCall, DNone, None)),
            4 => Some((IndirectJmp, DNone, None)),
            6 => Some((Baseline, DNone, None)), // PUSH r/m
            3 | 5 => Some((Illegal, DNone, None)), // far forms
            _ => None,
        },
        OpGroup::G8 => match reg {
            4 => Some((Baseline, DNone, None)), // BT
            5..=7 => Some((BaselineLock, Rm, None)), // BTS/BTR/BTC
            _ => None,
        },
        OpGroup::G9 => {
            if reg == 1 && mode != 3 {
                let c = if prefixes.contains(PrefixFlags::REX_W) {
                    Cx16
                } else {
                    Cx8
                };
                Some((c, DNone, None))
            } else {
                None
            }
        }
        OpGroup::G11 => (reg == 0).then_some((Baseline, Rm, None)),
        OpGroup::G15 => {
            if mode == 3 {
                // LFENCE/MFENCE/SFENCE.
                (reg >= 5).then_some((SseFence, DNone, None))
            } else {
                match reg {
                    0 | 1 | 7 => Some((SseFence, DNone, None)), // FXSAVE/FXRSTOR/CLFLUSH
                    2 | 3 => Some((Sse, DNone, None)),          // LDMXCSR/STMXCSR
                    _ => None,
                }
            }
        }
        OpGroup::G16 => Some((Nop, DNone, None)),
    }
}

/// Byte width of an immediate for the given category and prefix state.
fn imm_size(kind: ImmKind, prefixes: PrefixFlags) -> u8 {
    match kind {
        ImmKind::None | ImmKind::Group3 => 0,
        ImmKind::Fixed1 => 1,
        ImmKind::Fixed2 => 2,
        ImmKind::Fixed3 => 3,
        ImmKind::Fixed4 => 4,
        ImmKind::DataZ => {
            if prefixes.contains(PrefixFlags::DATA16) {
                2
            } else {
                4
            }
        }
        ImmKind::MovDataV => {
            if prefixes.contains(PrefixFlags::REX_W) {
                8
            } else if prefixes.contains(PrefixFlags::DATA16) {
                2
            } else {
                4
            }
        }
        ImmKind::AddrV => 8,
    }
}
