//! x86-64 instruction decoding.
//!
//! The decoder is a single-instruction primitive: given a byte slice and an
//! offset it produces one [`DecodedInstruction`] or a [`DecodeError`]. It
//! recognizes the legacy and REX prefix space, the one-, two-, and three-byte
//! opcode maps, the x87 escapes, and the ModRM group opcodes. VEX/EVEX encoded
//! instructions are not part of the accepted set and decode as unknown.
//!
//! Instruction semantics beyond what validation needs are out of scope: the
//! decoder reports structure (lengths, field offsets, class, destination
//! category), not operand meaning.

mod decoder;
mod instruction;
mod tables;

pub use decoder::{decode, DecodeError, MAX_INST_LENGTH, MAX_PREFIX_BYTES};
pub use instruction::{DecodedInstruction, DestKind, Gpr, ImmKind, InstClass, PrefixFlags};
pub use tables::{OpGroup, OpInfo, ONE_BYTE, THREE_BYTE_38, THREE_BYTE_3A, TWO_BYTE};
