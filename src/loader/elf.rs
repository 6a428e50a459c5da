//! ELF image parsing and program-header acceptance policy.
//!
//! An untrusted executable is accepted only if its headers match a small
//! allow-list: a static 64-bit x86-64 executable whose text segment sits
//! immediately after the trampoline region, with at most one rodata and one
//! data segment above it. Everything else is rejected before a single
//! segment byte is copied.

use crate::error::LoadError;
use crate::file::{parser::Parser, Backend, Physical};

use goblin::elf::header::{
    EI_CLASS, EI_DATA, EI_VERSION, ELFCLASS64, ELFDATA2LSB, ELFMAG, EM_X86_64, ET_EXEC,
    EV_CURRENT, SELFMAG,
};
use goblin::elf::program_header::{
    ProgramHeader, PF_R, PF_W, PF_X, PT_DYNAMIC, PT_GNU_EH_FRAME, PT_GNU_RELRO, PT_GNU_STACK,
    PT_INTERP, PT_LOAD, PT_NOTE, PT_NULL, PT_PHDR, PT_TLS,
};
use goblin::elf::Elf;
use std::path::Path;

/// First address past the syscall trampoline; static text must start here.
pub const TRAMPOLINE_END: u64 = 0x2_0000;

/// Cap on the number of program headers an image may carry.
pub const MAX_PROGRAM_HEADERS: usize = 128;

/// Width of the sandbox address budget in bits.
pub const ADDR_BITS: u32 = 32;

const PHDR64_SIZE: usize = 56;

/// What the loader does with a segment whose (type, flags) matched a policy
/// row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhdrAction {
    /// Accept, load, no further role.
    None,
    /// The single text segment; its vaddr is pinned to [`TRAMPOLINE_END`].
    TextCheck,
    /// The read-only data segment.
    RoData,
    /// The writable data/bss segment.
    Data,
    /// Accept without loading.
    Ignore,
}

struct PhdrRule {
    p_type: u32,
    p_flags: u32,
    action: PhdrAction,
    required: bool,
    fixed_vaddr: u64,
}

const fn rule(
    p_type: u32,
    p_flags: u32,
    action: PhdrAction,
    required: bool,
    fixed_vaddr: u64,
) -> PhdrRule {
    PhdrRule {
        p_type,
        p_flags,
        action,
        required,
        fixed_vaddr,
    }
}

/// The (p_type, p_flags) combinations an image may carry. A segment matching
/// no row is rejected; two segments matching the same row are rejected.
const PHDR_RULES: &[PhdrRule] = &[
    rule(PT_PHDR, PF_R, PhdrAction::Ignore, false, 0),
    rule(PT_LOAD, PF_R | PF_X, PhdrAction::TextCheck, true, TRAMPOLINE_END),
    rule(PT_LOAD, PF_R, PhdrAction::RoData, false, 0),
    rule(PT_LOAD, PF_R | PF_W, PhdrAction::Data, false, 0),
    rule(PT_TLS, PF_R, PhdrAction::Ignore, false, 0),
    // The GNU stack marker is accepted only with the execute bit off.
    rule(PT_GNU_STACK, PF_R | PF_W, PhdrAction::None, false, 0),
    rule(PT_DYNAMIC, PF_R, PhdrAction::Ignore, false, 0),
    rule(PT_INTERP, PF_R, PhdrAction::Ignore, false, 0),
    rule(PT_NOTE, PF_R, PhdrAction::Ignore, false, 0),
    rule(PT_GNU_EH_FRAME, PF_R, PhdrAction::Ignore, false, 0),
    rule(PT_GNU_RELRO, PF_R, PhdrAction::Ignore, false, 0),
    rule(PT_NULL, PF_R, PhdrAction::Ignore, false, 0),
];

/// Layout facts derived from an accepted program-header table, addresses
/// sandbox-relative.
#[derive(Debug, Clone, Default)]
pub struct StaticLayout {
    /// End of static text as declared by the image: [`TRAMPOLINE_END`] plus
    /// the text segment's file size. The loader extends this past the halt
    /// sled it appends.
    pub static_text_end: u64,
    /// Read-only data range, if present.
    pub rodata: Option<(u64, u64)>,
    /// Writable data/bss range, if present.
    pub data: Option<(u64, u64)>,
    /// Highest vaddr any loadable segment reaches, at least
    /// [`TRAMPOLINE_END`].
    pub max_vaddr: u64,
    /// Indexes of the program headers whose bytes get copied in.
    pub(crate) loadable: Vec<usize>,
}

/// A parsed and header-checked executable image.
///
/// Immutable once constructed; the program-header policy check is a separate
/// step ([`ElfImage::validate_program_headers`]) so header diagnostics can be
/// produced without committing to a layout.
pub struct ElfImage {
    backend: Box<dyn Backend>,
    entry: u64,
    phdrs: Vec<ProgramHeader>,
}

impl std::fmt::Debug for ElfImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElfImage")
            .field("entry", &self.entry)
            .field("phdrs", &self.phdrs.len())
            .field("len", &self.backend.len())
            .finish()
    }
}

impl ElfImage {
    /// Parses and header-checks an image from a byte source.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Load`] with the exact failed check
    /// ([`LoadError::BadElfMagic`], [`LoadError::Not64Bit`],
    /// [`LoadError::NotLittleEndian`], [`LoadError::BadElfVersion`],
    /// [`LoadError::NotExec`], [`LoadError::BadMachine`],
    /// [`LoadError::TooManyProgramHeaders`],
    /// [`LoadError::ProgramHeaderSizeTooSmall`]), or
    /// [`crate::Error::GoblinErr`] when the structure itself cannot be read.
    pub fn parse(backend: Box<dyn Backend>) -> crate::Result<ElfImage> {
        let data = backend.data();
        let mut reader = Parser::new(data);
        let ident = reader.read_bytes(16).map_err(|_| LoadError::BadElfMagic)?;
        if ident[..SELFMAG] != ELFMAG[..] {
            return Err(LoadError::BadElfMagic.into());
        }
        if ident[EI_CLASS] != ELFCLASS64 {
            return Err(LoadError::Not64Bit.into());
        }
        if ident[EI_DATA] != ELFDATA2LSB {
            return Err(LoadError::NotLittleEndian.into());
        }
        if ident[EI_VERSION] != EV_CURRENT {
            return Err(LoadError::BadElfVersion.into());
        }

        let elf = Elf::parse(data)?;
        let hdr = &elf.header;
        if hdr.e_type != ET_EXEC {
            return Err(LoadError::NotExec.into());
        }
        if hdr.e_machine != EM_X86_64 {
            return Err(LoadError::BadMachine.into());
        }
        if hdr.e_version != u32::from(EV_CURRENT) {
            return Err(LoadError::BadElfVersion.into());
        }
        if hdr.e_phnum as usize > MAX_PROGRAM_HEADERS {
            return Err(LoadError::TooManyProgramHeaders.into());
        }
        if (hdr.e_phentsize as usize) < PHDR64_SIZE {
            return Err(LoadError::ProgramHeaderSizeTooSmall.into());
        }

        let entry = hdr.e_entry;
        let phdrs = elf.program_headers.clone();
        log::debug!(
            "image accepted: entry {entry:#x}, {} program headers",
            phdrs.len()
        );
        drop(elf);

        Ok(ElfImage {
            backend,
            entry,
            phdrs,
        })
    }

    /// Memory-maps and parses an image from disk.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] when the file cannot be mapped,
    /// otherwise as [`ElfImage::parse`].
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<ElfImage> {
        ElfImage::parse(Box::new(Physical::new(path)?))
    }

    /// The declared entry point, sandbox-relative.
    #[must_use]
    pub fn entry(&self) -> u64 {
        self.entry
    }

    /// The accepted program headers, in image order.
    #[must_use]
    pub fn phdrs(&self) -> &[ProgramHeader] {
        &self.phdrs
    }

    /// The raw image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.backend.data()
    }

    /// Checks every program header against the allow-list and derives the
    /// static layout.
    ///
    /// Segments with `p_memsz == 0` are skipped. A loadable segment must sit
    /// at or above [`TRAMPOLINE_END`], fit the `addr_bits` budget without
    /// wrapping, carry no more file bytes than memory bytes, and name a file
    /// extent inside the image.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Load`] naming the first failed check.
    pub fn validate_program_headers(&self, addr_bits: u32) -> crate::Result<StaticLayout> {
        let limit = 1u64 << addr_bits;
        let mut seen = [false; PHDR_RULES.len()];
        let mut layout = StaticLayout {
            max_vaddr: TRAMPOLINE_END,
            ..StaticLayout::default()
        };

        for (segnum, php) in self.phdrs.iter().enumerate() {
            log::trace!(
                "segment {segnum}: type {:#x}, flags {:#x}, vaddr {:#x}, memsz {:#x}",
                php.p_type,
                php.p_flags,
                php.p_vaddr,
                php.p_memsz
            );
            if php.p_memsz == 0 {
                continue;
            }

            let Some(idx) = PHDR_RULES
                .iter()
                .position(|r| r.p_type == php.p_type && r.p_flags == php.p_flags)
            else {
                return Err(LoadError::BadSegment {
                    p_type: php.p_type,
                    p_flags: php.p_flags,
                }
                .into());
            };
            if seen[idx] {
                return Err(LoadError::DuplicateSegment.into());
            }
            seen[idx] = true;

            let rule = &PHDR_RULES[idx];
            if rule.action == PhdrAction::Ignore {
                continue;
            }

            if rule.fixed_vaddr != 0 && rule.fixed_vaddr != php.p_vaddr {
                return Err(LoadError::TextSegmentBadLocation.into());
            }
            if php.p_vaddr < TRAMPOLINE_END {
                return Err(LoadError::SegmentBelowTrampoline.into());
            }
            let Some(end_vaddr) = php.p_vaddr.checked_add(php.p_memsz) else {
                return Err(LoadError::SegmentOutsideAddressSpace.into());
            };
            if end_vaddr >= limit {
                return Err(LoadError::SegmentOutsideAddressSpace.into());
            }
            if php.p_filesz > php.p_memsz {
                return Err(LoadError::SegmentFileSizeTooLarge.into());
            }
            let file_end = php.p_offset.checked_add(php.p_filesz);
            if file_end.is_none_or(|end| end > self.backend.len() as u64) {
                return Err(LoadError::SegmentBadFileRange.into());
            }

            layout.loadable.push(segnum);
            layout.max_vaddr = layout.max_vaddr.max(end_vaddr);

            match rule.action {
                PhdrAction::TextCheck => {
                    layout.static_text_end = TRAMPOLINE_END + php.p_filesz;
                }
                PhdrAction::RoData => {
                    layout.rodata = Some((php.p_vaddr, end_vaddr));
                }
                PhdrAction::Data => {
                    layout.data = Some((php.p_vaddr, end_vaddr));
                }
                PhdrAction::None | PhdrAction::Ignore => {}
            }
        }

        for (idx, rule) in PHDR_RULES.iter().enumerate() {
            if rule.required && !seen[idx] {
                return Err(LoadError::RequiredSegmentMissing.into());
            }
        }
        Ok(layout)
    }
}
