//! End-to-end image loading through the public API.
//!
//! Each test builds a synthetic static ELF64 executable in memory, loads it
//! into a simulated address space, and checks what actually landed in host
//! memory: segment bytes, halt fill, final protections, and the dynamic-text
//! window handed back with the loaded image.

use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};

use sandcage::file::Memory;
use sandcage::loader::TRAMPOLINE_END;
use sandcage::memory::MemoryLayout;
use sandcage::prelude::*;
use sandcage::Error;

struct Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
}

/// Builds a minimal static ELF64 executable image in memory.
fn build_image(entry: u64, phdrs: &[Phdr], payload: &[(u64, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&entry.to_le_bytes());
    out.extend_from_slice(&64u64.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    out.extend_from_slice(&56u16.to_le_bytes()); // e_phentsize
    out.extend_from_slice(&(phdrs.len() as u16).to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    assert_eq!(out.len(), 64);

    for p in phdrs {
        out.extend_from_slice(&p.p_type.to_le_bytes());
        out.extend_from_slice(&p.p_flags.to_le_bytes());
        out.extend_from_slice(&p.p_offset.to_le_bytes());
        out.extend_from_slice(&p.p_vaddr.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // p_paddr
        out.extend_from_slice(&p.p_filesz.to_le_bytes());
        out.extend_from_slice(&p.p_memsz.to_le_bytes());
        out.extend_from_slice(&0x1000u64.to_le_bytes()); // p_align
    }

    for (offset, bytes) in payload {
        let offset = *offset as usize;
        if out.len() < offset + bytes.len() {
            out.resize(offset + bytes.len(), 0);
        }
        out[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
    out
}

fn phdr(p_type: u32, p_flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64) -> Phdr {
    Phdr {
        p_type,
        p_flags,
        p_offset: offset,
        p_vaddr: vaddr,
        p_filesz: filesz,
        p_memsz: memsz,
    }
}

/// Text, rodata and data segments with a gap for the dynamic window.
fn full_image(entry: u64, text: Vec<u8>) -> ElfImage {
    let text_len = text.len() as u64;
    ElfImage::parse(Box::new(Memory::new(build_image(
        entry,
        &[
            phdr(PT_LOAD, PF_R | PF_X, 0x1000, TRAMPOLINE_END, text_len, text_len),
            phdr(PT_LOAD, PF_R, 0x20_000, 0x100_0000, 0x100, 0x100),
            phdr(PT_LOAD, PF_R | PF_W, 0x21_000, 0x200_0000, 0x800, 0x1000),
        ],
        &[
            (0x1000, text),
            (0x20_000, vec![0xAA; 0x100]),
            (0x21_000, vec![0xBB; 0x800]),
        ],
    ))))
    .unwrap()
}

fn loader() -> Loader {
    Loader::new(Validator::new(32).unwrap(), CpuFeatures::baseline()).with_stack_size(1 << 20)
}

fn small_space(host: &mut SimHost) -> AddressSpace {
    AddressSpace::allocate(host, AddressSpaceConfig { guard_size: 1 << 30 }).unwrap()
}

#[test]
fn loads_a_static_image_through_the_public_api() {
    let mut host = SimHost::new();
    let mut space = small_space(&mut host);
    let base = space.base();

    // 64 KiB of straight-line text fills [0x2_0000, 0x3_0000) exactly.
    let image = full_image(TRAMPOLINE_END, vec![0x90; 0x1_0000]);
    let loaded = loader().load(&image, &mut space, &mut host).unwrap();

    assert_eq!(loaded.entry, TRAMPOLINE_END);
    assert_eq!(loaded.break_addr, 0x200_1000);
    assert_eq!(
        loaded.layout,
        MemoryLayout {
            trampoline_end: TRAMPOLINE_END,
            static_text_end: 0x3_0000,
            rodata: Some((0x100_0000, 0x100_0100)),
            data: Some((0x200_0000, 0x200_1000)),
            stack_size: 1 << 20,
        }
    );
    assert_eq!(loaded.dyncode.window(), (0x3_0000, 0x100_0000));

    // Segment bytes reached host memory.
    let mut text = vec![0u8; 16];
    host.read(base + TRAMPOLINE_END, &mut text).unwrap();
    assert_eq!(text, vec![0x90; 16]);
    let mut rodata = vec![0u8; 0x100];
    host.read(base + 0x100_0000, &mut rodata).unwrap();
    assert_eq!(rodata, vec![0xAA; 0x100]);
    let mut bss = vec![0xFFu8; 8];
    host.read(base + 0x200_0800, &mut bss).unwrap();
    assert_eq!(bss, vec![0; 8]);

    // Final protections: RX text, R rodata, RW data, closed window.
    assert_eq!(
        host.protection_at(base + TRAMPOLINE_END),
        Some(ProtFlags::READ | ProtFlags::EXEC)
    );
    assert_eq!(host.protection_at(base + 0x100_0000), Some(ProtFlags::READ));
    assert_eq!(
        host.protection_at(base + 0x200_0000),
        Some(ProtFlags::READ | ProtFlags::WRITE)
    );
    assert_eq!(host.protection_at(base + 0x3_0000), Some(ProtFlags::empty()));
}

#[test]
fn loaded_window_accepts_dynamic_code() {
    let mut host = SimHost::new();
    let mut space = small_space(&mut host);
    let base = space.base();

    let image = full_image(TRAMPOLINE_END, vec![0x90; 0x1_0000]);
    let loaded = loader().load(&image, &mut space, &mut host).unwrap();
    let (window_start, _) = loaded.dyncode.window();

    let mut code = vec![0x90u8; 32];
    code[..5].copy_from_slice(&[0xB8, 0x2A, 0, 0, 0]); // mov eax, 42
    loaded
        .dyncode
        .create(&mut host, base, window_start, &code)
        .unwrap();

    let mut back = vec![0u8; 32];
    loaded.dyncode.read_code(window_start, &mut back).unwrap();
    assert_eq!(back, code);

    // The page the code landed on turned executable.
    assert_eq!(
        host.protection_at(base + window_start),
        Some(ProtFlags::READ | ProtFlags::EXEC)
    );
}

#[test]
fn rejects_an_image_with_forbidden_text() {
    let mut host = SimHost::new();
    let mut space = small_space(&mut host);

    let mut text = vec![0x90u8; 0x1_0000];
    text[0] = 0xC3; // ret
    let image = full_image(TRAMPOLINE_END, text);
    match loader().load(&image, &mut space, &mut host) {
        Err(Error::Load(LoadError::ValidationFailed { violations })) => {
            assert!(violations >= 1);
        }
        other => panic!("expected a validation failure, got {other:?}"),
    }
}

#[test]
fn rejects_a_writable_executable_segment() {
    let mut host = SimHost::new();
    let mut space = small_space(&mut host);

    let image = ElfImage::parse(Box::new(Memory::new(build_image(
        TRAMPOLINE_END,
        &[phdr(
            PT_LOAD,
            PF_R | PF_W | PF_X,
            0x1000,
            TRAMPOLINE_END,
            64,
            64,
        )],
        &[(0x1000, vec![0x90; 64])],
    ))))
    .unwrap();

    match loader().load(&image, &mut space, &mut host) {
        Err(Error::Load(LoadError::BadSegment { p_type, p_flags })) => {
            assert_eq!(p_type, PT_LOAD);
            assert_eq!(p_flags, PF_R | PF_W | PF_X);
        }
        other => panic!("expected a segment rejection, got {other:?}"),
    }
}

#[test]
fn rejects_a_misaligned_entry_point() {
    let mut host = SimHost::new();
    let mut space = small_space(&mut host);

    let image = full_image(TRAMPOLINE_END + 8, vec![0x90; 0x1_0000]);
    assert!(matches!(
        loader().load(&image, &mut space, &mut host),
        Err(Error::Load(LoadError::BadEntryPoint))
    ));
}
