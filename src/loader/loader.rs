//! Load orchestration: segment copy, halt sled, whole-image validation,
//! protections, and dynamic-text window creation.

use crate::dyncode::{DynCodeManager, HALT_SLED_SIZE};
use crate::error::LoadError;
use crate::memory::{
    AddressSpace, HostMemory, MemoryLayout, ProtFlags, MAP_GRANULARITY_PAGES, PAGE_SHIFT,
    TRAMPOLINE_START,
};
use crate::validator::{CpuFeatures, Validator, HALT_BYTE};
use crate::Error;

use super::elf::{ElfImage, StaticLayout, ADDR_BITS, TRAMPOLINE_END};

/// Granularity of segment placement and the dynamic-text window (64 KiB).
pub const ALLOC_GRANULARITY: u64 = MAP_GRANULARITY_PAGES << PAGE_SHIFT;

/// Default untrusted stack size (16 MiB), placed at the top of the window.
pub const DEFAULT_STACK_SIZE: u64 = 16 << 20;

const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Result of a successful load. No sandboxed thread exists yet; the caller
/// owns the entry state and decides when (and whether) to start one.
#[derive(Debug)]
pub struct LoadedImage {
    /// Initial program counter, sandbox-relative, bundle-aligned.
    pub entry: u64,
    /// Final protection layout, including the extended static text end.
    pub layout: MemoryLayout,
    /// Initial break address (top of data/bss).
    pub break_addr: u64,
    /// Manager of the dynamic-text window. The window is empty when the
    /// image leaves no gap between text and rodata/data.
    pub dyncode: DynCodeManager,
}

/// Top-level image loader.
///
/// One loader can serve any number of load operations; all per-load state
/// lives in the [`AddressSpace`] and the returned [`LoadedImage`].
#[derive(Debug, Clone)]
pub struct Loader {
    validator: Validator,
    cpu: CpuFeatures,
    stack_size: u64,
}

impl Loader {
    /// Creates a loader validating with `validator` under `cpu`.
    #[must_use]
    pub fn new(validator: Validator, cpu: CpuFeatures) -> Loader {
        Loader {
            validator,
            cpu,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Replaces the untrusted stack size (default [`DEFAULT_STACK_SIZE`]).
    /// The size is rounded up to the allocation granularity.
    #[must_use]
    pub fn with_stack_size(mut self, bytes: u64) -> Loader {
        self.stack_size = bytes.next_multiple_of(ALLOC_GRANULARITY);
        self
    }

    /// Loads `image` into `space`.
    ///
    /// Runs the acceptance pipeline in order: program-header policy, entry
    /// point, layout sanity, segment copy, halt sled, whole-image validation,
    /// final protections. The first failing check aborts the load.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] naming the failed check, or
    /// [`Error::Layout`] for an inconsistent segment arrangement. On failure
    /// the address space must be discarded; partial loads are never run.
    pub fn load<H: HostMemory>(
        &self,
        image: &ElfImage,
        space: &mut AddressSpace,
        host: &mut H,
    ) -> crate::Result<LoadedImage> {
        match self.try_load(image, space, host) {
            Ok(loaded) => Ok(loaded),
            Err(e) => {
                log::error!("image rejected: {e}");
                Err(e)
            }
        }
    }

    fn try_load<H: HostMemory>(
        &self,
        image: &ElfImage,
        space: &mut AddressSpace,
        host: &mut H,
    ) -> crate::Result<LoadedImage> {
        let static_layout = image.validate_program_headers(ADDR_BITS)?;

        let entry = image.entry();
        let bundle = self.validator.bundle_size() as u64;
        if entry % bundle != 0 || entry < TRAMPOLINE_END || entry >= static_layout.static_text_end
        {
            return Err(LoadError::BadEntryPoint.into());
        }

        let break_addr = initial_break(&static_layout);
        check_layout_sanity(&static_layout, break_addr)?;

        space.mprotect_guards(host, TRAMPOLINE_END)?;

        // The static image pages must be writable for the copy; the final
        // protections replace this below.
        let image_top = break_addr.next_multiple_of(PAGE_SIZE);
        host.protect(
            space.user_to_host(TRAMPOLINE_START, image_top - TRAMPOLINE_START)?,
            image_top - TRAMPOLINE_START,
            ProtFlags::READ | ProtFlags::WRITE,
        )?;

        self.copy_segments(image, &static_layout, space, host)?;

        let (static_text_end, window) =
            self.fill_end_of_text(&static_layout, space, host)?;

        self.validate_static_text(static_text_end, space, host)?;

        let layout = MemoryLayout {
            trampoline_end: TRAMPOLINE_END,
            static_text_end,
            rodata: static_layout.rodata,
            data: static_layout.data.map(|(start, _)| (start, break_addr)),
            stack_size: self.stack_size,
        };
        space.apply_protections(host, &layout)?;

        // The window opens inaccessible; pages become executable one at a
        // time as dynamic code first lands on them.
        if window.1 > window.0 {
            let len = window.1 - window.0;
            host.protect(space.user_to_host(window.0, len)?, len, ProtFlags::empty())?;
            space.vmmap().update(
                window.0 >> PAGE_SHIFT,
                len >> PAGE_SHIFT,
                ProtFlags::empty(),
                None,
                false,
            );
        }

        let dyncode =
            DynCodeManager::new(window.0, window.1, self.validator.clone(), self.cpu)?;
        log::debug!(
            "image loaded: entry {entry:#x}, text ends {static_text_end:#x}, \
             dynamic window {:#x}..{:#x}, break {break_addr:#x}",
            window.0,
            window.1
        );

        Ok(LoadedImage {
            entry,
            layout,
            break_addr,
            dyncode,
        })
    }

    fn copy_segments<H: HostMemory>(
        &self,
        image: &ElfImage,
        layout: &StaticLayout,
        space: &AddressSpace,
        host: &mut H,
    ) -> crate::Result<()> {
        let data = image.data();
        for &segnum in &layout.loadable {
            let php = &image.phdrs()[segnum];
            if php.p_filesz == 0 {
                continue;
            }
            // Ranges were checked by the program-header policy.
            let src = &data[php.p_offset as usize..(php.p_offset + php.p_filesz) as usize];
            let dst = space.user_to_host(php.p_vaddr, php.p_filesz)?;
            log::trace!(
                "segment {segnum}: {:#x} bytes at {:#x}",
                php.p_filesz,
                php.p_vaddr
            );
            host.write(dst, src)?;
        }
        Ok(())
    }

    /// Pads static text with HLT bytes and places the dynamic-text window.
    ///
    /// With a gap between text and rodata/data, text is padded up to the
    /// window start and the window runs to the next segment. Without one,
    /// text is padded so it ends with at least [`HALT_SLED_SIZE`] halt bytes
    /// and the window is empty. Returns the extended text end and the window.
    fn fill_end_of_text<H: HostMemory>(
        &self,
        layout: &StaticLayout,
        space: &AddressSpace,
        host: &mut H,
    ) -> crate::Result<(u64, (u64, u64))> {
        let text_end = layout.static_text_end;
        let above = layout.rodata.map(|r| r.0).or(layout.data.map(|d| d.0));
        if above.is_some_and(|start| text_end + HALT_SLED_SIZE > start) {
            return Err(LoadError::NoRoomForHaltSled.into());
        }

        let window_start = text_end.next_multiple_of(ALLOC_GRANULARITY);
        let window_end = match above {
            Some(start) => (start / ALLOC_GRANULARITY * ALLOC_GRANULARITY).max(window_start),
            None => window_start,
        };

        let padded_end = if window_end > window_start {
            // The window itself is wall-to-wall halts; only close the gap up
            // to it.
            window_start
        } else {
            (text_end + HALT_SLED_SIZE).next_multiple_of(ALLOC_GRANULARITY)
        };
        let pad = padded_end - text_end;
        debug_assert!(window_end > window_start || pad >= HALT_SLED_SIZE);

        let dst = space.user_to_host(text_end, pad)?;
        host.write(dst, &vec![HALT_BYTE; pad as usize])?;
        Ok((padded_end, (window_start, window_end)))
    }

    fn validate_static_text<H: HostMemory>(
        &self,
        static_text_end: u64,
        space: &AddressSpace,
        host: &mut H,
    ) -> crate::Result<()> {
        let len = static_text_end - TRAMPOLINE_END;
        let mut text = vec![0u8; len as usize];
        host.read(space.user_to_host(TRAMPOLINE_END, len)?, &mut text)?;

        let report = self.validator.validate_segment(&text, TRAMPOLINE_END, self.cpu);
        if !report.ok() {
            for v in report.violations() {
                log::debug!("static text: {} at {:#x}", v.kind, v.vaddr);
            }
            return Err(LoadError::ValidationFailed {
                violations: report.total(),
            }
            .into());
        }
        Ok(())
    }
}

/// The initial break: the highest loadable vaddr, rounded out so the halt
/// sled and bss always land on accessible pages.
fn initial_break(layout: &StaticLayout) -> u64 {
    let mut max_vaddr = layout.max_vaddr;
    if layout.data.is_none() {
        if layout.rodata.is_none()
            && max_vaddr.next_multiple_of(ALLOC_GRANULARITY) - max_vaddr < HALT_SLED_SIZE
        {
            max_vaddr += ALLOC_GRANULARITY;
        }
        max_vaddr = max_vaddr.next_multiple_of(ALLOC_GRANULARITY);
    }
    max_vaddr
}

/// Segments must appear in text, rodata, data order without overlap, with
/// rodata and data placed on allocation boundaries.
fn check_layout_sanity(layout: &StaticLayout, break_addr: u64) -> crate::Result<()> {
    let text_top = layout.static_text_end.next_multiple_of(ALLOC_GRANULARITY);

    if let Some((start, end)) = layout.data {
        if end != break_addr {
            return Err(Error::Layout(format!(
                "data ends at {end:#x}, break at {break_addr:#x}"
            )));
        }
        if layout.rodata.is_none() && text_top > start {
            return Err(Error::Layout(format!(
                "text reaching {text_top:#x} overlaps data at {start:#x}"
            )));
        }
    } else if let Some((_, end)) = layout.rodata {
        if end.next_multiple_of(ALLOC_GRANULARITY) != break_addr {
            return Err(Error::Layout(format!(
                "rodata ends at {end:#x}, break at {break_addr:#x}"
            )));
        }
    }

    if let Some((ro_start, ro_end)) = layout.rodata {
        if text_top > ro_start {
            return Err(Error::Layout(format!(
                "text reaching {text_top:#x} overlaps rodata at {ro_start:#x}"
            )));
        }
        if let Some((d_start, _)) = layout.data {
            if ro_end > d_start {
                return Err(Error::Layout(format!(
                    "rodata ending at {ro_end:#x} overlaps data at {d_start:#x}"
                )));
            }
        }
        if ro_start % ALLOC_GRANULARITY != 0 {
            return Err(Error::Layout(format!("rodata at {ro_start:#x} misaligned")));
        }
    }
    if let Some((d_start, _)) = layout.data {
        if d_start % ALLOC_GRANULARITY != 0 {
            return Err(Error::Layout(format!("data at {d_start:#x} misaligned")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::elf::tests::{build_image, parse_bytes, TestPhdr};
    use crate::memory::{AddressSpaceConfig, SimHost};
    use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};

    fn small_space(host: &mut SimHost) -> AddressSpace {
        crate::test::init_logging();
        AddressSpace::allocate(host, AddressSpaceConfig { guard_size: 1 << 30 }).unwrap()
    }

    fn loader() -> Loader {
        Loader::new(Validator::new(32).unwrap(), CpuFeatures::baseline())
            .with_stack_size(1 << 20)
    }

    fn phdr(p_type: u32, p_flags: u32, offset: u64, vaddr: u64, filesz: u64, memsz: u64) -> TestPhdr {
        TestPhdr {
            p_type,
            p_flags,
            p_offset: offset,
            p_vaddr: vaddr,
            p_filesz: filesz,
            p_memsz: memsz,
        }
    }

    /// Text, rodata and data segments with a gap for the dynamic window.
    fn full_image(text: Vec<u8>) -> ElfImage {
        let text_len = text.len() as u64;
        parse_bytes(build_image(
            TRAMPOLINE_END,
            &[
                phdr(PT_LOAD, PF_R | PF_X, 0x1000, TRAMPOLINE_END, text_len, text_len),
                phdr(PT_LOAD, PF_R, 0x20000, 0x100_0000, 0x100, 0x100),
                phdr(PT_LOAD, PF_R | PF_W, 0x21000, 0x200_0000, 0x40, 0x1000),
            ],
            &[
                (0x1000, text),
                (0x20000, vec![0xAB; 0x100]),
                (0x21000, vec![0xCD; 0x40]),
            ],
        ))
        .unwrap()
    }

    #[test]
    fn loads_a_complete_image() {
        let mut host = SimHost::new();
        let mut space = small_space(&mut host);
        let image = full_image(vec![0x90; 64]);

        let loaded = loader().load(&image, &mut space, &mut host).unwrap();
        assert_eq!(loaded.entry, TRAMPOLINE_END);

        // Text bytes and the halt pad behind them.
        let base = space.base();
        let mut buf = [0u8; 4];
        host.read(base + TRAMPOLINE_END, &mut buf).unwrap();
        assert_eq!(buf, [0x90; 4]);
        host.read(base + TRAMPOLINE_END + 64, &mut buf).unwrap();
        assert_eq!(buf, [HALT_BYTE; 4]);

        // Text is padded to the window start; the window runs to rodata.
        assert_eq!(loaded.layout.static_text_end, 0x3_0000);
        assert_eq!(loaded.dyncode.window(), (0x3_0000, 0x100_0000));

        // Data/bss extends to the break.
        assert_eq!(loaded.break_addr, 0x200_1000);
        assert_eq!(loaded.layout.data, Some((0x200_0000, 0x200_1000)));

        let rx = ProtFlags::READ | ProtFlags::EXEC;
        let rw = ProtFlags::READ | ProtFlags::WRITE;
        assert_eq!(host.protection_at(base + TRAMPOLINE_END), Some(rx));
        assert_eq!(host.protection_at(base + 0x100_0000), Some(ProtFlags::READ));
        assert_eq!(host.protection_at(base + 0x200_0000), Some(rw));
    }

    #[test]
    fn rejects_a_misaligned_entry_point() {
        let mut host = SimHost::new();
        let mut space = small_space(&mut host);
        let text = vec![0x90u8; 64];
        let image = parse_bytes(build_image(
            TRAMPOLINE_END + 8,
            &[phdr(PT_LOAD, PF_R | PF_X, 0x1000, TRAMPOLINE_END, 64, 64)],
            &[(0x1000, text)],
        ))
        .unwrap();

        match loader().load(&image, &mut space, &mut host) {
            Err(Error::Load(LoadError::BadEntryPoint)) => {}
            other => panic!("expected BadEntryPoint, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unvalidatable_text() {
        let mut host = SimHost::new();
        let mut space = small_space(&mut host);
        let mut text = vec![0x90u8; 64];
        text[3] = 0x0F;
        text[4] = 0x05; // syscall
        let image = full_image(text);

        match loader().load(&image, &mut space, &mut host) {
            Err(Error::Load(LoadError::ValidationFailed { violations })) => {
                assert!(violations > 0);
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn requires_room_for_the_halt_sled() {
        let mut host = SimHost::new();
        let mut space = small_space(&mut host);
        let text_len = 0xFFF0u64; // ends 16 bytes short of the rodata boundary
        let image = parse_bytes(build_image(
            TRAMPOLINE_END,
            &[
                phdr(PT_LOAD, PF_R | PF_X, 0x1000, TRAMPOLINE_END, text_len, text_len),
                phdr(PT_LOAD, PF_R, 0x11000, 0x3_0000, 0x100, 0x100),
            ],
            &[
                (0x1000, vec![0x90; text_len as usize]),
                (0x11000, vec![0xAB; 0x100]),
            ],
        ))
        .unwrap();

        match loader().load(&image, &mut space, &mut host) {
            Err(Error::Load(LoadError::NoRoomForHaltSled)) => {}
            other => panic!("expected NoRoomForHaltSled, got {other:?}"),
        }
    }

    #[test]
    fn text_only_image_gets_an_empty_window() {
        let mut host = SimHost::new();
        let mut space = small_space(&mut host);
        let image = parse_bytes(build_image(
            TRAMPOLINE_END,
            &[phdr(PT_LOAD, PF_R | PF_X, 0x1000, TRAMPOLINE_END, 64, 64)],
            &[(0x1000, vec![0x90; 64])],
        ))
        .unwrap();

        let loaded = loader().load(&image, &mut space, &mut host).unwrap();
        let (start, end) = loaded.dyncode.window();
        assert_eq!(start, end);
        // The text still ends in a full sled of halts.
        assert_eq!(loaded.layout.static_text_end, 0x3_0000);
        let mut buf = [0u8; 32];
        host.read(space.base() + 0x3_0000 - 32, &mut buf).unwrap();
        assert_eq!(buf, [HALT_BYTE; 32]);
    }

    #[test]
    fn out_of_order_segments_are_rejected() {
        let mut host = SimHost::new();
        let mut space = small_space(&mut host);
        // rodata above data.
        let image = parse_bytes(build_image(
            TRAMPOLINE_END,
            &[
                phdr(PT_LOAD, PF_R | PF_X, 0x1000, TRAMPOLINE_END, 64, 64),
                phdr(PT_LOAD, PF_R, 0x20000, 0x200_0000, 0x100, 0x100),
                phdr(PT_LOAD, PF_R | PF_W, 0x21000, 0x100_0000, 0x40, 0x40),
            ],
            &[
                (0x1000, vec![0x90; 64]),
                (0x20000, vec![0xAB; 0x100]),
                (0x21000, vec![0xCD; 0x40]),
            ],
        ))
        .unwrap();

        match loader().load(&image, &mut space, &mut host) {
            Err(Error::Layout(_)) => {}
            other => panic!("expected a layout error, got {other:?}"),
        }
    }
}
