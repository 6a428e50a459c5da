//! Sandbox address-space reservation and protection layout.
//!
//! The sandbox proper is a 4 GiB window in which every untrusted pointer is a
//! 32-bit offset from the base register. The window sits between two large
//! guard bands, so any `base + u32 + scaled-index` access computed by
//! validated code stays inside the reservation even before masking. The base
//! is aligned to the window size, letting the trusted runtime recover it from
//! any in-sandbox address by masking.

use super::host::HostMemory;
use super::vmmap::{VmMap, PAGE_SHIFT};
use super::ProtFlags;
use crate::error::LoadError;
use crate::Error;

/// Size of the sandbox window: the full 32-bit addressable range.
pub const SANDBOX_SIZE: u64 = 1 << 32;

/// Default guard-band size on each side of the window (40 GiB), covering the
/// worst-case `u32 + u32 * 8` scaled access plus slack.
pub const DEFAULT_GUARD_SIZE: u64 = 40 << 30;

/// First address of the syscall trampoline; everything below is the
/// permanently unmapped zero page region.
pub const TRAMPOLINE_START: u64 = 0x1_0000;

/// Tunables for [`AddressSpace::allocate`].
#[derive(Debug, Clone, Copy)]
pub struct AddressSpaceConfig {
    /// Guard-band size in bytes on each side of the sandbox window.
    pub guard_size: u64,
}

impl Default for AddressSpaceConfig {
    fn default() -> Self {
        AddressSpaceConfig {
            guard_size: DEFAULT_GUARD_SIZE,
        }
    }
}

/// Final protection layout of a loaded image, addresses sandbox-relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLayout {
    /// End of the trampoline region; static text starts here.
    pub trampoline_end: u64,
    /// End of static text (including its halt sled).
    pub static_text_end: u64,
    /// Read-only data range, if the image has one.
    pub rodata: Option<(u64, u64)>,
    /// Writable data/bss range, if the image has one.
    pub data: Option<(u64, u64)>,
    /// Stack size in bytes, placed at the top of the window.
    pub stack_size: u64,
}

/// The reserved and guarded sandbox address space.
#[derive(Debug)]
pub struct AddressSpace {
    base: u64,
    guard_size: u64,
    map: VmMap,
}

impl AddressSpace {
    /// Reserves guard + window + guard with the window base aligned to
    /// [`SANDBOX_SIZE`], by over-reserving one alignment unit and trimming
    /// the head and tail back to the host.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::AddressSpaceSetup`] when the host cannot supply
    /// or trim the reservation.
    pub fn allocate<H: HostMemory>(
        host: &mut H,
        config: AddressSpaceConfig,
    ) -> crate::Result<AddressSpace> {
        let guard = config.guard_size;
        let total = guard + SANDBOX_SIZE + guard;

        let raw = host
            .reserve(0, total + SANDBOX_SIZE)
            .map_err(|e| setup_failed("reserve", &e))?;
        let base = (raw + guard).next_multiple_of(SANDBOX_SIZE);
        let start = base - guard;
        let end = start + total;
        let raw_end = raw + total + SANDBOX_SIZE;

        if start > raw {
            host.unmap(raw, start - raw)
                .map_err(|e| setup_failed("trim head", &e))?;
        }
        if end < raw_end {
            host.unmap(end, raw_end - end)
                .map_err(|e| setup_failed("trim tail", &e))?;
        }
        log::debug!("address space: window at {base:#x}, guards {guard:#x}");

        Ok(AddressSpace {
            base,
            guard_size: guard,
            map: VmMap::new(),
        })
    }

    /// Host address of the first sandbox byte.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Guard-band size in bytes.
    #[must_use]
    pub fn guard_size(&self) -> u64 {
        self.guard_size
    }

    /// The page-region map of the sandbox window.
    pub fn vmmap(&mut self) -> &mut VmMap {
        &mut self.map
    }

    /// Translates a sandbox-relative address to a host address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] when `[vaddr, vaddr + len)` leaves the
    /// window.
    pub fn user_to_host(&self, vaddr: u64, len: u64) -> crate::Result<u64> {
        let end = vaddr.checked_add(len).ok_or(Error::OutOfBounds)?;
        if end > SANDBOX_SIZE {
            return Err(Error::OutOfBounds);
        }
        Ok(self.base + vaddr)
    }

    /// Makes both guard bands inaccessible and records the zero-page /
    /// trampoline prefix `[0, trampoline_end)` as unmapped-equivalent.
    ///
    /// # Errors
    ///
    /// Propagates host protection failures.
    pub fn mprotect_guards<H: HostMemory>(
        &mut self,
        host: &mut H,
        trampoline_end: u64,
    ) -> crate::Result<()> {
        host.protect(self.base - self.guard_size, self.guard_size, ProtFlags::empty())?;
        host.protect(self.base + SANDBOX_SIZE, self.guard_size, ProtFlags::empty())?;
        self.map.update(
            0,
            pages_covering(0, trampoline_end),
            ProtFlags::empty(),
            None,
            false,
        );
        Ok(())
    }

    /// Applies the final segment protections of a loaded image and records
    /// each range in the map: text R+X, rodata R, data/bss R+W, stack R+W at
    /// the top of the window.
    ///
    /// # Errors
    ///
    /// Propagates host protection failures; [`Error::OutOfBounds`] when a
    /// range leaves the window.
    pub fn apply_protections<H: HostMemory>(
        &mut self,
        host: &mut H,
        layout: &MemoryLayout,
    ) -> crate::Result<()> {
        let rx = ProtFlags::READ | ProtFlags::EXEC;
        let r = ProtFlags::READ;
        let rw = ProtFlags::READ | ProtFlags::WRITE;

        self.protect_range(host, TRAMPOLINE_START, layout.static_text_end, rx)?;
        if let Some((start, end)) = layout.rodata {
            self.protect_range(host, start, end, r)?;
        }
        if let Some((start, end)) = layout.data {
            self.protect_range(host, start, end, rw)?;
        }
        if layout.stack_size > 0 {
            self.protect_range(host, SANDBOX_SIZE - layout.stack_size, SANDBOX_SIZE, rw)?;
        }
        Ok(())
    }

    fn protect_range<H: HostMemory>(
        &mut self,
        host: &mut H,
        start: u64,
        end: u64,
        prot: ProtFlags,
    ) -> crate::Result<()> {
        if end <= start {
            return Ok(());
        }
        let page_start = start >> PAGE_SHIFT << PAGE_SHIFT;
        let npages = pages_covering(page_start, end);
        let len = npages << PAGE_SHIFT;
        let host_addr = self.user_to_host(page_start, len)?;
        host.protect(host_addr, len, prot)?;
        self.map
            .update(page_start >> PAGE_SHIFT, npages, prot, None, false);
        Ok(())
    }
}

/// Number of pages covering `[start, end)`, with `end` rounded up.
fn pages_covering(start: u64, end: u64) -> u64 {
    debug_assert!(start % (1 << PAGE_SHIFT) == 0);
    (end - start).div_ceil(1 << PAGE_SHIFT)
}

fn setup_failed(stage: &str, err: &Error) -> Error {
    Error::Load(LoadError::AddressSpaceSetup(format!("{stage}: {err}")))
}
