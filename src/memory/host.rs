//! Host virtual-memory primitives.
//!
//! Everything the core needs from the operating system is behind the
//! [`HostMemory`] trait: reservation, protection, unmapping, and mediated
//! byte access into the reservation. The core never hands out raw pointers.
//!
//! [`SimHost`] is the in-tree implementation: pure bookkeeping over a sparse
//! page store, so address-space and loader paths (which reserve tens of
//! gigabytes of virtual space on a real host) run in tests with ordinary
//! allocations.

use std::collections::HashMap;

use super::ProtFlags;
use crate::Error;

/// Host page size used for the sparse store.
const HOST_PAGE: u64 = 4096;

/// The host virtual-memory interface.
pub trait HostMemory {
    /// Reserves `len` bytes of address space, preferably at `hint` (0 for
    /// anywhere). The reservation is inaccessible until protected.
    ///
    /// # Errors
    ///
    /// Fails when the host cannot supply the reservation.
    fn reserve(&mut self, hint: u64, len: u64) -> crate::Result<u64>;

    /// Changes the protection of `[addr, addr + len)`.
    ///
    /// # Errors
    ///
    /// Fails when the range is not part of a reservation.
    fn protect(&mut self, addr: u64, len: u64, prot: ProtFlags) -> crate::Result<()>;

    /// Returns `[addr, addr + len)` to the host, removing it from the
    /// reservation.
    ///
    /// # Errors
    ///
    /// Fails when the range is not part of a reservation.
    fn unmap(&mut self, addr: u64, len: u64) -> crate::Result<()>;

    /// Writes bytes into the reservation, ignoring protections (the trusted
    /// side writes through its own mapping).
    ///
    /// # Errors
    ///
    /// Fails when the range is outside every reservation.
    fn write(&mut self, addr: u64, bytes: &[u8]) -> crate::Result<()>;

    /// Reads bytes back out of the reservation.
    ///
    /// # Errors
    ///
    /// Fails when the range is outside every reservation.
    fn read(&self, addr: u64, out: &mut [u8]) -> crate::Result<()>;
}

/// Bookkeeping-only host for tests and dry runs.
#[derive(Debug, Default)]
pub struct SimHost {
    reservations: Vec<(u64, u64)>,
    protections: Vec<(u64, u64, ProtFlags)>,
    pages: HashMap<u64, Box<[u8]>>,
    next_addr: u64,
}

impl SimHost {
    /// Creates an empty simulated host.
    #[must_use]
    pub fn new() -> SimHost {
        SimHost {
            reservations: Vec::new(),
            protections: Vec::new(),
            pages: HashMap::new(),
            // Arbitrary non-zero base so address arithmetic bugs surface.
            next_addr: 0x7000_0000_0000,
        }
    }

    /// The protection most recently applied to `addr`, if any.
    #[must_use]
    pub fn protection_at(&self, addr: u64) -> Option<ProtFlags> {
        self.protections
            .iter()
            .rev()
            .find(|(start, len, _)| addr >= *start && addr < start + len)
            .map(|(_, _, p)| *p)
    }

    /// Every `protect` call made so far, in order.
    #[must_use]
    pub fn protection_log(&self) -> &[(u64, u64, ProtFlags)] {
        &self.protections
    }

    /// Whether `[addr, addr + len)` lies inside a single reservation.
    #[must_use]
    pub fn is_reserved(&self, addr: u64, len: u64) -> bool {
        self.reservations
            .iter()
            .any(|(start, rlen)| addr >= *start && addr + len <= start + rlen)
    }

    fn page_mut(&mut self, page: u64) -> &mut [u8] {
        self.pages
            .entry(page)
            .or_insert_with(|| vec![0u8; HOST_PAGE as usize].into_boxed_slice())
    }
}

impl HostMemory for SimHost {
    fn reserve(&mut self, hint: u64, len: u64) -> crate::Result<u64> {
        let addr = if hint != 0 { hint } else { self.next_addr };
        if hint == 0 {
            self.next_addr += len + HOST_PAGE;
        }
        self.reservations.push((addr, len));
        log::trace!("simhost reserve {len:#x} at {addr:#x}");
        Ok(addr)
    }

    fn protect(&mut self, addr: u64, len: u64, prot: ProtFlags) -> crate::Result<()> {
        if !self.is_reserved(addr, len) {
            return Err(Error::OutOfBounds);
        }
        self.protections.push((addr, len, prot));
        Ok(())
    }

    fn unmap(&mut self, addr: u64, len: u64) -> crate::Result<()> {
        let end = addr + len;
        let mut changed = false;
        let mut split: Vec<(u64, u64)> = Vec::new();
        for (start, rlen) in &mut self.reservations {
            let rend = *start + *rlen;
            if end <= *start || rend <= addr {
                continue;
            }
            changed = true;
            if addr <= *start && rend <= end {
                *rlen = 0;
            } else if *start < addr && end < rend {
                split.push((end, rend - end));
                *rlen = addr - *start;
            } else if addr <= *start {
                *rlen = rend - end;
                *start = end;
            } else {
                *rlen = addr - *start;
            }
        }
        if !changed {
            return Err(Error::OutOfBounds);
        }
        self.reservations.retain(|(_, l)| *l > 0);
        self.reservations.extend(split);
        Ok(())
    }

    fn write(&mut self, addr: u64, bytes: &[u8]) -> crate::Result<()> {
        if !self.is_reserved(addr, bytes.len() as u64) {
            return Err(Error::OutOfBounds);
        }
        let mut pos = 0usize;
        while pos < bytes.len() {
            let a = addr + pos as u64;
            let page = a / HOST_PAGE;
            let off = (a % HOST_PAGE) as usize;
            let room = (HOST_PAGE as usize - off).min(bytes.len() - pos);
            self.page_mut(page)[off..off + room].copy_from_slice(&bytes[pos..pos + room]);
            pos += room;
        }
        Ok(())
    }

    fn read(&self, addr: u64, out: &mut [u8]) -> crate::Result<()> {
        if !self.is_reserved(addr, out.len() as u64) {
            return Err(Error::OutOfBounds);
        }
        let mut pos = 0usize;
        while pos < out.len() {
            let a = addr + pos as u64;
            let page = a / HOST_PAGE;
            let off = (a % HOST_PAGE) as usize;
            let room = (HOST_PAGE as usize - off).min(out.len() - pos);
            match self.pages.get(&page) {
                Some(data) => out[pos..pos + room].copy_from_slice(&data[off..off + room]),
                // Untouched pages read as zero.
                None => out[pos..pos + room].fill(0),
            }
            pos += room;
        }
        Ok(())
    }
}
