//! Dynamic-text region management: creation, in-place modification, and
//! generation-gated deletion of validated code at runtime.

use std::sync::{Mutex, PoisonError};

use crate::decoder::decode;
use crate::error::DyncodeError;
use crate::memory::{HostMemory, ProtFlags};
use crate::runtime::{ThreadHandle, ThreadTable};
use crate::validator::{CpuFeatures, Validator, HALT_BYTE};

use super::patch::{copy_instruction, SerializeCpus};

/// Size of the halt sled reserved at the top of the dynamic-text window.
pub const HALT_SLED_SIZE: u64 = 32;

/// Dynamic-text pages become visible in 64 KiB units.
const VISIBLE_PAGE_SIZE: u64 = 64 * 1024;

/// Below this many regions a linear scan beats the binary search.
const LINEAR_SCAN_CUTOFF: usize = 16;

/// One loaded dynamic code region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRegion {
    /// Sandbox-relative start, bundle-aligned.
    pub start: u64,
    /// Size in bytes, a multiple of the bundle size.
    pub size: u64,
    /// `Some(generation)` once deletion has begun; the region is reclaimed
    /// when every live thread has observed that generation.
    pub delete_generation: Option<u64>,
}

impl DynamicRegion {
    fn end(&self) -> u64 {
        self.start + self.size
    }

    fn is_present(&self) -> bool {
        self.delete_generation.is_none()
    }
}

#[derive(Debug)]
struct TextState {
    /// Writable alias of the window; authoritative for its contents.
    text: Vec<u8>,
    /// One flag per 64 KiB page: whether it has been made executable yet.
    page_visible: Vec<bool>,
    /// Sorted by start, non-overlapping.
    regions: Vec<DynamicRegion>,
    /// Global delete generation, bumped once per delete request.
    generation: u64,
}

/// Manager of the dynamic-text window.
///
/// All state lives behind one mutex, the dynamic-load lock; it is never held
/// across a host fault and is distinct from any address-space lock.
#[derive(Debug)]
pub struct DynCodeManager {
    window_start: u64,
    window_end: u64,
    validator: Validator,
    cpu: CpuFeatures,
    state: Mutex<TextState>,
}

impl DynCodeManager {
    /// Creates a manager for the window `[window_start, window_end)`, both
    /// bundle-aligned. The window may be empty.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a misaligned or inverted
    /// window.
    pub fn new(
        window_start: u64,
        window_end: u64,
        validator: Validator,
        cpu: CpuFeatures,
    ) -> crate::Result<DynCodeManager> {
        let bundle = validator.bundle_size() as u64;
        if window_end < window_start
            || window_start % bundle != 0
            || window_end % bundle != 0
        {
            return Err(malformed_error!(
                "bad dynamic-text window {:#x}..{:#x}",
                window_start,
                window_end
            ));
        }
        let len = (window_end - window_start) as usize;
        let pages = (len as u64).div_ceil(VISIBLE_PAGE_SIZE) as usize;
        Ok(DynCodeManager {
            window_start,
            window_end,
            validator,
            cpu,
            state: Mutex::new(TextState {
                text: vec![HALT_BYTE; len],
                page_visible: vec![false; pages],
                regions: Vec::new(),
                generation: 0,
            }),
        })
    }

    /// The dynamic-text window as `(start, end)`, sandbox-relative.
    #[must_use]
    pub fn window(&self) -> (u64, u64) {
        (self.window_start, self.window_end)
    }

    /// End of the space usable for regions: the window minus the halt-sled
    /// reserve.
    #[must_use]
    pub fn usable_end(&self) -> u64 {
        self.window_end.saturating_sub(HALT_SLED_SIZE)
    }

    /// Loads new code at `dest`. The bytes are validated as a private copy,
    /// the covering pages are made executable on first use, and the copy-in
    /// order (bundle tails first, heads last) keeps the region un-enterable
    /// until it is complete.
    ///
    /// # Errors
    ///
    /// [`DyncodeError::InvalidRange`] for misaligned or out-of-window
    /// requests, [`DyncodeError::RegionOccupied`] on overlap,
    /// [`DyncodeError::ValidationFailed`] when the code is rejected.
    pub fn create<H: HostMemory>(
        &self,
        host: &mut H,
        host_base: u64,
        dest: u64,
        bytes: &[u8],
    ) -> Result<(), DyncodeError> {
        let size = bytes.len() as u64;
        if size == 0 {
            return Ok(());
        }
        let bundle = self.validator.bundle_size() as u64;
        if dest % bundle != 0
            || size % bundle != 0
            || dest < self.window_start
            || dest.checked_add(size).is_none_or(|end| end > self.usable_end())
        {
            return Err(DyncodeError::InvalidRange);
        }

        let report = self.validator.validate_segment(bytes, dest, self.cpu);
        if !report.ok() {
            log::debug!(
                "dyncode create at {dest:#x} rejected: {} violations",
                report.total()
            );
            return Err(DyncodeError::ValidationFailed);
        }

        let mut state = self.lock();
        if let Some(idx) = find_closest_leq(&state.regions, dest + size - 1) {
            if state.regions[idx].end() > dest {
                return Err(DyncodeError::RegionOccupied);
            }
        }

        self.make_pages_visible(&mut state, host, host_base, dest, size)?;

        let off = (dest - self.window_start) as usize;
        let head = BUNDLE_HEAD_LEN;
        {
            let dst = &mut state.text[off..off + bytes.len()];
            // Tails first: while any head still holds halts, no thread can
            // enter the region.
            let mut b = 0usize;
            while b < bytes.len() {
                let bundle = bundle as usize;
                dst[b + head..b + bundle].copy_from_slice(&bytes[b + head..b + bundle]);
                b += bundle;
            }
            host_mirror(host, host_base + dest, dst)?;
            // Publication barrier between body and heads.
            std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
            b = 0;
            while b < bytes.len() {
                dst[b..b + head].copy_from_slice(&bytes[b..b + head]);
                b += bundle as usize;
            }
            host_mirror(host, host_base + dest, dst)?;
        }

        let region = DynamicRegion {
            start: dest,
            size,
            delete_generation: None,
        };
        let pos = state.regions.partition_point(|r| r.start < dest);
        state.regions.insert(pos, region);
        log::debug!("dyncode create: {size:#x} bytes at {dest:#x}");
        Ok(())
    }

    /// Patches `[dest, dest + bytes.len())` inside one present region. The
    /// edit is widened to whole bundles, revalidated as a replacement pair
    /// against the live bytes, then applied instruction by instruction with
    /// the instruction-safe copy.
    ///
    /// # Errors
    ///
    /// [`DyncodeError::NoSuchRegion`] when the range is not inside a present
    /// region, [`DyncodeError::ValidationFailed`] when the replacement is
    /// rejected, [`DyncodeError::PatchFault`] when applying an accepted
    /// replacement fails partway (a CPU serialization failure).
    pub fn modify<H: HostMemory>(
        &self,
        host: &mut H,
        host_base: u64,
        dest: u64,
        bytes: &[u8],
        serializer: &mut dyn SerializeCpus,
    ) -> Result<(), DyncodeError> {
        let size = bytes.len() as u64;
        if size == 0 {
            return Ok(());
        }
        let end = dest.checked_add(size).ok_or(DyncodeError::InvalidRange)?;
        let bundle = self.validator.bundle_size() as u64;

        let mut state = self.lock();
        let idx = find_closest_leq(&state.regions, dest).ok_or(DyncodeError::NoSuchRegion)?;
        let region = &state.regions[idx];
        if !region.is_present() || dest < region.start || end > region.end() {
            return Err(DyncodeError::NoSuchRegion);
        }

        // Widen to covering bundles.
        let wide_start = dest - dest % bundle;
        let wide_end = end.div_ceil(bundle) * bundle;
        let wide_end = wide_end.min(region.end());
        let wide_len = (wide_end - wide_start) as usize;
        let off = (wide_start - self.window_start) as usize;

        // Patches up to one bundle wide stay on the stack.
        let mut small = [0u8; 32];
        let mut large;
        let scratch: &mut [u8] = if wide_len <= small.len() {
            &mut small[..wide_len]
        } else {
            large = vec![0u8; wide_len];
            &mut large[..]
        };
        scratch.copy_from_slice(&state.text[off..off + wide_len]);
        let patch_off = (dest - wide_start) as usize;
        scratch[patch_off..patch_off + bytes.len()].copy_from_slice(bytes);

        let report = self.validator.validate_segment_pair(
            &state.text[off..off + wide_len],
            scratch,
            wide_start,
            self.cpu,
        );
        if !report.ok() {
            log::debug!(
                "dyncode modify at {dest:#x} rejected: {} violations",
                report.total()
            );
            return Err(DyncodeError::ValidationFailed);
        }

        apply_patch(&mut state.text[off..off + wide_len], scratch, serializer)?;
        host_mirror(host, host_base + wide_start, &state.text[off..off + wide_len])?;
        log::debug!("dyncode modify: {size:#x} bytes at {dest:#x}");
        Ok(())
    }

    /// Begins or continues deletion of the region exactly covering
    /// `[dest, dest + size)`.
    ///
    /// The first request halts the region's bundle heads and tags it with a
    /// fresh generation; the region is reclaimed once every live thread has
    /// observed a generation at least that new. Each call (including
    /// `size == 0`, a pure checkpoint) publishes the caller's observation of
    /// the current generation.
    ///
    /// # Errors
    ///
    /// [`DyncodeError::TryAgain`] while some thread still lags,
    /// [`DyncodeError::UnknownThread`] for an unregistered caller,
    /// [`DyncodeError::NoSuchRegion`] when the range matches no region,
    /// [`DyncodeError::GenerationExhausted`] if the counter would wrap.
    pub fn delete<H: HostMemory>(
        &self,
        host: &mut H,
        host_base: u64,
        threads: &ThreadTable,
        caller: ThreadHandle,
        dest: u64,
        size: u64,
    ) -> Result<(), DyncodeError> {
        let ctx = threads.get(caller).ok_or(DyncodeError::UnknownThread)?;
        let mut state = self.lock();

        if size == 0 {
            ctx.observe_generation(state.generation);
            return Ok(());
        }
        let bundle = self.validator.bundle_size() as u64;
        if dest % bundle != 0 || size % bundle != 0 {
            return Err(DyncodeError::InvalidRange);
        }

        let idx = find_closest_leq(&state.regions, dest).ok_or(DyncodeError::NoSuchRegion)?;
        if state.regions[idx].start != dest || state.regions[idx].size != size {
            return Err(DyncodeError::NoSuchRegion);
        }

        if state.regions[idx].is_present() {
            let next = state
                .generation
                .checked_add(1)
                .ok_or(DyncodeError::GenerationExhausted)?;
            state.generation = next;
            state.regions[idx].delete_generation = Some(next);

            // Halting every bundle head makes the region un-enterable while
            // threads drain out of it.
            let head = BUNDLE_HEAD_LEN;
            let off = (dest - self.window_start) as usize;
            let mut b = 0usize;
            while b < size as usize {
                state.text[off + b..off + b + head].fill(HALT_BYTE);
                b += bundle as usize;
            }
            host_mirror(host, host_base + dest, &state.text[off..off + size as usize])?;
            log::debug!("dyncode delete: tagged {dest:#x}+{size:#x} generation {next}");
        }

        ctx.observe_generation(state.generation);
        let min = threads.min_generation();
        self.reclaim(&mut state, host, host_base, min)?;
        if state.regions.iter().any(|r| r.start == dest) {
            Err(DyncodeError::TryAgain)
        } else {
            Ok(())
        }
    }

    /// Copies the current window contents at `dest` into `out`.
    ///
    /// # Errors
    ///
    /// [`DyncodeError::InvalidRange`] when the range leaves the window.
    pub fn read_code(&self, dest: u64, out: &mut [u8]) -> Result<(), DyncodeError> {
        let end = dest
            .checked_add(out.len() as u64)
            .ok_or(DyncodeError::InvalidRange)?;
        if dest < self.window_start || end > self.window_end {
            return Err(DyncodeError::InvalidRange);
        }
        let state = self.lock();
        let off = (dest - self.window_start) as usize;
        out.copy_from_slice(&state.text[off..off + out.len()]);
        Ok(())
    }

    /// Snapshot of the current regions, for inspection.
    #[must_use]
    pub fn regions(&self) -> Vec<DynamicRegion> {
        self.lock().regions.clone()
    }

    /// Reclaims every tagged region whose generation is now globally
    /// observed: halt-fills it and drops it from the region list.
    fn reclaim<H: HostMemory>(
        &self,
        state: &mut TextState,
        host: &mut H,
        host_base: u64,
        min_generation: u64,
    ) -> Result<(), DyncodeError> {
        let mut reclaimed = Vec::new();
        state.regions.retain(|r| match r.delete_generation {
            Some(g) if g <= min_generation => {
                reclaimed.push((r.start, r.size));
                false
            }
            _ => true,
        });
        for (start, size) in reclaimed {
            let off = (start - self.window_start) as usize;
            state.text[off..off + size as usize].fill(HALT_BYTE);
            host_mirror(host, host_base + start, &state.text[off..off + size as usize])?;
            log::debug!("dyncode reclaim: {start:#x}+{size:#x}");
        }
        Ok(())
    }

    fn make_pages_visible<H: HostMemory>(
        &self,
        state: &mut TextState,
        host: &mut H,
        host_base: u64,
        dest: u64,
        size: u64,
    ) -> Result<(), DyncodeError> {
        let first = (dest - self.window_start) / VISIBLE_PAGE_SIZE;
        let last = (dest + size - 1 - self.window_start) / VISIBLE_PAGE_SIZE;
        for page in first..=last {
            if state.page_visible[page as usize] {
                continue;
            }
            let page_addr = self.window_start + page * VISIBLE_PAGE_SIZE;
            let page_len = VISIBLE_PAGE_SIZE.min(self.window_end - page_addr);
            let off = (page_addr - self.window_start) as usize;
            // Fresh pages come up as pure halt before turning executable.
            state.text[off..off + page_len as usize].fill(HALT_BYTE);
            host_mirror(host, host_base + page_addr, &state.text[off..off + page_len as usize])?;
            host.protect(
                host_base + page_addr,
                page_len,
                ProtFlags::READ | ProtFlags::EXEC,
            )
            .map_err(|_| DyncodeError::NoMemory)?;
            state.page_visible[page as usize] = true;
            log::trace!("dyncode page visible at {page_addr:#x}");
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// First bytes of each bundle treated as its head during copy-in and delete:
/// one aligned halt word, regardless of bundle size.
const BUNDLE_HEAD_LEN: usize = 4;

/// Applies `src` over `dst` one instruction at a time with the
/// instruction-safe copy. Both sides already passed pair validation, so a
/// failure here is an application fault, not a validation outcome.
fn apply_patch(
    dst: &mut [u8],
    src: &[u8],
    serializer: &mut dyn SerializeCpus,
) -> Result<(), DyncodeError> {
    let mut pos = 0usize;
    while pos < src.len() {
        let inst = decode(src, pos).map_err(|_| DyncodeError::PatchFault)?;
        let next = inst.end();
        copy_instruction(&mut dst[pos..next], &src[pos..next], serializer)
            .map_err(|_| DyncodeError::PatchFault)?;
        pos = next;
    }
    Ok(())
}

fn host_mirror<H: HostMemory>(host: &mut H, addr: u64, bytes: &[u8]) -> Result<(), DyncodeError> {
    host.write(addr, bytes).map_err(|_| DyncodeError::NoMemory)
}

/// Index of the last region with `start <= addr`; linear scan below the
/// cutoff, binary search above it.
fn find_closest_leq(regions: &[DynamicRegion], addr: u64) -> Option<usize> {
    if regions.len() <= LINEAR_SCAN_CUTOFF {
        regions.iter().rposition(|r| r.start <= addr)
    } else {
        let idx = regions.partition_point(|r| r.start <= addr);
        idx.checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SimHost;

    const BUNDLE: usize = 32;
    const WINDOW_START: u64 = 0x10_0000;
    const WINDOW_END: u64 = 0x20_0000;

    struct NullSerializer;
    impl SerializeCpus for NullSerializer {
        fn serialize(&mut self) -> crate::Result<()> {
            Ok(())
        }
    }

    fn setup() -> (DynCodeManager, SimHost, u64) {
        let mut host = SimHost::new();
        let base = host.reserve(0, WINDOW_END + 0x10_0000).unwrap();
        let validator = Validator::new(BUNDLE).unwrap();
        let mgr =
            DynCodeManager::new(WINDOW_START, WINDOW_END, validator, CpuFeatures::baseline())
                .unwrap();
        (mgr, host, base)
    }

    fn bundles(parts: &[&[u8]]) -> Vec<u8> {
        let mut code: Vec<u8> = parts.concat();
        while code.len() % BUNDLE != 0 {
            code.push(0x90);
        }
        code
    }

    #[test]
    fn create_and_read_back() {
        let (mgr, mut host, base) = setup();
        let code = bundles(&[&[0x83, 0xC0, 0x01]]);

        mgr.create(&mut host, base, WINDOW_START, &code).unwrap();

        let mut out = vec![0u8; code.len()];
        mgr.read_code(WINDOW_START, &mut out).unwrap();
        assert_eq!(out, code);

        // The host mapping mirrors the final bytes and became executable.
        let mut hbuf = vec![0u8; code.len()];
        host.read(base + WINDOW_START, &mut hbuf).unwrap();
        assert_eq!(hbuf, code);
        assert_eq!(
            host.protection_at(base + WINDOW_START),
            Some(ProtFlags::READ | ProtFlags::EXEC)
        );
        assert_eq!(mgr.regions().len(), 1);
    }

    #[test]
    fn create_rejects_misalignment_and_overflow() {
        let (mgr, mut host, base) = setup();
        let code = bundles(&[&[0x90]]);

        assert_eq!(
            mgr.create(&mut host, base, WINDOW_START + 1, &code),
            Err(DyncodeError::InvalidRange)
        );
        assert_eq!(
            mgr.create(&mut host, base, WINDOW_START, &code[..7]),
            Err(DyncodeError::InvalidRange)
        );
        // The halt-sled reserve at the window top is off limits.
        assert_eq!(
            mgr.create(&mut host, base, WINDOW_END - BUNDLE as u64, &code),
            Err(DyncodeError::InvalidRange)
        );
        // Zero-size creation is trivially fine.
        assert_eq!(mgr.create(&mut host, base, WINDOW_START, &[]), Ok(()));
    }

    #[test]
    fn create_rejects_overlap_and_bad_code() {
        let (mgr, mut host, base) = setup();
        let code = bundles(&[&[0x90]]);

        mgr.create(&mut host, base, WINDOW_START, &code).unwrap();
        assert_eq!(
            mgr.create(&mut host, base, WINDOW_START, &code),
            Err(DyncodeError::RegionOccupied)
        );

        // int3 never validates.
        let bad = bundles(&[&[0xCC]]);
        assert_eq!(
            mgr.create(&mut host, base, WINDOW_START + 0x1000, &bad),
            Err(DyncodeError::ValidationFailed)
        );
        assert_eq!(mgr.regions().len(), 1);
    }

    #[test]
    fn modify_patches_an_immediate() {
        let (mgr, mut host, base) = setup();
        // mov eax, 1 at the start of the region.
        let code = bundles(&[&[0xB8, 0x01, 0x00, 0x00, 0x00]]);
        mgr.create(&mut host, base, WINDOW_START, &code).unwrap();

        // Change the immediate to 42.
        let patched = bundles(&[&[0xB8, 0x2A, 0x00, 0x00, 0x00]]);
        mgr.modify(&mut host, base, WINDOW_START, &patched, &mut NullSerializer)
            .unwrap();

        let mut out = vec![0u8; patched.len()];
        mgr.read_code(WINDOW_START, &mut out).unwrap();
        assert_eq!(out, patched);
    }

    #[test]
    fn modify_rejects_layout_changes() {
        let (mgr, mut host, base) = setup();
        let code = bundles(&[&[0xB8, 0x01, 0x00, 0x00, 0x00, 0x90]]);
        mgr.create(&mut host, base, WINDOW_START, &code).unwrap();

        let drifted = bundles(&[&[0x90, 0xB8, 0x01, 0x00, 0x00, 0x00]]);
        assert_eq!(
            mgr.modify(&mut host, base, WINDOW_START, &drifted, &mut NullSerializer),
            Err(DyncodeError::ValidationFailed)
        );
    }

    #[test]
    fn modify_outside_any_region_fails() {
        let (mgr, mut host, base) = setup();
        assert_eq!(
            mgr.modify(
                &mut host,
                base,
                WINDOW_START,
                &[0x90],
                &mut NullSerializer
            ),
            Err(DyncodeError::NoSuchRegion)
        );
    }

    #[test]
    fn delete_waits_for_lagging_threads() {
        let (mgr, mut host, base) = setup();
        let threads = ThreadTable::new();
        let (worker, worker_ctx) = threads.register(0);
        let (lagger, _lagger_ctx) = threads.register(0);

        let code = bundles(&[&[0x90]]);
        mgr.create(&mut host, base, WINDOW_START, &code).unwrap();

        // First request tags the region and halts its head, but the lagging
        // thread blocks reclamation.
        assert_eq!(
            mgr.delete(&mut host, base, &threads, worker, WINDOW_START, code.len() as u64),
            Err(DyncodeError::TryAgain)
        );
        let mut head = [0u8; 4];
        mgr.read_code(WINDOW_START, &mut head).unwrap();
        assert_eq!(head, [HALT_BYTE; 4]);
        assert_eq!(worker_ctx.generation(), 1);

        // Once the laggard checkpoints, the next delete call reclaims.
        mgr.delete(&mut host, base, &threads, lagger, 0, 0).unwrap();
        mgr.delete(&mut host, base, &threads, worker, WINDOW_START, code.len() as u64)
            .unwrap();
        assert!(mgr.regions().is_empty());

        // Reclaimed space is halt-filled and reusable.
        let mut out = vec![0u8; code.len()];
        mgr.read_code(WINDOW_START, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == HALT_BYTE));
        mgr.create(&mut host, base, WINDOW_START, &code).unwrap();
    }

    #[test]
    fn delete_requires_exact_range() {
        let (mgr, mut host, base) = setup();
        let threads = ThreadTable::new();
        let (t, _) = threads.register(0);

        let code = bundles(&[&[0x90], &[0x90; BUNDLE]]);
        mgr.create(&mut host, base, WINDOW_START, &code).unwrap();

        assert_eq!(
            mgr.delete(&mut host, base, &threads, t, WINDOW_START, BUNDLE as u64),
            Err(DyncodeError::NoSuchRegion)
        );
        assert_eq!(
            mgr.delete(&mut host, base, &threads, t, WINDOW_START + BUNDLE as u64, BUNDLE as u64),
            Err(DyncodeError::NoSuchRegion)
        );
    }

    #[test]
    fn delete_from_unknown_thread_fails() {
        let (mgr, mut host, base) = setup();
        let threads = ThreadTable::new();
        let (t, _) = threads.register(0);
        threads.remove(t);

        assert_eq!(
            mgr.delete(&mut host, base, &threads, t, 0, 0),
            Err(DyncodeError::UnknownThread)
        );
    }

    #[test]
    fn checkpoint_is_cheap_and_advances_the_caller() {
        let (mgr, mut host, base) = setup();
        let threads = ThreadTable::new();
        let (t, ctx) = threads.register(0);

        mgr.delete(&mut host, base, &threads, t, 0, 0).unwrap();
        assert_eq!(ctx.generation(), 0);
    }

    #[test]
    fn failed_patch_application_is_not_a_validation_error() {
        struct FailingSerializer;
        impl SerializeCpus for FailingSerializer {
            fn serialize(&mut self) -> crate::Result<()> {
                Err(crate::Error::LockError)
            }
        }

        // mov rax, imm64 with every immediate byte changing: the differing
        // span straddles both aligned store windows, forcing the serialized
        // slow path.
        #[repr(align(8))]
        struct Aligned([u8; 16]);
        let mut buf = Aligned([0x90; 16]);
        buf.0[..10].copy_from_slice(&[0x48, 0xB8, 1, 2, 3, 4, 5, 6, 7, 8]);
        let mut src = [0x90u8; 16];
        src[..10].copy_from_slice(&[0x48, 0xB8, 9, 10, 11, 12, 13, 14, 15, 16]);

        assert_eq!(
            apply_patch(&mut buf.0, &src, &mut FailingSerializer),
            Err(DyncodeError::PatchFault)
        );
    }

    #[test]
    fn closest_leq_linear_and_binary_agree() {
        let mk = |n: usize| -> Vec<DynamicRegion> {
            (0..n)
                .map(|i| DynamicRegion {
                    start: (i as u64) * 0x100,
                    size: 0x20,
                    delete_generation: None,
                })
                .collect()
        };
        for n in [0, 1, 15, 16, 17, 50] {
            let regions = mk(n);
            for addr in [0u64, 0x20, 0xFF, 0x100, 0x1234, 0xFFFF] {
                let linear = regions.iter().rposition(|r| r.start <= addr);
                assert_eq!(find_closest_leq(&regions, addr), linear, "n={n} addr={addr:#x}");
            }
        }
    }
}
