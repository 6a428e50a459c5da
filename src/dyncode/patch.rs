//! Instruction-safe live patching of executable bytes.
//!
//! Other threads may be executing the code while it changes, so a patch must
//! never expose a torn instruction. Three strategies, chosen by the span of
//! differing bytes: a single byte store; one aligned 4- or 8-byte atomic
//! store when the differing span fits such a window; otherwise the slow path
//! of trapping the instruction's first byte, serializing all CPUs so no stale
//! decode survives, rewriting the body, and restoring the first byte.
//!
//! This module is the crate's one deliberately `unsafe` boundary: the atomic
//! stores alias the byte buffer through atomic types.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::validator::HALT_BYTE;

/// Serializes instruction fetch across every CPU that may run the patched
/// code. Production implementations flip a page protection or send IPIs;
/// tests count invocations.
pub trait SerializeCpus {
    /// Forces every CPU through a serializing event.
    ///
    /// # Errors
    ///
    /// Propagates host failures; a failed serialization aborts the patch.
    fn serialize(&mut self) -> crate::Result<()>;
}

/// Replaces `dst` with `src` without ever exposing a torn instruction.
///
/// Both slices cover the same single instruction and must be equal length.
///
/// # Errors
///
/// Propagates [`SerializeCpus::serialize`] failures from the slow path.
pub fn copy_instruction(
    dst: &mut [u8],
    src: &[u8],
    serializer: &mut dyn SerializeCpus,
) -> crate::Result<()> {
    debug_assert_eq!(dst.len(), src.len());

    // Trim the common prefix and suffix; only the differing span needs care.
    let Some(first) = (0..dst.len()).find(|&i| dst[i] != src[i]) else {
        return Ok(());
    };
    let last = (0..dst.len()).rfind(|&i| dst[i] != src[i]).unwrap_or(first);
    let span = last - first + 1;

    if span == 1 {
        // A single byte store is inherently atomic.
        unsafe {
            atomic_u8(dst, first).store(src[first], Ordering::SeqCst);
        }
        return Ok(());
    }

    if let Some(idx) = aligned_window(dst, first, last, 4) {
        let mut word = [0u8; 4];
        word.copy_from_slice(&dst[idx..idx + 4]);
        word[first - idx..=last - idx].copy_from_slice(&src[first..=last]);
        unsafe {
            atomic_u32(dst, idx).store(u32::from_le_bytes(word), Ordering::SeqCst);
        }
        return Ok(());
    }

    if let Some(idx) = aligned_window(dst, first, last, 8) {
        let mut word = [0u8; 8];
        word.copy_from_slice(&dst[idx..idx + 8]);
        word[first - idx..=last - idx].copy_from_slice(&src[first..=last]);
        unsafe {
            atomic_u64(dst, idx).store(u64::from_le_bytes(word), Ordering::SeqCst);
        }
        return Ok(());
    }

    // Slow path: park the instruction behind a trap byte while the body
    // changes. Any thread racing into it halts instead of decoding a blend.
    let original_head = src[0];
    unsafe {
        atomic_u8(dst, 0).store(HALT_BYTE, Ordering::SeqCst);
    }
    serializer.serialize()?;
    dst[1..].copy_from_slice(&src[1..]);
    serializer.serialize()?;
    unsafe {
        atomic_u8(dst, 0).store(original_head, Ordering::SeqCst);
    }
    Ok(())
}

/// The start index of an `align`-byte window that is aligned in memory,
/// contains `[first, last]`, and lies wholly inside `buf`.
fn aligned_window(buf: &[u8], first: usize, last: usize, align: usize) -> Option<usize> {
    let addr = buf.as_ptr() as usize;
    let window = (addr + first) & !(align - 1);
    let idx = window.checked_sub(addr)?;
    if last < idx + align && idx + align <= buf.len() {
        Some(idx)
    } else {
        None
    }
}

// The casts are in-bounds and, for the wide forms, alignment-checked by
// aligned_window against the actual memory address.
unsafe fn atomic_u8(buf: &mut [u8], idx: usize) -> &AtomicU8 {
    unsafe { AtomicU8::from_ptr(buf.as_mut_ptr().add(idx)) }
}

unsafe fn atomic_u32(buf: &mut [u8], idx: usize) -> &AtomicU32 {
    unsafe { AtomicU32::from_ptr(buf.as_mut_ptr().add(idx).cast()) }
}

unsafe fn atomic_u64(buf: &mut [u8], idx: usize) -> &AtomicU64 {
    unsafe { AtomicU64::from_ptr(buf.as_mut_ptr().add(idx).cast()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingSerializer {
        calls: usize,
    }

    impl SerializeCpus for CountingSerializer {
        fn serialize(&mut self) -> crate::Result<()> {
            self.calls += 1;
            Ok(())
        }
    }

    #[test]
    fn identical_instruction_is_a_no_op() {
        let mut ser = CountingSerializer::default();
        let mut dst = [0x83, 0xC0, 0x01];
        copy_instruction(&mut dst, &[0x83, 0xC0, 0x01], &mut ser).unwrap();
        assert_eq!(dst, [0x83, 0xC0, 0x01]);
        assert_eq!(ser.calls, 0);
    }

    #[test]
    fn single_byte_change_needs_no_serialization() {
        let mut ser = CountingSerializer::default();
        let mut dst = [0x83, 0xC0, 0x01];
        copy_instruction(&mut dst, &[0x83, 0xC0, 0x2A], &mut ser).unwrap();
        assert_eq!(dst, [0x83, 0xC0, 0x2A]);
        assert_eq!(ser.calls, 0);
    }

    #[test]
    fn wide_immediate_change() {
        let mut ser = CountingSerializer::default();
        // mov eax, imm32: all four immediate bytes change.
        #[repr(align(8))]
        struct Aligned([u8; 8]);
        let mut buf = Aligned([0xB8, 0x01, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90]);
        let src = [0xB8, 0x78, 0x56, 0x34, 0x12, 0x90, 0x90, 0x90];
        copy_instruction(&mut buf.0, &src, &mut ser).unwrap();
        assert_eq!(buf.0, src);
        // The aligned 8-byte (or 4-byte) window avoided the slow path.
        assert_eq!(ser.calls, 0);
    }

    #[test]
    fn unaligned_wide_change_takes_the_slow_path() {
        let mut ser = CountingSerializer::default();
        #[repr(align(8))]
        struct Aligned([u8; 16]);
        // 10-byte mov rax, imm64 starting at an offset that leaves the
        // changed span straddling every aligned window.
        let mut buf = Aligned([0u8; 16]);
        buf.0[..10].copy_from_slice(&[0x48, 0xB8, 1, 2, 3, 4, 5, 6, 7, 8]);
        let mut src = [0u8; 16];
        src[..10].copy_from_slice(&[0x48, 0xB8, 9, 10, 11, 12, 13, 14, 15, 16]);

        copy_instruction(&mut buf.0[..10], &src[..10], &mut ser).unwrap();
        assert_eq!(buf.0[..10], src[..10]);
        assert_eq!(ser.calls, 2);
    }

    #[test]
    fn serialization_failure_aborts() {
        struct FailingSerializer;
        impl SerializeCpus for FailingSerializer {
            fn serialize(&mut self) -> crate::Result<()> {
                Err(crate::Error::LockError)
            }
        }

        #[repr(align(8))]
        struct Aligned([u8; 16]);
        let mut buf = Aligned([0u8; 16]);
        buf.0[..10].copy_from_slice(&[0x48, 0xB8, 1, 2, 3, 4, 5, 6, 7, 8]);
        let mut src = [0u8; 16];
        src[..10].copy_from_slice(&[0x48, 0xB8, 9, 10, 11, 12, 13, 14, 15, 16]);

        assert!(copy_instruction(&mut buf.0[..10], &src[..10], &mut FailingSerializer).is_err());
    }
}
