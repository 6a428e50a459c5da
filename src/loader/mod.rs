//! Executable image acceptance and placement.
//!
//! The loader is the only path by which untrusted bytes become executable:
//! it checks the image headers against a strict policy ([`ElfImage`]),
//! places the segments into a guarded [`crate::memory::AddressSpace`],
//! validates the whole static text, and hands the gap above text to a
//! [`crate::dyncode::DynCodeManager`] as the dynamic-text window.

mod elf;
mod loader;

pub use elf::{ElfImage, StaticLayout, ADDR_BITS, MAX_PROGRAM_HEADERS, TRAMPOLINE_END};
pub use loader::{LoadedImage, Loader, ALLOC_GRANULARITY, DEFAULT_STACK_SIZE};
