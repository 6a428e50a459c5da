// Copyright 2026 The sandcage Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'dyncode/patch.rs' takes atomic views over the code alias for the
//   instruction-replacement discipline
// - 'file/physical.rs' uses mmap to map a file into memory

//! # sandcage
//!
//! A software-fault-isolation sandboxing core for x86-64, built in pure Rust.
//! `sandcage` accepts an untrusted static executable, proves that its machine
//! code cannot transfer control outside a 4 GiB address window, lays the
//! image out behind large guard bands, and manages validated insertion,
//! patching, and deletion of code at runtime while sandboxed threads keep
//! executing.
//!
//! ## Features
//!
//! - **Instruction decoding** - A table-driven x86-64 decoder covering the
//!   legacy/REX prefix space, the one-, two-, and three-byte opcode maps, and
//!   the ModRM group opcodes
//! - **Segment validation** - Single-pass bundle-discipline checking: aligned
//!   instruction bundles, masked indirect transfers, base-register integrity,
//!   CPU-feature gating, and a stub-out mode that rewrites rejected
//!   instructions to traps
//! - **Guarded address space** - A 4 GiB sandbox window between tens-of-GiB
//!   guard bands, with page-level protection bookkeeping
//! - **Dynamic code** - Create/modify/delete of validated code regions under
//!   a generation-counter quiescence protocol, safe against concurrently
//!   executing threads
//! - **ELF loading** - A strict program-header policy, whole-image
//!   validation, and halt-sled placement before anything becomes executable
//!
//! ## Quick Start
//!
//! Add `sandcage` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! sandcage = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! ```rust
//! use sandcage::prelude::*;
//!
//! let validator = Validator::new(32)?;
//! let code = [0x90u8; 32]; // one bundle of NOPs
//! let report = validator.validate_segment(&code, 0, CpuFeatures::baseline());
//! assert!(report.ok());
//! # Ok::<(), sandcage::Error>(())
//! ```
//!
//! ### Loading an executable image
//!
//! ```rust,no_run
//! use sandcage::loader::{ElfImage, Loader};
//! use sandcage::memory::{AddressSpace, AddressSpaceConfig, SimHost};
//! use sandcage::validator::{CpuFeatures, Validator};
//! use std::path::Path;
//!
//! let image = ElfImage::from_file(Path::new("payload.nexe"))?;
//! let mut host = SimHost::new();
//! let mut space = AddressSpace::allocate(&mut host, AddressSpaceConfig::default())?;
//!
//! let loader = Loader::new(Validator::new(32)?, CpuFeatures::baseline());
//! let loaded = loader.load(&image, &mut space, &mut host)?;
//! println!("entry point {:#x}", loaded.entry);
//! # Ok::<(), sandcage::Error>(())
//! ```
//!
//! ## Architecture
//!
//! The crate is layered bottom-up: [`decoder`] feeds [`validator`];
//! [`memory`] provides the guarded address space of which [`dyncode`]
//! manages a window; [`loader`] orchestrates all of them, and [`runtime`]
//! carries the thread bookkeeping the quiescence protocol reads. Nothing
//! here jumps into sandboxed code: the loader produces the entry state and
//! leaves the transfer to the embedder.

#[macro_use]
pub(crate) mod error;

/// Executable image access and binary parsing primitives.
///
/// Abstracts over where image bytes come from (a memory-mapped file, an
/// in-memory buffer) and provides the bounds-checked readers built on top.
///
/// # Key Types
///
/// - [`file::Backend`] - Trait for image byte sources
/// - [`file::Physical`] - Memory-mapped file backend
/// - [`file::Memory`] - In-memory buffer backend
/// - [`file::parser::Parser`] - Cursor-based bounds-checked reader
pub mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// This module provides a curated selection of the most frequently used types
/// from across the sandcage library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust
/// use sandcage::prelude::*;
///
/// let validator = Validator::new(16)?;
/// assert_eq!(validator.bundle_size(), 16);
/// # Ok::<(), sandcage::Error>(())
/// ```
pub mod prelude;

/// x86-64 instruction decoding.
///
/// A single-instruction primitive: given a byte slice and an offset it
/// produces one [`decoder::DecodedInstruction`] or a
/// [`decoder::DecodeError`]. The decoder reports structure, not semantics:
/// lengths, field offsets, instruction class, and destination category.
///
/// # Example
///
/// ```rust
/// use sandcage::decoder::{decode, InstClass};
///
/// let code = [0x41, 0xFF, 0xE2]; // jmp r10
/// let inst = decode(&code, 0)?;
/// assert_eq!(inst.class, InstClass::IndirectJmp);
/// assert_eq!(inst.length, 3);
/// # Ok::<(), sandcage::decoder::DecodeError>(())
/// ```
pub mod decoder;

/// Machine-code validation under the bundle discipline.
///
/// The [`validator::Validator`] proves, one forward pass per segment, that a
/// byte sequence can only ever transfer control to bundle starts inside the
/// sandbox: no instruction straddles a bundle boundary, every indirect jump
/// or call is immediately preceded by the masking instruction in the same
/// bundle, the base register is never written, and direct branches land on
/// instruction boundaries.
///
/// # Entry Points
///
/// - [`validator::Validator::validate_segment`] - strict mode
/// - [`validator::Validator::validate_segment_stubout`] - rewrite rejected
///   instructions to traps in place
/// - [`validator::Validator::validate_segment_pair`] - code-replacement
///   pairing for hot patching
pub mod validator;

/// Sandbox memory management.
///
/// The guarded [`memory::AddressSpace`] reservation, the [`memory::VmMap`]
/// page-region bookkeeping, and the [`memory::HostMemory`] abstraction over
/// host virtual-memory primitives (with [`memory::SimHost`] as the
/// in-process test double).
pub mod memory;

/// Dynamic code insertion, patching, and deletion.
///
/// The [`dyncode::DynCodeManager`] owns the dynamic-text window above static
/// text and keeps three promises while other threads execute: a thread never
/// observes a partially copied region, a patched instruction is always seen
/// whole-old or whole-new, and deleted code is reclaimed only after every
/// thread has passed the deletion's generation.
pub mod dyncode;

/// Executable image acceptance and placement.
///
/// [`loader::ElfImage`] parses and policy-checks the headers;
/// [`loader::Loader`] copies the segments, appends the halt sled, validates
/// the whole static text, applies final protections, and opens the
/// dynamic-text window.
pub mod loader;

/// Sandboxed-thread bookkeeping.
///
/// The [`runtime::ThreadTable`] of per-thread contexts with their published
/// generation counters and pending-kill flags, and the
/// [`runtime::VmHoleGate`] keeping mapping mutations and thread launches
/// from overlapping.
pub mod runtime;

/// `sandcage` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is
/// always [`Error`]. This is used consistently throughout the crate for all
/// fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `sandcage` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust,no_run
/// use sandcage::{loader::ElfImage, Error};
///
/// match ElfImage::from_file(std::path::Path::new("payload.nexe")) {
///     Ok(image) => println!("entry {:#x}", image.entry()),
///     Err(Error::Load(status)) => println!("rejected: {}", status),
///     Err(e) => println!("error: {}", e),
/// }
/// ```
pub use error::Error;

/// Reasons an executable image can be rejected by the loader.
pub use error::LoadError;

/// Status of a dynamic code operation, as surfaced to the sandboxed caller.
pub use error::DyncodeError;

/// Provides access to low-level file and memory parsing utilities.
///
/// The [`Parser`] type is used for bounds-checked header and code reading.
pub use file::parser::Parser;
