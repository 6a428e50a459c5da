//! Executable image access and binary parsing primitives.
//!
//! This module abstracts over the sources an untrusted executable image can come from
//! (a file on disk, a buffer already in memory) and provides the bounds-checked reading
//! primitives the loader's header checks are built on.
//!
//! # Key Components
//!
//! ## Core Types
//! - [`crate::file::Backend`] - Trait for image data sources (disk files, memory buffers)
//! - [`crate::file::parser::Parser`] - Cursor-based bounds-checked reader
//!
//! ## Backend Implementations
//! - [`crate::file::Physical`] - Memory-mapped file backend for disk access
//! - [`crate::file::Memory`] - In-memory buffer backend
//!
//! Nothing here interprets the image; ELF policy lives in [`crate::loader`] and machine
//! code interpretation in [`crate::decoder`]. All components are thread-safe and can be
//! shared across threads.

pub mod io;
pub mod parser;

mod memory;
mod physical;

pub use memory::Memory;
pub use physical::Physical;

use crate::Result;

/// Backend trait for image data sources.
///
/// This trait abstracts over the source of executable image bytes, allowing for both
/// in-memory and on-disk representations. All implementations must be thread-safe.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Arguments
    ///
    /// * `offset` - The starting offset within the data.
    /// * `len` - The length of the slice in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;

    /// Returns `true` if the backing data is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
