//! Physical file backend for memory-mapped I/O.
//!
//! This module provides the [`crate::file::physical::Physical`] backend that implements the
//! [`crate::file::Backend`] trait for accessing executable images from disk using
//! memory-mapped I/O. Images are mapped read-only: the loader copies bytes out of the
//! mapping into the sandbox address space, it never executes from the mapping itself.
//!
//! # Usage Examples
//!
//! ```rust,ignore
//! use sandcage::file::{Physical, Backend};
//! use std::path::Path;
//!
//! let physical = Physical::new(Path::new("payload.nexe"))?;
//! println!("Image size: {} bytes", physical.len());
//!
//! // First four bytes of a valid image: the ELF magic
//! let header = physical.data_slice(0, 4)?;
//! assert_eq!(header, b"\x7fELF");
//! # Ok::<(), sandcage::Error>(())
//! ```

use super::Backend;
use crate::Result;

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O for efficient access to images on disk.
///
/// [`crate::file::physical::Physical`] maps the file directly into the process's virtual
/// address space, so header checks and whole-image validation read straight from the page
/// cache without an upfront copy. All access operations include bounds checking.
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// The file is mapped read-only and shared.
    ///
    /// # Arguments
    /// * `path` - Path to the image on disk. Accepts `&Path`, `&str`, `String`, or `PathBuf`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }?;

        Ok(Physical { data: mmap })
    }

    /// Creates a new physical file backend from an opened [`std::fs::File`].
    ///
    /// Useful when the caller needs to open the file with specific flags before
    /// handing it over, e.g. an already-verified descriptor.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if memory mapping fails.
    #[allow(clippy::needless_pass_by_value)]
    pub fn from_std_file(file: fs::File) -> Result<Physical> {
        // The mmap keeps the descriptor alive internally; taking the file by value makes
        // the ownership transfer explicit at the call site.
        let mmap = unsafe { Mmap::map(&file) }?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(crate::Error::OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(crate::Error::OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn physical() {
        let path = temp_file("sandcage_physical_basic.bin", &[0x7F, b'E', b'L', b'F', 0x02]);
        let physical = Physical::new(&path).unwrap();

        assert_eq!(physical.len(), 5);
        assert_eq!(physical.data()[0], 0x7F);
        assert_eq!(physical.data_slice(1, 3).unwrap(), b"ELF");

        if physical
            .data_slice(u32::MAX as usize, u32::MAX as usize)
            .is_ok()
        {
            panic!("This should not work!")
        }

        if physical.data_slice(0, 4 * 1024 * 1024).is_ok() {
            panic!("This should not work!")
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/payload.nexe");
        assert!(result.is_err());
        match result.unwrap_err() {
            crate::Error::FileError(io_error) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected FileError"),
        }
    }

    #[test]
    fn test_physical_boundary_conditions() {
        let path = temp_file("sandcage_physical_bounds.bin", &[0xAA; 64]);
        let physical = Physical::new(&path).unwrap();

        let len = physical.len();

        let result = physical.data_slice(len - 1, 1);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 1);

        let result = physical.data_slice(0, len);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), len);

        let result = physical.data_slice(len, 0);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().len(), 0);

        assert!(physical.data_slice(len, 1).is_err());
        assert!(physical.data_slice(len - 1, 2).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
