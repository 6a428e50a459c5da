use super::Backend;
use crate::{Error::OutOfBounds, Result};

/// Executable image held in an owned memory buffer.
///
/// The in-memory counterpart of [`crate::file::Physical`], used for images
/// that arrive over a descriptor or are assembled in tests.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Wraps `data` as an image backend, taking ownership of the buffer.
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset.checked_add(len).ok_or(OutOfBounds)?;
        if end > self.data.len() {
            return Err(OutOfBounds);
        }
        Ok(&self.data[offset..end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
