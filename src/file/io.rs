//! Low-level byte order utilities for reading binary images.
//!
//! This module provides bounds-checked access to primitive values in byte buffers.
//! Executable images and machine code on x86-64 are little-endian throughout, so only
//! little-endian reads exist here.
//!
//! # Key Components
//!
//! - [`crate::file::io::ScalarIO`] - Trait implemented by the primitive types that can be
//!   read from a buffer
//! - [`crate::file::io::read_le`] / [`crate::file::io::read_le_at`] - Bounds-checked reads
//!
//! All functions return [`crate::Error::OutOfBounds`] instead of panicking when the buffer
//! is too short.

use crate::{Error::OutOfBounds, Result};

/// Trait for implementing type-specific safe binary data reading operations.
///
/// This trait provides a unified interface for reading primitive types from byte slices
/// in a safe manner. It is implemented for the integer types that occur in ELF headers
/// and instruction encodings.
pub trait ScalarIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Read T from a byte buffer in little-endian
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_scalar_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl ScalarIO for $ty {
                type Bytes = [u8; $len];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_scalar_io! {
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
}

/// Safely reads a value of type `T` in little-endian byte order from a data buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le<T: ScalarIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Safely reads a value of type `T` in little-endian byte order at a specific offset.
///
/// Advances `offset` by the number of bytes consumed.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: ScalarIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    if (type_len + *offset) > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..*offset + type_len].try_into() else {
        return Err(OutOfBounds);
    };

    *offset += type_len;

    Ok(T::from_le_bytes(read))
}
