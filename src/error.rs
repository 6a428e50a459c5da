use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur while decoding and validating
/// untrusted machine code, managing the sandbox address space, and loading executable images.
/// Each variant provides specific context about the failure mode to enable appropriate error
/// handling.
///
/// # Error Categories
///
/// ## Input Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid input structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond input boundaries
/// - [`Error::NotSupported`] - Unsupported format or feature
/// - [`Error::Empty`] - Empty input provided
///
/// ## I/O and External Errors
/// - [`Error::FileError`] - Filesystem I/O errors
/// - [`Error::GoblinErr`] - ELF parsing errors from the goblin crate
///
/// ## Sandbox Errors
/// - [`Error::Load`] - Image rejected during loading (see [`LoadError`])
/// - [`Error::Dyncode`] - Dynamic code operation rejected (see [`DyncodeError`])
/// - [`Error::Layout`] - Address-space layout constraint violated
///
/// # Examples
///
/// ```rust,no_run
/// use sandcage::{Error, loader::ElfImage};
/// use std::path::Path;
///
/// match ElfImage::from_file(Path::new("payload.nexe")) {
///     Ok(image) => {
///         println!("entry point {:#x}", image.entry());
///     }
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(Error::Load(status)) => {
///         eprintln!("Image rejected: {}", status);
///     }
///     Err(e) => {
///         eprintln!("Other error: {}", e);
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The input is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was
    /// detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading input data.
    ///
    /// This error occurs when trying to read data beyond the end of the file
    /// or buffer. It's a safety check to prevent buffer overruns during parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This file type is not supported.
    ///
    /// Indicates that the input file is not a supported executable image,
    /// or uses features that are not implemented in this library.
    #[error("This file type is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur during file operations
    /// such as reading from disk, permission issues, or filesystem errors.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Error from the goblin crate during ELF parsing.
    ///
    /// The goblin crate is used for low-level ELF format parsing.
    /// This error wraps any failures from that parsing layer.
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// An executable image was rejected during loading.
    ///
    /// The associated [`LoadError`] names the exact acceptance check the
    /// image failed.
    #[error("{0}")]
    Load(#[from] LoadError),

    /// A dynamic code operation was rejected.
    ///
    /// The associated [`DyncodeError`] maps onto the POSIX-style status
    /// returned to the sandboxed caller.
    #[error("{0}")]
    Dyncode(#[from] DyncodeError),

    /// An address-space layout constraint was violated.
    ///
    /// Covers reservation and protection failures while building or
    /// mutating the sandbox address space.
    #[error("{0}")]
    Layout(String),

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically
    /// when trying to acquire a mutex whose holder panicked.
    #[error("Failed to lock target")]
    LockError,
}

/// Reasons an executable image can be rejected by the loader.
///
/// The acceptance pipeline runs these checks in order: ELF header sanity,
/// program-header policy, address-space layout, segment copy, and finally
/// whole-image validation. The first failing check aborts the load; no
/// sandboxed thread is ever created from a partially loaded image.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The file does not begin with the ELF magic bytes.
    #[error("bad ELF magic")]
    BadElfMagic,
    /// The image is not a 64-bit ELF object.
    #[error("image is not 64-bit (ELFCLASS64)")]
    Not64Bit,
    /// The image is not little-endian.
    #[error("image is not little-endian")]
    NotLittleEndian,
    /// The ELF version field is not EV_CURRENT.
    #[error("bad ELF version")]
    BadElfVersion,
    /// The image is not a static executable (ET_EXEC).
    #[error("image is not a static executable")]
    NotExec,
    /// The image targets a machine other than x86-64.
    #[error("image targets the wrong machine")]
    BadMachine,
    /// The image carries more program headers than the loader accepts.
    #[error("too many program headers")]
    TooManyProgramHeaders,
    /// The recorded program-header entry size is too small.
    #[error("program header entry size too small")]
    ProgramHeaderSizeTooSmall,
    /// A program header uses a (type, flags) combination outside the allow-list.
    #[error("unacceptable segment: type {p_type:#x}, flags {p_flags:#x}")]
    BadSegment {
        /// The offending p_type value.
        p_type: u32,
        /// The offending p_flags value.
        p_flags: u32,
    },
    /// Two program headers claimed the same role.
    #[error("duplicate segment for the same role")]
    DuplicateSegment,
    /// The text segment does not start at the mandated address.
    #[error("text segment not at the mandated start address")]
    TextSegmentBadLocation,
    /// A segment starts below the syscall trampoline region.
    #[error("segment overlaps the trampoline region")]
    SegmentBelowTrampoline,
    /// A segment's vaddr + memsz wraps or leaves the sandbox address budget.
    #[error("segment outside the sandbox address space")]
    SegmentOutsideAddressSpace,
    /// A segment's file size exceeds its memory size.
    #[error("segment file size exceeds memory size")]
    SegmentFileSizeTooLarge,
    /// A segment's file extent lies outside the image file.
    #[error("segment data outside the image file")]
    SegmentBadFileRange,
    /// A required segment (text) was not present.
    #[error("required segment missing")]
    RequiredSegmentMissing,
    /// There is no room for the halt sled after the text segment.
    #[error("no room for the halt sled after text")]
    NoRoomForHaltSled,
    /// The entry point is outside static text or not bundle-aligned.
    #[error("bad entry point")]
    BadEntryPoint,
    /// The static text failed validation.
    #[error("static text failed validation ({violations} violations)")]
    ValidationFailed {
        /// Number of violations the validator recorded.
        violations: usize,
    },
    /// The address space reservation or protection failed.
    #[error("address space setup failed: {0}")]
    AddressSpaceSetup(String),
}

/// Status of a dynamic code operation, as surfaced to the sandboxed caller.
///
/// Every variant maps onto a negative POSIX errno via [`DyncodeError::errno`],
/// matching the syscall-style contract of the dynamic loading interface.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DyncodeError {
    /// Destination or size is not bundle-aligned, or the range is not
    /// inside the dynamic text window.
    #[error("invalid dynamic code range")]
    InvalidRange,
    /// The destination overlaps an existing dynamic region.
    #[error("destination overlaps an existing region")]
    RegionOccupied,
    /// The target of a modify/delete is not (exactly) a loaded region.
    #[error("no such dynamic region")]
    NoSuchRegion,
    /// The new code failed validation.
    #[error("dynamic code failed validation")]
    ValidationFailed,
    /// Deletion is pending until all threads pass the delete generation.
    #[error("deletion pending thread quiescence")]
    TryAgain,
    /// The calling thread handle is unknown.
    #[error("unknown calling thread")]
    UnknownThread,
    /// The global delete generation counter would overflow.
    #[error("delete generation counter exhausted")]
    GenerationExhausted,
    /// Out of dynamic text space or bookkeeping memory.
    #[error("out of dynamic code resources")]
    NoMemory,
    /// Applying an already-validated patch failed partway.
    #[error("patch application fault")]
    PatchFault,
}

impl DyncodeError {
    /// The negative errno value returned to the sandboxed caller.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            DyncodeError::InvalidRange
            | DyncodeError::NoSuchRegion
            | DyncodeError::ValidationFailed
            | DyncodeError::UnknownThread => -22, // EINVAL
            DyncodeError::RegionOccupied => -16,  // EBUSY
            DyncodeError::TryAgain => -11,        // EAGAIN
            DyncodeError::GenerationExhausted => -27, // EFBIG
            DyncodeError::NoMemory => -12,        // ENOMEM
            DyncodeError::PatchFault => -14,      // EFAULT
        }
    }
}
