//! # sandcage Prelude
//!
//! This module provides a convenient prelude for the most commonly used types
//! and traits from the sandcage library. Import this module to get quick
//! access to the essential types for sandbox construction.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all sandcage operations
pub use crate::Error;

/// The result type used throughout sandcage
pub use crate::Result;

/// Loader rejection reasons
pub use crate::LoadError;

/// Dynamic code operation statuses
pub use crate::DyncodeError;

// ================================================================================================
// Validation
// ================================================================================================

/// The segment validator and its configuration surface
pub use crate::validator::{CpuFeatures, ValidationReport, Validator, Violation};

/// Single-instruction decoding
pub use crate::decoder::{decode, DecodedInstruction, InstClass};

// ================================================================================================
// Memory and Loading
// ================================================================================================

/// The guarded sandbox address space
pub use crate::memory::{AddressSpace, AddressSpaceConfig, ProtFlags, VmMap};

/// Host virtual-memory primitives and the in-process test double
pub use crate::memory::{HostMemory, SimHost};

/// Image parsing and load orchestration
pub use crate::loader::{ElfImage, LoadedImage, Loader};

// ================================================================================================
// Runtime
// ================================================================================================

/// Dynamic code management
pub use crate::dyncode::DynCodeManager;

/// Thread bookkeeping for the quiescence protocol
pub use crate::runtime::{ThreadContext, ThreadHandle, ThreadTable};
