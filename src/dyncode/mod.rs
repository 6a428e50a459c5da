//! Runtime management of dynamically loaded code.
//!
//! The dynamic-text window is the region between the static image and its
//! read-only data where validated code can be installed, patched, and removed
//! while sandboxed threads run. [`DynCodeManager`] owns the window; deletion
//! is gated on a generation protocol so a region is only unmapped after every
//! live thread has provably left it.

mod manager;
mod patch;

pub use manager::{DynCodeManager, DynamicRegion, HALT_SLED_SIZE};
pub use patch::{copy_instruction, SerializeCpus};
