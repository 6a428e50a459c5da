//! Sandbox memory management: the guarded address-space reservation, the
//! page-region map, and the host virtual-memory abstraction.

use bitflags::bitflags;

mod addrspace;
mod host;
mod vmmap;

pub use addrspace::{
    AddressSpace, AddressSpaceConfig, MemoryLayout, DEFAULT_GUARD_SIZE, SANDBOX_SIZE,
    TRAMPOLINE_START,
};
pub use host::{HostMemory, SimHost};
pub use vmmap::{Backing, VmEntry, VmMap, MAP_GRANULARITY_PAGES, PAGE_SHIFT};

bitflags! {
    /// Page protection bits. An empty set is PROT_NONE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtFlags: u32 {
        /// Pages may be read.
        const READ = 1 << 0;
        /// Pages may be written.
        const WRITE = 1 << 1;
        /// Pages may be executed.
        const EXEC = 1 << 2;
    }
}
