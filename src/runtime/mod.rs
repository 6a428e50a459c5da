//! Trusted-runtime services: thread bookkeeping and the mapping/launch gate.

mod hole;
mod threads;

pub use hole::{LaunchGuard, MappingGuard, VmHoleGate};
pub use threads::{ThreadContext, ThreadHandle, ThreadTable};
