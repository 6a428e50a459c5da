//! Mutual exclusion between address-space mutation and thread launch.
//!
//! Opening a hole in the sandbox mapping (munmap before a re-map) briefly
//! leaves addresses unguarded; a thread entering the sandbox during that
//! window could fault unpredictably or worse. The gate makes the two phases
//! mutually exclusive while allowing concurrency within each phase.

use std::sync::{Condvar, Mutex};

use crate::Error;

#[derive(Debug, Default)]
struct GateState {
    holes: usize,
    launches: usize,
}

/// The mapping-change / thread-launch exclusion gate.
#[derive(Debug, Default)]
pub struct VmHoleGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

/// Held while a mapping mutation is in progress.
pub struct MappingGuard<'a> {
    gate: &'a VmHoleGate,
}

/// Held while a thread launch is in progress.
pub struct LaunchGuard<'a> {
    gate: &'a VmHoleGate,
}

impl VmHoleGate {
    /// Creates an open gate.
    #[must_use]
    pub fn new() -> VmHoleGate {
        VmHoleGate::default()
    }

    /// Blocks until no thread launch is in progress, then marks a mapping
    /// mutation as active until the guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the gate mutex is poisoned.
    pub fn begin_mapping_change(&self) -> crate::Result<MappingGuard<'_>> {
        let mut state = self.state.lock().map_err(|_| Error::LockError)?;
        while state.launches > 0 {
            state = self.cond.wait(state).map_err(|_| Error::LockError)?;
        }
        state.holes += 1;
        Ok(MappingGuard { gate: self })
    }

    /// Blocks until no mapping mutation is in progress, then marks a thread
    /// launch as active until the guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if the gate mutex is poisoned.
    pub fn begin_thread_launch(&self) -> crate::Result<LaunchGuard<'_>> {
        let mut state = self.state.lock().map_err(|_| Error::LockError)?;
        while state.holes > 0 {
            state = self.cond.wait(state).map_err(|_| Error::LockError)?;
        }
        state.launches += 1;
        Ok(LaunchGuard { gate: self })
    }

    fn release(&self, mapping: bool) {
        if let Ok(mut state) = self.state.lock() {
            if mapping {
                state.holes -= 1;
            } else {
                state.launches -= 1;
            }
            self.cond.notify_all();
        }
    }
}

impl Drop for MappingGuard<'_> {
    fn drop(&mut self) {
        self.gate.release(true);
    }
}

impl Drop for LaunchGuard<'_> {
    fn drop(&mut self) {
        self.gate.release(false);
    }
}
