//! Thread bookkeeping for the trusted runtime.
//!
//! Each sandboxed thread owns a [`ThreadContext`] published through the
//! [`ThreadTable`]. The context carries the thread's dynamic-code generation
//! counter (advanced whenever the thread passes a supervisor transition) and
//! the pending-kill flag, which is only ever acted on at those transitions.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Stable identifier of a sandboxed thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(u64);

/// Per-thread state shared between the thread and the trusted runtime.
#[derive(Debug, Default)]
pub struct ThreadContext {
    generation: AtomicU64,
    pending_kill: AtomicBool,
}

impl ThreadContext {
    /// The dynamic-code generation this thread has most recently observed.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Publishes that the thread has observed generation `target`. The
    /// counter never moves backwards.
    pub fn observe_generation(&self, target: u64) {
        self.generation.fetch_max(target, Ordering::AcqRel);
    }

    /// Asks the thread to exit at its next supervisor transition.
    pub fn request_kill(&self) {
        self.pending_kill.store(true, Ordering::Release);
    }

    /// Whether a kill has been requested.
    #[must_use]
    pub fn kill_requested(&self) -> bool {
        self.pending_kill.load(Ordering::Acquire)
    }

    /// Consumes a pending kill request, returning whether one was set. Called
    /// by the thread itself at a supervisor-transition checkpoint.
    pub fn take_kill(&self) -> bool {
        self.pending_kill.swap(false, Ordering::AcqRel)
    }
}

/// The table of live sandboxed threads.
#[derive(Debug, Default)]
pub struct ThreadTable {
    threads: DashMap<ThreadHandle, Arc<ThreadContext>>,
    next: AtomicU64,
}

impl ThreadTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> ThreadTable {
        ThreadTable::default()
    }

    /// Registers a new thread, starting at the given generation (a thread
    /// created mid-flight must not hold back reclamation of deletions that
    /// predate it).
    pub fn register(&self, initial_generation: u64) -> (ThreadHandle, Arc<ThreadContext>) {
        let handle = ThreadHandle(self.next.fetch_add(1, Ordering::Relaxed));
        let ctx = Arc::new(ThreadContext::default());
        ctx.observe_generation(initial_generation);
        self.threads.insert(handle, Arc::clone(&ctx));
        log::debug!("thread {handle:?} registered at generation {initial_generation}");
        (handle, ctx)
    }

    /// Looks up a live thread's context.
    #[must_use]
    pub fn get(&self, handle: ThreadHandle) -> Option<Arc<ThreadContext>> {
        self.threads.get(&handle).map(|r| Arc::clone(r.value()))
    }

    /// Removes an exited thread. A dead thread no longer holds back the
    /// dynamic-code generation minimum.
    pub fn remove(&self, handle: ThreadHandle) -> Option<Arc<ThreadContext>> {
        self.threads.remove(&handle).map(|(_, ctx)| ctx)
    }

    /// Number of live threads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Whether no threads are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// The minimum generation across live threads; `u64::MAX` when none are
    /// registered (nothing can lag when nothing runs).
    #[must_use]
    pub fn min_generation(&self) -> u64 {
        self.threads
            .iter()
            .map(|r| r.value().generation())
            .min()
            .unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_stable() {
        let table = ThreadTable::new();
        let (a, _) = table.register(0);
        let (b, _) = table.register(0);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert!(table.get(a).is_some());

        table.remove(a);
        assert!(table.get(a).is_none());
        assert!(table.get(b).is_some());
    }

    #[test]
    fn generations_never_regress() {
        let ctx = ThreadContext::default();
        ctx.observe_generation(5);
        ctx.observe_generation(3);
        assert_eq!(ctx.generation(), 5);
    }

    #[test]
    fn min_generation_tracks_laggards() {
        let table = ThreadTable::new();
        assert_eq!(table.min_generation(), u64::MAX);

        let (slow, slow_ctx) = table.register(1);
        let (_fast, fast_ctx) = table.register(1);
        fast_ctx.observe_generation(9);
        assert_eq!(table.min_generation(), 1);

        slow_ctx.observe_generation(9);
        assert_eq!(table.min_generation(), 9);

        // A removed thread stops holding the minimum back.
        let (lagging, _) = table.register(0);
        assert_eq!(table.min_generation(), 0);
        table.remove(lagging);
        assert_eq!(table.min_generation(), 9);
    }

    #[test]
    fn kill_is_consumed_once() {
        let ctx = ThreadContext::default();
        assert!(!ctx.kill_requested());
        ctx.request_kill();
        assert!(ctx.kill_requested());
        assert!(ctx.take_kill());
        assert!(!ctx.take_kill());
        assert!(!ctx.kill_requested());
    }

    #[test]
    fn new_threads_start_at_the_current_generation() {
        let table = ThreadTable::new();
        let (_h, ctx) = table.register(7);
        assert_eq!(ctx.generation(), 7);
    }
}
