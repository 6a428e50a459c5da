//! Shared helpers for unit tests.

/// Installs the test logger once; later calls are no-ops.
///
/// Run with `RUST_LOG=debug cargo test -- --nocapture` to see validator and
/// loader diagnostics.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
