//! Shared helpers for the crate's test modules.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise the test logger once per process.
///
/// Safe to call from every test; only the first call takes effect.
pub fn init_logger() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
