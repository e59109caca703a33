//! Tracing subscriber installation for embedders and tests.
//!
//! The crate itself only emits `tracing` events; it never installs a
//! subscriber implicitly. Embedding applications that already configure
//! their own subscriber should skip this module entirely.

use tracing_subscriber::EnvFilter;
use vmclone_shared::{VmcloneError, VmcloneResult};

/// Environment variable consulted for the log filter (e.g. `vmclone=debug`).
pub const LOG_FILTER_ENV: &str = "VMCLONE_LOG";

/// Install a global formatting subscriber.
///
/// The filter is read from [`LOG_FILTER_ENV`], falling back to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init() -> VmcloneResult<()> {
    let filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| VmcloneError::Internal(format!("install tracing subscriber: {}", e)))
}

/// Like [`init`], but ignores the already-installed case. Convenient in
/// tests where multiple cases race to install the subscriber.
pub fn init_for_tests() {
    let _ = init();
}
