//! Small helpers shared across the crate.

use std::future::Future;

use vmclone_shared::VmcloneResult;

/// Run a best-effort compensating cleanup for a failed operation.
///
/// On success the cleanup future is dropped unpolled. On failure the cleanup
/// runs; its own failure is logged and ignored, and the original error is
/// returned unchanged.
pub(crate) async fn with_best_effort_cleanup<T, C>(
    result: VmcloneResult<T>,
    cleanup: C,
    what: &str,
) -> VmcloneResult<T>
where
    C: Future<Output = VmcloneResult<()>>,
{
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            if let Err(cleanup_err) = cleanup.await {
                tracing::warn!(error = %cleanup_err, "best-effort {} cleanup failed", what);
            }
            Err(err)
        }
    }
}
