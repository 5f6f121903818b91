//! Per-operation deadlines.

use std::future::Future;
use std::time::Duration;

use grantstore_storage::StorageError;

/// Deadline applied when none is configured.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `fut` under `timeout`.
///
/// A timed-out operation is reported as failed. Its future is dropped, which
/// rolls back any open transaction and returns pooled connections.
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "Storage operation timed out"
            );
            Err(StorageError::timeout(operation, timeout))
        }
    }
}
