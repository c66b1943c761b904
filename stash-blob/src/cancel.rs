//! Explicit cancellation for in-flight operations.
//!
//! Every network-calling operation takes a [`CancellationToken`] owned by the
//! caller. Management operations additionally derive a child token per call
//! and cancel it themselves when their deadline passes.

use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::{BlobError, BlobResult};

/// Fixed deadline for copy/delete/list/metadata calls.
pub const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Race `fut` against `token`. Cancellation wins ties and surfaces as
/// [`BlobError::Cancelled`] naming `operation`.
pub async fn cancellable<T, F>(operation: &str, token: &CancellationToken, fut: F) -> BlobResult<T>
where
    F: Future<Output = BlobResult<T>>,
{
    if token.is_cancelled() {
        return Err(BlobError::cancelled(operation));
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(BlobError::cancelled(operation)),
        result = fut => result,
    }
}

/// Run `make(child)` under a child of `parent` that is cancelled after
/// `timeout`. Both an outer cancellation and the deadline report as
/// cancelled.
pub async fn with_deadline<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    parent: &CancellationToken,
    make: F,
) -> BlobResult<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = BlobResult<T>>,
{
    let child = parent.child_token();
    let _guard = child.clone().drop_guard();
    let fut = make(child.clone());

    tokio::select! {
        biased;
        _ = child.cancelled() => Err(BlobError::cancelled(operation)),
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "operation timed out");
            child.cancel();
            Err(BlobError::cancelled(operation))
        }
        result = fut => result,
    }
}
