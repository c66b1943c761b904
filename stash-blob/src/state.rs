//! Reducer-style lifecycle state for uploads and management operations.
//!
//! Both machines are a tagged event enum plus a pure `transition` function;
//! the trackers only hold the current value in a `watch` channel so any
//! number of observers can follow along.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::classify::{classify, ClassifiedError};
use crate::progress::TransferProgress;
use crate::{BlobError, BlobResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPhase {
    #[default]
    Idle,
    Requesting,
    Streaming,
    Succeeded,
    Failed,
    Cancelled,
}

impl TransferPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// `progress` is only present while streaming or after success, and
/// `last_error` only after a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    pub phase: TransferPhase,
    pub progress: Option<TransferProgress>,
    pub last_error: Option<ClassifiedError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A new upload begins; whatever came before is discarded.
    Start,
    /// Authorization granted, streaming `total` bytes.
    Authorized { total: u64 },
    /// Cumulative bytes delivered so far.
    Progress { loaded: u64 },
    Succeeded,
    Failed(ClassifiedError),
    Cancelled,
    /// A multi-file upload finished with at least one failed file. Lands
    /// in `Failed` whatever the last file did.
    BatchFailed(ClassifiedError),
    Reset,
}

pub fn transition(state: TransferState, event: TransferEvent) -> TransferState {
    use TransferPhase::*;

    match (state.phase, event) {
        (_, TransferEvent::Reset) => TransferState::default(),
        (_, TransferEvent::Start) => TransferState {
            phase: Requesting,
            ..TransferState::default()
        },
        (_, TransferEvent::BatchFailed(error)) => TransferState {
            phase: Failed,
            progress: None,
            last_error: Some(error),
        },
        (Requesting, TransferEvent::Authorized { total }) => TransferState {
            phase: Streaming,
            progress: Some(TransferProgress::new(total)),
            last_error: None,
        },
        (Streaming, TransferEvent::Progress { loaded }) => {
            let mut progress = state.progress.unwrap_or_default();
            progress.advance(loaded);
            TransferState {
                progress: Some(progress),
                ..state
            }
        }
        (Requesting | Streaming, TransferEvent::Succeeded) => {
            let mut progress = state.progress.unwrap_or_default();
            progress.complete();
            TransferState {
                phase: Succeeded,
                progress: Some(progress),
                last_error: None,
            }
        }
        (Requesting | Streaming, TransferEvent::Failed(error)) => TransferState {
            phase: Failed,
            progress: None,
            last_error: Some(error),
        },
        (Requesting | Streaming, TransferEvent::Cancelled) => TransferState {
            phase: Cancelled,
            progress: None,
            last_error: None,
        },
        // Anything else is stale (e.g. a progress tick after cancellation).
        (_, _) => state,
    }
}

/// Shared, observable [`TransferState`] for one upload lifecycle.
#[derive(Debug, Clone)]
pub struct TransferTracker {
    tx: Arc<watch::Sender<TransferState>>,
}

impl Default for TransferTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TransferState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn apply(&self, event: TransferEvent) {
        self.tx.send_modify(|state| {
            let current = std::mem::take(state);
            *state = transition(current, event);
        });
    }

    /// Record the outcome of an upload attempt.
    pub fn finish<T>(&self, result: &BlobResult<T>) {
        match result {
            Ok(_) => self.apply(TransferEvent::Succeeded),
            Err(e) if e.is_cancelled() => self.apply(TransferEvent::Cancelled),
            Err(e) => self.apply(TransferEvent::Failed(classify(e))),
        }
    }

    pub fn reset(&self) {
        self.apply(TransferEvent::Reset);
    }

    pub fn snapshot(&self) -> TransferState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationPhase {
    #[default]
    Idle,
    Requesting,
    Succeeded,
    Failed,
    Cancelled,
}

impl OperationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationState {
    pub phase: OperationPhase,
    pub last_error: Option<ClassifiedError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationEvent {
    Begin,
    Succeeded,
    Failed(ClassifiedError),
    Cancelled,
    Reset,
}

/// Management-operation lifecycle. Unlike uploads, a finished operation
/// does not restart on `Begin`; it must be reset first.
pub fn operation_transition(state: OperationState, event: OperationEvent) -> OperationState {
    use OperationPhase::*;

    match (state.phase, event) {
        (_, OperationEvent::Reset) => OperationState::default(),
        (Idle, OperationEvent::Begin) => OperationState {
            phase: Requesting,
            last_error: None,
        },
        (Requesting, OperationEvent::Succeeded) => OperationState {
            phase: Succeeded,
            last_error: None,
        },
        (Requesting, OperationEvent::Failed(error)) => OperationState {
            phase: Failed,
            last_error: Some(error),
        },
        (Requesting, OperationEvent::Cancelled) => OperationState {
            phase: Cancelled,
            last_error: None,
        },
        (_, _) => state,
    }
}

/// Observable state for one management operation slot (a copy button, a
/// delete dialog, ...).
#[derive(Debug, Clone)]
pub struct OperationTracker {
    tx: Arc<watch::Sender<OperationState>>,
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(OperationState::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn apply(&self, event: OperationEvent) {
        self.tx.send_modify(|state| {
            let current = std::mem::take(state);
            *state = operation_transition(current, event);
        });
    }

    /// Drive `fut` through `Requesting` into a terminal phase.
    ///
    /// Fails without running `fut` if the tracker is not idle.
    pub async fn run<T, F>(&self, fut: F) -> BlobResult<T>
    where
        F: Future<Output = BlobResult<T>>,
    {
        let phase = self.tx.borrow().phase;
        if phase != OperationPhase::Idle {
            return Err(BlobError::bad_request(format!(
                "Operation is {phase:?}; reset it before starting another"
            )));
        }
        self.apply(OperationEvent::Begin);

        let result = fut.await;
        match &result {
            Ok(_) => self.apply(OperationEvent::Succeeded),
            Err(e) if e.is_cancelled() => self.apply(OperationEvent::Cancelled),
            Err(e) => self.apply(OperationEvent::Failed(classify(e))),
        }
        result
    }

    pub fn reset(&self) {
        self.apply(OperationEvent::Reset);
    }

    pub fn snapshot(&self) -> OperationState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(events: Vec<TransferEvent>) -> TransferState {
        events
            .into_iter()
            .fold(TransferState::default(), transition)
    }

    #[test]
    fn happy_path_keeps_progress() {
        let state = run(vec![
            TransferEvent::Start,
            TransferEvent::Authorized { total: 60 },
            TransferEvent::Progress { loaded: 30 },
            TransferEvent::Succeeded,
        ]);
        assert_eq!(state.phase, TransferPhase::Succeeded);
        let progress = state.progress.unwrap();
        assert_eq!(progress.percentage, 100.0);
        assert_eq!(progress.bytes_loaded, 60);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn failure_drops_progress_and_records_error() {
        let error = classify(&BlobError::network("reset"));
        let state = run(vec![
            TransferEvent::Start,
            TransferEvent::Authorized { total: 10 },
            TransferEvent::Progress { loaded: 5 },
            TransferEvent::Failed(error.clone()),
        ]);
        assert_eq!(state.phase, TransferPhase::Failed);
        assert!(state.progress.is_none());
        assert_eq!(state.last_error, Some(error));
    }

    #[test]
    fn late_progress_after_cancel_is_ignored() {
        let state = run(vec![
            TransferEvent::Start,
            TransferEvent::Authorized { total: 10 },
            TransferEvent::Cancelled,
            TransferEvent::Progress { loaded: 9 },
        ]);
        assert_eq!(state.phase, TransferPhase::Cancelled);
        assert!(state.progress.is_none());
        assert!(state.last_error.is_none());
    }

    #[test]
    fn start_clears_previous_outcome() {
        let state = run(vec![
            TransferEvent::Start,
            TransferEvent::Failed(classify(&BlobError::access_denied("no"))),
            TransferEvent::Start,
        ]);
        assert_eq!(state.phase, TransferPhase::Requesting);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn batch_failure_overrides_last_success() {
        let error = classify(&BlobError::bad_request("two.txt: too big"));
        let state = run(vec![
            TransferEvent::Start,
            TransferEvent::Authorized { total: 1 },
            TransferEvent::Succeeded,
            TransferEvent::BatchFailed(error.clone()),
        ]);
        assert_eq!(state.phase, TransferPhase::Failed);
        assert!(state.progress.is_none());
        assert_eq!(state.last_error, Some(error));
    }

    #[tokio::test]
    async fn tracker_notifies_subscribers() {
        let tracker = TransferTracker::new();
        let mut rx = tracker.subscribe();
        tracker.apply(TransferEvent::Start);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, TransferPhase::Requesting);
    }

    #[tokio::test]
    async fn terminal_operation_requires_reset() {
        let tracker = OperationTracker::new();
        tracker.run(async { Ok::<_, BlobError>(()) }).await.unwrap();
        assert_eq!(tracker.snapshot().phase, OperationPhase::Succeeded);

        let again = tracker.run(async { Ok::<_, BlobError>(()) }).await;
        assert!(matches!(again, Err(BlobError::BadRequest { .. })));
        assert_eq!(tracker.snapshot().phase, OperationPhase::Succeeded);

        tracker.reset();
        let err = tracker
            .run(async { Err::<(), _>(BlobError::cancelled("Copy")) })
            .await;
        assert!(err.is_err());
        assert_eq!(tracker.snapshot().phase, OperationPhase::Cancelled);
        assert!(tracker.snapshot().last_error.is_none());
    }
}
