//! Periodic status polling for one job.
//!
//! [`StatusPoller`] is a small state machine:
//!
//! ```text
//! Idle -> Polling -> Completed | Failed | Cancelled
//! ```
//!
//! The three right-hand states are absorbing. While polling, a query is
//! issued immediately and then once per interval. Every successful answer
//! goes to `on_snapshot`; the poller stops by itself after a `completed`
//! or `error` snapshot. Failed queries leave the state unchanged and are
//! reported to `on_query_error` with the current run of consecutive
//! failures, so the caller can apply its own give-up policy.

use std::sync::Arc;
use std::time::Duration;

use devcraft_core::status::{JobStatus, StatusSnapshot};
use devcraft_core::types::JobHandle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::source::StatusSource;

/// Lifecycle of a [`StatusPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    /// A `completed` snapshot was delivered.
    Completed,
    /// An `error` snapshot was delivered.
    Failed,
    Cancelled,
}

impl PollerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PollerState::Completed | PollerState::Failed | PollerState::Cancelled
        )
    }
}

/// A failed status query, as reported to `on_query_error`.
#[derive(Debug)]
pub struct QueryFailure {
    /// Failures in a row, including this one. Reset by any success.
    pub consecutive_failures: u32,
    pub error: TransportError,
}

/// Errors from driving the poller state machine.
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("Poller can only be started from Idle (currently {0:?})")]
    NotIdle(PollerState),
}

pub struct StatusPoller {
    source: Arc<dyn StatusSource>,
    state: Arc<watch::Sender<PollerState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self::with_cancel(source, CancellationToken::new())
    }

    /// Poller that also stops when `parent` is cancelled.
    pub fn with_parent(source: Arc<dyn StatusSource>, parent: &CancellationToken) -> Self {
        Self::with_cancel(source, parent.child_token())
    }

    fn with_cancel(source: Arc<dyn StatusSource>, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(PollerState::Idle);
        Self {
            source,
            state: Arc::new(state),
            cancel,
            task: None,
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    /// Start polling `job` every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<S, E>(
        &mut self,
        job: JobHandle,
        interval: Duration,
        on_snapshot: S,
        on_query_error: E,
    ) -> Result<(), PollerError>
    where
        S: FnMut(StatusSnapshot) + Send + 'static,
        E: FnMut(QueryFailure) + Send + 'static,
    {
        let current = self.state();
        if current != PollerState::Idle {
            return Err(PollerError::NotIdle(current));
        }
        self.state.send_replace(PollerState::Polling);

        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            tracing::debug!(job_id = %job, interval_ms = interval.as_millis() as u64, "Status polling started");
            let end = poll_loop(source.as_ref(), &job, interval, &cancel, on_snapshot, on_query_error).await;
            transition(&state, end);
            tracing::debug!(job_id = %job, state = ?end, "Status polling stopped");
        }));

        Ok(())
    }

    /// Stop polling.
    ///
    /// Idempotent. When this returns, no further `on_snapshot` or
    /// `on_query_error` call will happen. A poller that already reached
    /// Completed or Failed keeps that state.
    pub async fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Status poller task failed");
            }
        }
        transition(&self.state, PollerState::Cancelled);
    }
}

/// Move to `next` unless a terminal state was already reached.
fn transition(state: &watch::Sender<PollerState>, next: PollerState) {
    state.send_if_modified(|current| {
        if current.is_terminal() {
            false
        } else {
            *current = next;
            true
        }
    });
}

async fn poll_loop<S, E>(
    source: &dyn StatusSource,
    job: &JobHandle,
    interval: Duration,
    cancel: &CancellationToken,
    mut on_snapshot: S,
    mut on_query_error: E,
) -> PollerState
where
    S: FnMut(StatusSnapshot),
    E: FnMut(QueryFailure),
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollerState::Cancelled,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PollerState::Cancelled,
            result = source.fetch_status(job) => result,
        };

        match result {
            Ok(snapshot) => {
                consecutive_failures = 0;
                let next = match snapshot.status {
                    JobStatus::Completed => Some(PollerState::Completed),
                    JobStatus::Error => Some(PollerState::Failed),
                    JobStatus::Pending | JobStatus::Running => None,
                };
                tracing::trace!(job_id = %job, status = %snapshot.status, "Status polled");
                on_snapshot(snapshot);
                if let Some(end) = next {
                    return end;
                }
            }
            Err(error) => {
                consecutive_failures += 1;
                tracing::warn!(
                    job_id = %job,
                    consecutive_failures,
                    protocol = error.is_protocol(),
                    error = %error,
                    "Status query failed",
                );
                on_query_error(QueryFailure {
                    consecutive_failures,
                    error,
                });
            }
        }
    }
}
