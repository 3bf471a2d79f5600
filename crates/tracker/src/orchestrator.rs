//! Job progress orchestrator.
//!
//! [`JobProgressOrchestrator`] tracks generation jobs. For each tracked
//! job it opens a [`LogChannel`] and starts a [`StatusPoller`], then spawns
//! one driver task that owns both. The channel and poller callbacks only
//! push into the driver's queue, so every decision about a session is
//! made inside that single task.
//!
//! The poller is the only source of truth for the outcome. The first
//! `completed` or `error` snapshot (or the configured run of failed
//! queries) sets the session's terminal flag; the driver then cancels the
//! poller, closes the log channel and reports the outcome once.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use devcraft_core::status::{StatusSnapshot, TerminalOutcome};
use devcraft_core::types::{JobHandle, LogChunk};
use futures::FutureExt;
use tokio::sync::{mpsc, RwLock};

use crate::api::TransportClient;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::events::{CloseReason, ProgressEvent};
use crate::log_channel::LogChannel;
use crate::poller::{QueryFailure, StatusPoller};
use crate::session::{SessionShared, TrackingSession};
use crate::source::{LogSource, StatusSource};

/// Active sessions indexed by job.
type SessionMap = Arc<RwLock<HashMap<JobHandle, TrackingSession>>>;

/// Everything the two channels report to the driver task.
#[derive(Debug)]
enum SessionInput {
    Chunk(LogChunk),
    LogClosed(CloseReason),
    Snapshot(StatusSnapshot),
    QueryFailed(QueryFailure),
}

/// Tracks generation jobs through their log stream and status endpoint.
///
/// Created once and shared by reference; holds no process-wide state.
pub struct JobProgressOrchestrator {
    status_source: Arc<dyn StatusSource>,
    log_source: Arc<dyn LogSource>,
    config: TrackerConfig,
    sessions: SessionMap,
}

impl JobProgressOrchestrator {
    pub fn new(
        status_source: Arc<dyn StatusSource>,
        log_source: Arc<dyn LogSource>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            status_source,
            log_source,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Orchestrator that polls and streams from the deployment behind
    /// `client`.
    pub fn for_client(client: &TransportClient, config: TrackerConfig) -> Self {
        Self::new(
            Arc::new(client.clone()),
            Arc::new(client.log_stream()),
            config,
        )
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start tracking `job`.
    ///
    /// Opens the log stream, starts polling, and returns the session
    /// handle. Fails with [`TrackerError::AlreadyTracking`] while another
    /// session for the same job is active.
    pub async fn start_tracking(&self, job: JobHandle) -> Result<TrackingSession, TrackerError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&job) {
            return Err(TrackerError::AlreadyTracking(job));
        }

        let session = TrackingSession::new(job.clone());
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let chunk_tx = input_tx.clone();
        let close_tx = input_tx.clone();
        let log_channel = LogChannel::open_with_parent(
            session.shared().cancel_token(),
            Arc::clone(&self.log_source),
            job.clone(),
            move |chunk| {
                let _ = chunk_tx.send(SessionInput::Chunk(chunk));
            },
            move |reason| {
                let _ = close_tx.send(SessionInput::LogClosed(reason));
            },
        );

        let snapshot_tx = input_tx.clone();
        let failure_tx = input_tx;
        let mut poller =
            StatusPoller::with_parent(Arc::clone(&self.status_source), session.shared().cancel_token());
        let started = poller.start(
            job.clone(),
            self.config.poll_interval,
            move |snapshot| {
                let _ = snapshot_tx.send(SessionInput::Snapshot(snapshot));
            },
            move |failure| {
                let _ = failure_tx.send(SessionInput::QueryFailed(failure));
            },
        );
        if let Err(e) = started {
            // A fresh poller is always Idle.
            tracing::error!(job_id = %job, error = %e, "Failed to start status poller");
        }

        let driver = Driver {
            shared: Arc::clone(session.shared()),
            inputs: input_rx,
            log_channel,
            poller,
            max_failures: self.config.max_consecutive_failures,
            sessions: Arc::clone(&self.sessions),
        };
        tokio::spawn(driver.run());

        tracing::info!(
            job_id = %job,
            session_id = %session.id(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Tracking started",
        );

        sessions.insert(job, session.clone());
        Ok(session)
    }

    /// Register a log chunk handler on `session`.
    pub fn on_log_chunk<F>(&self, session: &TrackingSession, handler: F)
    where
        F: FnMut(&LogChunk) + Send + 'static,
    {
        session.on_log_chunk(handler);
    }

    /// Register the terminal outcome handler on `session`.
    pub fn on_terminal<F>(&self, session: &TrackingSession, handler: F)
    where
        F: FnOnce(TerminalOutcome) + Send + 'static,
    {
        session.on_terminal(handler);
    }

    /// Cancel `session`. Idempotent; a no-op after natural termination.
    pub async fn cancel(&self, session: &TrackingSession) {
        session.cancel().await;
    }

    /// Cancel the active session for `job`.
    pub async fn cancel_job(&self, job: &JobHandle) -> Result<(), TrackerError> {
        let session = self.session(job).await?;
        session.cancel().await;
        Ok(())
    }

    /// The active session for `job`.
    pub async fn session(&self, job: &JobHandle) -> Result<TrackingSession, TrackerError> {
        self.sessions
            .read()
            .await
            .get(job)
            .cloned()
            .ok_or_else(|| TrackerError::SessionNotFound(job.clone()))
    }

    pub async fn is_tracking(&self, job: &JobHandle) -> bool {
        self.sessions.read().await.contains_key(job)
    }

    pub async fn active_jobs(&self) -> Vec<JobHandle> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Cancel every active session and wait for their channels to close.
    pub async fn shutdown(&self) {
        let sessions: Vec<TrackingSession> =
            self.sessions.read().await.values().cloned().collect();
        tracing::info!(count = sessions.len(), "Shutting down job tracking");
        for session in sessions {
            session.cancel().await;
        }
    }
}

/// Per-session task state. Sole owner of the session's channels.
struct Driver {
    shared: Arc<SessionShared>,
    inputs: mpsc::UnboundedReceiver<SessionInput>,
    log_channel: LogChannel,
    poller: StatusPoller,
    max_failures: u32,
    sessions: SessionMap,
}

impl Driver {
    async fn run(mut self) {
        let processed = AssertUnwindSafe(self.process_inputs()).catch_unwind().await;
        if processed.is_err() {
            tracing::error!(
                job_id = %self.shared.job(),
                session_id = %self.shared.id(),
                "Session driver panicked, tearing down",
            );
            self.shared.cancel_token().cancel();
        }

        // Stop both channels before anyone hears about the outcome.
        self.poller.cancel().await;
        self.log_channel.close().await;

        {
            let mut sessions = self.sessions.write().await;
            let ours = sessions
                .get(self.shared.job())
                .is_some_and(|s| s.id() == self.shared.id());
            if ours {
                sessions.remove(self.shared.job());
            }
        }

        self.shared.finish();
        tracing::info!(
            job_id = %self.shared.job(),
            session_id = %self.shared.id(),
            "Tracking ended",
        );
    }

    /// Consume channel input until the session is decided or cancelled.
    async fn process_inputs(&mut self) {
        loop {
            let input = tokio::select! {
                biased;
                _ = self.shared.cancel_token().cancelled() => return,
                input = self.inputs.recv() => input,
            };

            let Some(input) = input else {
                // Both channel tasks are gone without a decision.
                tracing::error!(job_id = %self.shared.job(), "Session inputs closed unexpectedly");
                self.shared
                    .begin_terminal(TerminalOutcome::status_unavailable());
                return;
            };

            match input {
                SessionInput::Chunk(chunk) => self.shared.deliver_chunk(chunk),
                SessionInput::LogClosed(reason) => {
                    let job = self.shared.job();
                    match reason {
                        CloseReason::Normal => tracing::info!(job_id = %job, "Log stream closed"),
                        CloseReason::Error => {
                            tracing::warn!(job_id = %job, "Log stream failed; status polling continues")
                        }
                    }
                    self.shared
                        .notify(ProgressEvent::LogChannelClosed { reason });
                }
                SessionInput::Snapshot(snapshot) => {
                    if let Some(outcome) = TerminalOutcome::from_snapshot(&snapshot) {
                        if self.shared.begin_terminal(outcome) {
                            tracing::info!(
                                job_id = %snapshot.job,
                                status = %snapshot.status,
                                "Job reached terminal status",
                            );
                        }
                        return;
                    }
                    self.shared.observe_snapshot(snapshot);
                }
                SessionInput::QueryFailed(failure) => {
                    let consecutive_failures = failure.consecutive_failures;
                    self.shared.notify(ProgressEvent::StatusQueryFailed {
                        consecutive_failures,
                        error: failure.error.to_string(),
                    });
                    if consecutive_failures >= self.max_failures {
                        if self
                            .shared
                            .begin_terminal(TerminalOutcome::status_unavailable())
                        {
                            tracing::error!(
                                job_id = %self.shared.job(),
                                consecutive_failures,
                                "Status endpoint unavailable, giving up",
                            );
                        }
                        return;
                    }
                }
            }
        }
    }
}
