//! Live tracking state for one job.
//!
//! A [`TrackingSession`] is a cheap, cloneable handle. The orchestrator's
//! driver task owns the channels; the session holds the handler registry
//! and the phase that doubles as the single-use terminal flag:
//!
//! ```text
//! Active -> Terminating -> Finished
//!    \
//!     `---> Cancelled
//! ```
//!
//! Every delivery checks the phase under the session lock before handing
//! the item to the handlers, and every phase change happens under the same
//! lock, so a chunk or snapshot processed after the session left `Active`
//! has no observable effect. The handlers themselves run with the lock
//! released.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use devcraft_core::status::{JobStatus, StatusSnapshot, TerminalOutcome};
use devcraft_core::types::{JobHandle, LogChunk};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::ProgressEvent;

type Handler<E> = Box<dyn FnMut(&E) + Send>;
type TerminalHandler = Box<dyn FnOnce(TerminalOutcome) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    /// Outcome decided; channels are being torn down.
    Terminating,
    /// Outcome reported.
    Finished,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
enum SessionEnd {
    Finished(TerminalOutcome),
    Cancelled,
}

/// Handlers for one kind of item, plus the items that arrived before the
/// first handler was registered.
struct Fanout<E> {
    handlers: Vec<Handler<E>>,
    pending: Vec<E>,
}

impl<E> Default for Fanout<E> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
            pending: Vec::new(),
        }
    }
}

impl<E> Fanout<E> {
    fn clear(&mut self) {
        self.handlers.clear();
        self.pending.clear();
    }
}

struct SessionState {
    phase: Phase,
    logs: Fanout<LogChunk>,
    progress: Fanout<ProgressEvent>,
    terminal_handlers: Vec<TerminalHandler>,
    outcome: Option<TerminalOutcome>,
    last_status: Option<JobStatus>,
}

impl SessionState {
    fn clear_handlers(&mut self) {
        self.logs.clear();
        self.progress.clear();
    }
}

fn logs(state: &mut SessionState) -> &mut Fanout<LogChunk> {
    &mut state.logs
}

fn progress(state: &mut SessionState) -> &mut Fanout<ProgressEvent> {
    &mut state.progress
}

pub(crate) struct SessionShared {
    id: Uuid,
    job: JobHandle,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
    end: watch::Sender<Option<SessionEnd>>,
}

/// Handle to the tracking of one job.
///
/// Handlers run on the session's driver task, outside the session lock, so
/// they may query the session. A handler that panics is dropped; the
/// session carries on without it.
#[derive(Clone)]
pub struct TrackingSession {
    shared: Arc<SessionShared>,
}

impl fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSession")
            .field("id", &self.shared.id)
            .field("job", &self.shared.job)
            .field("phase", &self.shared.lock().phase)
            .finish()
    }
}

impl TrackingSession {
    pub(crate) fn new(job: JobHandle) -> Self {
        let (end, _) = watch::channel(None);
        Self {
            shared: Arc::new(SessionShared {
                id: Uuid::new_v4(),
                job,
                state: Mutex::new(SessionState {
                    phase: Phase::Active,
                    logs: Fanout::default(),
                    progress: Fanout::default(),
                    terminal_handlers: Vec::new(),
                    outcome: None,
                    last_status: None,
                }),
                cancel: CancellationToken::new(),
                end,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn job(&self) -> &JobHandle {
        &self.shared.job
    }

    /// `true` until an outcome is decided or the session is cancelled.
    pub fn is_active(&self) -> bool {
        self.shared.lock().phase == Phase::Active
    }

    /// The terminal outcome, once one has been decided.
    pub fn outcome(&self) -> Option<TerminalOutcome> {
        self.shared.lock().outcome.clone()
    }

    /// Register a handler for every log chunk, in arrival order.
    ///
    /// Chunks received before the first handler was registered are
    /// replayed to it immediately. Ignored once the session has ended.
    pub fn on_log_chunk<F>(&self, handler: F)
    where
        F: FnMut(&LogChunk) + Send + 'static,
    {
        self.shared.subscribe(Box::new(handler), logs);
    }

    /// Register a handler for non-terminal progress events.
    ///
    /// Like log chunks, events raised before the first handler was
    /// registered are replayed to it.
    pub fn on_progress<F>(&self, handler: F)
    where
        F: FnMut(&ProgressEvent) + Send + 'static,
    {
        self.shared.subscribe(Box::new(handler), progress);
    }

    /// Register a handler for the terminal outcome.
    ///
    /// Runs exactly once: when the outcome is reported, or right away if it
    /// already was. Never runs for a cancelled session.
    pub fn on_terminal<F>(&self, handler: F)
    where
        F: FnOnce(TerminalOutcome) + Send + 'static,
    {
        let mut state = self.shared.lock();
        let phase = state.phase;
        match phase {
            Phase::Active | Phase::Terminating => state.terminal_handlers.push(Box::new(handler)),
            Phase::Finished => {
                if let Some(outcome) = state.outcome.clone() {
                    drop(state);
                    self.shared.invoke(|| handler(outcome));
                }
            }
            Phase::Cancelled => {}
        }
    }

    /// Stop tracking.
    ///
    /// Idempotent, and a no-op after the outcome has been decided. Returns
    /// once both channels are released.
    pub async fn cancel(&self) {
        {
            let mut state = self.shared.lock();
            if state.phase == Phase::Active {
                state.phase = Phase::Cancelled;
                state.clear_handlers();
                tracing::info!(job_id = %self.shared.job, session_id = %self.shared.id, "Tracking cancelled");
            }
        }
        self.shared.cancel.cancel();
        self.wait().await;
    }

    /// Wait until the session has ended and both channels are released.
    ///
    /// Resolves to the terminal outcome, or `None` if the session was
    /// cancelled.
    pub async fn wait(&self) -> Option<TerminalOutcome> {
        let mut end = self.shared.end.subscribe();
        let result = match end.wait_for(Option::is_some).await {
            Ok(end) => match end.as_ref() {
                Some(SessionEnd::Finished(outcome)) => Some(outcome.clone()),
                Some(SessionEnd::Cancelled) | None => None,
            },
            Err(_) => None,
        };
        result
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn job(&self) -> &JobHandle {
        &self.job
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run one handler call, containing a panic. Returns `false` if the
    /// handler panicked.
    fn invoke(&self, call: impl FnOnce()) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(()) => true,
            Err(_) => {
                tracing::error!(
                    job_id = %self.job,
                    session_id = %self.id,
                    "Session handler panicked and was removed",
                );
                false
            }
        }
    }

    /// Add a handler, first replaying whatever was buffered for it.
    ///
    /// Replay happens outside the lock in batches; items delivered in the
    /// meantime are buffered again and picked up by the next batch, so
    /// order is preserved.
    fn subscribe<E>(&self, mut handler: Handler<E>, select: fn(&mut SessionState) -> &mut Fanout<E>) {
        loop {
            let batch = {
                let mut state = self.lock();
                if state.phase != Phase::Active {
                    return;
                }
                let fanout = select(&mut *state);
                if !fanout.handlers.is_empty() || fanout.pending.is_empty() {
                    fanout.handlers.push(handler);
                    return;
                }
                std::mem::take(&mut fanout.pending)
            };
            for item in &batch {
                if !self.invoke(|| handler(item)) {
                    return;
                }
            }
        }
    }

    /// Hand `item` to every registered handler, or buffer it until one
    /// exists.
    fn publish<E>(&self, item: E, select: fn(&mut SessionState) -> &mut Fanout<E>) {
        let mut handlers = {
            let mut state = self.lock();
            if state.phase != Phase::Active {
                return;
            }
            let fanout = select(&mut *state);
            if fanout.handlers.is_empty() {
                fanout.pending.push(item);
                return;
            }
            std::mem::take(&mut fanout.handlers)
        };

        handlers.retain_mut(|handler| self.invoke(|| handler(&item)));

        let mut state = self.lock();
        if state.phase != Phase::Active {
            return;
        }
        let fanout = select(&mut *state);
        let added = std::mem::replace(&mut fanout.handlers, handlers);
        fanout.handlers.extend(added);
    }

    /// Hand a chunk to the log handlers, or buffer it until one exists.
    pub(crate) fn deliver_chunk(&self, chunk: LogChunk) {
        self.publish(chunk, logs);
    }

    pub(crate) fn notify(&self, event: ProgressEvent) {
        self.publish(event, progress);
    }

    /// Record a non-terminal snapshot, emitting `StatusChanged` when the
    /// status differs from the previous one.
    pub(crate) fn observe_snapshot(&self, snapshot: StatusSnapshot) {
        {
            let mut state = self.lock();
            if state.phase != Phase::Active || state.last_status == Some(snapshot.status) {
                return;
            }
            state.last_status = Some(snapshot.status);
        }
        self.notify(ProgressEvent::StatusChanged { snapshot });
    }

    /// Set the terminal flag.
    ///
    /// Returns `false` if the session already left `Active`; the caller
    /// must then drop `outcome`.
    pub(crate) fn begin_terminal(&self, outcome: TerminalOutcome) -> bool {
        let mut state = self.lock();
        if state.phase != Phase::Active {
            return false;
        }
        state.phase = Phase::Terminating;
        state.outcome = Some(outcome);
        state.clear_handlers();
        true
    }

    /// Report the outcome (if any) and release waiters.
    ///
    /// Called by the driver after both channels are torn down. Later calls
    /// do nothing.
    pub(crate) fn finish(&self) {
        if self.end.borrow().is_some() {
            return;
        }
        let mut state = self.lock();
        let phase = state.phase;
        let end = match phase {
            Phase::Terminating => {
                state.phase = Phase::Finished;
                let handlers = std::mem::take(&mut state.terminal_handlers);
                let outcome = state.outcome.clone();
                drop(state);
                match outcome {
                    Some(outcome) => {
                        for handler in handlers {
                            let outcome = outcome.clone();
                            self.invoke(|| handler(outcome));
                        }
                        SessionEnd::Finished(outcome)
                    }
                    None => SessionEnd::Cancelled,
                }
            }
            Phase::Finished => return,
            Phase::Active | Phase::Cancelled => {
                state.phase = Phase::Cancelled;
                state.clear_handlers();
                state.terminal_handlers.clear();
                SessionEnd::Cancelled
            }
        };
        self.end.send_replace(Some(end));
    }
}
