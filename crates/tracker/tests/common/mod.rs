//! Scripted stand-ins for the status endpoint and the log stream.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devcraft_core::status::{JobStatus, StatusSnapshot, TerminalOutcome};
use devcraft_core::types::JobHandle;
use devcraft_tracker::source::{LogSource, LogTransport, StatusSource};
use devcraft_tracker::{
    JobProgressOrchestrator, ProgressEvent, TrackerConfig, TrackingSession, TransportError,
};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Status endpoint
// ---------------------------------------------------------------------------

/// One scripted answer of the status endpoint.
#[derive(Debug, Clone)]
pub enum Step {
    Pending,
    Running,
    Completed(Option<&'static str>),
    Errored(Option<&'static str>),
    QueryError,
}

/// Answers status queries from a script and repeats the last step once
/// the script runs out.
pub struct ScriptedStatus {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicU32,
}

impl ScriptedStatus {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into()),
            last: Mutex::new(Step::Pending),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedStatus {
    async fn fetch_status(&self, job: &JobHandle) -> Result<StatusSnapshot, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = match self.script.lock().unwrap().pop_front() {
            Some(step) => {
                *self.last.lock().unwrap() = step.clone();
                step
            }
            None => self.last.lock().unwrap().clone(),
        };

        let job = job.clone();
        match step {
            Step::Pending => Ok(StatusSnapshot::new(job, JobStatus::Pending)),
            Step::Running => Ok(StatusSnapshot::new(job, JobStatus::Running)),
            Step::Completed(location) => {
                let snapshot = StatusSnapshot::new(job, JobStatus::Completed);
                Ok(match location {
                    Some(l) => snapshot.with_artifact_location(l),
                    None => snapshot,
                })
            }
            Step::Errored(detail) => {
                let snapshot = StatusSnapshot::new(job, JobStatus::Error);
                Ok(match detail {
                    Some(d) => snapshot.with_error_detail(d),
                    None => snapshot,
                })
            }
            Step::QueryError => Err(TransportError::Protocol("connection reset".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Log stream
// ---------------------------------------------------------------------------

type FeedItem = Result<String, TransportError>;

/// Test side of a fed log stream.
pub struct LogFeed {
    tx: Option<mpsc::UnboundedSender<FeedItem>>,
}

impl LogFeed {
    pub fn chunk(&self, text: &str) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(text.to_string()));
        }
    }

    /// Break the stream with a transport error.
    pub fn fail(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Err(TransportError::Protocol("socket reset".into())));
        }
    }

    /// Close the stream from the server side.
    pub fn end(&mut self) {
        self.tx = None;
    }
}

struct FedTransport {
    rx: mpsc::UnboundedReceiver<FeedItem>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl LogTransport for FedTransport {
    async fn next_message(&mut self) -> Option<FeedItem> {
        self.rx.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out a single fed transport; later opens are refused.
pub struct FedLogSource {
    transport: Mutex<Option<FedTransport>>,
    pub closed_by_client: Arc<AtomicBool>,
}

#[async_trait]
impl LogSource for FedLogSource {
    async fn open(&self, _job: &JobHandle) -> Result<Box<dyn LogTransport>, TransportError> {
        match self.transport.lock().unwrap().take() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(TransportError::Protocol("connection refused".into())),
        }
    }
}

pub fn fed_log_source() -> (Arc<FedLogSource>, LogFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    let source = FedLogSource {
        transport: Mutex::new(Some(FedTransport {
            rx,
            closed: Arc::clone(&closed),
        })),
        closed_by_client: closed,
    };
    (Arc::new(source), LogFeed { tx: Some(tx) })
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub const TICK: Duration = Duration::from_millis(1000);

pub struct Harness {
    pub orchestrator: JobProgressOrchestrator,
    pub status: Arc<ScriptedStatus>,
    pub logs: Arc<FedLogSource>,
    pub feed: LogFeed,
}

impl Harness {
    pub fn new(steps: Vec<Step>) -> Self {
        let status = ScriptedStatus::new(steps);
        let (logs, feed) = fed_log_source();
        let config = TrackerConfig {
            poll_interval: TICK,
            max_consecutive_failures: 5,
        };
        let orchestrator = JobProgressOrchestrator::new(
            Arc::clone(&status) as Arc<dyn StatusSource>,
            Arc::clone(&logs) as Arc<dyn LogSource>,
            config,
        );
        Self {
            orchestrator,
            status,
            logs,
            feed,
        }
    }

    pub fn log_closed_by_client(&self) -> bool {
        self.logs.closed_by_client.load(Ordering::SeqCst)
    }
}

/// Everything a session handed to its handlers.
#[derive(Clone, Default)]
pub struct Recorder {
    pub chunks: Arc<Mutex<Vec<String>>>,
    pub outcomes: Arc<Mutex<Vec<TerminalOutcome>>>,
    pub events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl Recorder {
    pub fn attach(session: &TrackingSession) -> Self {
        let recorder = Self::default();

        let chunks = Arc::clone(&recorder.chunks);
        session.on_log_chunk(move |chunk| chunks.lock().unwrap().push(chunk.text.clone()));

        let outcomes = Arc::clone(&recorder.outcomes);
        session.on_terminal(move |outcome| outcomes.lock().unwrap().push(outcome));

        let events = Arc::clone(&recorder.events);
        session.on_progress(move |event| events.lock().unwrap().push(event.clone()));

        recorder
    }

    pub fn chunks(&self) -> Vec<String> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn outcomes(&self) -> Vec<TerminalOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

pub fn job(id: &str) -> JobHandle {
    JobHandle::new(id).unwrap()
}
