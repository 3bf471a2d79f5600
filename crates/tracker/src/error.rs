use devcraft_core::error::CoreError;
use devcraft_core::types::JobHandle;

/// Failure of a single request or channel operation.
///
/// Every variant is recoverable from the tracker's point of view: the
/// poller retries on its next tick and the log channel reports it as a
/// non-fatal close.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API returned a non-2xx status code.
    #[error("DevCraft API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The WebSocket connection failed or broke.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A response arrived but did not have the expected shape.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The request was rejected locally before being sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Writing a downloaded artifact failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Malformed or unexpected response, as opposed to a network failure.
    pub fn is_protocol(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(e: serde_json::Error) -> Self {
        TransportError::Protocol(e.to_string())
    }
}

impl From<CoreError> for TransportError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnknownStatus(_) => TransportError::Protocol(e.to_string()),
            CoreError::Validation(msg) => TransportError::InvalidRequest(msg),
        }
    }
}

/// Caller misuse of the orchestrator, reported synchronously.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A session for this job is still active.
    #[error("Job {0} is already being tracked")]
    AlreadyTracking(JobHandle),

    /// No active session exists for this job.
    #[error("No tracking session for job {0}")]
    SessionNotFound(JobHandle),
}
