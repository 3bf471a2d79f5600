//! Seams between the tracker and the network.
//!
//! The orchestrator only talks to these traits. [`TransportClient`] and
//! [`LogStreamClient`] implement them against the real API; tests plug in
//! scripted fakes.
//!
//! [`TransportClient`]: crate::api::TransportClient
//! [`LogStreamClient`]: crate::client::LogStreamClient

use async_trait::async_trait;
use devcraft_core::status::StatusSnapshot;
use devcraft_core::types::JobHandle;

use crate::error::TransportError;

/// Answers one status query for a job.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    async fn fetch_status(&self, job: &JobHandle) -> Result<StatusSnapshot, TransportError>;
}

/// Opens the push log stream for a job.
#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    async fn open(&self, job: &JobHandle) -> Result<Box<dyn LogTransport>, TransportError>;
}

/// An open push connection delivering one text message at a time.
#[async_trait]
pub trait LogTransport: Send {
    /// Wait for the next message.
    ///
    /// Returns `None` once the remote side has closed the connection.
    /// Must be cancel-safe: dropping the future loses no message.
    async fn next_message(&mut self) -> Option<Result<String, TransportError>>;

    /// Ask the remote side to close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}
