//! Non-terminal events a tracking session reports to the presentation
//! layer.

use devcraft_core::status::StatusSnapshot;
use serde::Serialize;

/// Why a log channel ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    /// The connection ended cleanly, or was closed on request.
    Normal,
    /// The connection could not be opened or broke.
    Error,
}

/// Progress observed on one of the two channels.
///
/// None of these events end a session; the terminal outcome is delivered
/// separately through
/// [`TrackingSession::on_terminal`](crate::session::TrackingSession::on_terminal).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A poll returned a status different from the previous one.
    StatusChanged { snapshot: StatusSnapshot },

    /// The log stream ended. Polling continues.
    LogChannelClosed { reason: CloseReason },

    /// A status query failed and will be retried on the next tick.
    StatusQueryFailed {
        consecutive_failures: u32,
        error: String,
    },
}
