//! Job progress tracking for the DevCraft generation API.
//!
//! Follows one generation job through two independent channels, a
//! WebSocket log stream and a periodic status poll, and folds them into a
//! single terminal outcome. The [`orchestrator`] owns both channels for the
//! lifetime of a [`session`] and tears them down exactly once.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod log_channel;
pub mod orchestrator;
pub mod poller;
pub mod session;
pub mod source;

pub use api::TransportClient;
pub use client::LogStreamClient;
pub use config::{ClientConfig, TrackerConfig};
pub use error::{TrackerError, TransportError};
pub use events::{CloseReason, ProgressEvent};
pub use orchestrator::JobProgressOrchestrator;
pub use session::TrackingSession;
