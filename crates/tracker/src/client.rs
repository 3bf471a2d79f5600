//! WebSocket client for the per-job log stream.
//!
//! [`LogStreamClient`] holds the WebSocket base URL of a DevCraft API.
//! Opening a job's stream yields a [`LogStreamConnection`] reading from
//! `/ws/logs/{job_id}`.

use std::time::Duration;

use async_trait::async_trait;
use devcraft_core::types::JobHandle;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;
use crate::source::{LogSource, LogTransport};

/// How long to wait for the server to answer our close frame.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration handle for the log stream endpoint.
#[derive(Debug, Clone)]
pub struct LogStreamClient {
    ws_url: String,
}

/// A live WebSocket connection streaming one job's log output.
pub struct LogStreamConnection {
    job: JobHandle,
    ws_stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl LogStreamClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8000`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Full stream URL for `job`.
    pub fn stream_url(&self, job: &JobHandle) -> String {
        format!("{}/ws/logs/{}", self.ws_url, job)
    }

    /// Connect to the log stream of `job`.
    pub async fn connect(&self, job: &JobHandle) -> Result<LogStreamConnection, TransportError> {
        let url = self.stream_url(job);
        let (ws_stream, _response) = connect_async(&url).await?;

        tracing::info!(job_id = %job, url = %url, "Connected to log stream");

        Ok(LogStreamConnection {
            job: job.clone(),
            ws_stream,
        })
    }
}

#[async_trait]
impl LogSource for LogStreamClient {
    async fn open(&self, job: &JobHandle) -> Result<Box<dyn LogTransport>, TransportError> {
        Ok(Box::new(self.connect(job).await?))
    }
}

#[async_trait]
impl LogTransport for LogStreamConnection {
    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(msg_result) = self.ws_stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::debug!(job_id = %self.job, ?frame, "Log stream closed by server");
                    return None;
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.ws_stream.close(None).await {
            Ok(()) => {}
            // The server beat us to it.
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => {}
            Err(e) => return Err(e.into()),
        }
        // Drain until the server acknowledges the close frame.
        let drain = async {
            while let Some(msg) = self.ws_stream.next().await {
                if msg.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(CLOSE_ACK_TIMEOUT, drain).await.is_err() {
            tracing::debug!(job_id = %self.job, "Server did not acknowledge close frame");
        }
        Ok(())
    }
}
