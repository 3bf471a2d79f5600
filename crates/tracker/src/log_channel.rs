//! Push-based log stream for one job.
//!
//! A [`LogChannel`] runs a background task that opens the job's log
//! transport and hands every message to `on_chunk` in arrival order. When
//! the connection ends, for whatever reason, `on_close` runs exactly once.

use std::sync::Arc;

use devcraft_core::types::{JobHandle, LogChunk};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::CloseReason;
use crate::source::{LogSource, LogTransport};

/// Handle to a running log stream.
///
/// Dropping the handle does not stop the stream; call
/// [`close`](Self::close).
pub struct LogChannel {
    job: JobHandle,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LogChannel {
    /// Open the log stream for `job` on `source`.
    ///
    /// Must be called from within a tokio runtime. Connection failures are
    /// not returned here; they surface as `on_close(CloseReason::Error)`.
    pub fn open<C, F>(source: Arc<dyn LogSource>, job: JobHandle, on_chunk: C, on_close: F) -> Self
    where
        C: FnMut(LogChunk) + Send + 'static,
        F: FnOnce(CloseReason) + Send + 'static,
    {
        Self::open_with_cancel(CancellationToken::new(), source, job, on_chunk, on_close)
    }

    /// Like [`open`](Self::open), but the stream is also torn down when
    /// `parent` is cancelled.
    pub fn open_with_parent<C, F>(
        parent: &CancellationToken,
        source: Arc<dyn LogSource>,
        job: JobHandle,
        on_chunk: C,
        on_close: F,
    ) -> Self
    where
        C: FnMut(LogChunk) + Send + 'static,
        F: FnOnce(CloseReason) + Send + 'static,
    {
        Self::open_with_cancel(parent.child_token(), source, job, on_chunk, on_close)
    }

    fn open_with_cancel<C, F>(
        cancel: CancellationToken,
        source: Arc<dyn LogSource>,
        job: JobHandle,
        on_chunk: C,
        on_close: F,
    ) -> Self
    where
        C: FnMut(LogChunk) + Send + 'static,
        F: FnOnce(CloseReason) + Send + 'static,
    {
        let task_cancel = cancel.clone();
        let task_job = job.clone();

        let task = tokio::spawn(async move {
            let reason = pump(source.as_ref(), &task_job, &task_cancel, on_chunk).await;
            tracing::debug!(job_id = %task_job, ?reason, "Log channel ended");
            on_close(reason);
        });

        Self {
            job,
            cancel,
            task: Some(task),
        }
    }

    pub fn job(&self) -> &JobHandle {
        &self.job
    }

    /// `true` until [`close`](Self::close) has completed.
    pub fn is_open(&self) -> bool {
        self.task.is_some()
    }

    /// Tear the connection down.
    ///
    /// Idempotent. When this returns, `on_close` has run (now or earlier)
    /// and no further `on_chunk` call will happen.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            tracing::error!(job_id = %self.job, error = %e, "Log channel task failed");
        }
    }
}

/// Read messages until the remote side closes, the transport fails, or
/// `cancel` fires.
async fn pump<C>(
    source: &dyn LogSource,
    job: &JobHandle,
    cancel: &CancellationToken,
    mut on_chunk: C,
) -> CloseReason
where
    C: FnMut(LogChunk),
{
    let mut transport: Box<dyn LogTransport> = tokio::select! {
        biased;
        _ = cancel.cancelled() => return CloseReason::Normal,
        opened = source.open(job) => match opened {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(job_id = %job, error = %e, "Failed to open log stream");
                return CloseReason::Error;
            }
        },
    };

    let mut sequence = 0u64;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Err(e) = transport.close().await {
                    tracing::debug!(job_id = %job, error = %e, "Error while closing log stream");
                }
                return CloseReason::Normal;
            }
            msg = transport.next_message() => match msg {
                Some(Ok(text)) => {
                    sequence += 1;
                    on_chunk(LogChunk::new(sequence, text));
                }
                Some(Err(e)) => {
                    tracing::warn!(job_id = %job, error = %e, "Log stream receive error");
                    return CloseReason::Error;
                }
                None => return CloseReason::Normal,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::TransportError;

    /// Transport fed by a test-controlled channel.
    struct FedTransport {
        rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl LogTransport for FedTransport {
        async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
            self.rx.recv().await
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FedSource {
        transport: Mutex<Option<FedTransport>>,
    }

    #[async_trait]
    impl LogSource for FedSource {
        async fn open(&self, _job: &JobHandle) -> Result<Box<dyn LogTransport>, TransportError> {
            match self.transport.lock().unwrap().take() {
                Some(t) => Ok(Box::new(t)),
                None => Err(TransportError::Protocol("already opened".into())),
            }
        }
    }

    struct RefusingSource;

    #[async_trait]
    impl LogSource for RefusingSource {
        async fn open(&self, _job: &JobHandle) -> Result<Box<dyn LogTransport>, TransportError> {
            Err(TransportError::Protocol("connection refused".into()))
        }
    }

    type Feed = mpsc::UnboundedSender<Result<String, TransportError>>;

    fn fed_source() -> (Arc<dyn LogSource>, Feed, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let source = FedSource {
            transport: Mutex::new(Some(FedTransport {
                rx,
                closed: Arc::clone(&closed),
            })),
        };
        (Arc::new(source), tx, closed)
    }

    fn job() -> JobHandle {
        JobHandle::new("job-42").unwrap()
    }

    struct Recorded {
        chunks: Arc<Mutex<Vec<LogChunk>>>,
        closes: Arc<Mutex<Vec<CloseReason>>>,
    }

    fn open_recording(source: Arc<dyn LogSource>) -> (LogChannel, Recorded) {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&chunks);
        let r = Arc::clone(&closes);
        let channel = LogChannel::open(
            source,
            job(),
            move |chunk| c.lock().unwrap().push(chunk),
            move |reason| r.lock().unwrap().push(reason),
        );
        (channel, Recorded { chunks, closes })
    }

    #[tokio::test]
    async fn chunks_delivered_in_arrival_order() {
        let (source, feed, _closed) = fed_source();
        feed.send(Ok("Building...\n".into())).unwrap();
        feed.send(Ok("Done.\n".into())).unwrap();
        drop(feed);

        let (mut channel, rec) = open_recording(source);
        channel.close().await;

        let chunks = rec.chunks.lock().unwrap().clone();
        // Closing may race the remote end; whatever arrived is in order.
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i as u64 + 1);
        }
        assert_eq!(rec.closes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remote_close_reports_normal_once() {
        let (source, feed, _closed) = fed_source();
        feed.send(Ok("Building...\n".into())).unwrap();
        feed.send(Ok("Done.\n".into())).unwrap();
        drop(feed);

        let (mut channel, rec) = open_recording(source);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let texts: Vec<String> = rec.chunks.lock().unwrap().iter().map(|c| c.text.clone()).collect();
        assert_eq!(texts, vec!["Building...\n", "Done.\n"]);
        assert_eq!(*rec.closes.lock().unwrap(), vec![CloseReason::Normal]);

        channel.close().await;
        assert_eq!(rec.closes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_reports_error() {
        let (source, feed, _closed) = fed_source();
        feed.send(Ok("partial".into())).unwrap();
        feed.send(Err(TransportError::Protocol("reset".into()))).unwrap();

        let (mut channel, rec) = open_recording(source);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(*rec.closes.lock().unwrap(), vec![CloseReason::Error]);
        assert_eq!(rec.chunks.lock().unwrap().len(), 1);
        channel.close().await;
    }

    #[tokio::test]
    async fn connect_failure_reports_error() {
        let (mut channel, rec) = open_recording(Arc::new(RefusingSource));
        channel.close().await;

        assert_eq!(*rec.closes.lock().unwrap(), vec![CloseReason::Error]);
        assert!(rec.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_closes_transport() {
        let (source, _feed, closed) = fed_source();
        let (mut channel, rec) = open_recording(source);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        channel.close().await;
        channel.close().await;

        assert!(!channel.is_open());
        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(*rec.closes.lock().unwrap(), vec![CloseReason::Normal]);
    }

    #[tokio::test]
    async fn no_chunks_after_close_returns() {
        let (source, feed, _closed) = fed_source();
        let (mut channel, rec) = open_recording(source);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        channel.close().await;
        let _ = feed.send(Ok("late".into()));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(rec.chunks.lock().unwrap().is_empty());
    }
}
