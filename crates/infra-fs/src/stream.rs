// Channel-backed RecordSource fed by a blocking parser thread

use async_trait::async_trait;
use jobflow_core::error::{AppError, Result};
use jobflow_core::port::{RecordSource, SourceEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

struct Preamble {
    headers: Vec<String>,
    total: Option<u64>,
}

/// Parser-side half of a [`StreamingSource`]
pub(crate) struct Producer {
    preamble: Option<oneshot::Sender<Result<Preamble>>>,
    events: mpsc::Sender<Result<SourceEvent>>,
}

impl Producer {
    /// Publish headers; false once the consumer is gone
    pub(crate) fn start(&mut self, headers: Vec<String>, total: Option<u64>) -> bool {
        match self.preamble.take() {
            Some(tx) => tx.send(Ok(Preamble { headers, total })).is_ok(),
            None => !self.events.is_closed(),
        }
    }

    /// Blocks while the channel is full; false once the consumer is gone
    pub(crate) fn emit(&self, event: SourceEvent) -> bool {
        self.events.blocking_send(Ok(event)).is_ok()
    }

    fn fail(&mut self, err: AppError) {
        match self.preamble.take() {
            Some(tx) => {
                let _ = tx.send(Err(err));
            }
            None => {
                let _ = self.events.blocking_send(Err(err));
            }
        }
    }
}

/// Record source whose parser runs on the blocking pool
///
/// At most `capacity` parsed records wait in the channel. Dropping the source closes the
/// channel, which stops the parser at its next send.
pub struct StreamingSource {
    headers: Vec<String>,
    total: Option<u64>,
    events: mpsc::Receiver<Result<SourceEvent>>,
    producer: Option<JoinHandle<()>>,
}

impl StreamingSource {
    /// Start `produce` on a blocking thread and wait until it has read the headers
    pub(crate) async fn spawn<F>(capacity: usize, produce: F) -> Result<Self>
    where
        F: FnOnce(&mut Producer) -> Result<()> + Send + 'static,
    {
        let (preamble_tx, preamble_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));

        let handle = tokio::task::spawn_blocking(move || {
            let mut producer = Producer {
                preamble: Some(preamble_tx),
                events: events_tx,
            };
            if let Err(err) = produce(&mut producer) {
                producer.fail(err);
            }
        });

        match preamble_rx.await {
            Ok(Ok(preamble)) => Ok(Self {
                headers: preamble.headers,
                total: preamble.total,
                events: events_rx,
                producer: Some(handle),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(match handle.await {
                Err(join) => AppError::Internal(format!("record parser panicked: {}", join)),
                Ok(()) => AppError::Internal("record parser stopped before the header".into()),
            }),
        }
    }
}

#[async_trait]
impl RecordSource for StreamingSource {
    fn headers(&self) -> &[String] {
        &self.headers
    }

    fn total_records(&self) -> Option<u64> {
        self.total
    }

    async fn next(&mut self) -> Result<Option<SourceEvent>> {
        match self.events.recv().await {
            Some(item) => item.map(Some),
            None => {
                // Closed channel: either a clean end or a parser panic
                if let Some(handle) = self.producer.take() {
                    handle.await.map_err(|join| {
                        AppError::Internal(format!("record parser panicked: {}", join))
                    })?;
                }
                Ok(None)
            }
        }
    }
}
