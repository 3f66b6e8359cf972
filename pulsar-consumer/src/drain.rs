//! Logging of errors the broker client reports outside of any request.
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::broker::BrokerError;
use crate::metrics_consts::ASYNC_ERRORS;

/// Owns the receiving half of a consumer's async error channel and the task draining it.
///
/// The channel is closed exactly once, by [`AsyncErrorDrain::close`]. After that the
/// drain task logs whatever is still buffered and exits.
pub struct AsyncErrorDrain {
    topic: String,
    closed: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncErrorDrain {
    /// Spawn a drain task for `topic` and return the sender to hand to the broker client.
    pub fn spawn(topic: &str, capacity: usize) -> (Self, mpsc::Sender<BrokerError>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();

        let task = tokio::spawn(drain(topic.to_owned(), rx, closed.clone()));

        let drain = Self {
            topic: topic.to_owned(),
            closed,
            task: Mutex::new(Some(task)),
        };
        (drain, tx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the channel and wait for the drain task to finish. Safe to call repeatedly.
    pub async fn close(&self) {
        self.closed.cancel();

        let Some(task) = self.task.lock().await.take() else {
            return;
        };

        if let Err(e) = task.await {
            warn!(topic = %self.topic, error = %e, "async error drain task did not exit cleanly");
        }
    }
}

async fn drain(topic: String, mut rx: mpsc::Receiver<BrokerError>, closed: CancellationToken) {
    let labels = [("topic", topic.clone())];

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                rx.close();
                break;
            }
            received = rx.recv() => match received {
                Some(e) => {
                    metrics::counter!(ASYNC_ERRORS, &labels).increment(1);
                    error!(topic = %topic, error = %e, "async errors");
                }
                None => break,
            }
        }
    }

    // Whatever was sent before the channel closed still gets logged.
    while let Some(e) = rx.recv().await {
        metrics::counter!(ASYNC_ERRORS, &labels).increment(1);
        error!(topic = %topic, error = %e, "async errors");
    }

    debug!(topic = %topic, "async error drain exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_stops_drain_and_closes_channel() {
        let (drain, tx) = AsyncErrorDrain::spawn("persistent://t/ns/name", 4);

        tx.send(BrokerError::Connection("reconnect failed".to_owned()))
            .await
            .expect("channel open before close");

        drain.close().await;

        assert!(drain.is_closed());
        assert!(tx.is_closed());
        assert!(tx.send(BrokerError::Timeout).await.is_err());

        // Closing again is a no-op.
        drain.close().await;
    }

    #[tokio::test]
    async fn test_drain_exits_when_all_senders_drop() {
        let (drain, tx) = AsyncErrorDrain::spawn("persistent://t/ns/name", 4);
        drop(tx);

        let task = drain.task.lock().await.take().expect("task is still owned");
        task.await.expect("drain exits cleanly");
    }
}
