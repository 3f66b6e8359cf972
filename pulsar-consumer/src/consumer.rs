use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{BrokerError, ManagedConsumer, Message};
use crate::drain::AsyncErrorDrain;
use crate::flow::FlowController;
use crate::handler::PayloadHandler;
use crate::metrics_consts::{
    ACK_ERRORS, HANDLER_ERRORS, MESSAGES_HANDLED, MESSAGES_RECEIVED, RECEIVE_ERRORS,
};

const RECEIVE_ERROR_BACKOFF: time::Duration = time::Duration::from_millis(100);

/// A logical consumer of one topic, however many partitions back it.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Deliver every message to `handler` until `shutdown` is cancelled or the consumer
    /// is stopped.
    async fn receive_and_handle(
        &self,
        shutdown: CancellationToken,
        handler: Arc<dyn PayloadHandler>,
    );

    /// Release every underlying subscription. Safe to call more than once, and from
    /// several tasks at the same time.
    async fn stop(&self);

    /// The concrete topics this consumer is subscribed to.
    fn topics(&self) -> Vec<String>;
}

/// Consumer of a single unpartitioned topic, or of one partition of a partitioned one.
pub struct SingleConsumer {
    inner: Arc<dyn ManagedConsumer>,
    topic: String,
    stopped: CancellationToken,
    released: AtomicBool,
    errors: Option<AsyncErrorDrain>,
}

impl SingleConsumer {
    pub fn new(inner: Arc<dyn ManagedConsumer>, topic: &str) -> Self {
        Self::with_stop_token(inner, topic, CancellationToken::new())
    }

    /// Build a consumer that also stops when `stopped` is cancelled, as members of a
    /// group do with a child of the group's token.
    pub(crate) fn with_stop_token(
        inner: Arc<dyn ManagedConsumer>,
        topic: &str,
        stopped: CancellationToken,
    ) -> Self {
        Self {
            inner,
            topic: topic.to_owned(),
            stopped,
            released: AtomicBool::new(false),
            errors: None,
        }
    }

    pub(crate) fn with_error_drain(mut self, errors: AsyncErrorDrain) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// The receive loop. Cancellation is only checked between messages, so a handler
    /// that has started always runs to completion.
    pub(crate) async fn run(
        &self,
        shutdown: &CancellationToken,
        handler: &dyn PayloadHandler,
        flow: Option<&FlowController>,
    ) {
        let labels = [("topic", self.topic.clone())];
        info!(topic = %self.topic, "starting receive loop");

        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = self.stopped.cancelled() => break,
                received = self.inner.receive() => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(BrokerError::Closed) => {
                    warn!(topic = %self.topic, "managed consumer closed, leaving receive loop");
                    break;
                }
                Err(e) => {
                    metrics::counter!(RECEIVE_ERRORS, &labels).increment(1);
                    error!(topic = %self.topic, error = %e, "failed to receive message");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.stopped.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => continue,
                    }
                }
            };
            metrics::counter!(MESSAGES_RECEIVED, &labels).increment(1);

            if let Some(flow) = flow {
                // Hold on to the message until a permit frees up. If we shut down
                // instead it stays unacked and the broker hands it out again.
                let acquired = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => false,
                    _ = self.stopped.cancelled() => false,
                    acquired = flow.acquire() => acquired,
                };
                if !acquired {
                    debug!(topic = %self.topic, message_id = %message.id, "stopped while waiting for flow permit");
                    break;
                }
            }

            self.handle(shutdown, handler, &message).await;
        }

        info!(topic = %self.topic, "receive loop exited");
    }

    async fn handle(
        &self,
        shutdown: &CancellationToken,
        handler: &dyn PayloadHandler,
        message: &Message,
    ) {
        let labels = [("topic", self.topic.clone())];

        if let Err(e) = handler
            .handle_payload(shutdown, message, &message.payload)
            .await
        {
            metrics::counter!(HANDLER_ERRORS, &labels).increment(1);
            error!(
                topic = %self.topic,
                message_id = %message.id,
                error = %e,
                "failed to handle payload"
            );
            return;
        }
        metrics::counter!(MESSAGES_HANDLED, &labels).increment(1);

        if let Err(e) = self.inner.ack(message).await {
            metrics::counter!(ACK_ERRORS, &labels).increment(1);
            warn!(topic = %self.topic, message_id = %message.id, error = %e, "failed to ack message");
        }
    }
}

#[async_trait]
impl Consumer for SingleConsumer {
    async fn receive_and_handle(
        &self,
        shutdown: CancellationToken,
        handler: Arc<dyn PayloadHandler>,
    ) {
        self.run(&shutdown, handler.as_ref(), None).await;
    }

    async fn stop(&self) {
        self.stopped.cancel();

        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.stop().await;
        if let Some(errors) = &self.errors {
            errors.close().await;
        }
        info!(topic = %self.topic, "consumer stopped");
    }

    fn topics(&self) -> Vec<String> {
        vec![self.topic.clone()]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bytes::Bytes;
    use tokio::sync::Mutex;

    use super::*;
    use crate::broker::{MessageId, MockManagedConsumer};

    struct Recorder {
        seen: Mutex<Vec<Bytes>>,
    }

    #[async_trait]
    impl PayloadHandler for Recorder {
        async fn handle_payload(
            &self,
            _shutdown: &CancellationToken,
            _message: &Message,
            payload: &[u8],
        ) -> anyhow::Result<()> {
            self.seen.lock().await.push(Bytes::copy_from_slice(payload));
            Ok(())
        }
    }

    fn message(entry_id: u64, payload: &'static str) -> Message {
        Message {
            topic: "persistent://t/ns/name".to_owned(),
            id: MessageId {
                partition: -1,
                ledger_id: 0,
                entry_id,
            },
            key: None,
            payload: Bytes::from_static(payload.as_bytes()),
            properties: HashMap::new(),
            publish_time_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_receive_errors_do_not_end_the_loop() {
        let mut managed = MockManagedConsumer::new();
        let mut calls = 0;
        managed.expect_receive().returning(move || {
            calls += 1;
            match calls {
                1 => Err(BrokerError::Connection("broker went away".to_owned())),
                2 => Ok(message(0, "hello")),
                _ => Err(BrokerError::Closed),
            }
        });
        managed.expect_ack().times(1).returning(|_| Ok(()));

        let consumer = SingleConsumer::new(Arc::new(managed), "persistent://t/ns/name");
        let handler = Arc::new(Recorder {
            seen: Mutex::new(vec![]),
        });

        consumer
            .receive_and_handle(CancellationToken::new(), handler.clone())
            .await;

        assert_eq!(*handler.seen.lock().await, vec![Bytes::from_static(b"hello")]);
    }

    #[tokio::test]
    async fn test_stop_releases_once() {
        let mut managed = MockManagedConsumer::new();
        managed.expect_stop().times(1).returning(|| ());

        let consumer = Arc::new(SingleConsumer::new(
            Arc::new(managed),
            "persistent://t/ns/name",
        ));

        let first = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.stop().await })
        };
        let second = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.stop().await })
        };
        first.await.unwrap();
        second.await.unwrap();
        consumer.stop().await;

        assert!(consumer.is_stopped());
        assert_eq!(consumer.topics(), vec!["persistent://t/ns/name".to_owned()]);
    }
}
