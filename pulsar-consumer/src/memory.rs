//! An in-process broker implementing [`ConnectionPool`], for tests and local runs.
//!
//! Topics are plain unbounded queues. Partitioned topics get one queue per
//! `<topic>-partition-<i>`. Messages are not redelivered when left unacknowledged.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::broker::{
    BrokerClientConfig, BrokerError, ConnectionPool, ManagedConsumer, ManagedConsumerConfig,
    Message, MessageId, PartitionMetadata,
};
use crate::topic::partition_topic;

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    stopped: AtomicBool,
    published: AtomicU64,
}

#[derive(Default)]
struct State {
    partitions: HashMap<String, u32>,
    queues: HashMap<String, Queue>,
    lookup_failure: Option<BrokerError>,
    lookup_delay: Option<time::Duration>,
    attach_failures: HashSet<String>,
    next_consumer: u64,
    // Both keyed by consumer id; entries go away when that consumer stops.
    error_sinks: BTreeMap<u64, mpsc::Sender<BrokerError>>,
    attached: BTreeMap<u64, ManagedConsumerConfig>,
    released: HashMap<String, usize>,
    acked: HashMap<String, Vec<MessageId>>,
}

struct Queue {
    tx: mpsc::UnboundedSender<Message>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    partition: i32,
    next_entry: u64,
}

impl Queue {
    fn new(partition: i32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            partition,
            next_entry: 0,
        }
    }
}

impl State {
    fn queue(&mut self, topic: &str, partition: i32) -> &mut Queue {
        self.queues
            .entry(topic.to_owned())
            .or_insert_with(|| Queue::new(partition))
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `topic` with `partitions` partitions. Zero means unpartitioned.
    pub async fn create_topic(&self, topic: &str, partitions: u32) {
        let mut state = self.inner.state.lock().await;
        state.partitions.insert(topic.to_owned(), partitions);

        if partitions == 0 {
            state.queue(topic, -1);
        } else {
            for i in 0..partitions {
                state.queue(&partition_topic(topic, i), i as i32);
            }
        }
    }

    /// Publish to `topic`, spreading messages of a partitioned topic round-robin.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> MessageId {
        let sequence = self.inner.published.fetch_add(1, Ordering::SeqCst);
        let partitions = self
            .inner
            .state
            .lock()
            .await
            .partitions
            .get(topic)
            .copied()
            .unwrap_or(0);

        if partitions == 0 {
            self.publish_to(topic, -1, payload.into()).await
        } else {
            let partition = (sequence % u64::from(partitions)) as u32;
            self.publish_to_partition(topic, partition, payload).await
        }
    }

    pub async fn publish_to_partition(
        &self,
        topic: &str,
        partition: u32,
        payload: impl Into<Bytes>,
    ) -> MessageId {
        self.publish_to(
            &partition_topic(topic, partition),
            partition as i32,
            payload.into(),
        )
        .await
    }

    async fn publish_to(&self, topic: &str, partition: i32, payload: Bytes) -> MessageId {
        let mut state = self.inner.state.lock().await;
        let queue = state.queue(topic, partition);

        let id = MessageId {
            partition: queue.partition,
            ledger_id: 0,
            entry_id: queue.next_entry,
        };
        queue.next_entry += 1;

        let message = Message {
            topic: topic.to_owned(),
            id,
            key: None,
            payload,
            properties: HashMap::new(),
            publish_time_ms: 0,
        };
        // The receiver lives in the queue itself, so this cannot fail.
        if queue.tx.send(message).is_err() {
            tracing::warn!(topic, "memory queue closed, message dropped");
        }
        id
    }

    /// Make every partition lookup fail with `error`, or succeed again with `None`.
    pub async fn fail_lookups(&self, error: Option<BrokerError>) {
        self.inner.state.lock().await.lookup_failure = error;
    }

    pub async fn delay_lookups(&self, delay: time::Duration) {
        self.inner.state.lock().await.lookup_delay = Some(delay);
    }

    /// Make attaching a consumer to the concrete `topic` fail.
    pub async fn fail_attach(&self, topic: &str) {
        self.inner
            .state
            .lock()
            .await
            .attach_failures
            .insert(topic.to_owned());
    }

    /// Report `error` to every attached consumer, as a client would for a failed reconnect.
    /// Returns how many channels accepted it.
    pub async fn report_async_error(&self, error: BrokerError) -> usize {
        let sinks: Vec<_> = self
            .inner
            .state
            .lock()
            .await
            .error_sinks
            .values()
            .cloned()
            .collect();
        let mut delivered = 0;
        for sink in sinks {
            if sink.send(error.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Configs of the consumers that are attached and not yet stopped, in attach order.
    pub async fn attached(&self) -> Vec<ManagedConsumerConfig> {
        self.inner
            .state
            .lock()
            .await
            .attached
            .values()
            .cloned()
            .collect()
    }

    pub async fn released(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .await
            .released
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    pub async fn acked(&self, topic: &str) -> Vec<MessageId> {
        self.inner
            .state
            .lock()
            .await
            .acked
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionPool for MemoryBroker {
    async fn partitions(
        &self,
        _config: &BrokerClientConfig,
        topic: &str,
    ) -> Result<PartitionMetadata, BrokerError> {
        let (failure, delay) = {
            let state = self.inner.state.lock().await;
            (state.lookup_failure.clone(), state.lookup_delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let state = self.inner.state.lock().await;
        Ok(PartitionMetadata {
            partitions: state.partitions.get(topic).copied().unwrap_or(0),
        })
    }

    async fn new_managed_consumer(
        &self,
        config: ManagedConsumerConfig,
    ) -> Result<Arc<dyn ManagedConsumer>, BrokerError> {
        if self.is_stopped() {
            return Err(BrokerError::Connection("pool has been stopped".to_owned()));
        }

        let mut state = self.inner.state.lock().await;
        if state.attach_failures.contains(&config.topic) {
            return Err(BrokerError::Connection(format!(
                "broker refused subscription to {}",
                config.topic
            )));
        }

        let rx = state.queue(&config.topic, -1).rx.clone();
        let id = state.next_consumer;
        state.next_consumer += 1;
        state.error_sinks.insert(id, config.client.errors.clone());
        state.attached.insert(id, config.clone());

        Ok(Arc::new(MemoryConsumer {
            id,
            topic: config.topic,
            rx,
            broker: self.inner.clone(),
            closed: CancellationToken::new(),
        }))
    }

    async fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.state.lock().await.error_sinks.clear();
    }
}

struct MemoryConsumer {
    id: u64,
    topic: String,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
    broker: Arc<Inner>,
    closed: CancellationToken,
}

#[async_trait]
impl ManagedConsumer for MemoryConsumer {
    async fn receive(&self) -> Result<Message, BrokerError> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(BrokerError::Closed),
            message = async { self.rx.lock().await.recv().await } => {
                message.ok_or(BrokerError::Closed)
            }
        }
    }

    async fn ack(&self, message: &Message) -> Result<(), BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::Closed);
        }

        self.broker
            .state
            .lock()
            .await
            .acked
            .entry(self.topic.clone())
            .or_default()
            .push(message.id);
        Ok(())
    }

    async fn stop(&self) {
        self.closed.cancel();

        let mut state = self.broker.state.lock().await;
        state.error_sinks.remove(&self.id);
        state.attached.remove(&self.id);
        *state.released.entry(self.topic.clone()).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{SubscriptionMode, TlsOptions};

    fn consumer_config(topic: &str, errors: mpsc::Sender<BrokerError>) -> ManagedConsumerConfig {
        ManagedConsumerConfig {
            client: BrokerClientConfig {
                addr: "pulsar://localhost:6650".to_owned(),
                auth_method: "token".to_owned(),
                auth_data: b"token".to_vec(),
                tls: TlsOptions::default(),
                errors,
            },
            topic: topic.to_owned(),
            subscription_mode: SubscriptionMode::Failover,
            name: "acme-sub".to_owned(),
            new_consumer_timeout: time::Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_stopped_consumer_leaves_the_broker() {
        let broker = MemoryBroker::new();
        broker.create_topic("persistent://acme/out/event", 2).await;

        // Both partitions report into the same channel, which stays open throughout.
        let (errors, mut rx) = mpsc::channel(10);
        let first = broker
            .new_managed_consumer(consumer_config(
                "persistent://acme/out/event-partition-0",
                errors.clone(),
            ))
            .await
            .unwrap();
        let second = broker
            .new_managed_consumer(consumer_config(
                "persistent://acme/out/event-partition-1",
                errors,
            ))
            .await
            .unwrap();

        assert_eq!(broker.attached().await.len(), 2);
        assert_eq!(broker.report_async_error(BrokerError::Timeout).await, 2);

        first.stop().await;

        let attached = broker.attached().await;
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].topic, "persistent://acme/out/event-partition-1");
        assert_eq!(broker.report_async_error(BrokerError::Timeout).await, 1);

        second.stop().await;

        assert!(broker.attached().await.is_empty());
        assert_eq!(broker.report_async_error(BrokerError::Timeout).await, 0);
        assert_eq!(broker.released("persistent://acme/out/event-partition-0").await, 1);

        for _ in 0..3 {
            assert_eq!(rx.recv().await, Some(BrokerError::Timeout));
        }
        assert!(rx.try_recv().is_err());
    }
}
