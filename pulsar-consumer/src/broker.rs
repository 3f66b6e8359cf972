//! The narrow surface of the broker client library this crate relies on.
//!
//! Wire framing, TLS negotiation, reconnects and connection pooling all live behind
//! [`ConnectionPool`] and [`ManagedConsumer`]; this crate only composes them.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tokio::sync::mpsc;

/// Enumeration of errors reported by the underlying broker client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("lookup error: {0}")]
    Lookup(String),
    #[error("operation timed out")]
    Timeout,
    #[error("consumer has been closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// Position of a message within the partition it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub partition: i32,
    pub ledger_id: u64,
    pub entry_id: u64,
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.ledger_id, self.entry_id, self.partition)
    }
}

/// A message as delivered by a managed consumer. The payload is never interpreted here.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub id: MessageId,
    pub key: Option<String>,
    pub payload: Bytes,
    pub properties: HashMap<String, String>,
    pub publish_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub partitions: u32,
}

/// Consumers always join a failover subscription: one active consumer per partition,
/// with standbys taking over when it goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
    #[default]
    Failover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsOptions {
    /// Accept any certificate presented by the broker. Only meant for local setups.
    pub skip_verify: bool,
}

/// Connection level settings passed to every call into the pool.
#[derive(Clone)]
pub struct BrokerClientConfig {
    pub addr: String,
    pub auth_method: String,
    pub auth_data: Vec<u8>,
    pub tls: TlsOptions,
    /// Where the client reports errors that happen outside of a request, like failed
    /// reconnects. Owned by the consumer lifecycle, see `crate::drain`.
    pub errors: mpsc::Sender<BrokerError>,
}

impl fmt::Debug for BrokerClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerClientConfig")
            .field("addr", &self.addr)
            .field("auth_method", &self.auth_method)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ManagedConsumerConfig {
    pub client: BrokerClientConfig,
    pub topic: String,
    pub subscription_mode: SubscriptionMode,
    pub name: String,
    pub new_consumer_timeout: time::Duration,
}

/// A live subscription to a single topic or partition.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManagedConsumer: Send + Sync {
    /// Wait for the next message. Must be cancel safe: dropping the future loses nothing.
    async fn receive(&self) -> Result<Message, BrokerError>;

    async fn ack(&self, message: &Message) -> Result<(), BrokerError>;

    /// Close the subscription and hand the connection back to the pool.
    async fn stop(&self);
}

/// Pool of broker connections shared by every consumer a client creates.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn partitions(
        &self,
        config: &BrokerClientConfig,
        topic: &str,
    ) -> Result<PartitionMetadata, BrokerError>;

    async fn new_managed_consumer(
        &self,
        config: ManagedConsumerConfig,
    ) -> Result<Arc<dyn ManagedConsumer>, BrokerError>;

    async fn stop(&self);
}
