use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::auth::AuthProvider;
use crate::broker::{
    BrokerClientConfig, BrokerError, ConnectionPool, ManagedConsumer, ManagedConsumerConfig,
    SubscriptionMode, TlsOptions,
};
use crate::config::{ClientConfig, ConsumerConfig};
use crate::consumer::{Consumer, SingleConsumer};
use crate::drain::AsyncErrorDrain;
use crate::error::{ConfigurationError, ConsumerError, ResolutionError};
use crate::partitioned::PartitionedConsumer;
use crate::resolver::{PartitionResolver, Partitioning};
use crate::topic::{partition_topic, subscription_name};

/// Entry point for creating consumers against one broker endpoint.
///
/// A client owns exactly one connection pool, shared by every consumer it creates.
pub struct Client {
    config: ClientConfig,
    pool: Arc<dyn ConnectionPool>,
    resolver: PartitionResolver,
    stopped: AtomicBool,
}

impl Client {
    pub fn new(config: ClientConfig, pool: Arc<dyn ConnectionPool>) -> Self {
        let resolver = PartitionResolver::new(pool.clone(), config.partition_lookup_timeout.0);

        Self {
            config,
            pool,
            resolver,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Create a consumer for `config.topic`.
    ///
    /// Unpartitioned topics get a [`SingleConsumer`]; partitioned ones get a
    /// [`PartitionedConsumer`] with one member per partition. Every failure is returned
    /// here, nothing is deferred to the first receive.
    pub async fn new_consumer(
        &self,
        config: ConsumerConfig,
    ) -> Result<Box<dyn Consumer>, ConsumerError> {
        info!(pulsar = %self.config.pulsar_addr, topic = %config.topic, "start creating consumer");

        let name = subscription_name(&config.topic)?;
        if config.auth.auth_method().is_empty() {
            return Err(ConfigurationError::EmptyAuthMethod.into());
        }
        if self.is_stopped() {
            return Err(ConsumerError::ClientStopped);
        }

        let (errors, errors_tx) =
            AsyncErrorDrain::spawn(&config.topic, self.config.async_error_capacity);

        let managed_config = ManagedConsumerConfig {
            client: self.broker_client_config(config.auth.as_ref(), errors_tx),
            topic: config.topic.clone(),
            subscription_mode: SubscriptionMode::Failover,
            name,
            new_consumer_timeout: self.config.new_consumer_timeout.0,
        };

        let partitioning = match self
            .resolver
            .resolve(&managed_config.client, &config.topic)
            .await
        {
            Ok(partitioning) => partitioning,
            Err(e) => {
                errors.close().await;
                return Err(e.into());
            }
        };

        let consumer: Box<dyn Consumer> = match partitioning {
            Partitioning::Unpartitioned => match self.attach(managed_config).await {
                Ok(managed) => Box::new(
                    SingleConsumer::new(managed, &config.topic).with_error_drain(errors),
                ),
                Err(e) => {
                    errors.close().await;
                    return Err(e);
                }
            },
            Partitioning::Partitioned(partitions) => {
                let stopped = CancellationToken::new();
                let mut members = Vec::with_capacity(partitions.get() as usize);

                for partition in 0..partitions.get() {
                    let topic = partition_topic(&config.topic, partition);
                    let member_config = ManagedConsumerConfig {
                        topic: topic.clone(),
                        ..managed_config.clone()
                    };

                    match self.attach(member_config).await {
                        Ok(managed) => members.push(SingleConsumer::with_stop_token(
                            managed,
                            &topic,
                            stopped.child_token(),
                        )),
                        Err(e) => {
                            error!(topic = %topic, "releasing {} attached partitions", members.len());
                            for member in &members {
                                member.stop().await;
                            }
                            errors.close().await;
                            return Err(e);
                        }
                    }
                }

                Box::new(PartitionedConsumer::new(
                    &config.topic,
                    members,
                    config.flow,
                    stopped,
                    errors,
                ))
            }
        };

        info!(
            pulsar = %self.config.pulsar_addr,
            topic = %config.topic,
            partitions = partitioning.count(),
            "create consumer success"
        );
        Ok(consumer)
    }

    /// Look up how `topic` is partitioned, without creating a consumer.
    ///
    /// The lookup authenticates with `auth`, the same way [`Client::new_consumer`] does.
    /// Errors reported asynchronously during the lookup are logged until it returns.
    pub async fn resolve_partitions(
        &self,
        topic: &str,
        auth: &dyn AuthProvider,
    ) -> Result<Partitioning, ResolutionError> {
        let (errors, errors_tx) = AsyncErrorDrain::spawn(topic, self.config.async_error_capacity);
        let client_config = self.broker_client_config(auth, errors_tx);

        let partitioning = self.resolver.resolve(&client_config, topic).await;
        errors.close().await;
        partitioning
    }

    fn broker_client_config(
        &self,
        auth: &dyn AuthProvider,
        errors: mpsc::Sender<BrokerError>,
    ) -> BrokerClientConfig {
        BrokerClientConfig {
            addr: self.config.pulsar_addr.clone(),
            auth_method: auth.auth_method().to_owned(),
            auth_data: auth.auth_data(),
            tls: TlsOptions {
                skip_verify: self.config.tls_skip_verify,
            },
            errors,
        }
    }

    async fn attach(
        &self,
        config: ManagedConsumerConfig,
    ) -> Result<Arc<dyn ManagedConsumer>, ConsumerError> {
        let topic = config.topic.clone();
        let timeout = config.new_consumer_timeout;

        match tokio::time::timeout(timeout, self.pool.new_managed_consumer(config)).await {
            Ok(Ok(managed)) => Ok(managed),
            Ok(Err(source)) => Err(ConsumerError::Connection { topic, source }),
            Err(_) => Err(ConsumerError::Connection {
                topic,
                source: BrokerError::Timeout,
            }),
        }
    }

    /// Stop the connection pool shared by every consumer of this client.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pool.stop().await;
        info!(pulsar = %self.config.pulsar_addr, "client stopped");
    }
}
