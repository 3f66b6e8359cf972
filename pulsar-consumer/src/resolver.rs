use std::num::NonZeroU32;
use std::sync::Arc;
use std::time;

use tracing::{info, warn};

use crate::broker::{BrokerClientConfig, ConnectionPool};
use crate::error::ResolutionError;
use crate::metrics_consts::PARTITION_LOOKUP_ERRORS;

/// Outcome of a successful partition lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partitioning {
    /// The broker confirmed the topic has no partitions.
    Unpartitioned,
    Partitioned(NonZeroU32),
}

impl Partitioning {
    pub fn count(&self) -> u32 {
        match self {
            Partitioning::Unpartitioned => 0,
            Partitioning::Partitioned(n) => n.get(),
        }
    }
}

impl From<u32> for Partitioning {
    fn from(partitions: u32) -> Self {
        match NonZeroU32::new(partitions) {
            Some(n) => Partitioning::Partitioned(n),
            None => Partitioning::Unpartitioned,
        }
    }
}

/// Looks up partition counts through the pool, giving up after `timeout`.
#[derive(Clone)]
pub struct PartitionResolver {
    pool: Arc<dyn ConnectionPool>,
    timeout: time::Duration,
}

impl PartitionResolver {
    pub fn new(pool: Arc<dyn ConnectionPool>, timeout: time::Duration) -> Self {
        Self { pool, timeout }
    }

    pub async fn resolve(
        &self,
        config: &BrokerClientConfig,
        topic: &str,
    ) -> Result<Partitioning, ResolutionError> {
        let labels = [("topic", topic.to_owned())];

        let metadata = match tokio::time::timeout(self.timeout, self.pool.partitions(config, topic))
            .await
        {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(source)) => {
                metrics::counter!(PARTITION_LOOKUP_ERRORS, &labels).increment(1);
                warn!(topic, error = %source, "partition lookup failed");
                return Err(ResolutionError::Lookup {
                    topic: topic.to_owned(),
                    source,
                });
            }
            Err(_) => {
                metrics::counter!(PARTITION_LOOKUP_ERRORS, &labels).increment(1);
                warn!(topic, timeout = ?self.timeout, "partition lookup timed out");
                return Err(ResolutionError::Timeout {
                    topic: topic.to_owned(),
                    timeout: self.timeout,
                });
            }
        };

        let partitioning = Partitioning::from(metadata.partitions);
        info!(topic, partitions = partitioning.count(), "resolved partitions");
        Ok(partitioning)
    }
}
