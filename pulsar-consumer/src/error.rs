use std::time;

use thiserror::Error;

use crate::broker::BrokerError;

/// Enumeration of errors produced when deriving names from a topic string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic {0:?} has no tenant separator")]
    MissingTenantSeparator(String),
    #[error("topic {0:?} has an empty tenant")]
    EmptyTenant(String),
}

/// Enumeration of errors caused by a consumer configuration that can never work.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("invalid topic: {0}")]
    Topic(#[from] TopicError),
    #[error("auth provider returned an empty auth method")]
    EmptyAuthMethod,
}

/// Enumeration of errors looking up the partition count of a topic.
/// These are kept apart from a confirmed unpartitioned topic and can be retried.
#[derive(Error, Debug)]
pub enum ResolutionError {
    #[error("partition lookup for {topic} timed out after {timeout:?}")]
    Timeout {
        topic: String,
        timeout: time::Duration,
    },
    #[error("partition lookup for {topic} failed: {source}")]
    Lookup {
        topic: String,
        #[source]
        source: BrokerError,
    },
}

/// Enumeration of errors returned when creating a consumer.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("failed to attach consumer to {topic}: {source}")]
    Connection {
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("client has been stopped")]
    ClientStopped,
}

impl From<TopicError> for ConsumerError {
    fn from(error: TopicError) -> Self {
        ConsumerError::Configuration(error.into())
    }
}
