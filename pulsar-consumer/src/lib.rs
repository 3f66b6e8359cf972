//! Partition-aware consumers for Pulsar-style topics.
//!
//! A [`Client`] resolves how many partitions a topic has and hands back a single
//! [`Consumer`] that hides whether one or many underlying subscriptions are feeding it.
pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod consumer;
pub mod drain;
pub mod error;
pub mod flow;
pub mod handler;
pub mod memory;
pub mod metrics_consts;
pub mod partitioned;
pub mod resolver;
pub mod topic;

pub use auth::{AuthProvider, TokenAuthProvider};
pub use broker::{ConnectionPool, ManagedConsumer, Message, MessageId};
pub use client::Client;
pub use config::{ClientConfig, ConsumerConfig, FlowConfig, Region};
pub use consumer::{Consumer, SingleConsumer};
pub use error::{ConfigurationError, ConsumerError, ResolutionError, TopicError};
pub use handler::PayloadHandler;
pub use partitioned::PartitionedConsumer;
pub use resolver::{PartitionResolver, Partitioning};
pub use topic::{partition_topic, subscription_name, tenant, topic_for_access_id};
