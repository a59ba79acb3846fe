//! Broker capability used by the engine and the workers.
//!
//! The pipeline only needs three things from a broker: publish a keyed
//! record, subscribe to a topic and poll it with a bounded wait, and mark a
//! consumed record as processed. [`kafka`] implements these over rdkafka and
//! [`memory`] keeps everything in process.

pub mod kafka;
pub mod memory;

use async_trait::async_trait;
use kstreams_config::PipelineConfig;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BrokerError;

pub use kafka::{KafkaBroker, KafkaConnector};
pub use memory::MemoryBroker;

pub type Result<T> = std::result::Result<T, BrokerError>;

/// A consumed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub value: Option<String>,
}

/// Acknowledgment of a published record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// Where a subscriber without a committed position starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherOptions {
    pub client_id: String,
}

impl PublisherOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberOptions {
    pub client_id: String,
    pub group_id: String,
    pub offset_reset: OffsetReset,
    /// Only records passed to [`Subscriber::commit`] count as processed
    pub manual_commit: bool,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one record and wait for its acknowledgment.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Delivery>;

    /// Wait up to `timeout` for outstanding deliveries.
    async fn flush(&self, timeout: Duration) -> Result<()>;
}

#[async_trait]
pub trait Subscriber: Send {
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Return the records available within `timeout`; empty on timeout.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>>;

    /// Mark `record` as processed for this subscriber's group.
    async fn commit(&mut self, record: &Record) -> Result<()>;
}

/// Factory for broker clients bound to one configuration.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn create_publisher(&self, options: &PublisherOptions) -> Result<Box<dyn Publisher>>;

    async fn create_subscriber(&self, options: &SubscriberOptions)
        -> Result<Box<dyn Subscriber>>;
}

/// Binds a run's configuration to a [`Broker`].
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, config: &PipelineConfig) -> Result<Arc<dyn Broker>>;
}
