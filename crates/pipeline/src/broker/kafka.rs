//! rdkafka-backed broker clients.

use async_trait::async_trait;
use kstreams_config::PipelineConfig;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    Broker, BrokerConnector, Delivery, Publisher, PublisherOptions, Record, Result, Subscriber,
    SubscriberOptions,
};
use crate::error::BrokerError;

/// Upper bound on records drained by a single poll.
const MAX_POLL_RECORDS: usize = 500;

/// Creates a [`KafkaBroker`] for each run's configuration.
#[derive(Debug, Clone)]
pub struct KafkaConnector {
    request_timeout: Duration,
    retry_backoff: Duration,
}

impl KafkaConnector {
    pub fn new(request_timeout: Duration, retry_backoff: Duration) -> Self {
        Self {
            request_timeout,
            retry_backoff,
        }
    }
}

impl Default for KafkaConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(2))
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect(&self, config: &PipelineConfig) -> Result<Arc<dyn Broker>> {
        Ok(Arc::new(KafkaBroker::new(
            config,
            self.request_timeout,
            self.retry_backoff,
        )))
    }
}

/// Broker clients sharing one connection/security configuration.
#[derive(Clone)]
pub struct KafkaBroker {
    base: ClientConfig,
    request_timeout: Duration,
}

impl KafkaBroker {
    pub fn new(config: &PipelineConfig, request_timeout: Duration, retry_backoff: Duration) -> Self {
        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", config.bootstrap_servers())
            .set("retry.backoff.ms", retry_backoff.as_millis().to_string());

        if let Some(credentials) = config.credentials() {
            base.set("security.protocol", "SASL_SSL")
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", credentials.username())
                .set("sasl.password", credentials.password());
        }

        Self {
            base,
            request_timeout,
        }
    }

    fn producer_config(&self, options: &PublisherOptions) -> ClientConfig {
        let mut config = self.base.clone();
        config
            .set("client.id", &options.client_id)
            .set("acks", "all")
            .set("request.timeout.ms", self.request_timeout.as_millis().to_string());
        config
    }

    fn consumer_config(&self, options: &SubscriberOptions) -> ClientConfig {
        let mut config = self.base.clone();
        config
            .set("client.id", &options.client_id)
            .set("group.id", &options.group_id)
            .set("auto.offset.reset", options.offset_reset.as_str())
            .set("enable.auto.commit", "true")
            .set(
                "enable.auto.offset.store",
                (!options.manual_commit).to_string(),
            );
        config
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn create_publisher(&self, options: &PublisherOptions) -> Result<Box<dyn Publisher>> {
        let producer: FutureProducer = self
            .producer_config(options)
            .create()
            .map_err(|e| BrokerError::client_creation("producer", e.to_string()))?;

        debug!(client_id = %options.client_id, "Created Kafka producer");
        Ok(Box::new(KafkaPublisher {
            producer,
            queue_timeout: self.request_timeout,
        }))
    }

    async fn create_subscriber(
        &self,
        options: &SubscriberOptions,
    ) -> Result<Box<dyn Subscriber>> {
        let context = RebalanceLogger {
            client_id: options.client_id.clone(),
        };
        let consumer: StreamConsumer<RebalanceLogger> = self
            .consumer_config(options)
            .create_with_context(context)
            .map_err(|e| BrokerError::client_creation("consumer", e.to_string()))?;

        debug!(
            client_id = %options.client_id,
            group_id = %options.group_id,
            "Created Kafka consumer"
        );
        Ok(Box::new(KafkaSubscriber {
            consumer,
            manual_commit: options.manual_commit,
        }))
    }
}

/// Logs partition assignment changes for a consumer.
struct RebalanceLogger {
    client_id: String,
}

impl ClientContext for RebalanceLogger {}

impl ConsumerContext for RebalanceLogger {
    fn post_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions: Vec<(String, i32)> = tpl
                    .elements()
                    .iter()
                    .map(|elem| (elem.topic().to_string(), elem.partition()))
                    .collect();
                info!(client_id = %self.client_id, ?partitions, "Partitions assigned");
            }
            Rebalance::Revoke(_) => {
                info!(client_id = %self.client_id, "Partitions revoked");
            }
            Rebalance::Error(err) => {
                warn!(client_id = %self.client_id, "Rebalance error: {}", err);
            }
        }
    }
}

struct KafkaPublisher {
    producer: FutureProducer,
    queue_timeout: Duration,
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Delivery> {
        let mut record: FutureRecord<'_, str, str> = FutureRecord::to(topic);
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(value) = value {
            record = record.payload(value);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
            .map_err(|(err, _)| BrokerError::from_publish(topic, err))?;

        Ok(Delivery { partition, offset })
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| BrokerError::publish("*", e.to_string()))
    }
}

struct KafkaSubscriber {
    consumer: StreamConsumer<RebalanceLogger>,
    manual_commit: bool,
}

fn to_record(msg: &BorrowedMessage<'_>) -> Record {
    Record {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(|k| String::from_utf8_lossy(k).into_owned()),
        value: msg.payload().map(|v| String::from_utf8_lossy(v).into_owned()),
    }
}

#[async_trait]
impl Subscriber for KafkaSubscriber {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::subscribe(topic, e.to_string()))?;
        debug!(topic, "Subscribed");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>> {
        let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(Err(e)) => return Err(BrokerError::from_poll(e)),
            Ok(Ok(msg)) => to_record(&msg),
        };

        let mut batch = vec![first];
        while batch.len() < MAX_POLL_RECORDS {
            match tokio::time::timeout(Duration::ZERO, self.consumer.recv()).await {
                Ok(Ok(msg)) => batch.push(to_record(&msg)),
                Ok(Err(e)) => {
                    // Surfaced by the next poll if it persists.
                    debug!("Stopping batch drain on error: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }
        Ok(batch)
    }

    async fn commit(&mut self, record: &Record) -> Result<()> {
        if !self.manual_commit {
            return Ok(());
        }

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )
        .map_err(|e| BrokerError::Commit(e.to_string()))?;

        self.consumer
            .store_offsets(&tpl)
            .map_err(|e| BrokerError::Commit(e.to_string()))
    }
}
