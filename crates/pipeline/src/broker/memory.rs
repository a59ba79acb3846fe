//! In-process broker.
//!
//! Topics are partitioned vectors of records, consumer groups keep committed
//! offsets, and waiting polls wake as soon as a record is appended. Faults can
//! be injected into publishing, polling and client creation so that
//! orchestrator behaviour can be exercised without a real cluster.

use async_trait::async_trait;
use dashmap::DashMap;
use kstreams_config::PipelineConfig;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{
    Broker, BrokerConnector, Delivery, OffsetReset, Publisher, PublisherOptions, Record, Result,
    Subscriber, SubscriberOptions,
};
use crate::error::BrokerError;

const DEFAULT_PARTITIONS: usize = 3;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Default)]
struct Faults {
    publish: VecDeque<BrokerError>,
    poll: HashMap<String, VecDeque<BrokerError>>,
}

#[derive(Debug)]
struct Inner {
    partitions: usize,
    topics: Mutex<HashMap<String, Vec<Vec<StoredRecord>>>>,
    /// Next offset to read, keyed by (group, topic, partition)
    committed: DashMap<(String, String, i32), i64>,
    appended: Notify,
    faults: Mutex<Faults>,
    fail_clients: AtomicBool,
    publish_latency: Mutex<Duration>,
    round_robin: AtomicUsize,
}

/// In-memory broker; clones share the same topics.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                topics: Mutex::new(HashMap::new()),
                committed: DashMap::new(),
                appended: Notify::new(),
                faults: Mutex::new(Faults::default()),
                fail_clients: AtomicBool::new(false),
                publish_latency: Mutex::new(Duration::ZERO),
                round_robin: AtomicUsize::new(0),
            }),
        }
    }

    /// Append a record directly, bypassing fault injection.
    pub fn append(&self, topic: &str, key: Option<&str>, value: Option<&str>) -> Delivery {
        let partition = self.partition_for(key);
        let offset = {
            let mut topics = self.inner.topics.lock();
            let log = &mut self.inner.ensure_topic(&mut topics, topic)[partition];
            log.push(StoredRecord {
                key: key.map(str::to_string),
                value: value.map(str::to_string),
            });
            (log.len() - 1) as i64
        };
        self.inner.appended.notify_waiters();

        Delivery {
            partition: partition as i32,
            offset,
        }
    }

    /// Every record of `topic`, ordered by partition then offset.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        let topics = self.inner.topics.lock();
        let Some(partitions) = topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter().enumerate().map(move |(offset, stored)| Record {
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset: offset as i64,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                })
            })
            .collect()
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.inner
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .map(|entry| *entry.value())
    }

    /// Consumer groups with at least one committed offset.
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .inner
            .committed
            .iter()
            .map(|entry| entry.key().0.clone())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }

    /// The next publish fails with `err`.
    pub fn inject_publish_error(&self, err: BrokerError) {
        self.inner.faults.lock().publish.push_back(err);
    }

    /// The next poll of `topic` fails with `err`.
    pub fn inject_poll_error(&self, topic: &str, err: BrokerError) {
        self.inner
            .faults
            .lock()
            .poll
            .entry(topic.to_string())
            .or_default()
            .push_back(err);
        self.inner.appended.notify_waiters();
    }

    /// While set, every publisher or subscriber creation fails.
    pub fn fail_client_creation(&self, fail: bool) {
        self.inner.fail_clients.store(fail, Ordering::SeqCst);
    }

    /// Delay every publish acknowledgment by `latency`.
    pub fn set_publish_latency(&self, latency: Duration) {
        *self.inner.publish_latency.lock() = latency;
    }

    fn partition_for(&self, key: Option<&str>) -> usize {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.inner.partitions as u64) as usize
            }
            None => self.inner.round_robin.fetch_add(1, Ordering::Relaxed) % self.inner.partitions,
        }
    }

    fn check_client_creation(&self, client: &str) -> Result<()> {
        if self.inner.fail_clients.load(Ordering::SeqCst) {
            return Err(BrokerError::client_creation(client, "broker unavailable"));
        }
        Ok(())
    }
}

impl Inner {
    fn ensure_topic<'a>(
        &self,
        topics: &'a mut HashMap<String, Vec<Vec<StoredRecord>>>,
        topic: &str,
    ) -> &'a mut Vec<Vec<StoredRecord>> {
        topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); self.partitions])
    }

    fn take_publish_fault(&self) -> Option<BrokerError> {
        self.faults.lock().publish.pop_front()
    }

    fn take_poll_fault(&self, topic: &str) -> Option<BrokerError> {
        self.faults
            .lock()
            .poll
            .get_mut(topic)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn create_publisher(&self, _options: &PublisherOptions) -> Result<Box<dyn Publisher>> {
        self.check_client_creation("producer")?;
        Ok(Box::new(MemoryPublisher {
            broker: self.clone(),
        }))
    }

    async fn create_subscriber(
        &self,
        options: &SubscriberOptions,
    ) -> Result<Box<dyn Subscriber>> {
        self.check_client_creation("consumer")?;
        Ok(Box::new(MemorySubscriber {
            broker: self.clone(),
            group_id: options.group_id.clone(),
            offset_reset: options.offset_reset,
            manual_commit: options.manual_commit,
            topic: None,
            positions: Vec::new(),
        }))
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, _config: &PipelineConfig) -> Result<Arc<dyn Broker>> {
        Ok(Arc::new(self.clone()))
    }
}

struct MemoryPublisher {
    broker: MemoryBroker,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Delivery> {
        let latency = *self.broker.inner.publish_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(err) = self.broker.inner.take_publish_fault() {
            return Err(err);
        }
        Ok(self.broker.append(topic, key, value))
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

struct MemorySubscriber {
    broker: MemoryBroker,
    group_id: String,
    offset_reset: OffsetReset,
    manual_commit: bool,
    topic: Option<String>,
    /// Next offset to read per partition
    positions: Vec<i64>,
}

impl MemorySubscriber {
    fn fetch(&mut self, topic: &str) -> Vec<Record> {
        let topics = self.broker.inner.topics.lock();
        let Some(partitions) = topics.get(topic) else {
            return Vec::new();
        };

        let mut batch = Vec::new();
        for (partition, log) in partitions.iter().enumerate() {
            let position = &mut self.positions[partition];
            for (offset, stored) in log.iter().enumerate().skip(*position as usize) {
                batch.push(Record {
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset: offset as i64,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                });
            }
            *position = log.len() as i64;
        }
        batch
    }

    fn store(&self, topic: &str, partition: i32, next_offset: i64) {
        self.broker.inner.committed.insert(
            (self.group_id.clone(), topic.to_string(), partition),
            next_offset,
        );
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        let inner = &self.broker.inner;
        let lengths: Vec<i64> = {
            let mut topics = inner.topics.lock();
            inner
                .ensure_topic(&mut topics, topic)
                .iter()
                .map(|log| log.len() as i64)
                .collect()
        };

        self.positions = lengths
            .iter()
            .enumerate()
            .map(|(partition, len)| {
                let committed = self.broker.committed_offset(&self.group_id, topic, partition as i32);
                match (committed, self.offset_reset) {
                    (Some(offset), _) => offset,
                    (None, OffsetReset::Earliest) => 0,
                    (None, OffsetReset::Latest) => *len,
                }
            })
            .collect();
        self.topic = Some(topic.to_string());
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>> {
        let topic = self
            .topic
            .clone()
            .ok_or_else(|| BrokerError::Poll("not subscribed".to_string()))?;
        let deadline = Instant::now() + timeout;
        let inner = self.broker.inner.clone();

        loop {
            let notified = inner.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(err) = inner.take_poll_fault(&topic) {
                return Err(err);
            }

            let batch = self.fetch(&topic);
            if !batch.is_empty() {
                if !self.manual_commit {
                    for (partition, position) in self.positions.iter().enumerate() {
                        self.store(&topic, partition as i32, *position);
                    }
                }
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&mut self, record: &Record) -> Result<()> {
        if self.manual_commit {
            self.store(&record.topic, record.partition, record.offset + 1);
        }
        Ok(())
    }
}
