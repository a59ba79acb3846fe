use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::WorkerSummary;
use crate::broker::{Broker, OffsetReset, Subscriber, SubscriberOptions};
use crate::error::BrokerError;
use crate::log::PipelineLog;
use crate::run_flag::RunFlag;
use crate::settings::PipelineSettings;

const CLIENT_ID: &str = "verification-consumer";

/// Polls the output topic and logs every record it sees.
pub struct ConsumerWorker {
    subscriber: Box<dyn Subscriber>,
    group_id: String,
    poll_timeout: Duration,
    max_consecutive_errors: u32,
    log: PipelineLog,
}

impl ConsumerWorker {
    /// Create a subscriber in a fresh group and subscribe it to `topic`.
    ///
    /// The group starts at the end of the topic, so only records written
    /// after this call are observed.
    pub async fn connect(
        broker: &dyn Broker,
        topic: &str,
        settings: &PipelineSettings,
        log: PipelineLog,
    ) -> Result<Self, BrokerError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let group_id = format!("consumer-{}", &suffix[..8]);

        let mut subscriber = broker
            .create_subscriber(&SubscriberOptions {
                client_id: CLIENT_ID.to_string(),
                group_id: group_id.clone(),
                offset_reset: OffsetReset::Latest,
                manual_commit: false,
            })
            .await?;
        subscriber.subscribe(topic).await?;

        Ok(Self {
            subscriber,
            group_id,
            poll_timeout: settings.poll_timeout,
            max_consecutive_errors: settings.max_consecutive_errors,
            log,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Poll until `running` is cleared or polling keeps failing.
    pub async fn run(mut self, running: Arc<RunFlag>) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        let mut consecutive_errors = 0u32;

        while running.is_set() {
            summary.iterations += 1;

            let polled = tokio::select! {
                polled = self.subscriber.poll(self.poll_timeout) => polled,
                _ = running.cleared() => break,
            };

            match polled {
                Ok(records) => {
                    consecutive_errors = 0;
                    for record in records {
                        summary.succeeded += 1;
                        self.log.info(format!(
                            "Consumed: {} = {}",
                            record.key.as_deref().unwrap_or("null"),
                            record.value.as_deref().unwrap_or("null")
                        ));
                    }
                }
                Err(e) if !running.is_set() || e.is_shutdown_noise() => {
                    summary.failed += 1;
                    debug!("Suppressed consumer error during shutdown: {}", e);
                }
                Err(e) => {
                    summary.failed += 1;
                    consecutive_errors += 1;
                    self.log.error(format!("Consumer error: {}", e));
                    if consecutive_errors >= self.max_consecutive_errors {
                        self.log.error(format!(
                            "Consumer stopping after {} consecutive errors",
                            consecutive_errors
                        ));
                        break;
                    }
                    // Keep a failing broker from turning this into a busy loop.
                    if !running.sleep(self.poll_timeout).await {
                        break;
                    }
                }
            }
        }

        debug!(group_id = %self.group_id, %summary, "Consumer worker stopped");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::log::MemorySink;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            poll_timeout: Duration::from_millis(10),
            max_consecutive_errors: 2,
            ..Default::default()
        }
    }

    async fn worker(broker: &MemoryBroker, sink: &MemorySink) -> ConsumerWorker {
        ConsumerWorker::connect(
            broker,
            "out",
            &settings(),
            PipelineLog::new(Arc::new(sink.clone())),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_logs_records_written_after_subscribe() {
        let broker = MemoryBroker::with_partitions(1);
        let sink = MemorySink::new();
        broker.append("out", Some("stale"), Some("BEFORE"));

        let consumer = worker(&broker, &sink).await;
        assert!(consumer.group_id().starts_with("consumer-"));
        assert_eq!(consumer.group_id().len(), "consumer-".len() + 8);

        let running = Arc::new(RunFlag::running());
        let task = tokio::spawn(consumer.run(running.clone()));

        broker.append("out", Some("key0"), Some("VALUE0"));
        broker.append("out", None, None);
        while sink.len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        running.clear();
        let summary = task.await.unwrap();

        assert_eq!(
            sink.messages(),
            vec!["Consumed: key0 = VALUE0", "Consumed: null = null"]
        );
        assert_eq!(summary.succeeded, 2);
    }

    #[tokio::test]
    async fn test_empty_polls_are_not_errors() {
        let broker = MemoryBroker::new();
        let sink = MemorySink::new();
        let running = Arc::new(RunFlag::running());
        let task = tokio::spawn(worker(&broker, &sink).await.run(running.clone()));

        tokio::time::sleep(Duration::from_millis(60)).await;
        running.clear();
        let summary = task.await.unwrap();

        assert!(summary.iterations >= 2);
        assert_eq!(summary.failed, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_poll_errors_logged_until_threshold() {
        let broker = MemoryBroker::new();
        let sink = MemorySink::new();
        let consumer = worker(&broker, &sink).await;
        broker.inject_poll_error("out", BrokerError::Poll("broker down".into()));
        broker.inject_poll_error("out", BrokerError::Poll("broker down".into()));

        let running = Arc::new(RunFlag::running());
        let summary = consumer.run(running.clone()).await;

        assert_eq!(summary.failed, 2);
        assert_eq!(
            sink.errors(),
            vec![
                "Consumer error: Poll failed: broker down",
                "Consumer error: Poll failed: broker down",
                "Consumer stopping after 2 consecutive errors",
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_interrupts_poll() {
        let broker = MemoryBroker::new();
        let sink = MemorySink::new();
        let consumer = ConsumerWorker::connect(
            &broker,
            "out",
            &PipelineSettings {
                poll_timeout: Duration::from_secs(30),
                ..Default::default()
            },
            PipelineLog::new(Arc::new(sink.clone())),
        )
        .await
        .unwrap();

        let running = Arc::new(RunFlag::running());
        let task = tokio::spawn(consumer.run(running.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        running.clear();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("consumer exits promptly")
            .unwrap();
    }

    /// Fails every poll, clearing `running` first as a shutdown would.
    struct FailsDuringShutdown {
        running: Arc<RunFlag>,
    }

    #[async_trait::async_trait]
    impl Subscriber for FailsDuringShutdown {
        async fn subscribe(&mut self, _topic: &str) -> crate::broker::Result<()> {
            Ok(())
        }

        async fn poll(
            &mut self,
            _timeout: Duration,
        ) -> crate::broker::Result<Vec<crate::broker::Record>> {
            self.running.clear();
            Err(BrokerError::Poll("broker transport failure".into()))
        }

        async fn commit(&mut self, _record: &crate::broker::Record) -> crate::broker::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_error_after_flag_cleared_is_suppressed() {
        let sink = MemorySink::new();
        let running = Arc::new(RunFlag::running());
        let consumer = ConsumerWorker {
            subscriber: Box::new(FailsDuringShutdown {
                running: running.clone(),
            }),
            group_id: "consumer-0000abcd".to_string(),
            poll_timeout: Duration::from_millis(10),
            max_consecutive_errors: 3,
            log: PipelineLog::new(Arc::new(sink.clone())),
        };

        let summary = consumer.run(running.clone()).await;

        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.failed, 1);
        assert!(sink.is_empty(), "unexpected lines: {:?}", sink.messages());
    }
}
