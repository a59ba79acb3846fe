use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::WorkerSummary;
use crate::broker::{Broker, Publisher, PublisherOptions};
use crate::error::BrokerError;
use crate::log::PipelineLog;
use crate::run_flag::RunFlag;
use crate::settings::PipelineSettings;

const CLIENT_ID: &str = "synthetic-producer";
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Publishes `key<n>`/`value<n>` to the input topic on a fixed interval.
pub struct ProducerWorker {
    publisher: Box<dyn Publisher>,
    topic: String,
    interval: Duration,
    max_consecutive_errors: u32,
    log: PipelineLog,
}

impl ProducerWorker {
    pub async fn connect(
        broker: &dyn Broker,
        topic: &str,
        settings: &PipelineSettings,
        log: PipelineLog,
    ) -> Result<Self, BrokerError> {
        let publisher = broker
            .create_publisher(&PublisherOptions::new(CLIENT_ID))
            .await?;

        Ok(Self {
            publisher,
            topic: topic.to_string(),
            interval: settings.produce_interval,
            max_consecutive_errors: settings.max_consecutive_errors,
            log,
        })
    }

    /// Run until `running` is cleared or publishing keeps failing.
    pub async fn run(self, running: Arc<RunFlag>) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        let mut sequence: u64 = 0;
        let mut consecutive_errors = 0u32;

        while running.is_set() {
            let key = format!("key{}", sequence);
            let value = format!("value{}", sequence);
            sequence += 1;
            summary.iterations += 1;

            let result = tokio::select! {
                result = self.publisher.publish(&self.topic, Some(&key), Some(&value)) => result,
                _ = running.cleared() => {
                    debug!(%key, "Publish abandoned on shutdown");
                    break;
                }
            };

            match result {
                Ok(delivery) => {
                    summary.succeeded += 1;
                    consecutive_errors = 0;
                    self.log
                        .info(format!("Produced: {} to partition {}", key, delivery.partition));
                }
                Err(e) if !running.is_set() || e.is_shutdown_noise() => {
                    summary.failed += 1;
                    debug!("Suppressed producer error during shutdown: {}", e);
                }
                Err(e) => {
                    summary.failed += 1;
                    consecutive_errors += 1;
                    self.log.error(format!("Producer error: {}", e));
                    if consecutive_errors >= self.max_consecutive_errors {
                        self.log.error(format!(
                            "Producer stopping after {} consecutive errors",
                            consecutive_errors
                        ));
                        break;
                    }
                }
            }

            if !running.sleep(self.interval).await {
                break;
            }
        }

        if let Err(e) = self.publisher.flush(FLUSH_TIMEOUT).await {
            debug!("Producer flush on exit failed: {}", e);
        }
        debug!(%summary, "Producer worker stopped");
        summary
    }
}
