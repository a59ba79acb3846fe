use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::topology::Topology;
use crate::broker::{
    Broker, OffsetReset, Publisher, PublisherOptions, Subscriber, SubscriberOptions,
};
use crate::error::EngineError;
use crate::run_flag::RunFlag;
use crate::settings::EngineSettings;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// One consume-transform-produce loop with its own clients.
pub(crate) struct ExecutionUnit {
    id: usize,
    topology: Topology,
    subscriber: Box<dyn Subscriber>,
    publisher: Box<dyn Publisher>,
    poll_timeout: Duration,
}

impl ExecutionUnit {
    pub(crate) async fn build(
        id: usize,
        broker: &dyn Broker,
        topology: &Topology,
        settings: &EngineSettings,
        application_id: &str,
    ) -> Result<Self, EngineError> {
        let construction = |source| EngineError::Construction { unit: id, source };

        let mut subscriber = broker
            .create_subscriber(&SubscriberOptions {
                client_id: format!("{}-StreamThread-{}-consumer", settings.client_id, id),
                group_id: application_id.to_string(),
                offset_reset: OffsetReset::Earliest,
                manual_commit: true,
            })
            .await
            .map_err(construction)?;
        subscriber
            .subscribe(topology.source())
            .await
            .map_err(construction)?;

        let publisher = broker
            .create_publisher(&PublisherOptions::new(format!(
                "{}-StreamThread-{}-producer",
                settings.client_id, id
            )))
            .await
            .map_err(construction)?;

        Ok(Self {
            id,
            topology: topology.clone(),
            subscriber,
            publisher,
            poll_timeout: settings.poll_timeout,
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Process records until `running` is cleared. Returns the number of
    /// records forwarded.
    ///
    /// A poll in progress is abandoned on shutdown; a batch already polled is
    /// published and committed in full.
    pub(crate) async fn run(mut self, running: Arc<RunFlag>) -> Result<u64, EngineError> {
        let id = self.id;
        let sink = self.topology.sink().to_string();
        let mut processed = 0u64;
        debug!(unit = id, source = self.topology.source(), sink = %sink, "Execution unit started");

        while running.is_set() {
            let polled = tokio::select! {
                polled = self.subscriber.poll(self.poll_timeout) => polled,
                _ = running.cleared() => break,
            };
            let records = polled.map_err(|source| EngineError::Unit { unit: id, source })?;

            for record in records {
                let (key, value) = self.topology.apply(&record);
                self.publisher
                    .publish(&sink, key.as_deref(), value.as_deref())
                    .await
                    .map_err(|source| EngineError::Unit { unit: id, source })?;
                self.subscriber
                    .commit(&record)
                    .await
                    .map_err(|source| EngineError::Unit { unit: id, source })?;
                processed += 1;
            }
        }

        if let Err(e) = self.publisher.flush(FLUSH_TIMEOUT).await {
            warn!(unit = id, "Flush on unit shutdown failed: {}", e);
        }
        debug!(unit = id, processed, "Execution unit stopped");
        Ok(processed)
    }
}
