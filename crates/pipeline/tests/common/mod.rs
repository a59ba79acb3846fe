//! Common test utilities for integration tests

#![allow(dead_code)]

use pipeline::{EngineSettings, MemoryBroker, MemorySink, Orchestrator, PipelineSettings};
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{clients::Cli, Container, RunnableImage};
use testcontainers_modules::kafka::Kafka;

/// Test container wrapper for Kafka
pub struct KafkaTestContainer<'a> {
    pub container: Container<'a, Kafka>,
    pub bootstrap_servers: String,
}

impl<'a> KafkaTestContainer<'a> {
    /// Start a new Kafka test container
    pub fn start(docker: &'a Cli) -> Self {
        let container = docker.run(RunnableImage::from(Kafka::default()));
        let bootstrap_servers = format!("localhost:{}", container.get_host_port_ipv4(9093));

        // Wait for Kafka to be ready
        std::thread::sleep(Duration::from_secs(5));

        Self {
            container,
            bootstrap_servers,
        }
    }

    pub fn bootstrap_servers(&self) -> String {
        self.bootstrap_servers.clone()
    }
}

/// Settings with short intervals so scenarios finish quickly
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        produce_interval: Duration::from_millis(20),
        poll_timeout: Duration::from_millis(20),
        close_timeout: Duration::from_secs(2),
        worker_grace: Duration::from_secs(1),
        max_consecutive_errors: 30,
        engine: EngineSettings {
            poll_timeout: Duration::from_millis(20),
            replace_backoff: Duration::from_millis(20),
            ..Default::default()
        },
    }
}

/// An orchestrator wired to an in-memory broker and a memory sink
pub fn memory_pipeline() -> (Orchestrator, MemoryBroker, MemorySink) {
    let broker = MemoryBroker::new();
    let sink = MemorySink::new();
    let orchestrator = Orchestrator::new(Arc::new(broker.clone()), Arc::new(sink.clone()))
        .with_settings(fast_settings());
    (orchestrator, broker, sink)
}

/// Wait for a condition with timeout
pub async fn wait_for_condition<F>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
