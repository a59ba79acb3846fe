//! End-to-end lifecycle scenarios against the in-memory broker

mod common;

use async_trait::async_trait;
use common::{fast_settings, memory_pipeline, wait_for_condition};
use kstreams_config::PipelineConfig;
use pipeline::broker::{Broker, BrokerConnector};
use pipeline::{BrokerError, MemoryBroker, MemorySink, Orchestrator, PipelineError, RunState};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn config() -> PipelineConfig {
    PipelineConfig::new("localhost:9092")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_runs_transform_and_produces() {
    let (orchestrator, broker, sink) = memory_pipeline();

    orchestrator.start(config()).await.expect("start succeeds");
    assert_eq!(orchestrator.state(), RunState::Running);
    assert!(sink.contains("Kafka Streams application started successfully!"));

    assert!(wait_for_condition(|| sink.contains("State changed: REBALANCING -> RUNNING"), WAIT).await);
    assert!(wait_for_condition(|| sink.contains("Produced: key0 to partition "), WAIT).await);
    // Round trip through the transform engine.
    assert!(wait_for_condition(|| sink.contains("Consumed: key0 = VALUE0"), WAIT).await);
    // The transform commits under its application id.
    assert!(broker
        .groups()
        .iter()
        .any(|group| group.starts_with("kafka-streams-app-")));

    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), RunState::Stopped);
    assert!(sink.contains("State changed: RUNNING -> PENDING_SHUTDOWN"));
    assert!(sink.contains("State changed: PENDING_SHUTDOWN -> NOT_RUNNING"));
    assert_eq!(sink.messages().last().map(String::as_str), Some("Application stopped"));
    assert!(sink.errors().is_empty(), "unexpected errors: {:?}", sink.errors());
}

#[tokio::test]
async fn test_empty_bootstrap_is_rejected() {
    let (orchestrator, broker, sink) = memory_pipeline();

    let result = orchestrator.start(PipelineConfig::new("")).await;

    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    assert_eq!(orchestrator.state(), RunState::Stopped);
    assert!(sink.is_empty());
    assert!(broker.records("kstreams-topic3").is_empty());
}

#[tokio::test]
async fn test_same_input_and_output_topic_is_rejected() {
    let (orchestrator, _broker, sink) = memory_pipeline();

    let result = orchestrator
        .start(config().with_input_topic("loop").with_output_topic("loop"))
        .await;

    assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    assert_eq!(orchestrator.state(), RunState::Stopped);
    assert!(sink.is_empty());
}

/// Hands out the memory broker after a delay.
struct SlowConnector {
    broker: MemoryBroker,
    delay: Duration,
}

#[async_trait]
impl BrokerConnector for SlowConnector {
    async fn connect(
        &self,
        _config: &PipelineConfig,
    ) -> pipeline::broker::Result<Arc<dyn Broker>> {
        tokio::time::sleep(self.delay).await;
        Ok(Arc::new(self.broker.clone()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_start_still_settles() {
    let sink = MemorySink::new();
    let connector = SlowConnector {
        broker: MemoryBroker::new(),
        delay: Duration::from_millis(300),
    };
    let orchestrator = Orchestrator::new(Arc::new(connector), Arc::new(sink.clone()))
        .with_settings(fast_settings());

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), orchestrator.start(config())).await;
    assert!(abandoned.is_err());

    assert!(wait_for_condition(|| orchestrator.state() == RunState::Running, WAIT).await);
    assert!(sink.contains("Kafka Streams application started successfully!"));

    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), RunState::Stopped);

    orchestrator.start(config()).await.expect("restart succeeds");
    assert_eq!(orchestrator.state(), RunState::Running);
    orchestrator.stop().await;
}

#[tokio::test]
async fn test_stop_when_stopped_is_noop() {
    let (orchestrator, _broker, sink) = memory_pipeline();

    orchestrator.stop().await;
    orchestrator.stop().await;

    assert_eq!(orchestrator.state(), RunState::Stopped);
    assert!(sink.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_stop_emits_nothing() {
    let (orchestrator, _broker, sink) = memory_pipeline();

    orchestrator.start(config()).await.unwrap();
    orchestrator.stop().await;
    let lines = sink.len();
    orchestrator.stop().await;

    assert_eq!(sink.len(), lines);
    assert_eq!(sink.count("Application stopped"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_immediate_stop_leaves_no_orphans() {
    let (orchestrator, broker, sink) = memory_pipeline();
    broker.set_publish_latency(Duration::from_millis(200));

    orchestrator.start(config()).await.unwrap();
    orchestrator.stop().await;

    assert_eq!(orchestrator.state(), RunState::Stopped);
    assert!(sink.contains("Application stopped"));
    assert!(!sink.contains("Produced:"));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.messages().last().map(String::as_str), Some("Application stopped"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_is_bounded() {
    let (orchestrator, _broker, _sink) = memory_pipeline();
    let settings = orchestrator.settings();

    orchestrator.start(config()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    orchestrator.stop().await;
    assert!(started.elapsed() < settings.close_timeout + settings.worker_grace * 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_resets_sequence() {
    let (orchestrator, _broker, sink) = memory_pipeline();

    orchestrator.start(config()).await.unwrap();
    assert!(wait_for_condition(|| sink.contains("Produced: key2 "), WAIT).await);
    orchestrator.stop().await;

    let first_run = sink.len();
    orchestrator.start(config()).await.unwrap();
    assert!(wait_for_condition(|| sink.count("Produced: key0 ") == 2, WAIT).await);
    orchestrator.stop().await;

    let produced: Vec<String> = sink.messages()[first_run..]
        .iter()
        .filter(|m| m.starts_with("Produced: "))
        .cloned()
        .collect();
    assert!(produced[0].starts_with("Produced: key0 "));
    for (n, line) in produced.iter().enumerate() {
        assert!(line.starts_with(&format!("Produced: key{} ", n)), "{}", line);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_errors_after_stop_are_suppressed() {
    let (orchestrator, broker, sink) = memory_pipeline();
    broker.set_publish_latency(Duration::from_millis(150));
    broker.inject_publish_error(BrokerError::Injected("connection closed".into()));

    orchestrator.start(config()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    orchestrator.stop().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(sink.errors().is_empty(), "unexpected errors: {:?}", sink.errors());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_while_running_is_rejected() {
    let (orchestrator, _broker, _sink) = memory_pipeline();

    orchestrator.start(config()).await.unwrap();
    let second = orchestrator.start(config()).await;

    assert!(matches!(
        second,
        Err(PipelineError::AlreadyRunning(RunState::Running))
    ));
    assert_eq!(orchestrator.state(), RunState::Running);
    orchestrator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_processing_error_replaces_unit() {
    let (orchestrator, broker, sink) = memory_pipeline();

    orchestrator.start(config()).await.unwrap();
    assert!(wait_for_condition(|| sink.contains("Consumed: key0 = VALUE0"), WAIT).await);

    broker.inject_poll_error("kstreams-topic3", BrokerError::Poll("transient".into()));

    assert!(wait_for_condition(
        || sink.contains("ERROR: Execution unit 1 failed: Poll failed: transient"),
        WAIT
    )
    .await);
    assert!(wait_for_condition(|| sink.count("State changed: REBALANCING -> RUNNING") == 2, WAIT).await);
    assert_eq!(orchestrator.state(), RunState::Running);

    // Records keep flowing through the replacement unit.
    let before = sink.count("Consumed: ");
    assert!(wait_for_condition(|| sink.count("Consumed: ") > before + 2, WAIT).await);
    assert!(!sink.contains("Application stopped"));

    orchestrator.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fatal_engine_error_stops_pipeline() {
    let (orchestrator, broker, sink) = memory_pipeline();

    orchestrator.start(config()).await.unwrap();
    assert!(wait_for_condition(|| sink.contains("Produced: key0 "), WAIT).await);

    broker.inject_poll_error(
        "kstreams-topic3",
        BrokerError::Authentication("invalid credentials".into()),
    );

    tokio::time::timeout(WAIT, orchestrator.wait_until_stopped())
        .await
        .expect("pipeline stops by itself");
    assert!(wait_for_condition(|| orchestrator.state() == RunState::Stopped, WAIT).await);
    assert!(sink.contains("State changed: PENDING_ERROR -> ERROR"));
    assert!(sink.contains("Application stopped"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unrecoverable_unit_stops_pipeline() {
    let (orchestrator, broker, sink) = memory_pipeline();

    orchestrator.start(config()).await.unwrap();
    broker.fail_client_creation(true);
    broker.inject_poll_error("kstreams-topic3", BrokerError::Poll("lost partition".into()));

    tokio::time::timeout(WAIT, orchestrator.wait_until_stopped())
        .await
        .expect("pipeline stops by itself");
    assert!(sink.contains("ERROR: Execution unit 1 failed: Poll failed: lost partition"));
    assert!(sink.contains("-> ERROR"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_construction_failure_marks_failed() {
    let (orchestrator, broker, sink) = memory_pipeline();
    broker.fail_client_creation(true);

    let result = orchestrator.start(config()).await;

    assert!(matches!(
        result,
        Err(PipelineError::WorkerConstruction { worker: "producer", .. })
    ));
    assert_eq!(orchestrator.state(), RunState::Failed);
    assert!(sink.contains("ERROR starting application: "));
    assert!(sink.contains("Application stopped"));

    // Failed counts as stopped for the next attempt.
    broker.fail_client_creation(false);
    orchestrator.start(config()).await.expect("restart succeeds");
    assert_eq!(orchestrator.state(), RunState::Running);
    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), RunState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_state_watch_reports_transitions() {
    let (orchestrator, _broker, _sink) = memory_pipeline();
    let mut rx = orchestrator.subscribe_state();
    assert_eq!(*rx.borrow(), RunState::Stopped);

    orchestrator.start(config()).await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), RunState::Running);

    orchestrator.stop().await;
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), RunState::Stopped);
}
