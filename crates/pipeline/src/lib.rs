//! Uppercase streaming pipeline
//!
//! A transform engine reads an input topic, upper-cases every value and writes
//! the result to an output topic. Alongside it a synthetic producer feeds the
//! input topic and a verification consumer logs what arrives on the output
//! topic. The [`Orchestrator`] starts, supervises and stops all three as one
//! unit and reports progress through a [`LogSink`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kstreams_config::PipelineConfig;
//! use pipeline::{ConsoleSink, KafkaConnector, Orchestrator};
//!
//! # async fn run() -> Result<(), pipeline::PipelineError> {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(KafkaConnector::default()),
//!     Arc::new(ConsoleSink),
//! );
//! orchestrator.start(PipelineConfig::new("localhost:9092")).await?;
//! // ...
//! orchestrator.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod engine;
pub mod error;
pub mod log;
pub mod orchestrator;
pub mod run_flag;
pub mod settings;
pub mod workers;

pub use broker::{Broker, BrokerConnector, KafkaConnector, MemoryBroker};
pub use engine::{EngineState, StateChange, StreamsEngine, Topology, UnitRecovery};
pub use error::{BrokerError, EngineError, PipelineError, Result};
pub use log::{ChannelSink, ConsoleSink, LogLevel, LogRecord, LogSink, MemorySink, PipelineLog};
pub use orchestrator::{Orchestrator, RunState};
pub use run_flag::RunFlag;
pub use settings::{EngineSettings, PipelineSettings};
pub use workers::{ConsumerWorker, ProducerWorker, WorkerSummary};
