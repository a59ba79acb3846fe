//! Error types for the pipeline crate.
//!
//! Errors fall into three layers: [`BrokerError`] for individual client
//! operations, [`EngineError`] for the transform engine and its execution
//! units, and [`PipelineError`] for what the orchestrator reports to callers.

use kstreams_config::ConfigError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

use crate::orchestrator::RunState;

/// Errors raised by broker clients (publish, subscribe, poll, commit).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// A publisher or subscriber could not be created.
    #[error("Failed to create {client} client: {message}")]
    ClientCreation { client: String, message: String },

    /// Subscribing to a topic failed.
    #[error("Failed to subscribe to topic {topic}: {message}")]
    Subscribe { topic: String, message: String },

    /// A record could not be delivered.
    #[error("Failed to publish to topic {topic}: {message}")]
    Publish { topic: String, message: String },

    /// Polling for records failed.
    #[error("Poll failed: {0}")]
    Poll(String),

    /// Marking a record as processed failed.
    #[error("Commit failed: {0}")]
    Commit(String),

    /// SASL handshake or credential rejection.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The client was already shut down.
    #[error("Client closed")]
    Closed,

    /// Synthetic failure produced by the in-memory broker.
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl BrokerError {
    pub fn client_creation(client: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ClientCreation {
            client: client.into(),
            message: message.into(),
        }
    }

    pub fn subscribe(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            topic: topic.into(),
            message: message.into(),
        }
    }

    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Errors that no amount of unit replacement will fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Errors that are expected while clients are being torn down.
    pub fn is_shutdown_noise(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Classify an rdkafka error raised while publishing.
    pub fn from_publish(topic: &str, err: KafkaError) -> Self {
        match classify(&err) {
            Some(e) => e,
            None => Self::publish(topic, err.to_string()),
        }
    }

    /// Classify an rdkafka error raised while polling.
    pub fn from_poll(err: KafkaError) -> Self {
        match classify(&err) {
            Some(e) => e,
            None => Self::Poll(err.to_string()),
        }
    }
}

fn classify(err: &KafkaError) -> Option<BrokerError> {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::Authentication)
        | Some(RDKafkaErrorCode::SaslAuthenticationFailed) => {
            Some(BrokerError::Authentication(err.to_string()))
        }
        Some(RDKafkaErrorCode::BrokerDestroy) => Some(BrokerError::Closed),
        _ => None,
    }
}

/// Errors raised by the transform engine.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// The topology definition is unusable.
    #[error("Invalid topology: {0}")]
    Topology(String),

    /// An execution unit could not be built.
    #[error("Failed to construct execution unit {unit}: {source}")]
    Construction {
        unit: usize,
        #[source]
        source: BrokerError,
    },

    /// A running execution unit failed while processing.
    #[error("Execution unit {unit} failed: {source}")]
    Unit {
        unit: usize,
        #[source]
        source: BrokerError,
    },

    /// Engine settings are unusable.
    #[error("Invalid engine settings: {0}")]
    Settings(String),

    /// An execution unit panicked.
    #[error("Execution unit panicked: {0}")]
    Panicked(String),

    /// The requested lifecycle operation is not allowed in the current state.
    #[error("Engine cannot move from {from} to {to}")]
    InvalidState {
        from: crate::engine::EngineState,
        to: crate::engine::EngineState,
    },
}

impl EngineError {
    /// The broker error underneath, when there is one.
    pub fn broker_error(&self) -> Option<&BrokerError> {
        match self {
            Self::Construction { source, .. } | Self::Unit { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.broker_error().map(BrokerError::is_fatal).unwrap_or(false)
    }
}

/// Errors reported by the orchestrator to its callers.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("Pipeline is already {0}")]
    AlreadyRunning(RunState),

    #[error("Failed to construct transform engine: {0}")]
    EngineConstruction(#[from] EngineError),

    #[error("Failed to construct {worker}: {source}")]
    WorkerConstruction {
        worker: &'static str,
        #[source]
        source: BrokerError,
    },

    #[error("Pipeline start was interrupted: {0}")]
    Interrupted(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
