//! Timing and sizing knobs for a pipeline run.

use std::time::Duration;

/// Tunables for the transform engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Number of execution units to run concurrently
    pub num_units: usize,
    /// Bounded wait for each unit poll
    pub poll_timeout: Duration,
    /// Pause before a failed unit is replaced
    pub replace_backoff: Duration,
    /// Broker request timeout applied to engine clients
    pub request_timeout: Duration,
    /// Prefix of the generated application id
    pub application_id_prefix: String,
    /// Client id shared by the engine's clients
    pub client_id: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            num_units: 1,
            poll_timeout: Duration::from_millis(100),
            replace_backoff: Duration::from_secs(2),
            request_timeout: Duration::from_secs(60),
            application_id_prefix: "kafka-streams-app".to_string(),
            client_id: "streams-client-1".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.num_units == 0 {
            return Err("num_units must be > 0".to_string());
        }
        if self.poll_timeout.is_zero() {
            return Err("poll_timeout must be > 0".to_string());
        }
        if self.client_id.is_empty() {
            return Err("client_id cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Tunables for the orchestrator and its workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Pause between synthetic publishes
    pub produce_interval: Duration,
    /// Bounded wait for each verification poll
    pub poll_timeout: Duration,
    /// Upper bound on engine shutdown
    pub close_timeout: Duration,
    /// How long a worker may take to exit once signalled
    pub worker_grace: Duration,
    /// A worker exits after this many errors in a row
    pub max_consecutive_errors: u32,
    pub engine: EngineSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            produce_interval: Duration::from_secs(2),
            poll_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(10),
            worker_grace: Duration::from_secs(3),
            max_consecutive_errors: 30,
            engine: EngineSettings::default(),
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.produce_interval.is_zero() {
            return Err("produce_interval must be > 0".to_string());
        }
        if self.poll_timeout.is_zero() {
            return Err("poll_timeout must be > 0".to_string());
        }
        if self.max_consecutive_errors == 0 {
            return Err("max_consecutive_errors must be > 0".to_string());
        }
        self.engine.validate()
    }
}
