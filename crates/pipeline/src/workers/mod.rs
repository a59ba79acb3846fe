//! Long-running traffic workers driven by the orchestrator.

mod consumer;
mod producer;

pub use consumer::ConsumerWorker;
pub use producer::ProducerWorker;

use std::fmt;

/// Counters returned by a worker when its loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub iterations: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl fmt::Display for WorkerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} iterations, {} succeeded, {} failed",
            self.iterations, self.succeeded, self.failed
        )
    }
}
