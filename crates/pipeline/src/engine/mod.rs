//! Transform engine: a supervised set of execution units running one topology.
//!
//! The engine owns a group of [`ExecutionUnit`]s that share one consumer
//! group (the application id). A supervisor task watches the units; when one
//! fails it asks the installed uncaught-error handler whether to replace the
//! unit or shut the whole engine down. Every state transition is reported to
//! the state-change listener in order.

mod state;
mod topology;
mod unit;

pub use state::{EngineState, StateChange};
pub use topology::Topology;

use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::EngineError;
use crate::run_flag::RunFlag;
use crate::settings::EngineSettings;
use unit::ExecutionUnit;

/// What the engine should do about a failed execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRecovery {
    /// Start a fresh unit in place of the failed one
    ReplaceUnit,
    /// Stop every unit and move to ERROR
    ShutdownEngine,
}

type StateListener = Arc<dyn Fn(StateChange) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&EngineError) -> UnitRecovery + Send + Sync>;
type UnitSet = JoinSet<Result<u64, EngineError>>;

struct EngineShared {
    broker: Arc<dyn Broker>,
    topology: Topology,
    settings: EngineSettings,
    application_id: String,
    running: Arc<RunFlag>,
    state: Mutex<EngineState>,
    /// Serializes transitions with their listener calls
    transitions: Mutex<()>,
    state_listener: Mutex<Option<StateListener>>,
    error_handler: Mutex<Option<ErrorHandler>>,
    next_unit: AtomicUsize,
}

impl EngineShared {
    fn state(&self) -> EngineState {
        *self.state.lock()
    }

    fn transition(&self, next: EngineState) -> Result<(), EngineError> {
        let _serial = self.transitions.lock();
        let change = {
            let mut state = self.state.lock();
            let old = *state;
            if old == next {
                return Ok(());
            }
            if !old.can_transition_to(next) {
                return Err(EngineError::InvalidState { from: old, to: next });
            }
            *state = next;
            StateChange { old, new: next }
        };

        info!(
            application_id = %self.application_id,
            "Engine state {} -> {}", change.old, change.new
        );
        let listener = self.state_listener.lock().clone();
        if let Some(listener) = listener {
            listener(change);
        }
        Ok(())
    }

    fn recovery_for(&self, err: &EngineError) -> UnitRecovery {
        let handler = self.error_handler.lock().clone();
        match handler {
            Some(handler) => handler(err),
            None => {
                error!("Uncaught engine error with no handler installed: {}", err);
                UnitRecovery::ShutdownEngine
            }
        }
    }

    async fn build_unit(&self) -> Result<ExecutionUnit, EngineError> {
        let id = self.next_unit.fetch_add(1, Ordering::SeqCst) + 1;
        ExecutionUnit::build(
            id,
            self.broker.as_ref(),
            &self.topology,
            &self.settings,
            &self.application_id,
        )
        .await
    }

    fn spawn_unit(&self, units: &mut UnitSet, unit: ExecutionUnit) {
        debug!(unit = unit.id(), "Spawning execution unit");
        units.spawn(unit.run(self.running.clone()));
    }

    /// Stop every unit and settle in ERROR.
    async fn escalate(&self, units: &mut UnitSet) {
        if let Err(e) = self.transition(EngineState::PendingError) {
            debug!("Skipping escalation: {}", e);
        }
        self.running.clear();
        drain(units).await;
        let _ = self.transition(EngineState::Error);
    }
}

async fn drain(units: &mut UnitSet) {
    while let Some(joined) = units.join_next().await {
        match joined {
            Ok(Ok(processed)) => debug!(processed, "Execution unit drained"),
            Ok(Err(e)) => debug!("Execution unit failed while draining: {}", e),
            Err(e) => debug!("Execution unit did not finish cleanly: {}", e),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn supervise(shared: Arc<EngineShared>, mut units: UnitSet) {
    while let Some(joined) = units.join_next().await {
        let failure = match joined {
            Ok(Ok(processed)) => {
                debug!(processed, "Execution unit exited");
                continue;
            }
            Ok(Err(e)) => e,
            Err(e) if e.is_panic() => EngineError::Panicked(panic_message(e.into_panic())),
            Err(_) => continue,
        };

        if !shared.running.is_set() {
            debug!("Ignoring unit failure during shutdown: {}", failure);
            continue;
        }

        match shared.recovery_for(&failure) {
            UnitRecovery::ReplaceUnit => {
                if shared.transition(EngineState::Rebalancing).is_err() {
                    continue;
                }
                if !shared.running.sleep(shared.settings.replace_backoff).await {
                    continue;
                }
                match shared.build_unit().await {
                    Ok(unit) => {
                        shared.spawn_unit(&mut units, unit);
                        let _ = shared.transition(EngineState::Running);
                    }
                    Err(e) => {
                        error!("Replacement execution unit failed to start: {}", e);
                        shared.escalate(&mut units).await;
                        return;
                    }
                }
            }
            UnitRecovery::ShutdownEngine => {
                shared.escalate(&mut units).await;
                return;
            }
        }
    }
}

/// Supervised execution of a [`Topology`] against a broker.
pub struct StreamsEngine {
    shared: Arc<EngineShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl StreamsEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        topology: Topology,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        topology.validate()?;
        settings.validate().map_err(EngineError::Settings)?;

        let suffix = Uuid::new_v4().simple().to_string();
        let application_id = format!("{}-{}", settings.application_id_prefix, &suffix[..8]);
        debug!(%application_id, "{}", topology.describe());

        Ok(Self {
            shared: Arc::new(EngineShared {
                broker,
                topology,
                settings,
                application_id,
                running: Arc::new(RunFlag::new()),
                state: Mutex::new(EngineState::Created),
                transitions: Mutex::new(()),
                state_listener: Mutex::new(None),
                error_handler: Mutex::new(None),
                next_unit: AtomicUsize::new(0),
            }),
            supervisor: Mutex::new(None),
        })
    }

    pub fn application_id(&self) -> &str {
        &self.shared.application_id
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Install the state-change listener.
    ///
    /// Called synchronously on every transition; it must not call back into
    /// the engine's lifecycle methods.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        *self.shared.state_listener.lock() = Some(Arc::new(listener));
    }

    /// Install the handler consulted whenever an execution unit fails.
    ///
    /// Without a handler every failure shuts the engine down.
    pub fn on_uncaught_error<F>(&self, handler: F)
    where
        F: Fn(&EngineError) -> UnitRecovery + Send + Sync + 'static,
    {
        *self.shared.error_handler.lock() = Some(Arc::new(handler));
    }

    /// Build the execution units and begin processing.
    ///
    /// Returns once every unit is running; processing continues in the
    /// background. A unit that cannot be built leaves the engine in ERROR.
    pub async fn start(&self) -> Result<(), EngineError> {
        let shared = &self.shared;
        shared.transition(EngineState::Rebalancing)?;
        shared.running.set();

        let mut units = UnitSet::new();
        for _ in 0..shared.settings.num_units {
            match shared.build_unit().await {
                Ok(unit) => shared.spawn_unit(&mut units, unit),
                Err(e) => {
                    shared.escalate(&mut units).await;
                    return Err(e);
                }
            }
        }

        shared.transition(EngineState::Running)?;
        *self.supervisor.lock() = Some(tokio::spawn(supervise(shared.clone(), units)));
        Ok(())
    }

    /// Stop every unit, waiting up to `timeout` for in-flight records.
    ///
    /// Returns `false` if the units had to be aborted.
    pub async fn close(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        if shared.state() == EngineState::NotRunning {
            return true;
        }

        let _ = shared.transition(EngineState::PendingShutdown);
        shared.running.clear();

        let handle = self.supervisor.lock().take();
        let completed = match handle {
            None => true,
            Some(mut handle) => match tokio::time::timeout(timeout, &mut handle).await {
                Ok(_) => true,
                Err(_) => {
                    warn!(
                        application_id = %shared.application_id,
                        "Engine did not stop within {:?}; aborting execution units", timeout
                    );
                    handle.abort();
                    false
                }
            },
        };

        if shared.state() == EngineState::Error {
            let _ = shared.transition(EngineState::PendingShutdown);
        }
        let _ = shared.transition(EngineState::NotRunning);
        completed
    }
}

impl Drop for StreamsEngine {
    fn drop(&mut self) {
        self.shared.running.clear();
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}
