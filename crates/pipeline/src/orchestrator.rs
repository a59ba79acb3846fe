//! Pipeline lifecycle orchestration.
//!
//! The [`Orchestrator`] owns at most one live [`PipelineHandle`]: the
//! transform engine plus the producer and consumer worker tasks of the
//! current run. Lifecycle calls are serialized through an async mutex, and the
//! externally visible [`RunState`] is published on a `watch` channel.
//!
//! Start order: connect, build the engine and install its hooks, create both
//! worker clients, start the engine, then spawn the workers. Stop order:
//! clear the run flag, close the engine within its bound, then join each
//! worker within the grace period, aborting any that overstay.

use kstreams_config::{ConfigError, PipelineConfig};
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::BrokerConnector;
use crate::engine::{EngineState, StateChange, StreamsEngine, Topology, UnitRecovery};
use crate::error::{EngineError, PipelineError, Result};
use crate::log::{LogSink, PipelineLog};
use crate::run_flag::RunFlag;
use crate::settings::PipelineSettings;
use crate::workers::{ConsumerWorker, ProducerWorker, WorkerSummary};

/// Orchestrator-wide lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl RunState {
    /// `Failed` behaves like `Stopped` for the purpose of starting again.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn is_idle(&self) -> bool {
        self.can_start()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything created for one run.
struct PipelineHandle {
    generation: u64,
    settings: PipelineSettings,
    running: Arc<RunFlag>,
    engine: Option<StreamsEngine>,
    producer: Option<JoinHandle<WorkerSummary>>,
    consumer: Option<JoinHandle<WorkerSummary>>,
}

impl PipelineHandle {
    fn new(generation: u64, settings: PipelineSettings) -> Self {
        Self {
            generation,
            settings,
            running: Arc::new(RunFlag::running()),
            engine: None,
            producer: None,
            consumer: None,
        }
    }
}

#[derive(Default)]
struct Lifecycle {
    handle: Option<PipelineHandle>,
    generation: u64,
}

struct Inner {
    connector: Arc<dyn BrokerConnector>,
    log: PipelineLog,
    settings: RwLock<PipelineSettings>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<RunState>,
}

/// Starts, supervises and tears down the pipeline.
///
/// Cheap to clone; clones drive the same pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(connector: Arc<dyn BrokerConnector>, sink: Arc<dyn LogSink>) -> Self {
        let (state_tx, _) = watch::channel(RunState::Stopped);
        Self {
            inner: Arc::new(Inner {
                connector,
                log: PipelineLog::new(sink),
                settings: RwLock::new(PipelineSettings::default()),
                lifecycle: Mutex::new(Lifecycle::default()),
                state_tx,
            }),
        }
    }

    /// Replace the settings used by subsequent runs.
    pub fn with_settings(self, settings: PipelineSettings) -> Self {
        *self.inner.settings.write() = settings;
        self
    }

    pub fn settings(&self) -> PipelineSettings {
        self.inner.settings.read().clone()
    }

    pub fn state(&self) -> RunState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.inner.state_tx.subscribe()
    }

    /// Resolve once the pipeline is no longer starting, running or stopping.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.subscribe_state();
        let _ = rx.wait_for(RunState::is_idle).await;
    }

    /// Start a run with `config`.
    ///
    /// Returns as soon as every component is up; the workers keep running in
    /// the background until [`Orchestrator::stop`]. On a construction error
    /// the partial run is torn down and the state is left at `Failed`.
    ///
    /// The launch runs on its own task, so dropping the returned future does
    /// not abandon a half-started run: it still settles at `Running` or
    /// `Failed`.
    pub async fn start(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;
        let settings = self.settings();
        settings
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(ConfigError::InvalidConfig(e)))?;

        let orchestrator = self.clone();
        match tokio::spawn(async move { orchestrator.start_validated(config, settings).await }).await
        {
            Ok(result) => result,
            Err(e) => {
                self.set_state(RunState::Failed);
                Err(PipelineError::Interrupted(e.to_string()))
            }
        }
    }

    async fn start_validated(&self, config: PipelineConfig, settings: PipelineSettings) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let current = self.state();
        if !current.can_start() {
            return Err(PipelineError::AlreadyRunning(current));
        }

        lifecycle.generation += 1;
        let mut handle = PipelineHandle::new(lifecycle.generation, settings);
        self.set_state(RunState::Starting);
        info!(
            generation = handle.generation,
            bootstrap_servers = config.bootstrap_servers(),
            input_topic = config.input_topic(),
            output_topic = config.output_topic(),
            authenticated = config.credentials().is_some(),
            "Starting pipeline"
        );

        match self.launch(&config, &mut handle).await {
            Ok(()) => {
                lifecycle.handle = Some(handle);
                self.set_state(RunState::Running);
                self.inner
                    .log
                    .info("Kafka Streams application started successfully!");
                Ok(())
            }
            Err(e) => {
                self.set_state(RunState::Failed);
                self.inner
                    .log
                    .error(format!("ERROR starting application: {}", e));
                self.teardown(handle).await;
                Err(e)
            }
        }
    }

    /// Stop the current run. A no-op when nothing is running.
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await;
    }

    /// Stop only if the current run is still `generation`.
    async fn stop_generation(&self, generation: u64) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let current = lifecycle.handle.as_ref().map(|h| h.generation);
        if current != Some(generation) {
            debug!(generation, "Ignoring stop for a run that already ended");
            return;
        }
        self.stop_locked(&mut lifecycle).await;
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) {
        let Some(handle) = lifecycle.handle.take() else {
            return;
        };

        self.set_state(RunState::Stopping);
        self.teardown(handle).await;
        self.set_state(RunState::Stopped);
    }

    async fn launch(&self, config: &PipelineConfig, handle: &mut PipelineHandle) -> Result<()> {
        let log = self.inner.log.clone();
        let settings = handle.settings.clone();

        let broker = self
            .inner
            .connector
            .connect(config)
            .await
            .map_err(|source| PipelineError::WorkerConstruction {
                worker: "broker connection",
                source,
            })?;

        let engine = StreamsEngine::new(
            broker.clone(),
            Topology::uppercase(config.input_topic(), config.output_topic()),
            settings.engine.clone(),
        )?;
        self.install_hooks(&engine, handle.generation);
        let engine = handle.engine.insert(engine);

        let producer =
            ProducerWorker::connect(broker.as_ref(), config.input_topic(), &settings, log.clone())
                .await
                .map_err(|source| PipelineError::WorkerConstruction {
                    worker: "producer",
                    source,
                })?;
        let consumer =
            ConsumerWorker::connect(broker.as_ref(), config.output_topic(), &settings, log)
                .await
                .map_err(|source| PipelineError::WorkerConstruction {
                    worker: "consumer",
                    source,
                })?;

        engine.start().await?;
        debug!(application_id = engine.application_id(), "Transform engine started");

        handle.producer = Some(tokio::spawn(producer.run(handle.running.clone())));
        handle.consumer = Some(tokio::spawn(consumer.run(handle.running.clone())));
        Ok(())
    }

    fn install_hooks(&self, engine: &StreamsEngine, generation: u64) {
        let log = self.inner.log.clone();
        engine.on_uncaught_error(move |err: &EngineError| {
            log.error(format!("ERROR: {}", err));
            if err.is_fatal() {
                UnitRecovery::ShutdownEngine
            } else {
                UnitRecovery::ReplaceUnit
            }
        });

        let log = self.inner.log.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        engine.on_state_change(move |change: StateChange| {
            log.info(format!("State changed: {} -> {}", change.old, change.new));
            if change.new != EngineState::Error {
                return;
            }

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!("Engine failed outside a runtime; pipeline left for manual stop");
                return;
            };
            // Listener runs inside the engine; stop from a separate task.
            let orchestrator = Orchestrator { inner };
            runtime.spawn(async move {
                orchestrator.stop_generation(generation).await;
            });
        });
    }

    async fn teardown(&self, mut handle: PipelineHandle) {
        let log = &self.inner.log;
        let settings = &handle.settings;
        handle.running.clear();

        if let Some(engine) = handle.engine.take() {
            if !engine.close(settings.close_timeout).await {
                log.warn(format!(
                    "Transform engine did not close within {:?}",
                    settings.close_timeout
                ));
            }
        }

        let workers = [
            ("producer", handle.producer.take()),
            ("consumer", handle.consumer.take()),
        ];
        for (name, task) in workers {
            let Some(mut task) = task else {
                continue;
            };
            match tokio::time::timeout(settings.worker_grace, &mut task).await {
                Ok(Ok(summary)) => debug!(worker = name, %summary, "Worker stopped"),
                Ok(Err(e)) => warn!(worker = name, "Worker task failed: {}", e),
                Err(_) => {
                    task.abort();
                    log.warn(format!(
                        "The {} worker did not stop within {:?} and was aborted",
                        name, settings.worker_grace
                    ));
                }
            }
        }

        log.info("Application stopped");
    }

    fn set_state(&self, state: RunState) {
        let previous = self.inner.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Pipeline state changed");
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
