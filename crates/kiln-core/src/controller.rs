//! Training controller.
//!
//! Owns the one [`SessionState`] for a window and is the only place it is mutated.
//! Every mutation goes through a `watch` channel so subscribers re-render on change.

use crate::error::{CoreError, Result};
use crate::probe::{CommandProbe, ProbeRunner};
use crate::resolver::InterpreterResolver;
use crate::settings::KilnSettings;
use crate::supervisor::{ProcessExit, ProcessSupervisor, RunChannels};
use kiln_training::{
    ComparisonPoint, ExperimentRecord, RecentHistory, RunId, SessionState, StderrFilter, TextSink,
    TrainingConfiguration, TrainingEvent, build_worker_args, compare, decode, export_metrics_csv,
    export_session,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Capacity of the decoded-event feed. Slow subscribers miss events, never the state.
const EVENT_FEED_CAPACITY: usize = 256;

pub struct TrainingController {
    settings: KilnSettings,
    resolver: InterpreterResolver,
    supervisor: ProcessSupervisor,
    state: Arc<watch::Sender<SessionState>>,
    events: broadcast::Sender<TrainingEvent>,
    history: Arc<Mutex<RecentHistory>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Held from the running check until the session is Running, across the resolve await.
    starting: tokio::sync::Mutex<()>,
}

impl TrainingController {
    /// Controller with real probes; history is loaded from `<data_dir>/history.json`.
    #[must_use]
    pub fn new(settings: KilnSettings) -> Self {
        let probe = Arc::new(CommandProbe::new(settings.probe_timeout()));
        Self::with_probe(settings, probe)
    }

    #[must_use]
    pub fn with_probe(settings: KilnSettings, probe: Arc<dyn ProbeRunner>) -> Self {
        let history = RecentHistory::load(&settings.history_path(), settings.history_capacity)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "starting with empty history");
                RecentHistory::new(settings.history_capacity)
            });
        let resolver = InterpreterResolver::from_settings(&settings, probe);
        let (state, _) = watch::channel(SessionState::new(TrainingConfiguration::default()));
        let (events, _) = broadcast::channel(EVENT_FEED_CAPACITY);

        Self {
            supervisor: ProcessSupervisor::new(settings.cancel_grace()),
            settings,
            resolver,
            state: Arc::new(state),
            events,
            history: Arc::new(Mutex::new(history)),
            pump: Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &KilnSettings {
        &self.settings
    }

    /// Start a run with `config`.
    ///
    /// Errors before a process exists (already running, no interpreter) leave the current
    /// session untouched. A missing script or a refused spawn replaces it with a Failed one.
    pub async fn start(&self, config: TrainingConfiguration) -> Result<RunId> {
        let Ok(_starting) = self.starting.try_lock() else {
            return Err(CoreError::AlreadyRunning);
        };
        if self.state.borrow().is_running() || self.supervisor.is_active() {
            return Err(CoreError::AlreadyRunning);
        }

        let script = self.settings.worker_script.clone();
        if !script.is_file() {
            let err = CoreError::ScriptNotFound(script);
            self.replace_failed(config, None, &err);
            return Err(err);
        }

        let interpreter = self.resolver.resolve(&config.environment).await?;
        let run_id = RunId::generate();
        let invocation =
            interpreter.invocation(build_worker_args(&config, &script, &run_id), run_id.clone());
        let command = invocation.display_command();

        let channels = match self.supervisor.start(&invocation) {
            Ok(channels) => channels,
            Err(CoreError::AlreadyRunning) => return Err(CoreError::AlreadyRunning),
            Err(err) => {
                self.replace_failed(config, Some(run_id), &err);
                return Err(err);
            }
        };

        let mut session = SessionState::new(config);
        session.begin(run_id.clone(), &command);
        self.state.send_replace(session);

        let handle = tokio::spawn(pump(
            channels,
            Arc::clone(&self.state),
            self.events.clone(),
            Arc::clone(&self.history),
            self.settings.stderr_filter(),
            self.settings.history_path(),
        ));
        *lock(&self.pump) = Some(handle);

        Ok(run_id)
    }

    /// Stop the current run. The session is Cancelled at once; the process follows.
    pub fn cancel(&self) -> Result<()> {
        if !self.state.send_if_modified(SessionState::cancel) {
            return Err(CoreError::NotRunning);
        }
        match self.supervisor.cancel() {
            Err(CoreError::NotRunning) => {
                tracing::debug!("worker already exited before cancel reached it");
                Ok(())
            }
            other => other,
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Every decoded stdout event of the current run, in order.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<TrainingEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Wait until the session is no longer running and return it.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| !s.is_running()).await {
            Ok(session) => session.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Wait for the worker process and all its output to be fully processed.
    pub async fn join(&self) -> SessionState {
        let handle = lock(&self.pump).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "session pump stopped unexpectedly");
            }
        }
        self.snapshot()
    }

    #[must_use]
    pub fn history(&self) -> Vec<ExperimentRecord> {
        lock(&self.history).to_vec()
    }

    /// Overlay two recorded runs by epoch.
    pub fn compare(&self, left: &str, right: &str) -> Result<Vec<ComparisonPoint>> {
        let history = lock(&self.history);
        let left = history.get(left).ok_or_else(|| CoreError::UnknownExperiment(left.to_string()))?;
        let right = history.get(right).ok_or_else(|| CoreError::UnknownExperiment(right.to_string()))?;
        Ok(compare(left, right))
    }

    pub fn export_json(&self, sink: &dyn TextSink, path: &Path) -> Result<()> {
        export_session(&self.snapshot(), sink, path)?;
        tracing::info!(path = %path.display(), "session exported");
        Ok(())
    }

    pub fn export_csv(&self, sink: &dyn TextSink, path: &Path) -> Result<()> {
        export_metrics_csv(&self.snapshot(), sink, path)?;
        tracing::info!(path = %path.display(), "metrics exported");
        Ok(())
    }

    fn replace_failed(&self, config: TrainingConfiguration, run_id: Option<RunId>, err: &CoreError) {
        let mut session = SessionState::new(config);
        session.fail_to_start(run_id, &err.to_string());
        self.state.send_replace(session);
    }
}

/// Feeds worker output into the session until the process is gone.
async fn pump(
    mut channels: RunChannels,
    state: Arc<watch::Sender<SessionState>>,
    events: broadcast::Sender<TrainingEvent>,
    history: Arc<Mutex<RecentHistory>>,
    filter: StderrFilter,
    history_path: PathBuf,
) {
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            line = channels.stdout.recv(), if stdout_open => match line {
                Some(line) => {
                    let event = decode(&line);
                    tracing::debug!(?event, "worker event");
                    let _ = events.send(event.clone());
                    state.send_if_modified(|s| s.apply_event(event));
                }
                None => stdout_open = false,
            },
            line = channels.stderr.recv(), if stderr_open => match line {
                Some(line) => {
                    state.send_if_modified(|s| s.apply_stderr(&line, &filter));
                }
                None => stderr_open = false,
            },
        }
    }

    let exit = channels
        .closed
        .await
        .unwrap_or_else(|_| ProcessExit::Errored("supervisor dropped the run".to_string()));

    let mut record = None;
    state.send_if_modified(|s| {
        let was_running = s.is_running();
        match &exit {
            ProcessExit::Exited(code) => record = s.close(*code),
            ProcessExit::Errored(message) => {
                s.close_with_error(message);
            }
        }
        was_running
    });

    if let Some(record) = record {
        let mut history = lock(&history);
        if let Some(evicted) = history.push(record) {
            tracing::debug!(id = %evicted.id, "oldest experiment evicted from history");
        }
        if let Err(e) = history.save(&history_path) {
            tracing::warn!(error = %e, path = %history_path.display(), "failed to save history");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
