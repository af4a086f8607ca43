use crate::error::Result;
use crate::event::{Emitter, Event};
use crate::executable::{Executable, QueryScope};
use crate::flow::FlowController;
use crate::query::Query;
use crate::types::{ExecutionMode, Flag, Status};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

struct RunnerState {
    status: Status,
    progress: f64,
    flags: HashSet<Flag>,
    mode: ExecutionMode,
    params: HashMap<String, Value>,
}

/// Queue-draining engine shared by [`TaskManager`] and
/// [`TaskGroup`](crate::TaskGroup): the flow controller, the manager-level
/// status/progress/flags, and the linear/parallel run loop.
pub(crate) struct RunnerCore {
    label: String,
    pub(crate) flow: FlowController,
    state: Mutex<RunnerState>,
    pub(crate) events: Arc<Emitter>,
    /// Query over the container this runner was itself added to (groups only)
    outer: Mutex<Option<Query>>,
}

impl RunnerCore {
    pub(crate) fn new(label: String, mode: ExecutionMode) -> Arc<Self> {
        let events = Arc::new(Emitter::new());
        Arc::new(Self {
            label,
            flow: FlowController::new(events.clone()),
            state: Mutex::new(RunnerState {
                status: Status::Idle,
                progress: 0.0,
                flags: HashSet::new(),
                mode,
                params: HashMap::new(),
            }),
            events,
            outer: Mutex::new(None),
        })
    }

    pub(crate) fn status(&self) -> Status {
        crate::lock(&self.state).status
    }

    pub(crate) fn progress(&self) -> f64 {
        crate::lock(&self.state).progress
    }

    pub(crate) fn mode(&self) -> ExecutionMode {
        crate::lock(&self.state).mode
    }

    pub(crate) fn set_mode(&self, mode: ExecutionMode) {
        let changed = {
            let mut state = crate::lock(&self.state);
            let changed = state.mode != mode;
            state.mode = mode;
            changed
        };
        if changed {
            self.events.emit(&Event::Change);
        }
    }

    pub(crate) fn add_flag(&self, flag: Flag) {
        if crate::lock(&self.state).flags.insert(flag) {
            self.events.emit(&Event::Change);
        }
    }

    pub(crate) fn remove_flag(&self, flag: Flag) {
        if crate::lock(&self.state).flags.remove(&flag) {
            self.events.emit(&Event::Change);
        }
    }

    pub(crate) fn has_flag(&self, flag: Flag) -> bool {
        crate::lock(&self.state).flags.contains(&flag)
    }

    pub(crate) fn flags(&self) -> HashSet<Flag> {
        crate::lock(&self.state).flags.clone()
    }

    pub(crate) fn set_param(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        crate::lock(&self.state).params.insert(name.clone(), value);
        self.events.emit(&Event::Param(name));
        self.events.emit(&Event::Change);
    }

    pub(crate) fn param(&self, name: &str) -> Option<Value> {
        crate::lock(&self.state).params.get(name).cloned()
    }

    fn set_status(&self, status: Status) {
        {
            let mut state = crate::lock(&self.state);
            state.status = status;
        }
        self.events.emit(&Event::Change);
    }

    /// Enqueue executables, binding each one's query scope to this runner
    /// and watching its progress so the aggregate stays current. Binding
    /// happens before the first run step, so task bodies can rely on their
    /// context query.
    pub(crate) fn add_tasks(self: &Arc<Self>, executables: Vec<Executable>) {
        if executables.is_empty() {
            return;
        }
        for executable in executables {
            self.bind_member(&executable);
            self.watch_member(&executable);
            self.flow.add_task(executable);
        }
        self.events.emit(&Event::Change);
    }

    fn bind_member(&self, executable: &Executable) {
        let parent = crate::lock(&self.outer).clone();
        executable.bind(QueryScope {
            own: self.flow.query(),
            parent,
        });
    }

    /// Recompute aggregate progress whenever a member reports progress.
    /// The backref is weak so a member never keeps its container alive.
    fn watch_member(self: &Arc<Self>, executable: &Executable) {
        let weak = Arc::downgrade(self);
        executable.events().subscribe(move |event| {
            if matches!(event, Event::Progress(_))
                && let Some(core) = weak.upgrade()
            {
                core.refresh_progress();
            }
        });
    }

    /// Called when this runner (a group) is itself added to a container:
    /// every member's parent query now points at that container.
    pub(crate) fn set_outer(&self, scope: QueryScope) {
        *crate::lock(&self.outer) = Some(scope.own.clone());
        for executable in self.flow.tasks() {
            executable.bind(QueryScope {
                own: self.flow.query(),
                parent: Some(scope.own.clone()),
            });
        }
    }

    fn refresh_progress(&self) {
        let tolerant = self.has_flag(Flag::ContinueOnError);
        let value = self.flow.calculate_progress(tolerant);
        let changed = {
            let mut state = crate::lock(&self.state);
            if state.progress == value {
                false
            } else {
                state.progress = value;
                true
            }
        };
        if changed {
            self.events.emit(&Event::Progress(value));
            self.events.emit(&Event::Change);
        }
    }

    /// The execution loop. One pending step per iteration (a single
    /// executable in linear mode, the whole pending batch in parallel mode),
    /// with failure and stop checkpoints between steps.
    pub(crate) async fn run(self: &Arc<Self>, force: bool) -> Result<()> {
        if !self.flow.has_pending() {
            warn!(name = %self.label, "queue is empty, nothing to start");
            return Ok(());
        }
        {
            let mut state = crate::lock(&self.state);
            match state.status {
                Status::InProgress => {
                    warn!(name = %self.label, "already running, ignoring start");
                    return Ok(());
                }
                Status::Success => {
                    warn!(name = %self.label, "already finished, ignoring start");
                    return Ok(());
                }
                Status::Failed if !force => {
                    warn!(name = %self.label, "previous run failed, pass force to resume");
                    return Ok(());
                }
                _ => {}
            }
            // a stop requested after the previous run ended is stale
            state.flags.remove(&Flag::Stop);
            state.status = Status::InProgress;
        }
        self.events.emit(&Event::Change);
        info!(name = %self.label, mode = ?self.mode(), "run started");

        loop {
            if !self.flow.has_pending() {
                break;
            }
            let tolerant = self.has_flag(Flag::ContinueOnError);
            let step = match self.mode() {
                ExecutionMode::Linear => self.step_linear().await,
                ExecutionMode::Parallel => self.step_parallel(tolerant).await,
            };
            if let Err(err) = step {
                if tolerant {
                    warn!(name = %self.label, error = %err, "member failed, continuing");
                } else {
                    // remaining pending work stays untouched for a forced resume
                    self.set_status(Status::Failed);
                    error!(name = %self.label, error = %err, "run failed");
                    self.events.emit(&Event::Fail(err.clone()));
                    return Err(err);
                }
            }
            if self.has_flag(Flag::Stop) {
                crate::lock(&self.state).flags.remove(&Flag::Stop);
                self.set_status(Status::Stopped);
                info!(name = %self.label, "run stopped on request");
                return Ok(());
            }
        }

        {
            let mut state = crate::lock(&self.state);
            state.status = Status::Success;
            state.progress = 1.0;
        }
        self.events.emit(&Event::Progress(1.0));
        self.events.emit(&Event::Success);
        self.events.emit(&Event::Change);
        info!(name = %self.label, "run succeeded");
        Ok(())
    }

    /// Run exactly one pending executable to completion. The executable
    /// lands in completed either way; a failure propagates to the loop.
    async fn step_linear(&self) -> Result<()> {
        let Some(executable) = self.flow.start_next() else {
            return Ok(());
        };
        let result = executable.execute().await;
        self.flow.complete(&[executable.id()]);
        result.map(|_| ())
    }

    /// Activate the whole pending batch and await every member. Failures are
    /// never raised before the batch has settled: concurrent work that has
    /// already started is awaited, not abandoned. In tolerant mode failures
    /// are collected and logged; otherwise the first one is re-raised.
    async fn step_parallel(&self, tolerant: bool) -> Result<()> {
        let batch = self.flow.start_all();
        let results = join_all(batch.tasks().iter().map(|e| e.execute())).await;
        batch.complete();

        let mut first_error = None;
        for result in results {
            if let Err(err) = result {
                if tolerant {
                    warn!(name = %self.label, error = %err, "member failed, continuing");
                } else if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn request_stop(&self) {
        {
            let mut state = crate::lock(&self.state);
            if state.status != Status::InProgress {
                warn!(name = %self.label, status = %state.status, "stop requested while not running");
                return;
            }
            state.flags.insert(Flag::Stop);
        }
        self.events.emit(&Event::Change);
        info!(name = %self.label, "stop requested");
    }

    /// Snapshot everything tracked, clear the controller, and repopulate the
    /// queue with fresh idle clones, enabling an exact re-run.
    pub(crate) fn reset(self: &Arc<Self>) {
        {
            let state = crate::lock(&self.state);
            match state.status {
                Status::InProgress => {
                    warn!(name = %self.label, "cannot reset while running");
                    return;
                }
                Status::Idle => {
                    warn!(name = %self.label, "already idle, nothing to reset");
                    return;
                }
                _ => {}
            }
        }
        let previous = self.flow.reset();
        {
            let mut state = crate::lock(&self.state);
            state.status = Status::Idle;
            state.progress = 0.0;
        }
        self.events.emit(&Event::Progress(0.0));
        self.events.emit(&Event::Change);
        let count = previous.len();
        self.add_tasks(previous.iter().map(Executable::clone_fresh).collect());
        info!(name = %self.label, count, "reset, queue repopulated with fresh clones");
    }
}

impl std::fmt::Debug for RunnerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerCore")
            .field("label", &self.label)
            .field("status", &self.status())
            .field("flow", &self.flow)
            .finish()
    }
}

/// Configuration for a [`TaskManager`].
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub name: String,
    pub mode: ExecutionMode,
    /// Start with [`Flag::ContinueOnError`] set
    pub continue_on_error: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "task-manager".to_string(),
            mode: ExecutionMode::Linear,
            continue_on_error: false,
        }
    }
}

/// Top-level orchestrator: owns a flow controller, runs the execution loop
/// in linear or parallel mode, and is the root query context for the
/// executables added to it.
///
/// A manager is a cheap-clone handle; clones share the same state, so one
/// can drive [`start`](Self::start) while another requests
/// [`stop`](Self::stop).
#[derive(Clone, Debug)]
pub struct TaskManager {
    core: Arc<RunnerCore>,
}

impl TaskManager {
    pub fn new(config: ManagerConfig) -> Self {
        let core = RunnerCore::new(config.name, config.mode);
        if config.continue_on_error {
            core.add_flag(Flag::ContinueOnError);
        }
        Self { core }
    }

    /// Enqueue one executable, binding its query context to this manager.
    pub fn add_task(&self, executable: impl Into<Executable>) {
        self.core.add_tasks(vec![executable.into()]);
    }

    /// Enqueue several executables, binding each query context to this
    /// manager.
    pub fn add_tasks(&self, executables: Vec<Executable>) {
        self.core.add_tasks(executables);
    }

    /// Run the loop until the queue is exhausted, a member failure aborts
    /// the run, or a stop request is honored.
    ///
    /// Starting with an empty queue, while already running, or after success
    /// is a logged no-op. Resuming a failed run requires `force`. On an
    /// aborted run the triggering error is returned and also published via
    /// [`Event::Fail`]; pending executables stay untouched for a later
    /// forced resume.
    pub async fn start(&self, force: bool) -> Result<()> {
        self.core.run(force).await
    }

    /// Request a cooperative stop, honored at the next loop checkpoint.
    /// In-flight work still completes its current step. Valid only while
    /// running; otherwise a logged no-op.
    pub fn stop(&self) {
        self.core.request_stop();
    }

    /// Re-arm the whole workflow: clears the controller and refills the
    /// queue with fresh idle clones (fresh ids) of every executable
    /// previously known. Valid only when neither running nor already idle.
    pub fn reset(&self) {
        self.core.reset();
    }

    /// Drop all pending (never started) executables. Active and completed
    /// ones are unaffected.
    pub fn clear_queue(&self) {
        self.core.flow.clear_queue();
    }

    pub fn add_flag(&self, flag: Flag) {
        self.core.add_flag(flag);
    }

    pub fn remove_flag(&self, flag: Flag) {
        self.core.remove_flag(flag);
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.core.has_flag(flag)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.core.mode()
    }

    pub fn set_mode(&self, mode: ExecutionMode) {
        self.core.set_mode(mode);
    }

    /// Set a named parameter, emitting param and change events.
    pub fn set_param(&self, name: impl Into<String>, value: Value) {
        self.core.set_param(name, value);
    }

    pub fn param(&self, name: &str) -> Option<Value> {
        self.core.param(name)
    }

    pub fn status(&self) -> Status {
        self.core.status()
    }

    pub fn progress(&self) -> f64 {
        self.core.progress()
    }

    /// Everything ever added, in insertion order
    pub fn tasks(&self) -> Vec<Executable> {
        self.core.flow.tasks()
    }

    /// Read-only lookup over this manager's executables
    pub fn query(&self) -> Query {
        self.core.flow.query()
    }

    /// This manager's event channel (change/progress/task/transition/
    /// success/fail/param)
    pub fn events(&self) -> &Emitter {
        self.core.events.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.core.flow.pending_count()
    }

    pub fn active_count(&self) -> usize {
        self.core.flow.active_count()
    }

    pub fn completed_count(&self) -> usize {
        self.core.flow.completed_count()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}
