use crate::error::{Error, Result};
use crate::event::{Emitter, Event};
use crate::executable::{Builder, Executable, QueryScope};
use crate::query::Query;
use crate::types::{Status, TaskData, TaskId, TaskView};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

pub(crate) type ExecuteFn =
    Arc<dyn Fn(TaskContext) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;
pub(crate) type ParseFn = Arc<dyn Fn(&Task, TaskView) -> TaskView + Send + Sync>;

/// Configuration for a task builder: a name, the async body, and an optional
/// hook refining the display view.
#[derive(Clone)]
pub struct TaskConfig {
    pub(crate) name: String,
    pub(crate) execute: ExecuteFn,
    pub(crate) parse: Option<ParseFn>,
}

impl TaskConfig {
    /// Create a config from a name and an async body.
    ///
    /// The body receives an explicit [`TaskContext`] handle exposing the
    /// captured input data, progress/warning/error reporting, and the
    /// container-scoped query once the task has been added somewhere.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let execute: ExecuteFn = Arc::new(move |ctx| Box::pin(body(ctx)));
        Self {
            name: name.into(),
            execute,
            parse: None,
        }
    }

    /// Attach a parse hook that can override or extend any field of the
    /// default [`TaskView`].
    pub fn with_parse<P>(mut self, parse: P) -> Self
    where
        P: Fn(&Task, TaskView) -> TaskView + Send + Sync + 'static,
    {
        self.parse = Some(Arc::new(parse));
        self
    }
}

impl fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskConfig")
            .field("name", &self.name)
            .field("parse", &self.parse.is_some())
            .finish()
    }
}

/// Create a task builder from a config.
///
/// The returned builder is both a constructor ([`TaskBuilder::build`] stamps
/// fresh idle tasks) and an identity token: every query lookup resolves
/// "made by this builder" through [`TaskBuilder::is`], which compares opaque
/// generated ids, never name strings. Two builders sharing a name never
/// match each other's tasks.
pub fn create_task(config: TaskConfig) -> TaskBuilder {
    TaskBuilder {
        inner: Arc::new(BuilderInner {
            id: Uuid::new_v4(),
            config,
        }),
    }
}

struct BuilderInner {
    id: TaskId,
    config: TaskConfig,
}

/// Identity-bearing constructor for tasks. Cheap to clone.
#[derive(Clone)]
pub struct TaskBuilder {
    inner: Arc<BuilderInner>,
}

impl TaskBuilder {
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Stamp a new idle task capturing `data` as its immutable input.
    pub fn build(&self, data: TaskData) -> Task {
        let now = Utc::now();
        Task {
            inner: Arc::new(TaskInner {
                id: Uuid::new_v4(),
                builder: self.clone(),
                data,
                state: Mutex::new(TaskState {
                    status: Status::Idle,
                    progress: 0.0,
                    result: None,
                    errors: Vec::new(),
                    warnings: Vec::new(),
                    created: now,
                    updated: now,
                }),
                events: Emitter::new(),
                scope: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn execute_fn(&self) -> ExecuteFn {
        self.inner.config.execute.clone()
    }

    pub(crate) fn parse_fn(&self) -> Option<ParseFn> {
        self.inner.config.parse.clone()
    }
}

impl Builder for TaskBuilder {
    fn builder_id(&self) -> TaskId {
        self.id()
    }

    fn builder_name(&self) -> &str {
        self.name()
    }

    /// True iff `candidate` is a task stamped by this exact builder.
    fn is(&self, candidate: &Executable) -> bool {
        matches!(candidate, Executable::Task(task) if task.builder_id() == self.id())
    }
}

impl fmt::Debug for TaskBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBuilder")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

struct TaskState {
    status: Status,
    progress: f64,
    result: Option<Value>,
    errors: Vec<Error>,
    warnings: Vec<String>,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

struct TaskInner {
    id: TaskId,
    builder: TaskBuilder,
    data: TaskData,
    state: Mutex<TaskState>,
    events: Emitter,
    scope: Mutex<Option<QueryScope>>,
}

/// A single unit of work.
///
/// A task is a cheap-clone handle over shared state: status, progress in
/// [0, 1], an optional success result, and append-only error/warning lists.
/// It executes its builder-supplied body at most once, and emits a change
/// notification on every state mutation.
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.builder.name()
    }

    /// The builder this task was stamped by
    pub fn builder(&self) -> &TaskBuilder {
        &self.inner.builder
    }

    pub fn builder_id(&self) -> TaskId {
        self.inner.builder.id()
    }

    /// The immutable input data captured at creation
    pub fn data(&self) -> &TaskData {
        &self.inner.data
    }

    pub fn status(&self) -> Status {
        crate::lock(&self.inner.state).status
    }

    pub fn progress(&self) -> f64 {
        crate::lock(&self.inner.state).progress
    }

    /// Present if and only if the task completed successfully
    pub fn result(&self) -> Option<Value> {
        crate::lock(&self.inner.state).result.clone()
    }

    pub fn errors(&self) -> Vec<Error> {
        crate::lock(&self.inner.state).errors.clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        crate::lock(&self.inner.state).warnings.clone()
    }

    pub fn created(&self) -> DateTime<Utc> {
        crate::lock(&self.inner.state).created
    }

    pub fn updated(&self) -> DateTime<Utc> {
        crate::lock(&self.inner.state).updated
    }

    /// This task's event channel
    pub fn events(&self) -> &Emitter {
        &self.inner.events
    }

    /// Run the task body once.
    ///
    /// Precondition: status is idle, otherwise fails with an invalid-state
    /// error without touching result or progress. On success the result is
    /// recorded, status becomes success, and progress is forced to 1. On
    /// failure the error is appended to the task's error list, status becomes
    /// failed, and the same error is returned so the owning loop can react.
    pub async fn execute(&self) -> Result<Value> {
        {
            let mut state = crate::lock(&self.inner.state);
            if state.status != Status::Idle {
                return Err(Error::invalid_state(format!(
                    "task `{}` is {}, expected idle",
                    self.name(),
                    state.status
                )));
            }
            state.status = Status::InProgress;
            state.updated = Utc::now();
        }
        debug!(task = %self.name(), id = %self.id(), "task started");
        self.inner.events.emit(&Event::Change);

        let ctx = TaskContext { task: self.clone() };
        let body = self.inner.builder.execute_fn();
        match body(ctx).await {
            Ok(value) => {
                let progress_changed = {
                    let mut state = crate::lock(&self.inner.state);
                    state.result = Some(value.clone());
                    state.status = Status::Success;
                    let changed = state.progress != 1.0;
                    state.progress = 1.0;
                    state.updated = Utc::now();
                    changed
                };
                debug!(task = %self.name(), id = %self.id(), "task succeeded");
                if progress_changed {
                    self.inner.events.emit(&Event::Progress(1.0));
                }
                self.inner.events.emit(&Event::Change);
                Ok(value)
            }
            Err(cause) => {
                let error = Error::execution(self.name(), cause);
                debug!(task = %self.name(), id = %self.id(), error = %error, "task failed");
                self.add_error(error.clone());
                Err(error)
            }
        }
    }

    /// Set progress, clamped to [0, 1]. Setting the current value is a
    /// silent no-op; otherwise a progress event and a change event fire.
    pub fn set_progress(&self, progress: f64) {
        let clamped = progress.clamp(0.0, 1.0);
        {
            let mut state = crate::lock(&self.inner.state);
            if state.progress == clamped {
                return;
            }
            state.progress = clamped;
            state.updated = Utc::now();
        }
        self.inner.events.emit(&Event::Progress(clamped));
        self.inner.events.emit(&Event::Change);
    }

    /// Append a warning and emit a change event.
    pub fn add_warning(&self, warning: impl Into<String>) {
        {
            let mut state = crate::lock(&self.inner.state);
            state.warnings.push(warning.into());
            state.updated = Utc::now();
        }
        self.inner.events.emit(&Event::Change);
    }

    /// Append an error, forcing status to failed (even mid-execution), and
    /// emit a change event.
    pub fn add_error(&self, error: Error) {
        {
            let mut state = crate::lock(&self.inner.state);
            state.errors.push(error);
            state.status = Status::Failed;
            state.updated = Utc::now();
        }
        self.inner.events.emit(&Event::Change);
    }

    /// Produce a display-oriented snapshot of this task.
    ///
    /// The default view derives a status line from name and status and fills
    /// warnings/errors/result when present; a builder-supplied hook may then
    /// override or extend any field.
    pub fn parse(&self) -> TaskView {
        let view = {
            let state = crate::lock(&self.inner.state);
            TaskView {
                status: format!("{}: {}", self.name(), state.status),
                warnings: (!state.warnings.is_empty()).then(|| state.warnings.clone()),
                errors: (!state.errors.is_empty())
                    .then(|| state.errors.iter().map(|e| e.to_string()).collect()),
                result: state.result.clone(),
            }
        };
        match self.inner.builder.parse_fn() {
            Some(hook) => hook(self, view),
            None => view,
        }
    }

    /// A brand-new idle task from the same builder and input data, with a
    /// fresh id. Runtime state (result, errors, progress) is never copied.
    pub fn clone_fresh(&self) -> Task {
        self.inner.builder.build(self.inner.data.clone())
    }

    pub(crate) fn bind(&self, scope: QueryScope) {
        *crate::lock(&self.inner.scope) = Some(scope);
    }

    pub(crate) fn scope(&self) -> Option<QueryScope> {
        crate::lock(&self.inner.scope).clone()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.status())
    }
}

/// Explicit handle passed into a task body while it runs.
///
/// Exposes the same operations the engine manages on the task's behalf:
/// input data, progress, warnings, errors, and the container-scoped query
/// for pulling predecessor results.
#[derive(Clone)]
pub struct TaskContext {
    task: Task,
}

impl TaskContext {
    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// The input data captured when the task was built
    pub fn data(&self) -> &TaskData {
        self.task.data()
    }

    pub fn set_progress(&self, progress: f64) {
        self.task.set_progress(progress);
    }

    pub fn add_warning(&self, warning: impl Into<String>) {
        self.task.add_warning(warning);
    }

    pub fn add_error(&self, error: anyhow::Error) {
        self.task
            .add_error(Error::execution(self.task.name(), error));
    }

    /// Query over the container this task was added to.
    ///
    /// Fails with an invalid-state error if the task was never added to a
    /// manager or group.
    pub fn query(&self) -> Result<Query> {
        self.task
            .scope()
            .map(|scope| scope.own)
            .ok_or_else(|| {
                Error::invalid_state(format!(
                    "task `{}` is not bound to a container yet",
                    self.task.name()
                ))
            })
    }

    /// Query over the enclosing container, for tasks inside nested groups.
    pub fn parent_query(&self) -> Result<Query> {
        self.task
            .scope()
            .and_then(|scope| scope.parent)
            .ok_or_else(|| {
                Error::invalid_state(format!(
                    "task `{}` has no parent container",
                    self.task.name()
                ))
            })
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task.name())
            .finish()
    }
}
