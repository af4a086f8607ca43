use crate::error::{Error, Result};
use crate::event::Emitter;
use crate::executable::{Builder, Executable, QueryScope};
use crate::manager::RunnerCore;
use crate::query::Query;
use crate::types::{ExecutionMode, Flag, Status, TaskData, TaskId, TaskView};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

type SeedFn = Arc<dyn Fn(&TaskData) -> anyhow::Result<Vec<Executable>> + Send + Sync>;

/// Configuration for a group builder: a name, an execution mode, and an
/// optional closure seeding initial members from the construction data.
#[derive(Clone)]
pub struct GroupConfig {
    pub(crate) name: String,
    pub(crate) mode: ExecutionMode,
    pub(crate) tasks: Option<SeedFn>,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            name: name.into(),
            mode,
            tasks: None,
        }
    }

    /// Seed members from the data passed to [`GroupBuilder::build`].
    pub fn with_tasks<F>(mut self, tasks: F) -> Self
    where
        F: Fn(&TaskData) -> anyhow::Result<Vec<Executable>> + Send + Sync + 'static,
    {
        self.tasks = Some(Arc::new(tasks));
        self
    }
}

impl fmt::Debug for GroupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupConfig")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("tasks", &self.tasks.is_some())
            .finish()
    }
}

/// Create a group builder from a config. Like a task builder, it is both a
/// constructor and the identity token later query lookups compare against.
pub fn create_group(config: GroupConfig) -> GroupBuilder {
    GroupBuilder {
        inner: Arc::new(GroupBuilderInner {
            id: Uuid::new_v4(),
            config,
        }),
    }
}

struct GroupBuilderInner {
    id: TaskId,
    config: GroupConfig,
}

/// Identity-bearing constructor for task groups. Cheap to clone.
#[derive(Clone)]
pub struct GroupBuilder {
    inner: Arc<GroupBuilderInner>,
}

impl GroupBuilder {
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Construct a fresh idle group, seeding members from `data` when the
    /// config carries a seed closure.
    pub fn build(&self, data: TaskData) -> Result<TaskGroup> {
        let group = TaskGroup::bare(self.clone(), data, self.inner.config.mode);
        if let Some(seed) = &self.inner.config.tasks {
            let members =
                seed(group.data()).map_err(|cause| Error::execution(self.name(), cause))?;
            group.add_tasks(members);
        }
        Ok(group)
    }
}

impl Builder for GroupBuilder {
    fn builder_id(&self) -> TaskId {
        self.id()
    }

    fn builder_name(&self) -> &str {
        self.name()
    }

    /// True iff `candidate` is a group stamped by this exact builder.
    fn is(&self, candidate: &Executable) -> bool {
        matches!(candidate, Executable::Group(group) if group.builder_id() == self.id())
    }
}

impl fmt::Debug for GroupBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBuilder")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

struct GroupInner {
    id: TaskId,
    builder: GroupBuilder,
    data: TaskData,
    core: Arc<RunnerCore>,
}

/// A named collection of executables that itself behaves like one.
///
/// A group owns its own flow controller and drains it with the same loop a
/// manager uses, in its declared execution mode. Groups compose: members can
/// be tasks or further groups. Like a task, a group executes at most once
/// and moves idle -> in-progress -> {failed, success}.
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

impl TaskGroup {
    fn bare(builder: GroupBuilder, data: TaskData, mode: ExecutionMode) -> TaskGroup {
        let label = builder.name().to_string();
        TaskGroup {
            inner: Arc::new(GroupInner {
                id: Uuid::new_v4(),
                builder,
                data,
                core: RunnerCore::new(label, mode),
            }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.builder.name()
    }

    pub fn builder(&self) -> &GroupBuilder {
        &self.inner.builder
    }

    pub fn builder_id(&self) -> TaskId {
        self.inner.builder.id()
    }

    /// The construction data captured at build time
    pub fn data(&self) -> &TaskData {
        &self.inner.data
    }

    pub fn status(&self) -> Status {
        self.inner.core.status()
    }

    /// Aggregate of member progress
    pub fn progress(&self) -> f64 {
        self.inner.core.progress()
    }

    pub fn mode(&self) -> ExecutionMode {
        self.inner.core.mode()
    }

    pub fn add_flag(&self, flag: Flag) {
        self.inner.core.add_flag(flag);
    }

    pub fn remove_flag(&self, flag: Flag) {
        self.inner.core.remove_flag(flag);
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.inner.core.has_flag(flag)
    }

    /// Set a named parameter, emitting param and change events.
    pub fn set_param(&self, name: impl Into<String>, value: Value) {
        self.inner.core.set_param(name, value);
    }

    pub fn param(&self, name: &str) -> Option<Value> {
        self.inner.core.param(name)
    }

    /// Add a member, binding its query context to this group.
    pub fn add_task(&self, executable: impl Into<Executable>) {
        self.inner.core.add_tasks(vec![executable.into()]);
    }

    /// Add members, binding each query context to this group.
    pub fn add_tasks(&self, executables: Vec<Executable>) {
        self.inner.core.add_tasks(executables);
    }

    /// Every member ever added, in insertion order
    pub fn tasks(&self) -> Vec<Executable> {
        self.inner.core.flow.tasks()
    }

    /// Read-only lookup over this group's members
    pub fn query(&self) -> Query {
        self.inner.core.flow.query()
    }

    /// This group's event channel
    pub fn events(&self) -> &Emitter {
        self.inner.core.events.as_ref()
    }

    /// Drain the member queue once, per this group's execution mode.
    ///
    /// Precondition: status is idle; a rerun fails with an invalid-state
    /// error. A member failure aborts the group (unless
    /// [`Flag::ContinueOnError`] is set) and propagates to the enclosing
    /// loop.
    pub async fn execute(&self) -> Result<()> {
        if self.status() != Status::Idle {
            return Err(Error::invalid_state(format!(
                "group `{}` is {}, expected idle",
                self.name(),
                self.status()
            )));
        }
        self.inner.core.run(false).await
    }

    /// Display-oriented snapshot of this group.
    pub fn parse(&self) -> TaskView {
        TaskView {
            status: format!("{}: {}", self.name(), self.status()),
            ..TaskView::default()
        }
    }

    /// A brand-new idle group from the same builder and construction data:
    /// fresh id, behavior flags carried over (a pending stop request is
    /// not), every member replaced by its own fresh clone.
    pub fn clone_fresh(&self) -> TaskGroup {
        let clone = TaskGroup::bare(
            self.inner.builder.clone(),
            self.inner.data.clone(),
            self.mode(),
        );
        for flag in self.inner.core.flags() {
            if flag != Flag::Stop {
                clone.add_flag(flag);
            }
        }
        clone.add_tasks(self.tasks().iter().map(Executable::clone_fresh).collect());
        clone
    }

    pub(crate) fn bind(&self, scope: QueryScope) {
        self.inner.core.set_outer(scope);
    }

    pub fn pending_count(&self) -> usize {
        self.inner.core.flow.pending_count()
    }

    pub fn active_count(&self) -> usize {
        self.inner.core.flow.active_count()
    }

    pub fn completed_count(&self) -> usize {
        self.inner.core.flow.completed_count()
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .field("members", &self.tasks().len())
            .finish()
    }
}

impl fmt::Display for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.status())
    }
}
