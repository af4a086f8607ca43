use crate::error::Result;
use crate::event::Emitter;
use crate::group::TaskGroup;
use crate::query::Query;
use crate::task::Task;
use crate::types::{Status, TaskId, TaskView};
use serde_json::Value;
use std::fmt;

/// Identity surface shared by task and group builders.
///
/// A builder's id is an opaque generated token; "was this produced by that
/// builder" is a value equality check on ids, never a name comparison or a
/// type check, so same-named builders cannot collide.
pub trait Builder {
    fn builder_id(&self) -> TaskId;
    fn builder_name(&self) -> &str;
    /// True iff `candidate` was stamped by this exact builder
    fn is(&self, candidate: &Executable) -> bool;
}

/// Query bindings attached to an executable when it is added to a container.
///
/// `own` covers the container holding the executable; `parent` covers the
/// enclosing container when the executable sits inside a nested group.
#[derive(Clone, Debug)]
pub struct QueryScope {
    pub own: Query,
    pub parent: Option<Query>,
}

/// Anything schedulable by the engine: a single task or a whole group.
///
/// A closed union rather than an open trait object, so the engine dispatches
/// with a plain match and containers stay composable (groups hold
/// executables, including other groups).
#[derive(Clone, Debug)]
pub enum Executable {
    Task(Task),
    Group(TaskGroup),
}

impl Executable {
    pub fn id(&self) -> TaskId {
        match self {
            Executable::Task(task) => task.id(),
            Executable::Group(group) => group.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Executable::Task(task) => task.name(),
            Executable::Group(group) => group.name(),
        }
    }

    /// Id of the builder that stamped this executable
    pub fn builder_id(&self) -> TaskId {
        match self {
            Executable::Task(task) => task.builder_id(),
            Executable::Group(group) => group.builder_id(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Executable::Task(task) => task.status(),
            Executable::Group(group) => group.status(),
        }
    }

    pub fn progress(&self) -> f64 {
        match self {
            Executable::Task(task) => task.progress(),
            Executable::Group(group) => group.progress(),
        }
    }

    /// Success payload: a task's recorded result. Groups carry no payload.
    pub fn result(&self) -> Option<Value> {
        match self {
            Executable::Task(task) => task.result(),
            Executable::Group(_) => None,
        }
    }

    /// The per-instance event channel of the underlying task or group
    pub fn events(&self) -> &Emitter {
        match self {
            Executable::Task(task) => task.events(),
            Executable::Group(group) => group.events(),
        }
    }

    /// Run the underlying work once. A task runs its body; a group drains
    /// its own queue per its execution mode.
    ///
    /// Groups can nest arbitrarily, so the future type is erased here at the
    /// method boundary to keep the recursion finite.
    pub fn execute(&self) -> futures::future::BoxFuture<'_, Result<Value>> {
        match self {
            Executable::Task(task) => Box::pin(task.execute()),
            Executable::Group(group) => Box::pin(async move {
                group.execute().await?;
                Ok(Value::Null)
            }),
        }
    }

    pub fn parse(&self) -> TaskView {
        match self {
            Executable::Task(task) => task.parse(),
            Executable::Group(group) => group.parse(),
        }
    }

    /// A brand-new idle instance with the same builder and construction data
    /// but a fresh identity
    pub fn clone_fresh(&self) -> Executable {
        match self {
            Executable::Task(task) => Executable::Task(task.clone_fresh()),
            Executable::Group(group) => Executable::Group(group.clone_fresh()),
        }
    }

    pub(crate) fn bind(&self, scope: QueryScope) {
        match self {
            Executable::Task(task) => task.bind(scope),
            Executable::Group(group) => group.bind(scope),
        }
    }
}

impl From<Task> for Executable {
    fn from(task: Task) -> Self {
        Executable::Task(task)
    }
}

impl From<TaskGroup> for Executable {
    fn from(group: TaskGroup) -> Self {
        Executable::Group(group)
    }
}

impl fmt::Display for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.status())
    }
}
