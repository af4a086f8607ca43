use crate::event::{Emitter, Event, Transition};
use crate::executable::Executable;
use crate::query::Query;
use crate::types::{Status, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Which of the three disjoint flow sets an executable currently occupies.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FlowState {
    Pending,
    Active,
    Completed,
}

#[derive(Default)]
pub(crate) struct FlowInner {
    /// Every executable ever added, in insertion order. Drives aggregate
    /// progress math, query scans, and reset.
    pub(crate) order: Vec<Executable>,
    /// Insertion order of the pending set
    queue: VecDeque<TaskId>,
    pending: HashMap<TaskId, Executable>,
    active: HashMap<TaskId, Executable>,
    completed: HashMap<TaskId, Executable>,
}

impl FlowInner {
    fn tracked(&self, id: &TaskId) -> bool {
        self.pending.contains_key(id)
            || self.active.contains_key(id)
            || self.completed.contains_key(id)
    }
}

/// Tracks every executable's membership in exactly one of three disjoint
/// sets (pending, active, completed) and emits a transition event for each
/// move. Shared internal mechanism of [`TaskManager`](crate::TaskManager)
/// and [`TaskGroup`](crate::TaskGroup).
///
/// An executable passes through pending -> active -> completed in that
/// order; there are no reverse or skipping transitions.
#[derive(Clone)]
pub struct FlowController {
    inner: Arc<Mutex<FlowInner>>,
    events: Arc<Emitter>,
}

impl FlowController {
    /// Transition events are published on the given emitter, so a container
    /// can share one channel between its own notifications and flow moves.
    pub fn new(events: Arc<Emitter>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FlowInner::default())),
            events,
        }
    }

    /// Register an executable as pending. A duplicate id anywhere in the
    /// controller is rejected with a warning.
    pub fn add_task(&self, executable: Executable) {
        {
            let mut inner = crate::lock(&self.inner);
            if inner.tracked(&executable.id()) {
                warn!(id = %executable.id(), name = %executable.name(), "executable already tracked, ignoring add");
                return;
            }
            inner.order.push(executable.clone());
            inner.queue.push_back(executable.id());
            inner.pending.insert(executable.id(), executable.clone());
        }
        debug!(id = %executable.id(), name = %executable.name(), "executable queued");
        self.events.emit(&Event::Transition(Transition {
            from: None,
            to: Some(FlowState::Pending),
            task: executable.clone(),
        }));
        self.events.emit(&Event::Task(executable));
    }

    /// Move the oldest pending executable to active and return it, or `None`
    /// when nothing is pending.
    pub fn start_next(&self) -> Option<Executable> {
        let executable = {
            let mut inner = crate::lock(&self.inner);
            let id = inner.queue.pop_front()?;
            let executable = inner.pending.remove(&id)?;
            inner.active.insert(id, executable.clone());
            executable
        };
        debug!(id = %executable.id(), name = %executable.name(), "executable activated");
        self.events.emit(&Event::Transition(Transition {
            from: Some(FlowState::Pending),
            to: Some(FlowState::Active),
            task: executable.clone(),
        }));
        Some(executable)
    }

    /// Move every currently pending executable to active, in insertion
    /// order. The returned batch lets the caller launch the work and defer
    /// the completed transition until that work has settled.
    pub fn start_all(&self) -> StartedBatch {
        let started = {
            let mut inner = crate::lock(&self.inner);
            let ids: Vec<TaskId> = inner.queue.drain(..).collect();
            let mut started = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(executable) = inner.pending.remove(&id) {
                    inner.active.insert(id, executable.clone());
                    started.push(executable);
                }
            }
            started
        };
        for executable in &started {
            self.events.emit(&Event::Transition(Transition {
                from: Some(FlowState::Pending),
                to: Some(FlowState::Active),
                task: executable.clone(),
            }));
        }
        StartedBatch {
            flow: self.clone(),
            tasks: started,
        }
    }

    /// Move the given active executables to completed. Ids that are not
    /// currently active are skipped with a warning.
    pub fn complete(&self, ids: &[TaskId]) {
        for id in ids {
            let executable = {
                let mut inner = crate::lock(&self.inner);
                match inner.active.remove(id) {
                    Some(executable) => {
                        inner.completed.insert(*id, executable.clone());
                        executable
                    }
                    None => {
                        warn!(id = %id, "executable is not active, cannot complete");
                        continue;
                    }
                }
            };
            debug!(id = %executable.id(), name = %executable.name(), "executable completed");
            self.events.emit(&Event::Transition(Transition {
                from: Some(FlowState::Active),
                to: Some(FlowState::Completed),
                task: executable,
            }));
        }
    }

    /// Drop every pending executable entirely: removed from the pending set
    /// and from the ordered record (abandoned, not completed). Active and
    /// completed executables are untouched.
    pub fn clear_queue(&self) {
        let dropped = {
            let mut inner = crate::lock(&self.inner);
            if inner.pending.is_empty() {
                warn!("no pending executables to clear");
                return;
            }
            let ids: Vec<TaskId> = inner.queue.drain(..).collect();
            let mut dropped = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(executable) = inner.pending.remove(&id) {
                    inner.order.retain(|e| e.id() != id);
                    dropped.push(executable);
                }
            }
            dropped
        };
        debug!(count = dropped.len(), "pending queue cleared");
        for executable in dropped {
            self.events.emit(&Event::Transition(Transition {
                from: Some(FlowState::Pending),
                to: None,
                task: executable,
            }));
        }
    }

    /// Aggregate progress over everything ever tracked: the sum of each
    /// active/completed executable's progress (a failed one counts as 1.0
    /// when `error_as_success` is set, so a tolerated failure reads as done)
    /// divided by the total tracked count. An empty controller reads 0.0.
    pub fn calculate_progress(&self, error_as_success: bool) -> f64 {
        let inner = crate::lock(&self.inner);
        let total = inner.order.len();
        if total == 0 {
            return 0.0;
        }
        let sum: f64 = inner
            .active
            .values()
            .chain(inner.completed.values())
            .map(|executable| {
                if error_as_success && executable.status() == Status::Failed {
                    1.0
                } else {
                    executable.progress()
                }
            })
            .sum();
        sum / total as f64
    }

    /// Clear all three sets and the ordered record, returning the previously
    /// tracked executables in insertion order so the caller can clone and
    /// re-add them.
    pub fn reset(&self) -> Vec<Executable> {
        let mut inner = crate::lock(&self.inner);
        inner.queue.clear();
        inner.pending.clear();
        inner.active.clear();
        inner.completed.clear();
        std::mem::take(&mut inner.order)
    }

    /// Everything ever added, in insertion order
    pub fn tasks(&self) -> Vec<Executable> {
        crate::lock(&self.inner).order.clone()
    }

    /// Where the given id currently lives, if tracked
    pub fn state_of(&self, id: TaskId) -> Option<FlowState> {
        let inner = crate::lock(&self.inner);
        if inner.pending.contains_key(&id) {
            Some(FlowState::Pending)
        } else if inner.active.contains_key(&id) {
            Some(FlowState::Active)
        } else if inner.completed.contains_key(&id) {
            Some(FlowState::Completed)
        } else {
            None
        }
    }

    pub fn has_pending(&self) -> bool {
        !crate::lock(&self.inner).pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        crate::lock(&self.inner).pending.len()
    }

    pub fn active_count(&self) -> usize {
        crate::lock(&self.inner).active.len()
    }

    pub fn completed_count(&self) -> usize {
        crate::lock(&self.inner).completed.len()
    }

    pub fn len(&self) -> usize {
        crate::lock(&self.inner).order.len()
    }

    pub fn is_empty(&self) -> bool {
        crate::lock(&self.inner).order.is_empty()
    }

    /// Read-only query over this controller's ordered record
    pub fn query(&self) -> Query {
        Query::new(Arc::downgrade(&self.inner))
    }
}

impl std::fmt::Debug for FlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = crate::lock(&self.inner);
        f.debug_struct("FlowController")
            .field("pending", &inner.pending.len())
            .field("active", &inner.active.len())
            .field("completed", &inner.completed.len())
            .finish()
    }
}

/// A batch of executables moved from pending to active by
/// [`FlowController::start_all`]. Launch the work via [`tasks`](Self::tasks),
/// then call [`complete`](Self::complete) once it has settled to move exactly
/// these executables to completed.
#[derive(Debug)]
pub struct StartedBatch {
    flow: FlowController,
    tasks: Vec<Executable>,
}

impl StartedBatch {
    pub fn tasks(&self) -> &[Executable] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Move this batch from active to completed.
    pub fn complete(self) {
        let ids: Vec<TaskId> = self.tasks.iter().map(|e| e.id()).collect();
        self.flow.complete(&ids);
    }
}
