use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for tasks, groups, builders, and managers
pub type TaskId = Uuid;

/// Input data captured at task creation and the payload produced on success
pub type TaskData = Value;

/// Lifecycle status shared by tasks, groups, and managers.
///
/// Tasks only move `Idle -> InProgress -> {Failed, Success}`. Managers and
/// groups additionally reach `Stopped` when a cooperative stop request is
/// honored at a loop checkpoint.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Idle,
    InProgress,
    Failed,
    Success,
    Stopped,
}

impl Status {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Failed | Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Idle => "idle",
            Status::InProgress => "in progress",
            Status::Failed => "failed",
            Status::Success => "success",
            Status::Stopped => "stopped",
        };
        write!(f, "{label}")
    }
}

/// How a manager or group drains its pending queue.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// One executable runs to completion before the next starts (FIFO)
    #[default]
    Linear,
    /// The whole pending batch is started together and awaited concurrently
    Parallel,
}

/// Runtime behavior toggles for managers and groups.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Flag {
    /// Cooperative stop request, consumed at the next loop checkpoint
    Stop,
    /// Tolerate a failing member: collect the error and keep running
    ContinueOnError,
}

/// Display-oriented snapshot of a task, suitable for rendering.
///
/// Produced by `Task::parse()`; a builder-supplied hook may override or
/// extend any field of the default view.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TaskView {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}
