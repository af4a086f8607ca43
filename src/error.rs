use std::sync::Arc;

/// Errors surfaced by the orchestration engine.
///
/// The enum is cheap to clone (the wrapped task failure sits behind an
/// `Arc`), so a single failure can live on the failing task's error list,
/// travel inside an [`Event::Fail`](crate::event::Event::Fail) notification,
/// and still be returned to the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Programmer error: an operation was called in a state that forbids it
    /// (e.g. `execute()` on a non-idle task, a query used before binding).
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },

    /// A query lookup found no executable produced by the given builder.
    #[error("no task found for builder `{builder}`")]
    NotFound { builder: String },

    /// A query resolved a task, but the task has no success result yet.
    #[error("task `{task}` has no result")]
    NoResult { task: String },

    /// A task body returned an error. The original error is preserved
    /// unwrapped behind the `Arc`; the engine never transforms its identity.
    #[error("task `{task}` failed: {cause}")]
    Execution {
        task: String,
        cause: Arc<anyhow::Error>,
    },
}

impl Error {
    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        Error::InvalidState {
            reason: reason.into(),
        }
    }

    pub(crate) fn execution(task: impl Into<String>, cause: anyhow::Error) -> Self {
        Error::Execution {
            task: task.into(),
            cause: Arc::new(cause),
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;
