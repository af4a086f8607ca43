//! # Taskflow
//!
//! An in-process task orchestration library: define discrete units of work,
//! group them, queue them, and run them one-at-a-time or concurrently while
//! tracking status, progress, results, and errors and emitting change
//! notifications along the way.
//!
//! ## Architecture Overview
//!
//! The engine is built from a handful of composable pieces:
//!
//! - **[`Task`]**: a single unit of work with status/progress/result/error
//!   state, executing a builder-supplied async body at most once
//! - **[`TaskBuilder`]** / **[`GroupBuilder`]**: identity-bearing
//!   constructors; query lookups resolve "made by this builder" by id
//! - **[`Executable`]**: the closed union of task and group the engine
//!   schedules uniformly
//! - **[`TaskGroup`]**: a named collection of executables that itself
//!   behaves like one (groups nest)
//! - **[`FlowController`]**: pending/active/completed membership tracking
//!   with transition events, shared by managers and groups
//! - **[`Query`]**: read-only retrieval of prior executables and results by
//!   builder identity
//! - **[`TaskManager`]**: the top-level orchestrator running the linear or
//!   parallel execution loop
//!
//! Callers build tasks and groups via builders, add them to a manager, and
//! start it. The manager moves executables from pending to active, awaits
//! their bodies, moves them to completed, and percolates progress upward.
//! Downstream tasks pull predecessor results through the query bound to
//! their container.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use taskflow::{ManagerConfig, TaskConfig, TaskManager, create_task};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let fetch = create_task(TaskConfig::new("fetch", |ctx| async move {
//!         ctx.set_progress(0.5);
//!         Ok(json!({ "items": 3 }))
//!     }));
//!
//!     let manager = TaskManager::new(ManagerConfig::default());
//!     manager.add_task(fetch.build(json!(null)));
//!     manager.start(false).await?;
//!
//!     println!("{}", manager.query().get_result(&fetch)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency model
//!
//! "Parallel" means concurrently awaited futures, not OS threads: a parallel
//! batch is started in insertion order and awaited together, with no
//! completion-order guarantee. Cancellation is coarse and cooperative:
//! [`TaskManager::stop`] halts the loop at the next checkpoint but never
//! interrupts a running body.

/// Status, mode, and flag vocabulary plus the display-oriented task view.
pub mod types;

/// Typed errors for the engine: state preconditions, query misses, and
/// wrapped task failures.
pub mod error;

/// Per-instance synchronous event channel with ordered, same-stack delivery.
pub mod event;

/// Tasks, task builders, and the context handle passed into task bodies.
pub mod task;

/// Task groups and group builders.
pub mod group;

/// The closed task-or-group union the engine schedules uniformly.
pub mod executable;

/// Pending/active/completed membership tracking with transition events.
pub mod flow;

/// Read-only lookup of executables and results by builder identity.
pub mod query;

/// The top-level orchestrator and its execution loop.
pub mod manager;


pub use error::{Error, Result};
pub use event::{Emitter, Event, Subscription, Transition};
pub use executable::{Builder, Executable, QueryScope};
pub use flow::{FlowController, FlowState, StartedBatch};
pub use group::{GroupBuilder, GroupConfig, TaskGroup, create_group};
pub use manager::{ManagerConfig, TaskManager};
pub use query::Query;
pub use task::{Task, TaskBuilder, TaskConfig, TaskContext, create_task};
pub use types::{ExecutionMode, Flag, Status, TaskData, TaskId, TaskView};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
