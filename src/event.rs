use crate::error::Error;
use crate::executable::Executable;
use crate::flow::FlowState;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Notification published by a task, group, manager, or flow controller.
#[derive(Clone, Debug)]
pub enum Event {
    /// Something about the emitting component changed (status, progress,
    /// result, errors, warnings, flags, queue membership)
    Change,
    /// The emitting component's progress moved to the given value in [0, 1]
    Progress(f64),
    /// An executable was registered with the emitting container
    Task(Executable),
    /// An executable moved between flow states (pending/active/completed)
    Transition(Transition),
    /// The emitting manager/group finished its whole queue successfully
    Success,
    /// The emitting manager/group aborted with the given error
    Fail(Error),
    /// A named parameter was set on the emitting manager/group
    Param(String),
}

/// Flow membership change carried by [`Event::Transition`].
///
/// `from: None` means the executable was newly added; `to: None` means it was
/// dropped from the queue entirely (abandoned, not completed).
#[derive(Clone, Debug)]
pub struct Transition {
    pub from: Option<FlowState>,
    pub to: Option<FlowState>,
    pub task: Executable,
}

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by [`Emitter::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

/// Per-instance synchronous publish/subscribe channel.
///
/// Delivery is ordered and happens on the emitting call stack: by the time
/// `emit` returns, every listener has observed the event. There is no
/// buffering or coalescing; components suppress redundant no-op emissions
/// themselves (e.g. a progress set to its current value emits nothing).
#[derive(Default)]
pub struct Emitter {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; it is invoked for every subsequent emission, in
    /// subscription order.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        crate::lock(&self.listeners).push((id, Arc::new(listener)));
        Subscription(id)
    }

    /// Remove a previously registered listener. Unknown handles are ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        crate::lock(&self.listeners).retain(|(id, _)| *id != subscription.0);
    }

    /// Deliver `event` to all current listeners, synchronously and in order.
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or
    /// unsubscribe from within a callback without deadlocking.
    pub fn emit(&self, event: &Event) {
        let snapshot: Vec<Listener> = crate::lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &crate::lock(&self.listeners).len())
            .finish()
    }
}
