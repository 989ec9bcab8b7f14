//! The cooperative-actor action primitive named in spec §5: every operation
//! that crosses a part boundary (routing sequence, transfer-permission
//! request, scheduler step) is represented as an action with three
//! observable phases — Posted, Started, Complete (Succeeded or Failed) —
//! plus a pollable cancel-request flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// The observable state of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionState {
    Posted,
    Started,
    Succeeded,
    Failed(String),
    /// Cancellation is reported as a distinguished failure reason (spec
    /// §5: "the sequence reports... and cancels outstanding subordinates").
    Cancelled(String),
}

impl ActionState {
    pub fn is_complete(&self) -> bool {
        matches!(self, ActionState::Succeeded | ActionState::Failed(_) | ActionState::Cancelled(_))
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, ActionState::Succeeded)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ActionState::Failed(r) | ActionState::Cancelled(r) => Some(r.as_str()),
            _ => None,
        }
    }
}

struct ActionInner {
    state: Mutex<ActionState>,
    condvar: Condvar,
    cancel_requested: AtomicBool,
}

/// The waiter-facing half of an action. Cheap to clone; all clones observe
/// the same underlying state.
#[derive(Clone)]
pub struct Action {
    inner: Arc<ActionInner>,
}

impl Action {
    pub fn phase(&self) -> ActionState {
        self.inner.state.lock().clone()
    }

    pub fn is_complete(&self) -> bool {
        self.phase().is_complete()
    }

    pub fn is_succeeded(&self) -> bool {
        self.phase().is_succeeded()
    }

    /// Requests cancellation. The producer side polls
    /// [`ActionCompleter::is_cancel_requested`] and decides how to react;
    /// this call never itself completes the action.
    pub fn request_cancel(&self) {
        self.inner.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    /// Blocks the calling thread until the action completes. The
    /// cooperative parts in this crate never call this from inside their
    /// own tick loop (that would defeat single-threaded cooperation); it
    /// exists for synchronous callers such as integration tests.
    pub fn wait(&self) -> ActionState {
        let mut guard = self.inner.state.lock();
        loop {
            if guard.is_complete() {
                return guard.clone();
            }
            self.inner.condvar.wait(&mut guard);
        }
    }
}

/// The producer-facing half of an action, held by whichever part is
/// carrying it out.
#[derive(Clone)]
pub struct ActionCompleter {
    inner: Arc<ActionInner>,
}

impl ActionCompleter {
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn mark_started(&self) {
        self.set(ActionState::Started);
    }

    pub fn succeed(&self) {
        self.set(ActionState::Succeeded);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.set(ActionState::Failed(reason.into()));
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        self.set(ActionState::Cancelled(reason.into()));
    }

    pub fn action(&self) -> Action {
        Action { inner: self.inner.clone() }
    }

    fn set(&self, state: ActionState) {
        let mut guard = self.inner.state.lock();
        *guard = state;
        self.inner.condvar.notify_all();
    }
}

/// Creates a fresh action in the `Posted` phase plus its completer.
pub fn new_action() -> (Action, ActionCompleter) {
    let inner = Arc::new(ActionInner {
        state: Mutex::new(ActionState::Posted),
        condvar: Condvar::new(),
        cancel_requested: AtomicBool::new(false),
    });
    (Action { inner: inner.clone() }, ActionCompleter { inner })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_and_reports_complete() {
        let (action, completer) = new_action();
        assert_eq!(action.phase(), ActionState::Posted);
        completer.mark_started();
        assert_eq!(action.phase(), ActionState::Started);
        completer.succeed();
        assert!(action.is_complete());
        assert!(action.is_succeeded());
    }

    #[test]
    fn cancel_request_is_observed_by_completer() {
        let (action, completer) = new_action();
        assert!(!completer.is_cancel_requested());
        action.request_cancel();
        assert!(completer.is_cancel_requested());
        completer.cancel("stop requested");
        assert_eq!(action.phase().failure_reason(), Some("stop requested"));
    }
}
