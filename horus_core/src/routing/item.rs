//! Routing item variants the manager accepts in a sequence (spec §4.F).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::action::Action;
use crate::table::ObjectId;

/// Flags on a `TransferPermissionRequest` item. Spec §4.F describes these
/// as a combinable flag set rather than mutually exclusive variants.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferPermissionRequestSettings {
    /// Post the request and move on without waiting for it to complete.
    pub only_start_request: bool,
    /// Acquire `locNames`, but only those not already granted.
    pub acquire: bool,
    /// Acquire `locNames` unconditionally, even if already granted
    /// (duplicates permitted in the module's granted multiset).
    pub recursive_acquire: bool,
    /// Release `locNames`, but only those currently granted.
    pub release: bool,
    /// Queue the grants made by this item for release once the whole
    /// sequence completes successfully.
    pub auto_release_at_end_of_sequence: bool,
}

/// Outcome of a `DelegatePredicate` evaluating false.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateNegativeBehavior {
    /// The false result is ignored; the sequence continues.
    None,
    /// The false result fails the sequence (as if this item had errored).
    NegativeFailsSequence,
    /// The false result ends the sequence early but as a success.
    NegativeEndsSequence,
}

/// Flags on a `RunAction` item.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunActionFlags {
    /// Post the action and move on without waiting for it to complete.
    pub only_start_action: bool,
    /// A failure of the underlying action does not fail the sequence.
    pub ignore_failures: bool,
}

/// A factory invoked at most once to produce the `Action` a `RunAction`
/// item delegates to. Guarded by its own dedicated mutex — per spec §9's
/// recorded defect, never by locking the routing manager itself.
pub struct ActionFactory {
    inner: Mutex<Option<Box<dyn FnOnce() -> Action + Send>>>,
}

impl ActionFactory {
    pub fn new(f: impl FnOnce() -> Action + Send + 'static) -> Self {
        Self { inner: Mutex::new(Some(Box::new(f))) }
    }

    /// Invokes the factory exactly once; subsequent calls return `None`.
    pub fn invoke(&self) -> Option<Action> {
        self.inner.lock().take().map(|f| f())
    }
}

/// One step of an ordered routing sequence (spec §4.F).
pub enum RoutingItem {
    MoveSubstrate { subst_id: ObjectId, to_loc: ObjectId },
    SwapSubstrates { subst_id: ObjectId, swap_with_subst_id: ObjectId },
    MoveOrSwap { subst_id: ObjectId, to_loc: ObjectId },
    ApproachLocation {
        mover_id: ObjectId,
        to_loc: ObjectId,
        wait_until_done: bool,
        must_succeed: bool,
    },
    RunAction { factory: Arc<ActionFactory>, flags: RunActionFlags },
    TransferPermissionRequest {
        settings: TransferPermissionRequestSettings,
        loc_names: Vec<String>,
    },
    DelegatePredicate {
        predicate: Arc<dyn Fn() -> bool + Send + Sync>,
        behavior: DelegateNegativeBehavior,
        nvs_on_negative: Option<String>,
    },
}
