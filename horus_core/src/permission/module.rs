//! The `ProcessModule` collaborator boundary and an in-memory test double
//! (spec §1 names process modules as external; SPEC_FULL.md §11 adds the
//! trait boundary and one runnable implementation).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::action::{new_action, Action, ActionCompleter};
use crate::publish::Publisher;
use crate::substrate::TransferPermissionSummaryStateCode as SummaryCode;

use super::state::TransferPermissionState;

/// The three transfer-permission request kinds (spec §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPermissionActionKind {
    Acquire,
    Release,
    ReleaseAll,
}

/// An external collaborator that performs work on a substrate at one or
/// more stations and grants or withholds transfer permission there.
pub trait ProcessModule: Send + Sync {
    fn name(&self) -> &str;
    fn transfer_permission(&self, kind: TransferPermissionActionKind, loc_name: &str) -> Action;
    fn state_publisher(&self) -> Arc<Publisher<TransferPermissionState>>;
}

struct PendingAcquire {
    loc: String,
    completer: ActionCompleter,
}

/// In-memory [`ProcessModule`]. Summary-state transitions are driven
/// explicitly by a test/driver via [`Self::set_summary_state`] rather than
/// any real device protocol.
pub struct SimpleProcessModule {
    name: String,
    publisher: Arc<Publisher<TransferPermissionState>>,
    state: Mutex<TransferPermissionState>,
    pending: Mutex<VecDeque<PendingAcquire>>,
    /// While true (the default), the module reports itself `Busy` for as
    /// long as its granted multiset is non-empty, reverting to `Available`
    /// once fully released (spec §8 scenario 4: a second client's Acquire
    /// for an already-granted location queues until Release). A real
    /// device driver would drive this transition itself; this test double
    /// approximates it so the scenario is runnable standalone.
    auto_busy_while_granted: bool,
}

impl SimpleProcessModule {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let state = TransferPermissionState::new(name.clone());
        let publisher = Arc::new(Publisher::new());
        publisher.publish(state.clone());
        Self {
            name,
            publisher,
            state: Mutex::new(state),
            pending: Mutex::new(VecDeque::new()),
            auto_busy_while_granted: true,
        }
    }

    pub fn without_auto_busy(mut self) -> Self {
        self.auto_busy_while_granted = false;
        self
    }

    /// Transitions the module's summary state. Entering `Available` drains
    /// any queued acquires in FIFO order, granting each and completing its
    /// action; entering `NotAvailable` fails every queued acquire (the
    /// module is no longer a candidate to satisfy them).
    pub fn set_summary_state(&self, code: SummaryCode, reason: Option<String>) {
        let mut state = self.state.lock();
        state.summary_state = code;
        state.last_change = Instant::now();
        state.reason = reason;
        match code {
            SummaryCode::Available => {
                let mut pending = self.pending.lock();
                while let Some(req) = pending.pop_front() {
                    state.grant(req.loc);
                    req.completer.succeed();
                }
            }
            SummaryCode::NotAvailable => {
                let mut pending = self.pending.lock();
                for req in pending.drain(..) {
                    req.completer.fail(format!("{} became NotAvailable while queued", self.name));
                }
            }
            _ => {}
        }
        self.publisher.publish(state.clone());
    }

    pub fn set_est_available_after(&self, dur: Option<Duration>) {
        let mut state = self.state.lock();
        state.est_available_after = dur;
        self.publisher.publish(state.clone());
    }

    pub fn current_state(&self) -> TransferPermissionState {
        self.state.lock().clone()
    }

    fn maybe_revert_to_available(&self, state: &mut TransferPermissionState) {
        if self.auto_busy_while_granted
            && state.summary_state == SummaryCode::Busy
            && state.granted_locations().is_empty()
        {
            state.summary_state = SummaryCode::Available;
            state.last_change = Instant::now();
            let mut pending = self.pending.lock();
            while let Some(req) = pending.pop_front() {
                state.grant(req.loc);
                req.completer.succeed();
            }
            if self.auto_busy_while_granted && !state.granted_locations().is_empty() {
                state.summary_state = SummaryCode::Busy;
                state.last_change = Instant::now();
            }
        }
    }
}

impl ProcessModule for SimpleProcessModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn transfer_permission(&self, kind: TransferPermissionActionKind, loc_name: &str) -> Action {
        let (action, completer) = new_action();
        completer.mark_started();
        match kind {
            TransferPermissionActionKind::Acquire => {
                let mut state = self.state.lock();
                match state.summary_state {
                    SummaryCode::Available => {
                        state.grant(loc_name.to_string());
                        if self.auto_busy_while_granted {
                            state.summary_state = SummaryCode::Busy;
                            state.last_change = Instant::now();
                        }
                        self.publisher.publish(state.clone());
                        completer.succeed();
                    }
                    SummaryCode::NotAvailable => {
                        log::warn!("{}: Acquire({}) rejected, module is NotAvailable", self.name, loc_name);
                        completer.fail(format!("{} is NotAvailable", self.name));
                    }
                    SummaryCode::Busy | SummaryCode::AlmostAvailable | SummaryCode::Blocked | SummaryCode::None => {
                        drop(state);
                        log::debug!("{}: Acquire({}) queued, module not yet Available", self.name, loc_name);
                        self.pending.lock().push_back(PendingAcquire { loc: loc_name.to_string(), completer });
                    }
                }
            }
            TransferPermissionActionKind::Release => {
                let mut state = self.state.lock();
                state.ungrant_one(loc_name);
                self.maybe_revert_to_available(&mut state);
                self.publisher.publish(state.clone());
                completer.succeed();
            }
            TransferPermissionActionKind::ReleaseAll => {
                let mut state = self.state.lock();
                state.ungrant_all();
                self.maybe_revert_to_available(&mut state);
                self.publisher.publish(state.clone());
                completer.succeed();
            }
        }
        action
    }

    fn state_publisher(&self) -> Arc<Publisher<TransferPermissionState>> {
        self.publisher.clone()
    }
}
