//! Per-substrate scheduling state (spec §4.G): `ProcessTracker`, its
//! ordered `StepSpec`s, and the result recorded when a step's action
//! completes.

use crate::action::Action;
use crate::publish::Observer;
use crate::substrate::SubstrateInfo;
use crate::table::{ObjectId, ObjectSnapshot};

/// One step of a substrate's process spec. `usable_loc_names` are the
/// locations this step may be carried out at; `step_variables` is opaque
/// to the scheduler and forwarded verbatim to whatever produces the
/// step's `runningAction`.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub usable_loc_names: Vec<String>,
    pub step_variables: serde_json::Value,
}

impl StepSpec {
    pub fn new(usable_loc_names: Vec<String>) -> Self {
        Self { usable_loc_names, step_variables: serde_json::Value::Null }
    }

    pub fn with_variables(mut self, step_variables: serde_json::Value) -> Self {
        self.step_variables = step_variables;
        self
    }
}

/// Outcome of one completed process step. A non-`None` `result_code` is a
/// failure; `sps` is the live SPS value to fold into the substrate via
/// `generate_updates`.
#[derive(Debug, Clone)]
pub struct ProcessStepResult {
    pub sps: crate::substrate::LiveSps,
    pub result_code: Option<String>,
}

impl ProcessStepResult {
    pub fn is_failure(&self) -> bool {
        self.result_code.is_some()
    }
}

/// Per-substrate scheduling state (spec §4.G).
pub struct ProcessTracker {
    pub subst_id: ObjectId,
    observer: Observer<ObjectSnapshot>,
    steps: Vec<StepSpec>,
    completed_step_index: usize,
    running_action: Option<Action>,
    pub finalize_sps_at_end_of_last_step: Option<crate::substrate::LiveSps>,
    pub drop_request_reason: Option<String>,
    step_results: Vec<ProcessStepResult>,
}

impl ProcessTracker {
    pub fn new(subst_id: ObjectId, observer: Observer<ObjectSnapshot>, steps: Vec<StepSpec>) -> Self {
        Self {
            subst_id,
            observer,
            steps,
            completed_step_index: 0,
            running_action: None,
            finalize_sps_at_end_of_last_step: None,
            drop_request_reason: None,
            step_results: Vec::new(),
        }
    }

    /// Pulls the latest published snapshot into the observer's cache.
    /// Returns whether a new snapshot was seen.
    pub fn refresh_observer(&self) -> bool {
        self.observer.update()
    }

    /// Projects the last-observed snapshot, if any.
    pub fn info(&self) -> Option<SubstrateInfo> {
        self.observer.latest().map(|snap| SubstrateInfo::from_snapshot(&snap))
    }

    pub fn current_step(&self) -> Option<&StepSpec> {
        self.steps.get(self.completed_step_index)
    }

    pub fn is_at_last_step(&self) -> bool {
        self.completed_step_index >= self.steps.len()
    }

    pub fn running_action(&self) -> Option<&Action> {
        self.running_action.as_ref()
    }

    pub fn set_running_action(&mut self, action: Action) {
        self.running_action = Some(action);
    }

    pub fn has_action_in_flight(&self) -> bool {
        self.running_action.as_ref().is_some_and(|a| !a.is_complete())
    }

    /// Takes the completed running action, if one exists and has settled.
    pub fn take_completed_action(&mut self) -> Option<Action> {
        if self.running_action.as_ref().is_some_and(|a| a.is_complete()) {
            self.running_action.take()
        } else {
            None
        }
    }

    pub fn record_step_result(&mut self, result: ProcessStepResult) {
        self.step_results.push(result);
        self.completed_step_index += 1;
    }

    pub fn step_results(&self) -> &[ProcessStepResult] {
        &self.step_results
    }
}
