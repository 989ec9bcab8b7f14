//! Component G: the scheduler tick loop (spec §4.G).
//!
//! A single [`Scheduler`] drives every tracked substrate through one
//! cooperative tick at a time: update observers and service request/state
//! triggers, tally auto-start eligibility, decide whether to auto-start a
//! waiting substrate, finalize any process step whose action has
//! completed, and — if idle — dispatch one routing sequence to keep
//! substrates moving toward their next useful location.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::action::Action;
use crate::error::HorusResult;
use crate::publish::Observer;
use crate::routing::{RoutingItem, RoutingManager, TransferPermissionRequestSettings};
use crate::substrate::{set_subst_proc_state, LiveSps, Sjrs, Sjs, SpsEvent, SubstrateInfo};
use crate::table::{AttributeMap, AttributeValue, LinkKey, MergeBehavior, ObjectId, ObjectTable, UpdateItem};

use super::tracker::{ProcessStepResult, ProcessTracker, StepSpec};

/// Drives every registered [`ProcessTracker`] through the per-substrate
/// job-state machine and dispatches routing sequences to keep work
/// moving. One `Scheduler` owns one [`RoutingManager`] and ticks its
/// trackers cooperatively — never from more than one thread at once.
pub struct Scheduler {
    table: Arc<ObjectTable>,
    routing: Arc<RoutingManager>,
    arm_loc_names: Vec<String>,
    swap_capable_loc_names: Vec<String>,
    trackers: RwLock<HashMap<ObjectId, ProcessTracker>>,
    /// The scheduler part's own online/offline state (spec §7:
    /// exceptions inside a tick transition the part to `OnlineFailure`).
    online: RwLock<bool>,
    current_sequence: RwLock<Option<Action>>,
}

impl Scheduler {
    /// `behavior`/`max_history_len` are not taken here — every in-place SPS
    /// update pulls `table.defaults().set_subst_proc_state`/
    /// `maximum_sps_list_length` fresh at call time (spec §6).
    pub fn new(table: Arc<ObjectTable>, routing: Arc<RoutingManager>, arm_loc_names: Vec<String>) -> Self {
        Self {
            table,
            routing,
            arm_loc_names,
            swap_capable_loc_names: Vec::new(),
            trackers: RwLock::new(HashMap::new()),
            online: RwLock::new(true),
            current_sequence: RwLock::new(None),
        }
    }

    /// Marks `loc_name` as able to absorb a swap (e.g. a process module
    /// with its own local arm), consulted by the idle dispatch step when
    /// every plain candidate location is occupied.
    pub fn register_swap_capable(&mut self, loc_name: impl Into<String>) {
        self.swap_capable_loc_names.push(loc_name.into());
    }

    pub fn set_online(&self, online: bool) {
        *self.online.write() = online;
    }

    pub fn is_online(&self) -> bool {
        *self.online.read()
    }

    /// Begins tracking `subst_id` against `steps`, observing its snapshot
    /// through the table's publisher.
    pub fn track(&self, subst_id: ObjectId, steps: Vec<StepSpec>) {
        let publisher = self.table.get_publisher(&subst_id);
        let observer = Observer::new(publisher);
        let tracker = ProcessTracker::new(subst_id.clone(), observer, steps);
        self.trackers.write().insert(subst_id, tracker);
    }

    pub fn untrack(&self, subst_id: &ObjectId) {
        self.trackers.write().remove(subst_id);
    }

    /// Runs one full tick: the six steps of spec §4.G, in order. Errors
    /// from any single step are logged and do not stop the remaining
    /// steps — a scheduler tick never aborts the whole part, matching the
    /// cooperative-actor contract in spec §5.
    pub fn tick(&self) {
        self.step1_update_observers_and_requests();
        let enable_auto_start = self.step2_tally_auto_start();
        if enable_auto_start {
            self.step3_auto_start();
        }
        self.step4_finalize_completed_steps();
        if !self.has_sequence_in_flight() && self.is_online() {
            let dispatched = self.step5_idle_routing_dispatch();
            if !dispatched {
                self.step6_launch_running_at_source();
            }
        }
    }

    fn has_sequence_in_flight(&self) -> bool {
        match self.current_sequence.read().as_ref() {
            Some(action) => !action.is_complete(),
            None => false,
        }
    }

    // --- Step 1 ---

    fn step1_update_observers_and_requests(&self) {
        let mut trackers = self.trackers.write();
        for tracker in trackers.values_mut() {
            tracker.refresh_observer();
            let Some(info) = tracker.info() else { continue };
            if let Some(next) = next_sjs_from_request(&info, tracker.has_action_in_flight()) {
                if next != info.sjs {
                    self.set_sjs(&tracker.subst_id, next);
                }
            }
        }
    }

    fn set_sjs(&self, subst_id: &ObjectId, sjs: Sjs) {
        let mut attrs = AttributeMap::new();
        attrs.insert("SJS".to_string(), AttributeValue::Enum(sjs.name().to_string()));
        let _ = self.table.update(vec![UpdateItem::SetAttributes {
            id: subst_id.clone(),
            attrs,
            merge: MergeBehavior::AddAndUpdate,
        }]);
    }

    // --- Step 2 ---

    fn step2_tally_auto_start(&self) -> bool {
        let trackers = self.trackers.read();
        let mut any_at_source = false;
        let mut any_waiting_for_start = false;
        for tracker in trackers.values() {
            let Some(info) = tracker.info() else { continue };
            if is_at_source(&info) {
                any_at_source = true;
            }
            if info.sjs == Sjs::WaitingForStart {
                any_waiting_for_start = true;
            }
        }
        self.is_online() && any_at_source && any_waiting_for_start
    }

    // --- Step 3 ---

    fn step3_auto_start(&self) {
        let candidate = {
            let trackers = self.trackers.read();
            trackers
                .values()
                .find(|t| {
                    t.info().is_some_and(|info| {
                        is_at_source(&info) && info.sjs == Sjs::WaitingForStart && info.sjrs == Sjrs::Run
                    })
                })
                .map(|t| t.subst_id.clone())
        };
        let Some(subst_id) = candidate else { return };
        let Ok(next_loc_list) = self.next_loc_list(&subst_id) else { return };
        if next_loc_list.iter().any(|loc| !self.is_occupied(loc)) {
            self.set_sjs(&subst_id, Sjs::Running);
        }
    }

    // --- Step 4 ---

    fn step4_finalize_completed_steps(&self) {
        let completions: Vec<(ObjectId, Action)> = {
            let mut trackers = self.trackers.write();
            trackers
                .values_mut()
                .filter_map(|t| t.take_completed_action().map(|a| (t.subst_id.clone(), a)))
                .collect()
        };
        for (subst_id, action) in completions {
            let result = ProcessStepResult {
                sps: if action.is_succeeded() { LiveSps::Processed } else { LiveSps::Rejected },
                result_code: action.phase().failure_reason().map(str::to_string),
            };
            if let Err(e) = self.apply_step_completion(&subst_id, &result) {
                log::warn!("scheduler: step completion for {subst_id} failed to apply: {e}");
            }
            if let Some(tracker) = self.trackers.write().get_mut(&subst_id) {
                tracker.record_step_result(result);
            }
        }
    }

    fn apply_step_completion(&self, subst_id: &ObjectId, result: &ProcessStepResult) -> HorusResult<()> {
        let snapshot = self
            .table
            .get_object(subst_id)
            .ok_or_else(|| crate::error::HorusError::Structural(format!("{subst_id} does not exist")))?;
        let info = SubstrateInfo::from_snapshot(&snapshot);
        let defaults = self.table.defaults();
        let items = set_subst_proc_state(
            &info,
            SpsEvent::Live(result.sps),
            defaults.set_subst_proc_state,
            defaults.maximum_sps_list_length,
            Utc::now(),
        )?;
        if !items.is_empty() {
            self.table.update(items)?;
        }
        if result.is_failure() {
            self.set_sjs(subst_id, Sjs::RoutingAlarm);
        }
        Ok(())
    }

    /// Forces `SubstProcState := Processed` ahead of a final move, per
    /// the `nextLocList` rule for a tracker with no more steps, AtSource,
    /// and still `NeedsProcessing`.
    fn force_processed(&self, subst_id: &ObjectId) -> HorusResult<()> {
        let snapshot = self
            .table
            .get_object(subst_id)
            .ok_or_else(|| crate::error::HorusError::Structural(format!("{subst_id} does not exist")))?;
        let info = SubstrateInfo::from_snapshot(&snapshot);
        let defaults = self.table.defaults();
        let items = set_subst_proc_state(
            &info,
            SpsEvent::Live(LiveSps::Processed),
            defaults.set_subst_proc_state,
            defaults.maximum_sps_list_length,
            Utc::now(),
        )?;
        if !items.is_empty() {
            self.table.update(items)?;
        }
        Ok(())
    }

    /// `nextLocList` for the tracker of `subst_id` (spec §4.G).
    fn next_loc_list(&self, subst_id: &ObjectId) -> HorusResult<Vec<String>> {
        let trackers = self.trackers.read();
        let Some(tracker) = trackers.get(subst_id) else { return Ok(Vec::new()) };
        let Some(info) = tracker.info() else { return Ok(Vec::new()) };

        match info.sjs {
            Sjs::Initial | Sjs::Held => Ok(Vec::new()),
            Sjs::WaitingForStart | Sjs::Running => {
                let at_dest = is_at_destination(&info);
                if tracker.is_at_last_step() && is_at_source(&info) && info.sps.is_needs_processing() {
                    drop(trackers);
                    self.force_processed(subst_id)?;
                    return Ok(vec![info.dest_loc.name.clone()]);
                }
                if at_dest {
                    return Ok(Vec::new());
                }
                if info.sps.is_processing_complete() {
                    return Ok(vec![info.dest_loc.name.clone()]);
                }
                Ok(tracker.current_step().map(|s| s.usable_loc_names.clone()).unwrap_or_default())
            }
            _ => {
                if info.sps.is_needs_processing() {
                    Ok(vec![info.src_loc.name.clone()])
                } else if info.sps.is_processing_complete() {
                    Ok(vec![info.dest_loc.name.clone()])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    // --- Step 5 / 6 ---

    fn step5_idle_routing_dispatch(&self) -> bool {
        let candidates = self.occupied_locations();
        for loc_name in candidates {
            let Some(subst_id) = self.occupant_of(&loc_name) else { continue };
            let Ok(next_list) = self.next_loc_list(&subst_id) else { continue };
            if next_list.iter().any(|l| l == &loc_name) {
                continue;
            }
            if let Some(target) = self.pick_move_target(&next_list) {
                if let Some(action) = self.dispatch_sequence(&subst_id, &target) {
                    *self.current_sequence.write() = Some(action);
                    return true;
                }
            }
        }
        false
    }

    fn step6_launch_running_at_source(&self) {
        let candidate = {
            let trackers = self.trackers.read();
            trackers
                .values()
                .find(|t| t.info().is_some_and(|info| is_at_source(&info) && info.sjs == Sjs::Running))
                .map(|t| t.subst_id.clone())
        };
        let Some(subst_id) = candidate else { return };
        let Ok(next_list) = self.next_loc_list(&subst_id) else { return };
        if let Some(target) = self.pick_move_target(&next_list) {
            if let Some(action) = self.dispatch_sequence(&subst_id, &target) {
                *self.current_sequence.write() = Some(action);
            }
        }
    }

    /// First unoccupied location in `next_list`, falling back to a
    /// registered swap-capable station with a free arm if none are free
    /// outright.
    fn pick_move_target(&self, next_list: &[String]) -> Option<String> {
        if let Some(free) = next_list.iter().find(|l| !self.is_occupied(l)) {
            return Some(free.clone());
        }
        next_list
            .iter()
            .find(|l| self.swap_capable_loc_names.iter().any(|s| s == *l) && self.any_arm_free())
            .cloned()
    }

    fn any_arm_free(&self) -> bool {
        self.arm_loc_names.iter().any(|a| !self.is_occupied(a))
    }

    /// Builds and submits the routing sequence for moving `subst_id` to
    /// `target`: an `Acquire` for any registered process module at the
    /// destination, followed by a `MoveOrSwap` (spec §4.G step 5: "wrapping
    /// in explicit TransferPermissionRequest{Acquire} + MoveOrSwap").
    fn dispatch_sequence(&self, subst_id: &ObjectId, target: &str) -> Option<Action> {
        let mut items = Vec::new();
        items.push(RoutingItem::TransferPermissionRequest {
            settings: TransferPermissionRequestSettings {
                acquire: true,
                auto_release_at_end_of_sequence: true,
                ..Default::default()
            },
            loc_names: vec![target.to_string()],
        });
        items.push(RoutingItem::MoveOrSwap {
            subst_id: subst_id.clone(),
            to_loc: ObjectId::subst_loc(target.to_string()),
        });
        Some(self.routing.sequence(items))
    }

    fn occupied_locations(&self) -> Vec<String> {
        self.table
            .snapshot_all()
            .into_iter()
            .filter(|snap| snap.id.obj_type == crate::table::ObjectType::SubstLoc)
            .filter(|snap| snap.links_out.iter().any(|l| l.key == LinkKey::Contains))
            .map(|snap| snap.id.name)
            .collect()
    }

    fn occupant_of(&self, loc_name: &str) -> Option<ObjectId> {
        let snap = self.table.get_object(&ObjectId::subst_loc(loc_name))?;
        snap.links_out.iter().find(|l| l.key == LinkKey::Contains).map(|l| l.to.clone())
    }

    fn is_occupied(&self, loc_name: &str) -> bool {
        self.occupant_of(loc_name).is_some()
    }
}

fn is_at_source(info: &SubstrateInfo) -> bool {
    info.current_loc.as_ref() == Some(&info.src_loc)
}

fn is_at_destination(info: &SubstrateInfo) -> bool {
    info.current_loc.as_ref() == Some(&info.dest_loc)
}

/// SJRS→SJS request triggers (spec §4.G step 1). Returns the target SJS
/// if a transition applies, or `None` if the current state already
/// matches the request (or the request doesn't apply yet).
fn next_sjs_from_request(info: &SubstrateInfo, has_action_in_flight: bool) -> Option<Sjs> {
    match info.sjrs {
        Sjrs::Run => match info.sjs {
            Sjs::Initial => Some(Sjs::WaitingForStart),
            Sjs::Paused | Sjs::Pausing => Some(Sjs::Running),
            _ => None,
        },
        Sjrs::Pause => match info.sjs {
            Sjs::Running => Some(Sjs::Pausing),
            Sjs::Pausing if !has_action_in_flight => Some(Sjs::Paused),
            _ => None,
        },
        Sjrs::Stop => match info.sjs {
            Sjs::Running | Sjs::Pausing | Sjs::Paused | Sjs::WaitingForStart => Some(Sjs::Stopping),
            Sjs::Stopping if !has_action_in_flight => Some(Sjs::Stopped),
            _ => None,
        },
        Sjrs::Abort => match info.sjs {
            Sjs::Running | Sjs::Pausing | Sjs::Paused | Sjs::WaitingForStart | Sjs::Stopping => Some(Sjs::Aborting),
            Sjs::Aborting if !has_action_in_flight => Some(Sjs::Aborted),
            _ => None,
        },
        Sjrs::Return => match info.sjs {
            Sjs::Running | Sjs::Pausing | Sjs::Paused | Sjs::Stopping | Sjs::Aborting => Some(Sjs::Returning),
            Sjs::Returning if !has_action_in_flight => Some(Sjs::Returned),
            _ => None,
        },
        Sjrs::None => {
            if !is_at_source(info) && matches!(info.sjs, Sjs::Initial | Sjs::WaitingForStart) {
                Some(Sjs::Held)
            } else {
                None
            }
        }
    }
}
