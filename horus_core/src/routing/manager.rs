//! Component F: the routing manager (spec §4.F).
//!
//! A single-threaded cooperative actor: [`RoutingManager::sequence`] runs
//! its items to completion before returning, so within one call every item
//! observes the effects of every prior item through a fresh table read —
//! there is no concurrent execution to race against inside one manager.
//! Multiple manager instances may still run independently.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::action::{new_action, Action};
use crate::error::{HorusError, HorusResult};
use crate::permission::{ProcessModule, TransferPermissionActionKind};
use crate::substrate::{generate_updates, GenerateUpdatesRequest, SubstrateInfo};
use crate::table::{LinkKey, ObjectId, ObjectTable};

use super::item::{DelegateNegativeBehavior, RoutingItem, TransferPermissionRequestSettings};

enum ItemOutcome {
    Continue,
    EndSequence,
}

struct PostedRequest {
    loc_names: Vec<String>,
    action: Action,
}

/// Executes ordered [`RoutingItem`] sequences over a known set of locations
/// and robot arms, auto-acquiring and releasing transfer permission as it
/// goes.
pub struct RoutingManager {
    table: Arc<ObjectTable>,
    /// Robot arm locations, in preference order (spec §4.F: "A preferred").
    arm_loc_names: Vec<String>,
    loc_to_module: HashMap<String, Arc<dyn ProcessModule>>,
    posted: Mutex<Vec<PostedRequest>>,
}

impl RoutingManager {
    /// `behavior`/`max_history_len` are not taken here — every move pulls
    /// `table.defaults().note_subst_moved`/`maximum_sps_list_length` fresh
    /// at call time (spec §6), so the table is the single source of truth
    /// for them.
    pub fn new(table: Arc<ObjectTable>, arm_loc_names: Vec<String>) -> Self {
        Self {
            table,
            arm_loc_names,
            loc_to_module: HashMap::new(),
            posted: Mutex::new(Vec::new()),
        }
    }

    pub fn register_module(&mut self, loc_name: impl Into<String>, module: Arc<dyn ProcessModule>) {
        self.loc_to_module.insert(loc_name.into(), module);
    }

    /// Runs `items` in order. Returns an already-settled [`Action`]: since
    /// this manager executes synchronously, Started and Complete collapse
    /// into the one call, but the Posted/Started/Complete contract (spec
    /// §5) is preserved for callers that only look at the returned
    /// `Action`'s phase.
    pub fn sequence(&self, items: Vec<RoutingItem>) -> Action {
        let (action, completer) = new_action();
        completer.mark_started();
        let mut end_of_sequence_release: Vec<(String, String)> = Vec::new();
        match self.run_sequence(items, &mut end_of_sequence_release) {
            Ok(()) => {
                self.release_locations(&end_of_sequence_release);
                completer.succeed();
            }
            Err(e) => {
                log::warn!("routing sequence failed: {e}");
                self.clear_pending_bookkeeping();
                completer.fail(e.to_string());
            }
        }
        action
    }

    pub fn retract_arms_and_release_all(&self) -> Action {
        let (action, completer) = new_action();
        completer.mark_started();
        let mut seen = std::collections::HashSet::new();
        for module in self.loc_to_module.values() {
            if seen.insert(module.name().to_string()) {
                module.transfer_permission(TransferPermissionActionKind::ReleaseAll, "");
            }
        }
        self.clear_pending_bookkeeping();
        completer.succeed();
        action
    }

    fn run_sequence(&self, items: Vec<RoutingItem>, end_of_sequence_release: &mut Vec<(String, String)>) -> HorusResult<()> {
        for item in items {
            match self.execute_item(item, end_of_sequence_release)? {
                ItemOutcome::Continue => {}
                ItemOutcome::EndSequence => break,
            }
        }
        Ok(())
    }

    fn clear_pending_bookkeeping(&self) {
        self.posted.lock().clear();
    }

    fn execute_item(
        &self,
        item: RoutingItem,
        end_of_sequence_release: &mut Vec<(String, String)>,
    ) -> HorusResult<ItemOutcome> {
        match item {
            RoutingItem::MoveSubstrate { subst_id, to_loc } => {
                self.await_posted_for(&[to_loc.name.clone()], end_of_sequence_release);
                let acquired = self.auto_acquire_locations(&[to_loc.name.clone()])?;
                let result = self.execute_move_substrate(&subst_id, &to_loc);
                self.release_locations(&acquired);
                result?;
                Ok(ItemOutcome::Continue)
            }
            RoutingItem::SwapSubstrates { subst_id, swap_with_subst_id } => {
                let touched: Vec<String> = [self.current_loc_name(&subst_id), self.current_loc_name(&swap_with_subst_id)]
                    .into_iter()
                    .flatten()
                    .collect();
                self.await_posted_for(&touched, end_of_sequence_release);
                let acquired = self.auto_acquire_locations(&touched)?;
                let result = self.execute_swap(&subst_id, &swap_with_subst_id);
                self.release_locations(&acquired);
                result?;
                Ok(ItemOutcome::Continue)
            }
            RoutingItem::MoveOrSwap { subst_id, to_loc } => {
                self.await_posted_for(&[to_loc.name.clone()], end_of_sequence_release);
                let acquired = self.auto_acquire_locations(&[to_loc.name.clone()])?;
                let result = self.execute_move_or_swap(&subst_id, &to_loc);
                self.release_locations(&acquired);
                result?;
                Ok(ItemOutcome::Continue)
            }
            RoutingItem::ApproachLocation { mover_id, to_loc, wait_until_done: _, must_succeed: _ } => {
                // Physical kinematics are out of scope; pre-pick/pre-place
                // positioning has no table-visible effect here.
                log::debug!("ApproachLocation({mover_id} -> {to_loc}) treated as a no-op positioning hint");
                Ok(ItemOutcome::Continue)
            }
            RoutingItem::RunAction { factory, flags } => {
                match factory.invoke() {
                    Some(action) => {
                        if !flags.only_start_action {
                            let outcome = action.wait();
                            if !outcome.is_succeeded() && !flags.ignore_failures {
                                return Err(HorusError::Internal(format!(
                                    "RunAction failed: {}",
                                    outcome.failure_reason().unwrap_or("unknown reason")
                                )));
                            }
                        }
                    }
                    None if !flags.ignore_failures => {
                        return Err(HorusError::Internal("RunAction factory already invoked".into()));
                    }
                    None => {}
                }
                Ok(ItemOutcome::Continue)
            }
            RoutingItem::TransferPermissionRequest { settings, loc_names } => {
                self.await_posted_for(&loc_names, end_of_sequence_release);
                self.execute_transfer_permission_request(settings, loc_names, end_of_sequence_release)?;
                Ok(ItemOutcome::Continue)
            }
            RoutingItem::DelegatePredicate { predicate, behavior, nvs_on_negative } => {
                if predicate() {
                    return Ok(ItemOutcome::Continue);
                }
                match behavior {
                    DelegateNegativeBehavior::None => Ok(ItemOutcome::Continue),
                    DelegateNegativeBehavior::NegativeFailsSequence => Err(HorusError::Structural(
                        nvs_on_negative.unwrap_or_else(|| "delegate predicate evaluated false".into()),
                    )),
                    DelegateNegativeBehavior::NegativeEndsSequence => Ok(ItemOutcome::EndSequence),
                }
            }
        }
    }

    fn execute_transfer_permission_request(
        &self,
        settings: TransferPermissionRequestSettings,
        loc_names: Vec<String>,
        end_of_sequence_release: &mut Vec<(String, String)>,
    ) -> HorusResult<()> {
        for loc in loc_names {
            let Some(module) = self.loc_to_module.get(&loc).cloned() else { continue };
            if settings.release && self.is_granted(&module, &loc) {
                module.transfer_permission(TransferPermissionActionKind::Release, &loc);
            }
            if settings.acquire || settings.recursive_acquire {
                let already_granted = self.is_granted(&module, &loc);
                if settings.recursive_acquire || !already_granted {
                    let action = module.transfer_permission(TransferPermissionActionKind::Acquire, &loc);
                    if settings.only_start_request {
                        self.posted.lock().push(PostedRequest { loc_names: vec![loc.clone()], action });
                        continue;
                    }
                    let outcome = action.wait();
                    if !outcome.is_succeeded() {
                        return Err(HorusError::PermissionDenied(format!(
                            "acquire {loc} failed: {}",
                            outcome.failure_reason().unwrap_or("unknown reason")
                        )));
                    }
                    if settings.auto_release_at_end_of_sequence {
                        end_of_sequence_release.push((module.name().to_string(), loc.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn is_granted(&self, module: &Arc<dyn ProcessModule>, loc: &str) -> bool {
        module.state_publisher().current().map(|(_, s)| s.is_granted(loc, false)).unwrap_or(false)
    }

    fn auto_acquire_locations(&self, loc_names: &[String]) -> HorusResult<Vec<(String, String)>> {
        let mut acquired = Vec::new();
        for loc in loc_names {
            let Some(module) = self.loc_to_module.get(loc).cloned() else { continue };
            if self.is_granted(&module, loc) {
                continue;
            }
            let action = module.transfer_permission(TransferPermissionActionKind::Acquire, loc);
            let outcome = action.wait();
            if !outcome.is_succeeded() {
                self.release_locations(&acquired);
                return Err(HorusError::PermissionDenied(format!(
                    "auto-acquire {loc} failed: {}",
                    outcome.failure_reason().unwrap_or("unknown reason")
                )));
            }
            acquired.push((module.name().to_string(), loc.clone()));
        }
        Ok(acquired)
    }

    fn release_locations(&self, acquired: &[(String, String)]) {
        for (module_name, loc) in acquired {
            if let Some(module) = self.loc_to_module.get(loc) {
                if module.name() == module_name {
                    module.transfer_permission(TransferPermissionActionKind::Release, loc);
                }
            }
        }
    }

    fn await_posted_for(&self, loc_names: &[String], end_of_sequence_release: &mut Vec<(String, String)>) {
        let mut posted = self.posted.lock();
        if posted.is_empty() {
            return;
        }
        let mut remaining = Vec::new();
        for req in posted.drain(..) {
            if req.loc_names.iter().any(|l| loc_names.contains(l)) {
                req.action.wait();
                for loc in &req.loc_names {
                    if let Some(module) = self.loc_to_module.get(loc) {
                        end_of_sequence_release.push((module.name().to_string(), loc.clone()));
                    }
                }
            } else {
                remaining.push(req);
            }
        }
        *posted = remaining;
    }

    fn current_loc_name(&self, id: &ObjectId) -> Option<String> {
        let snap = self.table.get_object(id)?;
        snap.links_in.iter().find(|l| l.key == LinkKey::Contains).map(|l| l.from.name.clone())
    }

    fn occupant_of(&self, loc: &ObjectId) -> Option<ObjectId> {
        let snap = self.table.get_object(loc)?;
        snap.links_out.iter().find(|l| l.key == LinkKey::Contains).map(|l| l.to.clone())
    }

    fn is_occupied(&self, loc_name: &str) -> bool {
        self.occupant_of(&ObjectId::subst_loc(loc_name)).is_some()
    }

    fn note_subst_moved(&self, subst_id: &ObjectId, to_loc: &ObjectId) -> HorusResult<()> {
        let snapshot = self
            .table
            .get_object(subst_id)
            .ok_or_else(|| HorusError::Structural(format!("{subst_id} does not exist")))?;
        let info = SubstrateInfo::from_snapshot(&snapshot);
        let defaults = self.table.defaults();
        let items = generate_updates(GenerateUpdatesRequest {
            current: &info,
            sps_param: None,
            to_loc: Some(to_loc.clone()),
            behavior: defaults.note_subst_moved,
            max_history_len: defaults.maximum_sps_list_length,
            now: Utc::now(),
        })?;
        if !items.is_empty() {
            self.table.update(items)?;
        }
        Ok(())
    }

    /// Move logic for a single robot with arms A/B (spec §4.F dual-arm
    /// rules): route the substrate through whichever arm already holds it,
    /// or the first unoccupied arm otherwise.
    fn execute_move_substrate(&self, subst_id: &ObjectId, to_loc: &ObjectId) -> HorusResult<()> {
        let current = self.current_loc_name(subst_id);
        if current.as_deref() == Some(to_loc.name.as_str()) {
            return Ok(());
        }
        let arm = self.resolve_arm_for_move(current.as_deref())?;
        if current.as_deref() != Some(arm.as_str()) {
            self.note_subst_moved(subst_id, &ObjectId::subst_loc(arm.clone()))?;
        }
        self.note_subst_moved(subst_id, to_loc)
    }

    fn resolve_arm_for_move(&self, current_loc: Option<&str>) -> HorusResult<String> {
        if let Some(loc) = current_loc {
            if self.arm_loc_names.iter().any(|a| a == loc) {
                return Ok(loc.to_string());
            }
        }
        self.arm_loc_names
            .iter()
            .find(|a| !self.is_occupied(a))
            .cloned()
            .ok_or_else(|| HorusError::CapacityExceeded("no unoccupied robot arm available".into()))
    }

    fn execute_swap(&self, subst_id: &ObjectId, swap_with_id: &ObjectId) -> HorusResult<()> {
        let subst_loc = self.current_loc_name(subst_id);
        let swap_loc = self
            .current_loc_name(swap_with_id)
            .ok_or_else(|| HorusError::Structural(format!("{swap_with_id} has no current location")))?;
        let (from_arm, to_arm) = self.resolve_arms_for_swap(subst_loc.as_deref())?;
        if subst_loc.as_deref() != Some(from_arm.as_str()) {
            self.note_subst_moved(subst_id, &ObjectId::subst_loc(from_arm.clone()))?;
        }
        self.note_subst_moved(swap_with_id, &ObjectId::subst_loc(to_arm))?;
        self.note_subst_moved(subst_id, &ObjectId::subst_loc(swap_loc))
    }

    fn resolve_arms_for_swap(&self, subst_loc: Option<&str>) -> HorusResult<(String, String)> {
        let subst_on_arm = subst_loc.map(|l| self.arm_loc_names.iter().any(|a| a == l)).unwrap_or(false);
        let unoccupied: Vec<String> = self.arm_loc_names.iter().filter(|a| !self.is_occupied(a)).cloned().collect();
        if subst_on_arm {
            let from_arm = subst_loc.unwrap().to_string();
            let to_arm = unoccupied
                .into_iter()
                .find(|a| *a != from_arm)
                .ok_or_else(|| HorusError::CapacityExceeded("no second free arm available for swap".into()))?;
            Ok((from_arm, to_arm))
        } else {
            if unoccupied.len() < 2 {
                return Err(HorusError::CapacityExceeded("need two free robot arms for swap".into()));
            }
            Ok((unoccupied[0].clone(), unoccupied[1].clone()))
        }
    }

    fn execute_move_or_swap(&self, subst_id: &ObjectId, to_loc: &ObjectId) -> HorusResult<()> {
        match self.occupant_of(to_loc) {
            None => self.execute_move_substrate(subst_id, to_loc),
            Some(occupant) if occupant == *subst_id => Ok(()),
            Some(occupant) => self.execute_swap(subst_id, &occupant),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::item::{ActionFactory, RunActionFlags};
    use crate::permission::SimpleProcessModule;
    use crate::settings::GlobalDefaults;
    use crate::substrate::TransferPermissionSummaryStateCode as SummaryCode;
    use crate::table::{AttributeMap, Link, ObjectFlags, UpdateItem};

    fn loc(name: &str) -> ObjectId {
        ObjectId::subst_loc(name)
    }
    fn subst(name: &str) -> ObjectId {
        ObjectId::substrate(name)
    }

    fn add_loc(table: &ObjectTable, name: &str) {
        table
            .update(vec![UpdateItem::AddObject {
                id: loc(name),
                attrs: AttributeMap::new(),
                flags: ObjectFlags { pinned: true, is_final: false },
                if_needed: true,
                merge: crate::table::MergeBehavior::AddAndUpdate,
            }])
            .unwrap();
    }

    fn add_substrate(table: &ObjectTable, name: &str, src: &str, dest: &str, at: &str) {
        table
            .update(vec![
                UpdateItem::AddObject {
                    id: subst(name),
                    attrs: AttributeMap::new(),
                    flags: ObjectFlags::default(),
                    if_needed: false,
                    merge: crate::table::MergeBehavior::AddAndUpdate,
                },
                UpdateItem::AddLink {
                    link: Link::new(subst(name), LinkKey::SrcLoc, loc(src)),
                    auto_unlink_prior_by_key: false,
                    if_needed: false,
                },
                UpdateItem::AddLink {
                    link: Link::new(subst(name), LinkKey::DestLoc, loc(dest)),
                    auto_unlink_prior_by_key: false,
                    if_needed: false,
                },
            ])
            .unwrap();
        table
            .update(vec![UpdateItem::AddLink {
                link: Link::new(loc(at), LinkKey::Contains, subst(name)),
                auto_unlink_prior_by_key: true,
                if_needed: false,
            }])
            .unwrap();
    }

    fn fresh_table() -> Arc<ObjectTable> {
        Arc::new(ObjectTable::new(GlobalDefaults::default()))
    }

    #[test]
    fn move_substrate_relocates_via_free_arm() {
        let table = fresh_table();
        for l in ["ArmA", "ArmB", "PM1", "PM2"] {
            add_loc(&table, l);
        }
        add_substrate(&table, "S1", "PM1", "PM2", "PM1");

        let manager = RoutingManager::new(table.clone(), vec!["ArmA".into(), "ArmB".into()]);
        let action = manager.sequence(vec![RoutingItem::MoveSubstrate { subst_id: subst("S1"), to_loc: loc("PM2") }]);
        assert!(action.is_succeeded());

        assert_eq!(manager.occupant_of(&loc("PM2")), Some(subst("S1")));
        assert_eq!(manager.occupant_of(&loc("PM1")), None);
        assert_eq!(manager.occupant_of(&loc("ArmA")), None);
    }

    #[test]
    fn dual_arm_swap_matches_scenario() {
        // Arms A/B empty; S1 at PM1, S2 on arm A. SwapSubstrates(S2, S1).
        let table = fresh_table();
        for l in ["ArmA", "ArmB", "PM1"] {
            add_loc(&table, l);
        }
        add_substrate(&table, "S1", "PM1", "PM1", "PM1");
        add_substrate(&table, "S2", "ArmA", "ArmA", "ArmA");

        let manager = RoutingManager::new(table.clone(), vec!["ArmA".into(), "ArmB".into()]);
        let action = manager.sequence(vec![RoutingItem::SwapSubstrates { subst_id: subst("S2"), swap_with_subst_id: subst("S1") }]);
        assert!(action.is_succeeded());

        assert_eq!(manager.occupant_of(&loc("PM1")), Some(subst("S2")));
        assert_eq!(manager.occupant_of(&loc("ArmB")), Some(subst("S1")));
        assert_eq!(manager.occupant_of(&loc("ArmA")), None);
    }

    #[test]
    fn move_or_swap_moves_into_empty_location() {
        let table = fresh_table();
        for l in ["ArmA", "PM1", "PM2"] {
            add_loc(&table, l);
        }
        add_substrate(&table, "S1", "PM1", "PM2", "PM1");

        let manager = RoutingManager::new(table.clone(), vec!["ArmA".into()]);
        let action = manager.sequence(vec![RoutingItem::MoveOrSwap { subst_id: subst("S1"), to_loc: loc("PM2") }]);
        assert!(action.is_succeeded());
        assert_eq!(manager.occupant_of(&loc("PM2")), Some(subst("S1")));
    }

    #[test]
    fn move_fails_when_no_arm_available() {
        let table = fresh_table();
        for l in ["ArmA", "PM1", "PM2"] {
            add_loc(&table, l);
        }
        add_substrate(&table, "S1", "PM1", "PM2", "PM1");
        add_substrate(&table, "S2", "ArmA", "ArmA", "ArmA");

        let manager = RoutingManager::new(table.clone(), vec!["ArmA".into()]);
        let action = manager.sequence(vec![RoutingItem::MoveSubstrate { subst_id: subst("S1"), to_loc: loc("PM2") }]);
        assert!(!action.is_succeeded());
        assert_eq!(manager.occupant_of(&loc("PM1")), Some(subst("S1")));
    }

    #[test]
    fn transfer_permission_request_acquires_and_auto_releases() {
        let table = fresh_table();
        add_loc(&table, "PM1");
        let simple = Arc::new(SimpleProcessModule::new("PM1-ctrl"));
        simple.set_summary_state(SummaryCode::Available, None);

        let mut manager = RoutingManager::new(table.clone(), vec![]);
        manager.register_module("PM1", simple.clone());

        let settings = TransferPermissionRequestSettings { acquire: true, auto_release_at_end_of_sequence: true, ..Default::default() };
        let action = manager.sequence(vec![RoutingItem::TransferPermissionRequest { settings, loc_names: vec!["PM1".into()] }]);
        assert!(action.is_succeeded());
        assert!(!simple.current_state().is_granted("PM1", false));
    }

    #[test]
    fn transfer_permission_request_only_start_is_awaited_by_later_item() {
        let table = fresh_table();
        for l in ["ArmA", "PM1", "PM2"] {
            add_loc(&table, l);
        }
        add_substrate(&table, "S1", "PM1", "PM2", "PM1");
        let simple = Arc::new(SimpleProcessModule::new("PM2-ctrl").without_auto_busy());
        simple.set_summary_state(SummaryCode::Busy, None);

        let mut manager = RoutingManager::new(table.clone(), vec!["ArmA".into()]);
        manager.register_module("PM2", simple.clone());

        let posted_settings = TransferPermissionRequestSettings { only_start_request: true, acquire: true, ..Default::default() };
        let move_item = RoutingItem::MoveSubstrate { subst_id: subst("S1"), to_loc: loc("PM2") };

        // Flips the module Available from another thread once the sequence
        // is blocked awaiting the posted acquire.
        let simple_for_thread = simple.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            simple_for_thread.set_summary_state(SummaryCode::Available, None);
        });

        let action = manager.sequence(vec![
            RoutingItem::TransferPermissionRequest { settings: posted_settings, loc_names: vec!["PM2".into()] },
            move_item,
        ]);
        handle.join().unwrap();
        assert!(action.is_succeeded());
        assert_eq!(manager.occupant_of(&loc("PM2")), Some(subst("S1")));
    }

    #[test]
    fn delegate_predicate_negative_fails_sequence() {
        let table = fresh_table();
        add_loc(&table, "PM1");
        let manager = RoutingManager::new(table.clone(), vec![]);
        let action = manager.sequence(vec![RoutingItem::DelegatePredicate {
            predicate: Arc::new(|| false),
            behavior: DelegateNegativeBehavior::NegativeFailsSequence,
            nvs_on_negative: Some("gate closed".into()),
        }]);
        assert!(!action.is_succeeded());
        assert_eq!(action.phase().failure_reason(), Some("gate closed"));
    }

    #[test]
    fn delegate_predicate_negative_ends_sequence_as_success() {
        let table = fresh_table();
        add_loc(&table, "PM1");
        let manager = RoutingManager::new(table.clone(), vec![]);
        let ran_second = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran_second_clone = ran_second.clone();
        let factory = Arc::new(ActionFactory::new(move || {
            ran_second_clone.store(true, std::sync::atomic::Ordering::SeqCst);
            let (action, completer) = new_action();
            completer.succeed();
            action
        }));
        let action = manager.sequence(vec![
            RoutingItem::DelegatePredicate { predicate: Arc::new(|| false), behavior: DelegateNegativeBehavior::NegativeEndsSequence, nvs_on_negative: None },
            RoutingItem::RunAction { factory, flags: RunActionFlags::default() },
        ]);
        assert!(action.is_succeeded());
        assert!(!ran_second.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn run_action_failure_fails_sequence_unless_ignored() {
        let table = fresh_table();
        let manager = RoutingManager::new(table.clone(), vec![]);
        let factory = Arc::new(ActionFactory::new(|| {
            let (action, completer) = new_action();
            completer.fail("device fault");
            action
        }));
        let action = manager.sequence(vec![RoutingItem::RunAction { factory, flags: RunActionFlags::default() }]);
        assert!(!action.is_succeeded());
    }
}
