//! Component D: the substrate state engine.
//!
//! The SPS merge lattice, the live-SPS transition table, and the unified
//! update procedure (spec §4.D).

use chrono::{DateTime, Utc};

use crate::error::{HorusError, HorusResult};
use crate::settings::{RemovalPolicy, UpdateBehavior};
use crate::table::{AttributeValue, Link, LinkKey, MergeBehavior, ObjectId, UpdateItem};

use super::info::SubstrateInfo;
use super::states::{LiveSps, PseudoSps, SpsEvent, Sts};

/// Rank used by [`merge`]. `Undefined` is the lattice's identity element
/// and is handled separately, so it has no meaningful rank.
fn rank(v: LiveSps) -> u8 {
    match v {
        LiveSps::Undefined => 0,
        LiveSps::NeedsProcessing => 1,
        LiveSps::InProcess => 2,
        LiveSps::Processed => 3,
        LiveSps::Stopped => 4,
        LiveSps::Rejected => 5,
        LiveSps::Skipped => 6,
        LiveSps::Aborted => 7,
        LiveSps::Lost => 8,
    }
}

/// The SPS merge lattice (spec §4.D): `NeedsProcessing < InProcess <
/// Processed < Stopped < Rejected < Skipped < Aborted < Lost`, with
/// `Undefined` as identity. This is the *only* place `Skipped` outranks
/// `Processed` — deliberate, per spec §4.D and the open question recorded
/// in `DESIGN.md`.
///
/// Note: spec §4.D's prose also places the pseudo value
/// `ProcessStepCompleted` in this ordering (between `InProcess` and
/// `Processed`). `merge` itself only ever receives already-validated
/// `LiveSps` arguments — the one call site (step 3 of
/// [`generate_updates`]) guards `spsParam` to be non-pseudo before
/// invoking it — so `ProcessStepCompleted` never actually reaches this
/// function; see `DESIGN.md` for the full reasoning.
pub fn merge(a: LiveSps, b: LiveSps) -> LiveSps {
    match (a, b) {
        (x, LiveSps::Undefined) => x,
        (LiveSps::Undefined, y) => y,
        _ => {
            if rank(a) >= rank(b) {
                a
            } else {
                b
            }
        }
    }
}

/// `getTransitionDenyReason` (spec §4.D). `None` means the transition is
/// allowed (including the same-value no-op case); `Some(reason)` means it
/// is denied and should be logged, not raised as a hard error.
pub fn transition_deny_reason(
    current: LiveSps,
    target: LiveSps,
    behavior: &UpdateBehavior,
) -> Option<String> {
    use LiveSps::*;
    if current == target {
        return None;
    }
    let allowed = match (current, target) {
        (NeedsProcessing, InProcess) => true,
        (InProcess, Processed) | (InProcess, Aborted) | (InProcess, Stopped) | (InProcess, Rejected) => true,
        (NeedsProcessing, Lost) | (InProcess, Lost) => true,
        (NeedsProcessing, Skipped) => true,
        (InProcess, NeedsProcessing) => behavior.allow_return_to_needs_processing,
        (NeedsProcessing, Processed)
        | (NeedsProcessing, Aborted)
        | (NeedsProcessing, Stopped)
        | (NeedsProcessing, Rejected) => !behavior.require_in_process_before_process_complete,
        _ => false,
    };
    if allowed {
        None
    } else {
        Some(format!(
            "illegal SPS transition {current} -> {target}"
        ))
    }
}

/// `inferredSTS(locName, sps)` (spec §4.C).
pub fn inferred_sts(loc_name: &str, src_loc_name: &str, dest_loc_name: &str, sps: LiveSps) -> Sts {
    if sps.is_needs_processing() && loc_name == src_loc_name {
        return Sts::AtSource;
    }
    if sps.is_processing_complete() && loc_name == dest_loc_name {
        return Sts::AtDestination;
    }
    if sps == LiveSps::Skipped && loc_name == src_loc_name && src_loc_name != dest_loc_name {
        return Sts::AtSource;
    }
    Sts::AtWork
}

/// Inputs to [`generate_updates`].
pub struct GenerateUpdatesRequest<'a> {
    pub current: &'a SubstrateInfo,
    /// New SPS/pseudo event to fold in, if any.
    pub sps_param: Option<SpsEvent>,
    /// New target location, if the substrate is to move.
    pub to_loc: Option<ObjectId>,
    pub behavior: UpdateBehavior,
    pub max_history_len: usize,
    pub now: DateTime<Utc>,
}

/// The unified update procedure (spec §4.D). Returns an emit-ready
/// attribute/link batch, or an error if preconditions fail (null id,
/// wrong type, invalid info) — never a partially-applied batch.
pub fn generate_updates(req: GenerateUpdatesRequest<'_>) -> HorusResult<Vec<UpdateItem>> {
    let current = req.current;
    if current.id.name.is_empty() {
        return Err(HorusError::Internal("generate_updates: empty substrate id".into()));
    }
    if !current.is_valid() {
        return Err(HorusError::Structural(format!(
            "generate_updates: substrate {} is not in a valid state",
            current.id
        )));
    }

    let mut items = Vec::new();
    let mut current_loc_name = current.current_loc_name().to_string();
    let src_loc_name = current.src_loc.name.clone();
    let dest_loc_name = current.dest_loc.name.clone();

    // --- 1. Move subcomputation ---
    let mut moved = false;
    if let Some(to_loc) = &req.to_loc {
        if to_loc.name != current_loc_name {
            items.push(UpdateItem::AddLink {
                link: Link::new(to_loc.clone(), LinkKey::Contains, current.id.clone()),
                auto_unlink_prior_by_key: true,
                if_needed: false,
            });
            current_loc_name = to_loc.name.clone();
            moved = true;
        }
    }

    let mut effective_sps_param = req.sps_param;
    let mut forced = false;

    // --- 2. Arrival-policy overrides ---
    let at_dest = current_loc_name == dest_loc_name;
    let param_is_moved_or_undefined = matches!(
        effective_sps_param,
        None | Some(SpsEvent::Pseudo(PseudoSps::Moved)) | Some(SpsEvent::Live(LiveSps::Undefined))
    );
    if moved && param_is_moved_or_undefined && at_dest {
        if current.sjrs == super::states::Sjrs::Stop
            && req.behavior.handle_moved_to_dest_loc_with_sjrs_stop_and_sps_in_process
        {
            effective_sps_param = Some(SpsEvent::Live(LiveSps::Stopped));
            forced = true;
        } else if current.sjrs == super::states::Sjrs::Abort
            && req.behavior.handle_moved_to_dest_loc_with_sjrs_abort_and_sps_in_process
        {
            effective_sps_param = Some(SpsEvent::Live(LiveSps::Aborted));
            forced = true;
        }
    }

    let mut next_sps = current.sps;
    let mut next_pending = current.pending_sps;
    let mut pending_consumed = false;

    if forced {
        // Arrival-policy override already decided the live SPS directly;
        // it bypasses the transition table and the merge/pending logic
        // entirely (spec §4.D step 3: "...and not already forced").
        next_sps = effective_sps_param.unwrap().as_live().unwrap();
    }

    // --- 3. SPS/PendingSPS update ---
    let is_non_pseudo_non_undefined =
        !forced && matches!(effective_sps_param, Some(SpsEvent::Live(l)) if l != LiveSps::Undefined);
    if is_non_pseudo_non_undefined {
        let param_live = effective_sps_param.unwrap().as_live().unwrap();
        if !req.behavior.use_pending_sps {
            let merged = merge(param_live, next_pending);
            if let Some(reason) = transition_deny_reason(next_sps, merged, &req.behavior) {
                log::debug!("generate_updates: {} denied ({})", current.id, reason);
            } else if merged != next_sps {
                next_sps = merged;
                pending_consumed = true;
            }
        } else {
            let inferred = current.sps;
            let computed_next_pending = merge(inferred, param_live);
            next_pending = computed_next_pending;
            if next_sps == LiveSps::NeedsProcessing
                && matches!(
                    computed_next_pending,
                    LiveSps::InProcess
                        | LiveSps::Processed
                        | LiveSps::Rejected
                        | LiveSps::Stopped
                        | LiveSps::Aborted
                )
            {
                next_sps = LiveSps::InProcess;
            }
            if matches!(computed_next_pending, LiveSps::Skipped | LiveSps::Lost) {
                next_sps = computed_next_pending;
            }
        }
    }

    // --- 4. Clear pending on completion ---
    if next_sps.is_processing_complete() {
        next_pending = LiveSps::Undefined;
    } else if pending_consumed {
        next_pending = LiveSps::Undefined;
    }

    // --- 5. History append ---
    let history_eligible = match effective_sps_param {
        Some(SpsEvent::Live(l)) if l != LiveSps::Undefined => true,
        Some(SpsEvent::Pseudo(_)) => true,
        _ => false,
    };
    if req.behavior.use_sps_list && history_eligible {
        let at_cap = current.sps_list.len() >= req.max_history_len;
        if !at_cap {
            let event = effective_sps_param.unwrap();
            let mut attrs = crate::table::AttributeMap::new();
            attrs.insert(
                "SPSList".to_string(),
                AttributeValue::List(vec![event.name().to_string()]),
            );
            if req.behavior.use_sps_loc_list {
                attrs.insert(
                    "SPSLocList".to_string(),
                    AttributeValue::List(vec![current_loc_name.clone()]),
                );
            }
            if req.behavior.use_sps_datetime_list {
                attrs.insert(
                    "SPSDateTimeList".to_string(),
                    AttributeValue::List(vec![req.now.to_rfc3339()]),
                );
            }
            items.push(UpdateItem::SetAttributes {
                id: current.id.clone(),
                attrs,
                merge: MergeBehavior::AppendLists,
            });
        }
    }

    // --- 6. Auto STS ---
    // `inferredSPS` here is "what SPS would be if any still-pending result
    // were finalized now" — merge(next_sps, next_pending) — not merely
    // `next_sps` from step 3, which may not have been touched at all (e.g.
    // a move with no `spsParam`). This is what lets arrival at the
    // destination finalize a result that was only ever recorded in
    // `PendingSPS` (spec §8 scenario 3).
    let mut next_sts = current.sts;
    if req.behavior.auto_update_sts {
        let inferred_sps = merge(next_sps, next_pending);
        let computed_sts = inferred_sts(&current_loc_name, &src_loc_name, &dest_loc_name, inferred_sps);
        if computed_sts != current.sts {
            next_sts = computed_sts;
        }
        if next_sts == Sts::AtDestination && next_sps != inferred_sps {
            next_sps = inferred_sps;
            if next_sps.is_processing_complete() {
                next_pending = LiveSps::Undefined;
            }
        }
    }

    let mut scalar_attrs = crate::table::AttributeMap::new();
    if next_sps != current.sps {
        scalar_attrs.insert(
            "SubstProcState".to_string(),
            AttributeValue::Enum(next_sps.name().to_string()),
        );
    }
    if next_pending != current.pending_sps {
        scalar_attrs.insert(
            "PendingSPS".to_string(),
            AttributeValue::Enum(next_pending.name().to_string()),
        );
    }
    if next_sts != current.sts {
        scalar_attrs.insert(
            "SubstState".to_string(),
            AttributeValue::Enum(next_sts.to_string()),
        );
    }
    if !scalar_attrs.is_empty() {
        items.push(UpdateItem::SetAttributes {
            id: current.id.clone(),
            attrs: scalar_attrs,
            merge: MergeBehavior::AddAndUpdate,
        });
    }

    Ok(items)
}

/// `SetSubstProcState`/`SetPendingSubstProcState` (spec §6): folds a new
/// SPS in place, without moving the substrate. A thin wrapper over
/// [`generate_updates`] with `to_loc: None`.
pub fn set_subst_proc_state(
    current: &SubstrateInfo,
    sps_param: SpsEvent,
    behavior: UpdateBehavior,
    max_history_len: usize,
    now: DateTime<Utc>,
) -> HorusResult<Vec<UpdateItem>> {
    generate_updates(GenerateUpdatesRequest {
        current,
        sps_param: Some(sps_param),
        to_loc: None,
        behavior,
        max_history_len,
        now,
    })
}

/// `RemoveSubst` (spec §3 Lifecycle / §6). If `policy.
/// attempts_to_move_all_subst_to_dest_or_src`, first moves the substrate to
/// whichever of its source/destination `inferredSTS` would put it at —
/// forcing `SPS := Lost` first if processing hadn't completed — then always
/// appends `Removed` to its history and deletes it. Like
/// [`generate_updates`], returns an emit-ready batch; the caller commits it.
pub fn remove_substrate(
    current: &SubstrateInfo,
    policy: RemovalPolicy,
    behavior: UpdateBehavior,
    max_history_len: usize,
    now: DateTime<Utc>,
) -> HorusResult<Vec<UpdateItem>> {
    if current.id.name.is_empty() {
        return Err(HorusError::Internal("remove_substrate: empty substrate id".into()));
    }
    if !current.is_valid() {
        return Err(HorusError::Structural(format!(
            "remove_substrate: substrate {} is not in a valid state",
            current.id
        )));
    }

    let mut items = Vec::new();
    let mut staged = current.clone();

    if policy.attempts_to_move_all_subst_to_dest_or_src {
        let forced_lost = !staged.sps.is_processing_complete();
        let effective_sps = if forced_lost { LiveSps::Lost } else { staged.sps };
        let inferred = inferred_sts(
            staged.current_loc_name(),
            &staged.src_loc.name,
            &staged.dest_loc.name,
            effective_sps,
        );
        let target = if inferred == Sts::AtDestination {
            staged.dest_loc.clone()
        } else {
            staged.src_loc.clone()
        };
        let sps_param = forced_lost.then_some(SpsEvent::Live(LiveSps::Lost));

        let move_items = generate_updates(GenerateUpdatesRequest {
            current: &staged,
            sps_param,
            to_loc: Some(target.clone()),
            behavior,
            max_history_len,
            now,
        })?;
        staged.current_loc = Some(target);
        staged.sps = effective_sps;
        if effective_sps.is_processing_complete() {
            staged.pending_sps = LiveSps::Undefined;
        }
        items.extend(move_items);
    }

    let removed_items = generate_updates(GenerateUpdatesRequest {
        current: &staged,
        sps_param: Some(SpsEvent::Pseudo(PseudoSps::Removed)),
        to_loc: None,
        behavior,
        max_history_len,
        now,
    })?;
    items.extend(removed_items);

    if policy.persist_removed_from_loc_name {
        let mut attrs = crate::table::AttributeMap::new();
        attrs.insert(
            "RemovedFromSubstLocName".to_string(),
            AttributeValue::Str(staged.current_loc_name().to_string()),
        );
        items.push(UpdateItem::SetAttributes {
            id: current.id.clone(),
            attrs,
            merge: MergeBehavior::AddAndUpdate,
        });
    }

    items.push(UpdateItem::RemoveObject { id: current.id.clone() });

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_idempotent() {
        for v in [
            LiveSps::NeedsProcessing,
            LiveSps::InProcess,
            LiveSps::Processed,
            LiveSps::Stopped,
            LiveSps::Rejected,
            LiveSps::Skipped,
            LiveSps::Aborted,
            LiveSps::Lost,
            LiveSps::Undefined,
        ] {
            assert_eq!(merge(v, v), v);
        }
    }

    #[test]
    fn merge_monotonic() {
        let values = [
            LiveSps::NeedsProcessing,
            LiveSps::InProcess,
            LiveSps::Processed,
            LiveSps::Stopped,
            LiveSps::Rejected,
            LiveSps::Skipped,
            LiveSps::Aborted,
            LiveSps::Lost,
        ];
        for &a in &values {
            for &b in &values {
                let m = merge(a, b);
                assert!(rank(m) >= rank(a));
                assert!(rank(m) >= rank(b));
            }
        }
    }

    #[test]
    fn merge_undefined_is_identity() {
        assert_eq!(merge(LiveSps::Processed, LiveSps::Undefined), LiveSps::Processed);
        assert_eq!(merge(LiveSps::Undefined, LiveSps::Processed), LiveSps::Processed);
    }

    #[test]
    fn skipped_outranks_processed_only_here() {
        assert_eq!(merge(LiveSps::Processed, LiveSps::Skipped), LiveSps::Skipped);
    }

    #[test]
    fn needs_processing_to_in_process_allowed() {
        let behavior = UpdateBehavior::default();
        assert!(transition_deny_reason(LiveSps::NeedsProcessing, LiveSps::InProcess, &behavior).is_none());
    }

    #[test]
    fn in_process_to_needs_processing_denied_by_default() {
        let behavior = UpdateBehavior::default();
        assert!(transition_deny_reason(LiveSps::InProcess, LiveSps::NeedsProcessing, &behavior).is_some());
    }

    #[test]
    fn in_process_to_needs_processing_allowed_when_flagged() {
        let mut behavior = UpdateBehavior::default();
        behavior.allow_return_to_needs_processing = true;
        assert!(transition_deny_reason(LiveSps::InProcess, LiveSps::NeedsProcessing, &behavior).is_none());
    }

    #[test]
    fn needs_processing_direct_to_processed_gated_by_flag() {
        let mut behavior = UpdateBehavior::default();
        assert!(transition_deny_reason(LiveSps::NeedsProcessing, LiveSps::Processed, &behavior).is_some());
        behavior.require_in_process_before_process_complete = false;
        assert!(transition_deny_reason(LiveSps::NeedsProcessing, LiveSps::Processed, &behavior).is_none());
    }

    #[test]
    fn same_value_transition_is_noop() {
        let behavior = UpdateBehavior::default();
        assert!(transition_deny_reason(LiveSps::Processed, LiveSps::Processed, &behavior).is_none());
    }

    #[test]
    fn inferred_sts_basic_cases() {
        assert_eq!(
            inferred_sts("LP1.01", "LP1.01", "LP1.01", LiveSps::NeedsProcessing),
            Sts::AtSource
        );
        assert_eq!(
            inferred_sts("PM1", "LP1.01", "LP1.01", LiveSps::InProcess),
            Sts::AtWork
        );
        assert_eq!(
            inferred_sts("LP1.01", "LP1.01", "LP1.01", LiveSps::Processed),
            Sts::AtDestination
        );
    }

    #[test]
    fn inferred_sts_skipped_at_source_when_src_ne_dest() {
        assert_eq!(
            inferred_sts("LP1.01", "LP1.01", "LP2.01", LiveSps::Skipped),
            Sts::AtSource
        );
        assert_eq!(
            inferred_sts("LP2.01", "LP1.01", "LP2.01", LiveSps::Skipped),
            Sts::AtDestination
        );
    }

    fn info_at(loc: &str, src: &str, dest: &str, sps: LiveSps, sts: Sts) -> SubstrateInfo {
        SubstrateInfo {
            id: ObjectId::substrate("W1"),
            sts,
            sps,
            pending_sps: LiveSps::Undefined,
            src_loc: ObjectId::subst_loc(src),
            dest_loc: ObjectId::subst_loc(dest),
            current_loc: Some(ObjectId::subst_loc(loc)),
            sjrs: super::super::states::Sjrs::None,
            sjs: super::super::states::Sjs::Initial,
            lot_id: None,
            usage: None,
            sps_list: vec![],
            sps_loc_list: vec![],
            sps_datetime_list: vec![],
        }
    }

    #[test]
    fn remove_substrate_incomplete_forces_lost_and_moves_to_source() {
        // Src != dest, substrate skipped at src (scenario §8.6): removal
        // should move it to its source, not its destination.
        let info = info_at("LP1.01", "LP1.01", "PM1", LiveSps::Skipped, Sts::AtSource);
        let items = remove_substrate(
            &info,
            RemovalPolicy::default(),
            UpdateBehavior::default(),
            50,
            Utc::now(),
        )
        .unwrap();

        assert!(items.iter().any(|i| matches!(
            i,
            UpdateItem::AddLink { link, .. } if link.to.name == "LP1.01" && link.key == LinkKey::Contains
        )));
        assert!(items.iter().any(|i| matches!(i, UpdateItem::RemoveObject { id } if id.name == "W1")));
        let removed_attrs = items.iter().find_map(|i| match i {
            UpdateItem::SetAttributes { attrs, .. } if attrs.contains_key("RemovedFromSubstLocName") => Some(attrs),
            _ => None,
        });
        assert_eq!(
            removed_attrs.unwrap().get("RemovedFromSubstLocName"),
            Some(&AttributeValue::Str("LP1.01".to_string()))
        );
    }

    #[test]
    fn remove_substrate_complete_moves_to_destination() {
        let info = info_at("PM1", "LP1.01", "PM1", LiveSps::Processed, Sts::AtDestination);
        let items = remove_substrate(
            &info,
            RemovalPolicy::default(),
            UpdateBehavior::default(),
            50,
            Utc::now(),
        )
        .unwrap();

        // Already at destination, so no AddLink is needed for the move.
        assert!(!items.iter().any(|i| matches!(i, UpdateItem::AddLink { .. })));
        let sps_list_item = items.iter().find_map(|i| match i {
            UpdateItem::SetAttributes { attrs, .. } if attrs.contains_key("SPSList") => Some(attrs),
            _ => None,
        });
        match sps_list_item.unwrap().get("SPSList") {
            Some(AttributeValue::List(l)) => assert_eq!(l, &vec!["Removed".to_string()]),
            other => panic!("expected SPSList append, got {other:?}"),
        }
    }

    #[test]
    fn remove_substrate_without_move_policy_only_removes() {
        let info = info_at("R1.A", "LP1.01", "PM1", LiveSps::InProcess, Sts::AtWork);
        let policy = RemovalPolicy {
            attempts_to_move_all_subst_to_dest_or_src: false,
            persist_removed_from_loc_name: false,
        };
        let items = remove_substrate(&info, policy, UpdateBehavior::default(), 50, Utc::now()).unwrap();

        assert!(!items.iter().any(|i| matches!(i, UpdateItem::AddLink { .. })));
        assert!(!items
            .iter()
            .any(|i| matches!(i, UpdateItem::SetAttributes { attrs, .. } if attrs.contains_key("RemovedFromSubstLocName"))));
        assert!(items.iter().any(|i| matches!(i, UpdateItem::RemoveObject { .. })));
    }

    #[test]
    fn set_subst_proc_state_does_not_move() {
        let info = info_at("PM1", "LP1.01", "PM1", LiveSps::NeedsProcessing, Sts::AtWork);
        let items = set_subst_proc_state(
            &info,
            SpsEvent::Live(LiveSps::InProcess),
            UpdateBehavior::default(),
            50,
            Utc::now(),
        )
        .unwrap();
        assert!(!items.iter().any(|i| matches!(i, UpdateItem::AddLink { .. })));
    }
}
