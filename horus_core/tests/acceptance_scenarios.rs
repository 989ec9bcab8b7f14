//! Acceptance tests for the six end-to-end scenarios named in the table's
//! testable properties: create-and-move, happy-path processing,
//! pending-SPS merge, transfer-permission gating, dual-arm swap, and
//! skip-and-remove.

use std::sync::Arc;

use chrono::Utc;
use horus_core::permission::{ProcessModule, SimpleProcessModule, TransferPermissionActionKind};
use horus_core::routing::{RoutingItem, RoutingManager};
use horus_core::settings::{GlobalDefaults, RemovalPolicy, UpdateBehavior};
use horus_core::substrate::{
    generate_updates, remove_substrate, GenerateUpdatesRequest, LiveSps, SpsEvent, Sts, SubstrateInfo,
    TransferPermissionSummaryStateCode as SummaryCode,
};
use horus_core::table::{AttributeMap, AttributeValue, Link, LinkKey, MergeBehavior, ObjectFlags, ObjectId, ObjectTable, UpdateItem};

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
            merge: MergeBehavior::AddAndUpdate,
        }])
        .unwrap();
}

/// Creates a substrate with explicit initial `SubstProcState`/`SubstState`,
/// wires its Src/Dest links, and places it at `at`.
fn add_substrate(table: &ObjectTable, name: &str, src: &str, dest: &str, at: &str, sps: LiveSps, sts: Sts) {
    let mut attrs = AttributeMap::new();
    attrs.insert("SubstProcState".into(), AttributeValue::Enum(sps.name().to_string()));
    attrs.insert("SubstState".into(), AttributeValue::Enum(sts.to_string()));
    table
        .update(vec![
            UpdateItem::AddObject {
                id: subst(name),
                attrs,
                flags: ObjectFlags::default(),
                if_needed: false,
                merge: MergeBehavior::AddAndUpdate,
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

fn info_of(table: &ObjectTable, name: &str) -> SubstrateInfo {
    let snap = table.get_object(&subst(name)).expect("substrate exists");
    SubstrateInfo::from_snapshot(&snap)
}

fn occupant_of(table: &ObjectTable, loc_name: &str) -> Option<ObjectId> {
    let snap = table.get_object(&loc(loc_name))?;
    snap.links_out.iter().find(|l| l.key == LinkKey::Contains).map(|l| l.to.clone())
}

/// Applies a `SetSubstProcState`/`SetPendingSubstProcState`/move via
/// `generate_updates` and commits the resulting batch.
fn apply(table: &ObjectTable, name: &str, sps_param: Option<SpsEvent>, to_loc: Option<&str>, behavior: UpdateBehavior) {
    let info = info_of(table, name);
    let items = generate_updates(GenerateUpdatesRequest {
        current: &info,
        sps_param,
        to_loc: to_loc.map(loc),
        behavior,
        max_history_len: 50,
        now: Utc::now(),
    })
    .unwrap();
    if !items.is_empty() {
        table.update(items).unwrap();
    }
}

#[test]
fn scenario_1_create_and_move() {
    let table = Arc::new(ObjectTable::new(GlobalDefaults::default()));
    for l in ["LP1.01", "R1.A", "PM1"] {
        add_loc(&table, l);
    }
    add_substrate(&table, "W1", "LP1.01", "LP1.01", "LP1.01", LiveSps::NeedsProcessing, Sts::AtSource);

    let manager = RoutingManager::new(table.clone(), vec!["R1.A".into()]);

    let a1 = manager.sequence(vec![RoutingItem::MoveSubstrate { subst_id: subst("W1"), to_loc: loc("R1.A") }]);
    assert!(a1.is_succeeded());
    let info = info_of(&table, "W1");
    assert_eq!(info.sts, Sts::AtWork);
    assert_eq!(info.current_loc_name(), "R1.A");

    let a2 = manager.sequence(vec![RoutingItem::MoveSubstrate { subst_id: subst("W1"), to_loc: loc("PM1") }]);
    assert!(a2.is_succeeded());
    let info = info_of(&table, "W1");
    assert_eq!(info.sts, Sts::AtWork);
    assert_eq!(info.current_loc_name(), "PM1");

    assert_eq!(occupant_of(&table, "LP1.01"), None);
    assert_eq!(occupant_of(&table, "PM1"), Some(subst("W1")));
}

#[test]
fn scenario_2_happy_path_processing() {
    let table = Arc::new(ObjectTable::new(GlobalDefaults::default()));
    for l in ["LP1.01", "PM1"] {
        add_loc(&table, l);
    }
    add_substrate(&table, "W1", "LP1.01", "LP1.01", "PM1", LiveSps::NeedsProcessing, Sts::AtWork);

    let behavior = UpdateBehavior::default();
    apply(&table, "W1", Some(SpsEvent::Live(LiveSps::InProcess)), None, behavior);
    apply(&table, "W1", Some(SpsEvent::Live(LiveSps::Processed)), None, behavior);

    let manager = RoutingManager::new(table.clone(), vec![]);
    let action = manager.sequence(vec![RoutingItem::MoveSubstrate { subst_id: subst("W1"), to_loc: loc("LP1.01") }]);
    assert!(action.is_succeeded());

    let info = info_of(&table, "W1");
    assert_eq!(info.sps, LiveSps::Processed);
    assert_eq!(info.sts, Sts::AtDestination);
}

#[test]
fn scenario_3_pending_sps_merge() {
    let table = Arc::new(ObjectTable::new(GlobalDefaults::default()));
    for l in ["LP1.01", "PM1"] {
        add_loc(&table, l);
    }
    add_substrate(&table, "W1", "LP1.01", "PM1", "PM1", LiveSps::NeedsProcessing, Sts::AtWork);

    let mut behavior = UpdateBehavior::default();
    behavior.use_pending_sps = true;

    apply(&table, "W1", Some(SpsEvent::Live(LiveSps::InProcess)), None, behavior);
    apply(&table, "W1", Some(SpsEvent::Live(LiveSps::Rejected)), None, behavior);

    let info = info_of(&table, "W1");
    assert_eq!(info.sps, LiveSps::InProcess);
    assert_eq!(info.pending_sps, LiveSps::Rejected);

    apply(&table, "W1", None, Some("PM1"), behavior);

    let info = info_of(&table, "W1");
    assert_eq!(info.sps, LiveSps::Rejected);
    assert_eq!(info.sts, Sts::AtDestination);
    assert_eq!(info.pending_sps, LiveSps::Undefined);
}

#[test]
fn scenario_4_transfer_permission_gating() {
    let module = SimpleProcessModule::new("PM1");
    module.set_summary_state(SummaryCode::Available, None);

    let first = module.transfer_permission(TransferPermissionActionKind::Acquire, "PM1");
    assert!(first.is_succeeded());

    let second = module.transfer_permission(TransferPermissionActionKind::Acquire, "PM1");
    assert!(!second.is_complete(), "second acquire should queue while the first grant is outstanding");

    module.transfer_permission(TransferPermissionActionKind::Release, "PM1");
    assert!(second.is_succeeded(), "queued acquire should be granted once the prior grant is released");

    module.set_summary_state(SummaryCode::NotAvailable, None);
    let third = module.transfer_permission(TransferPermissionActionKind::Acquire, "PM1");
    assert!(third.phase().failure_reason().is_some(), "acquire posted while NotAvailable must fail immediately");
}

#[test]
fn scenario_5_dual_arm_swap() {
    let table = Arc::new(ObjectTable::new(GlobalDefaults::default()));
    for l in ["ArmA", "ArmB", "PM1"] {
        add_loc(&table, l);
    }
    add_substrate(&table, "S1", "PM1", "PM1", "PM1", LiveSps::NeedsProcessing, Sts::AtSource);
    add_substrate(&table, "S2", "ArmA", "ArmA", "ArmA", LiveSps::NeedsProcessing, Sts::AtSource);

    let manager = RoutingManager::new(table.clone(), vec!["ArmA".into(), "ArmB".into()]);
    let action = manager.sequence(vec![RoutingItem::SwapSubstrates {
        subst_id: subst("S2"),
        swap_with_subst_id: subst("S1"),
    }]);
    assert!(action.is_succeeded());

    assert_eq!(occupant_of(&table, "PM1"), Some(subst("S2")));
    assert_eq!(occupant_of(&table, "ArmB"), Some(subst("S1")));
    assert_eq!(occupant_of(&table, "ArmA"), None);
}

#[test]
fn scenario_6_skip_and_remove() {
    let table = Arc::new(ObjectTable::new(GlobalDefaults::default()));
    for l in ["LP1.01", "PM1"] {
        add_loc(&table, l);
    }
    add_substrate(&table, "W1", "LP1.01", "PM1", "LP1.01", LiveSps::NeedsProcessing, Sts::AtSource);

    let behavior = UpdateBehavior::default();
    apply(&table, "W1", Some(SpsEvent::Live(LiveSps::Skipped)), None, behavior);

    let info = info_of(&table, "W1");
    assert_eq!(info.sps, LiveSps::Skipped);
    // Src != Dest here, so inferredSTS with Skipped at source is AtSource.
    assert_eq!(info.sts, Sts::AtSource);

    let policy = RemovalPolicy::default();
    assert!(policy.attempts_to_move_all_subst_to_dest_or_src);

    // Skipped already counts as processing-complete, and src != dest here,
    // so removal's own inferredSTS-based target selection moves it toward
    // its source rather than its destination — it's already there, so this
    // is a no-op move.
    let info = info_of(&table, "W1");
    let items = remove_substrate(&info, policy, behavior, 50, Utc::now()).unwrap();
    table.update(items).unwrap();

    assert!(table.get_object(&subst("W1")).is_none());
    assert_eq!(occupant_of(&table, "LP1.01"), None);
}
