//! Explicit configuration structs, used in place of the 32-bit update-
//! behavior flag field the source system carries.
//!
//! Named booleans make the preconditions in the state engine readable and
//! let tests exercise every combination directly, rather than reverse-
//! engineering a bitmask.

use serde::{Deserialize, Serialize};

/// Update-behavior flags consulted by [`crate::substrate::engine`].
///
/// Each field corresponds to one named flag in the unified update
/// procedure. Defaults match the source behavior described for a substrate
/// that has not opted into any of the optional history/merge features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBehavior {
    /// Allow `InProcess -> NeedsProcessing`.
    pub allow_return_to_needs_processing: bool,
    /// Deny `NeedsProcessing -> {Processed, Aborted, Stopped, Rejected}`
    /// unless the substrate passed through `InProcess` first.
    pub require_in_process_before_process_complete: bool,
    /// Route incoming SPS updates through `PendingSPS` instead of merging
    /// directly into the live SPS.
    pub use_pending_sps: bool,
    /// Append to `SPSList` on qualifying updates.
    pub use_sps_list: bool,
    /// Append to `SPSLocList` alongside `SPSList`.
    pub use_sps_loc_list: bool,
    /// Append to `SPSDateTimeList` alongside `SPSList`.
    pub use_sps_datetime_list: bool,
    /// Recompute STS from location + inferred SPS after every update.
    pub auto_update_sts: bool,
    /// Force SPS := Stopped on arrival at destination with SJRS == Stop.
    pub handle_moved_to_dest_loc_with_sjrs_stop_and_sps_in_process: bool,
    /// Force SPS := Aborted on arrival at destination with SJRS == Abort.
    pub handle_moved_to_dest_loc_with_sjrs_abort_and_sps_in_process: bool,
}

impl Default for UpdateBehavior {
    fn default() -> Self {
        Self {
            allow_return_to_needs_processing: false,
            require_in_process_before_process_complete: true,
            use_pending_sps: false,
            use_sps_list: true,
            use_sps_loc_list: true,
            use_sps_datetime_list: true,
            auto_update_sts: true,
            handle_moved_to_dest_loc_with_sjrs_stop_and_sps_in_process: true,
            handle_moved_to_dest_loc_with_sjrs_abort_and_sps_in_process: true,
        }
    }
}

/// The four per-call-site behavior masks named in spec §6, plus the one
/// global numeric knob (`MaximumSPSListLength`). Passed explicitly to each
/// `ObjectTable`/`StateEngine` rather than read from process-wide state;
/// the `Default` impl exists for discovery and tests only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalDefaults {
    /// Combined length cap shared by `SPSList`/`SPSLocList`/
    /// `SPSDateTimeList`. Clamped to `[0, 1000]`.
    pub maximum_sps_list_length: usize,
    /// Behavior mask applied by [`crate::routing::RoutingManager`]'s
    /// `note_subst_moved`, invoked after every routed move.
    pub note_subst_moved: UpdateBehavior,
    /// Behavior mask applied by [`crate::substrate::set_subst_proc_state`],
    /// the scheduler's in-place SPS update.
    pub set_subst_proc_state: UpdateBehavior,
    /// Behavior mask applied by [`crate::substrate::remove_substrate`].
    pub remove_subst: UpdateBehavior,
    /// Behavior mask applied directly by callers of
    /// [`crate::substrate::generate_updates`] (e.g. test harnesses and any
    /// caller that needs full control over `spsParam`/`toLoc` together).
    pub generate_updates: UpdateBehavior,
}

const DEFAULT_MAX_SPS_LIST_LENGTH: usize = 50;
const MAX_SPS_LIST_LENGTH_CEILING: usize = 1000;

impl GlobalDefaults {
    /// Build defaults with a specific `MaximumSPSListLength`, clamped to
    /// `[0, 1000]`.
    pub fn with_max_sps_list_length(max_len: usize) -> Self {
        Self {
            maximum_sps_list_length: max_len.min(MAX_SPS_LIST_LENGTH_CEILING),
            ..Self::default()
        }
    }
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            maximum_sps_list_length: DEFAULT_MAX_SPS_LIST_LENGTH,
            note_subst_moved: UpdateBehavior::default(),
            set_subst_proc_state: UpdateBehavior::default(),
            remove_subst: UpdateBehavior::default(),
            generate_updates: UpdateBehavior::default(),
        }
    }
}

/// Policy for [`crate::table::ObjectTable`] removal of a substrate (spec
/// §3 Lifecycle: "removal may, policy-flag, first move it to its
/// destination/source...").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalPolicy {
    /// Move the substrate to its destination/source before removing it.
    pub attempts_to_move_all_subst_to_dest_or_src: bool,
    /// Persist the last occupied location name as
    /// `RemovedFromSubstLocName` before deletion.
    pub persist_removed_from_loc_name: bool,
}

impl Default for RemovalPolicy {
    fn default() -> Self {
        Self {
            attempts_to_move_all_subst_to_dest_or_src: true,
            persist_removed_from_loc_name: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_sps_list_length_clamped() {
        let d = GlobalDefaults::with_max_sps_list_length(5_000);
        assert_eq!(d.maximum_sps_list_length, MAX_SPS_LIST_LENGTH_CEILING);
    }

    #[test]
    fn defaults_match_spec() {
        let d = GlobalDefaults::default();
        assert_eq!(d.maximum_sps_list_length, 50);
    }
}
