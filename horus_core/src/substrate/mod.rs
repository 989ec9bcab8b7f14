//! Components C and D: the substrate/location-info projections and the
//! state engine built on top of them (spec §4.C/§4.D).

mod engine;
mod info;
mod states;
mod subst_loc_observer;

pub use engine::{
    generate_updates, inferred_sts, merge, remove_substrate, set_subst_proc_state, transition_deny_reason,
    GenerateUpdatesRequest,
};
pub use info::{HistoryEntry, SpsHistoryEntry, SubstrateInfo};
pub use states::{
    LiveSps, PseudoSps, Sjrs, Sjs, SpsEvent, Sts, SubstLocState, TransferPermissionSummaryStateCode,
};
pub use subst_loc_observer::SubstLocObserver;
