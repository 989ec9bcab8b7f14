//! # HORUS
//!
//! Facade crate over [`horus_core`]: the substrate tracking, routing, and
//! scheduling engine. Most users want [`prelude`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use horus::prelude::*;
//!
//! let table = ObjectTable::new(GlobalDefaults::default());
//! let routing = RoutingManager::new(std::sync::Arc::new(table), vec!["ArmA".into()]);
//! ```

// Re-export core components at the crate root.
pub use horus_core::{self, *};

/// Everything needed to get started: the table, substrate projections,
/// the routing manager, and the scheduler.
pub mod prelude {
    pub use horus_core::action::{Action, ActionState};

    pub use horus_core::error::{HorusError, HorusResult};
    pub type Result<T> = HorusResult<T>;

    pub use horus_core::publish::{Observer, Publisher};

    pub use horus_core::table::{
        AttributeMap, AttributeValue, Link, LinkKey, MergeBehavior, ObjectFlags, ObjectId, ObjectSnapshot,
        ObjectTable, ObjectType, UpdateItem,
    };

    pub use horus_core::substrate::{
        generate_updates, inferred_sts, merge, remove_substrate, set_subst_proc_state, transition_deny_reason,
        GenerateUpdatesRequest, LiveSps, PseudoSps, Sjrs, Sjs, SpsEvent, Sts, SubstrateInfo,
    };

    pub use horus_core::permission::{ProcessModule, SimpleProcessModule, TransferPermissionActionKind, TransferPermissionState};

    pub use horus_core::routing::{
        ActionFactory, DelegateNegativeBehavior, RoutingItem, RoutingManager, RunActionFlags,
        TransferPermissionRequestSettings,
    };

    pub use horus_core::scheduler::{ProcessStepResult, ProcessTracker, Scheduler, StepSpec};

    pub use horus_core::settings::{GlobalDefaults, RemovalPolicy, UpdateBehavior};

    // Common std types
    pub use std::sync::Arc;
    pub use std::time::{Duration, Instant};

    // Common traits
    pub use serde::{Deserialize, Serialize};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get HORUS version
pub fn version() -> &'static str {
    VERSION
}
