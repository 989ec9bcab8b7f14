//! The semantic enumerations named in spec §3.

use serde::{Deserialize, Serialize};

/// Substrate Transport State — where the substrate is relative to
/// source/destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sts {
    AtSource,
    AtWork,
    AtDestination,
    Undefined,
}

impl Sts {
    pub fn from_name(s: &str) -> Self {
        match s {
            "AtSource" => Sts::AtSource,
            "AtWork" => Sts::AtWork,
            "AtDestination" => Sts::AtDestination,
            _ => Sts::Undefined,
        }
    }
}

impl Default for Sts {
    fn default() -> Self {
        Sts::Undefined
    }
}

impl std::fmt::Display for Sts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Sts::AtSource => "AtSource",
            Sts::AtWork => "AtWork",
            Sts::AtDestination => "AtDestination",
            Sts::Undefined => "Undefined",
        };
        write!(f, "{s}")
    }
}

/// Live Substrate Processing State values (spec §3). These and only these
/// may occupy the `SubstProcState`/`PendingSPS` attributes (invariant I5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveSps {
    NeedsProcessing,
    InProcess,
    Processed,
    Aborted,
    Stopped,
    Rejected,
    Lost,
    Skipped,
    Undefined,
}

impl LiveSps {
    pub fn is_needs_processing(self) -> bool {
        matches!(self, LiveSps::NeedsProcessing)
    }

    /// Used by `inferredSTS` (spec §4.C). Includes `Skipped`, which is also
    /// handled by the dedicated skipped-at-source rule when the two rules
    /// would otherwise disagree.
    pub fn is_processing_complete(self) -> bool {
        matches!(
            self,
            LiveSps::Processed
                | LiveSps::Aborted
                | LiveSps::Stopped
                | LiveSps::Rejected
                | LiveSps::Lost
                | LiveSps::Skipped
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            LiveSps::NeedsProcessing => "NeedsProcessing",
            LiveSps::InProcess => "InProcess",
            LiveSps::Processed => "Processed",
            LiveSps::Aborted => "Aborted",
            LiveSps::Stopped => "Stopped",
            LiveSps::Rejected => "Rejected",
            LiveSps::Lost => "Lost",
            LiveSps::Skipped => "Skipped",
            LiveSps::Undefined => "Undefined",
        }
    }

    /// Parses a live SPS name. Anything unrecognized (including a pseudo
    /// event name) maps to `Undefined` rather than erroring — attribute
    /// values are trusted to have been written by this engine.
    pub fn from_name(s: &str) -> Self {
        match s {
            "NeedsProcessing" => LiveSps::NeedsProcessing,
            "InProcess" => LiveSps::InProcess,
            "Processed" => LiveSps::Processed,
            "Aborted" => LiveSps::Aborted,
            "Stopped" => LiveSps::Stopped,
            "Rejected" => LiveSps::Rejected,
            "Lost" => LiveSps::Lost,
            "Skipped" => LiveSps::Skipped,
            _ => LiveSps::Undefined,
        }
    }
}

impl Default for LiveSps {
    fn default() -> Self {
        LiveSps::Undefined
    }
}

impl std::fmt::Display for LiveSps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Pseudo Substrate Processing State values. Representable only as entries
/// in the `SPSList` history; never assignable to the live SPS/PendingSPS
/// attribute (invariant I5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PseudoSps {
    Created,
    Moved,
    Removed,
    ProcessStepCompleted,
}

impl PseudoSps {
    pub fn name(self) -> &'static str {
        match self {
            PseudoSps::Created => "Created",
            PseudoSps::Moved => "Moved",
            PseudoSps::Removed => "Removed",
            PseudoSps::ProcessStepCompleted => "ProcessStepCompleted",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "Created" => Some(PseudoSps::Created),
            "Moved" => Some(PseudoSps::Moved),
            "Removed" => Some(PseudoSps::Removed),
            "ProcessStepCompleted" => Some(PseudoSps::ProcessStepCompleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for PseudoSps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The union spec §4.D's unified update procedure accepts as `spsParam`:
/// either a live value to merge in, or a pseudo event to record in
/// history only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpsEvent {
    Live(LiveSps),
    Pseudo(PseudoSps),
}

impl SpsEvent {
    pub fn name(self) -> &'static str {
        match self {
            SpsEvent::Live(l) => l.name(),
            SpsEvent::Pseudo(p) => p.name(),
        }
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, SpsEvent::Live(LiveSps::Undefined))
    }

    pub fn is_pseudo(self) -> bool {
        matches!(self, SpsEvent::Pseudo(_))
    }

    pub fn as_live(self) -> Option<LiveSps> {
        match self {
            SpsEvent::Live(l) => Some(l),
            SpsEvent::Pseudo(_) => None,
        }
    }
}

impl std::fmt::Display for SpsEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// `MapSlotState`-equivalent location occupancy (spec §3). E087
/// carrier/port specifics are out of scope beyond this one enum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubstLocState {
    Occupied,
    Unoccupied,
    Undefined,
}

/// Scheduler input: what the operator/host wants this substrate's job to
/// do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sjrs {
    None,
    Run,
    Pause,
    Stop,
    Abort,
    Return,
}

impl Sjrs {
    pub fn from_name(s: &str) -> Self {
        match s {
            "Run" => Sjrs::Run,
            "Pause" => Sjrs::Pause,
            "Stop" => Sjrs::Stop,
            "Abort" => Sjrs::Abort,
            "Return" => Sjrs::Return,
            _ => Sjrs::None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Sjrs::None => "None",
            Sjrs::Run => "Run",
            Sjrs::Pause => "Pause",
            Sjrs::Stop => "Stop",
            Sjrs::Abort => "Abort",
            Sjrs::Return => "Return",
        }
    }
}

impl Default for Sjrs {
    fn default() -> Self {
        Sjrs::None
    }
}

impl std::fmt::Display for Sjrs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Scheduler output: the observable job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sjs {
    Initial,
    WaitingForStart,
    Running,
    Processed,
    Rejected,
    Skipped,
    Pausing,
    Paused,
    Stopping,
    Stopped,
    Aborting,
    Aborted,
    Lost,
    Returning,
    Returned,
    Held,
    RoutingAlarm,
    Removed,
}

impl Sjs {
    /// Final values per spec §3 (`Returned` is optionally final; treated
    /// as final here since this engine has no "resume after return" path).
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Sjs::Processed
                | Sjs::Rejected
                | Sjs::Skipped
                | Sjs::Stopped
                | Sjs::Aborted
                | Sjs::Lost
                | Sjs::Removed
                | Sjs::Returned
        )
    }

    /// States in which at least one action may still be in flight, so a
    /// pause request cannot complete immediately.
    pub fn has_actions_in_flight(self) -> bool {
        matches!(self, Sjs::Running | Sjs::Pausing | Sjs::Stopping | Sjs::Aborting | Sjs::Returning)
    }

    pub fn name(self) -> &'static str {
        match self {
            Sjs::Initial => "Initial",
            Sjs::WaitingForStart => "WaitingForStart",
            Sjs::Running => "Running",
            Sjs::Processed => "Processed",
            Sjs::Rejected => "Rejected",
            Sjs::Skipped => "Skipped",
            Sjs::Pausing => "Pausing",
            Sjs::Paused => "Paused",
            Sjs::Stopping => "Stopping",
            Sjs::Stopped => "Stopped",
            Sjs::Aborting => "Aborting",
            Sjs::Aborted => "Aborted",
            Sjs::Lost => "Lost",
            Sjs::Returning => "Returning",
            Sjs::Returned => "Returned",
            Sjs::Held => "Held",
            Sjs::RoutingAlarm => "RoutingAlarm",
            Sjs::Removed => "Removed",
        }
    }

    pub fn from_name(s: &str) -> Self {
        match s {
            "WaitingForStart" => Sjs::WaitingForStart,
            "Running" => Sjs::Running,
            "Processed" => Sjs::Processed,
            "Rejected" => Sjs::Rejected,
            "Skipped" => Sjs::Skipped,
            "Pausing" => Sjs::Pausing,
            "Paused" => Sjs::Paused,
            "Stopping" => Sjs::Stopping,
            "Stopped" => Sjs::Stopped,
            "Aborting" => Sjs::Aborting,
            "Aborted" => Sjs::Aborted,
            "Lost" => Sjs::Lost,
            "Returning" => Sjs::Returning,
            "Returned" => Sjs::Returned,
            "Held" => Sjs::Held,
            "RoutingAlarm" => Sjs::RoutingAlarm,
            "Removed" => Sjs::Removed,
            _ => Sjs::Initial,
        }
    }
}

impl Default for Sjs {
    fn default() -> Self {
        Sjs::Initial
    }
}

impl std::fmt::Display for Sjs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Transfer-permission module summary state (spec §3/§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferPermissionSummaryStateCode {
    None,
    Available,
    Busy,
    AlmostAvailable,
    NotAvailable,
    Blocked,
}
