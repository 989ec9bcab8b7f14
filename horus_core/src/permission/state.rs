//! The state a process module publishes about its willingness to grant
//! transfer permission at its locations (spec §4.E).

use std::time::{Duration, Instant};

use crate::substrate::TransferPermissionSummaryStateCode as SummaryCode;

/// Published by a [`super::ProcessModule`] and consumed by the routing
/// manager's auto-acquire/release bookkeeping. `granted` is a multiset:
/// the same location name may appear more than once if acquired
/// recursively (spec §4.F `RecursiveAcquire`).
#[derive(Debug, Clone)]
pub struct TransferPermissionState {
    pub interface_name: String,
    pub summary_state: SummaryCode,
    /// When `summary_state` last changed.
    pub last_change: Instant,
    pub reason: Option<String>,
    /// How long the module estimates it will remain unavailable, valid
    /// only while `summary_state == AlmostAvailable`.
    pub est_available_after: Option<Duration>,
    granted: Vec<String>,
}

impl TransferPermissionState {
    pub fn new(interface_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            summary_state: SummaryCode::None,
            last_change: Instant::now(),
            reason: None,
            est_available_after: None,
            granted: Vec::new(),
        }
    }

    pub fn granted_locations(&self) -> &[String] {
        &self.granted
    }

    pub(super) fn grant(&mut self, loc: impl Into<String>) {
        self.granted.push(loc.into());
    }

    /// Removes one occurrence of `loc`, if present. Returns whether
    /// anything was removed.
    pub(super) fn ungrant_one(&mut self, loc: &str) -> bool {
        if let Some(pos) = self.granted.iter().position(|g| g == loc) {
            self.granted.remove(pos);
            true
        } else {
            false
        }
    }

    pub(super) fn ungrant_all(&mut self) {
        self.granted.clear();
    }

    pub fn is_available(&self) -> bool {
        self.summary_state == SummaryCode::Available
    }

    /// True if `Available`, or `AlmostAvailable` with the estimated
    /// remaining wait within `max_wait` (spec §4.E).
    pub fn is_available_or_almost_available(&self, max_wait: Duration) -> bool {
        if self.is_available() {
            return true;
        }
        if self.summary_state != SummaryCode::AlmostAvailable {
            return false;
        }
        match self.est_available_after {
            Some(est) => {
                let elapsed = self.last_change.elapsed();
                est.saturating_sub(elapsed) <= max_wait
            }
            None => false,
        }
    }

    /// `loc` is held AND (if `check_available`) the module is currently
    /// `Available`.
    pub fn is_granted(&self, loc: &str, check_available: bool) -> bool {
        let held = self.granted.iter().any(|g| g == loc);
        held && (!check_available || self.is_available())
    }
}
