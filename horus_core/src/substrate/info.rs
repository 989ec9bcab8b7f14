//! Component C: the substrate and location-info projections.
//!
//! [`SubstrateInfo`] is a read-only view computed from an [`ObjectSnapshot`]
//! plus the two location snapshots it links to — the derived struct spec
//! §4.C describes observers and the state engine as consuming, never the
//! raw object directly.

use chrono::{DateTime, Utc};

use crate::table::{AttributeValue, LinkKey, ObjectId, ObjectSnapshot};

use super::states::{LiveSps, PseudoSps, Sjrs, Sjs, Sts};

/// One parsed entry from `SPSList`: either a live SPS, a pseudo event, or
/// (defensively) an unrecognized name — attribute values are trusted to
/// have been written by this engine, but a zipped read should not panic on
/// a foreign writer.
#[derive(Debug, Clone, PartialEq)]
pub enum SpsHistoryEntry {
    Live(LiveSps),
    Pseudo(PseudoSps),
    Unknown(String),
}

impl SpsHistoryEntry {
    fn parse(name: &str) -> Self {
        if let Some(p) = PseudoSps::from_name(name) {
            return SpsHistoryEntry::Pseudo(p);
        }
        let live = LiveSps::from_name(name);
        if live.name() == name {
            SpsHistoryEntry::Live(live)
        } else {
            SpsHistoryEntry::Unknown(name.to_string())
        }
    }
}

/// One entry in a substrate's processing history, as recorded by
/// `SPSList`/`SPSLocList`/`SPSDateTimeList` (spec §4.D step 5).
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub event: SpsHistoryEntry,
    pub loc_name: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

/// A derived, read-only view of one substrate object (spec §4.C).
///
/// Constructed fresh from an [`ObjectSnapshot`] on every read; never mutated
/// in place. Recomputing is cheap relative to the underlying table update
/// and keeps this type from drifting out of sync with the table.
#[derive(Debug, Clone)]
pub struct SubstrateInfo {
    pub id: ObjectId,
    pub sts: Sts,
    pub sps: LiveSps,
    pub pending_sps: LiveSps,
    pub src_loc: ObjectId,
    pub dest_loc: ObjectId,
    /// The location currently holding this substrate, if any (derived from
    /// the single incoming `Contains` link invariant I2 guarantees).
    pub current_loc: Option<ObjectId>,
    pub sjrs: Sjrs,
    pub sjs: Sjs,
    pub lot_id: Option<String>,
    pub usage: Option<String>,
    pub sps_list: Vec<String>,
    pub sps_loc_list: Vec<String>,
    pub sps_datetime_list: Vec<String>,
}

impl SubstrateInfo {
    /// Projects a substrate's [`ObjectSnapshot`] into a [`SubstrateInfo`].
    /// Does not itself validate invariants I2/I3 — those are enforced by
    /// [`crate::table::ObjectTable::update`] before any snapshot is
    /// published, so a snapshot handed to this constructor is already
    /// known-good; [`Self::is_valid`] re-checks the shape defensively for
    /// callers that construct a `SubstrateInfo` from an arbitrary snapshot
    /// (e.g. a stale one read outside the table).
    pub fn from_snapshot(snapshot: &ObjectSnapshot) -> Self {
        let attr_str = |name: &str| -> Option<String> {
            snapshot.attr(name).and_then(AttributeValue::as_str).map(str::to_string)
        };
        let attr_list = |name: &str| -> Vec<String> {
            snapshot
                .attr(name)
                .and_then(AttributeValue::as_list)
                .map(|l| l.to_vec())
                .unwrap_or_default()
        };

        let src_loc = snapshot
            .links_out
            .iter()
            .find(|l| l.key == LinkKey::SrcLoc)
            .map(|l| l.to.clone())
            .unwrap_or_else(|| ObjectId::subst_loc(""));
        let dest_loc = snapshot
            .links_out
            .iter()
            .find(|l| l.key == LinkKey::DestLoc)
            .map(|l| l.to.clone())
            .unwrap_or_else(|| ObjectId::subst_loc(""));
        let current_loc = snapshot
            .links_in
            .iter()
            .find(|l| l.key == LinkKey::Contains)
            .map(|l| l.from.clone());

        let sps = attr_str("SubstProcState").map(|s| LiveSps::from_name(&s)).unwrap_or_default();
        let pending_sps = attr_str("PendingSPS").map(|s| LiveSps::from_name(&s)).unwrap_or_default();
        let sts = attr_str("SubstState").map(|s| Sts::from_name(&s)).unwrap_or_default();
        let sjrs = attr_str("SJRS").map(|s| Sjrs::from_name(&s)).unwrap_or_default();
        let sjs = attr_str("SJS").map(|s| Sjs::from_name(&s)).unwrap_or_default();

        SubstrateInfo {
            id: snapshot.id.clone(),
            sts,
            sps,
            pending_sps,
            src_loc,
            dest_loc,
            current_loc,
            sjrs,
            sjs,
            lot_id: attr_str("LotID"),
            usage: attr_str("Usage"),
            sps_list: attr_list("SPSList"),
            sps_loc_list: attr_list("SPSLocList"),
            sps_datetime_list: attr_list("SPSDateTimeList"),
        }
    }

    /// Name of the location currently holding this substrate, or `""` if
    /// in transit / not yet placed anywhere.
    pub fn current_loc_name(&self) -> &str {
        self.current_loc.as_ref().map(|l| l.name.as_str()).unwrap_or("")
    }

    /// A `SubstrateInfo` is well-formed once it has a non-empty id and both
    /// a source and destination location (invariant I3). `generate_updates`
    /// refuses to operate on anything less.
    pub fn is_valid(&self) -> bool {
        !self.id.name.is_empty() && !self.src_loc.name.is_empty() && !self.dest_loc.name.is_empty()
    }

    /// Zips `SPSList`/`SPSLocList`/`SPSDateTimeList` into one history
    /// iterator, matching entries positionally. Shorter loc/datetime lists
    /// (e.g. when `UseSPSLocList`/`UseSPSDateTimeList` were off for part of
    /// a substrate's life) yield `None` for the missing side rather than
    /// truncating the whole history.
    pub fn zipped_history(&self) -> impl Iterator<Item = HistoryEntry> + '_ {
        self.sps_list.iter().enumerate().map(move |(i, event)| HistoryEntry {
            event: SpsHistoryEntry::parse(event),
            loc_name: self.sps_loc_list.get(i).cloned(),
            at: self
                .sps_datetime_list
                .get(i)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        })
    }
}
