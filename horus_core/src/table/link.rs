//! Directed, keyed links between objects.

use serde::{Deserialize, Serialize};

use super::object::ObjectId;

/// The three load-bearing link keys (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKey {
    /// `SubstLoc -> Substrate` it currently holds. Absence of an outgoing
    /// `Contains` link from a location means that location is unoccupied;
    /// there is no empty-target sentinel.
    Contains,
    /// `Substrate -> SubstLoc` it originated from. Immutable after
    /// creation.
    SrcLoc,
    /// `Substrate -> SubstLoc` it is bound for. Immutable after creation.
    DestLoc,
}

/// A directed link `(from, key, to)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub from: ObjectId,
    pub key: LinkKey,
    pub to: ObjectId,
}

impl Link {
    pub fn new(from: ObjectId, key: LinkKey, to: ObjectId) -> Self {
        Self { from, key, to }
    }
}
