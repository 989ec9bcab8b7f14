//! Update-batch item variants (spec §4.A).

use super::object::{AttributeMap, ObjectFlags, ObjectId};
use super::link::Link;

/// `SetAttributes`/`AddObject` merge semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeBehavior {
    /// Insert new keys, overwrite existing ones.
    AddAndUpdate,
    /// Append elements into list-valued attributes instead of overwriting.
    AppendLists,
    /// Setting a key to [`crate::table::object::AttributeValue::Null`]
    /// removes that attribute.
    RemoveNull,
    /// An empty string or empty list value removes that attribute.
    RemoveEmpty,
}

/// One item of an update batch, applied atomically with its siblings.
#[derive(Debug, Clone)]
pub enum UpdateItem {
    /// Create a new object. `if_needed` makes this a no-op when an object
    /// of the same type and name already exists; otherwise re-adding is an
    /// error.
    AddObject {
        id: ObjectId,
        attrs: AttributeMap,
        flags: ObjectFlags,
        if_needed: bool,
        merge: MergeBehavior,
    },
    /// Delete an object. Fails the batch if the object is pinned or does
    /// not exist.
    RemoveObject { id: ObjectId },
    /// Mutate an existing object's attributes per `merge`.
    SetAttributes {
        id: ObjectId,
        attrs: AttributeMap,
        merge: MergeBehavior,
    },
    /// Add a link. `auto_unlink_prior_by_key` removes any existing
    /// outgoing link with the same `(from, key)` first — the mechanism
    /// used to re-home a `Contains` link on move. `if_needed` makes this a
    /// no-op when the identical link already exists.
    AddLink {
        link: Link,
        auto_unlink_prior_by_key: bool,
        if_needed: bool,
    },
    /// Batch boundary marker consumed by downstream external consumers;
    /// a no-op as far as the table itself is concerned.
    SyncExternal,
}

pub type UpdateBatch = Vec<UpdateItem>;
