//! Object identity, attributes, and the published snapshot shape.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::link::Link;

/// The two object types this core cares about (spec §3: "Two types matter
/// in this core").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Substrate,
    SubstLoc,
}

/// Stable `(type, name, uuid)` identity. Equality and hashing are on
/// `(obj_type, name)` only — the uuid distinguishes object generations for
/// diagnostics but a name is never reused live, so two ids with the same
/// type/name always refer to the same logical object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectId {
    pub obj_type: ObjectType,
    pub name: String,
    pub uuid: Uuid,
}

impl ObjectId {
    pub fn new(obj_type: ObjectType, name: impl Into<String>) -> Self {
        Self {
            obj_type,
            name: name.into(),
            uuid: Uuid::new_v4(),
        }
    }

    pub fn substrate(name: impl Into<String>) -> Self {
        Self::new(ObjectType::Substrate, name)
    }

    pub fn subst_loc(name: impl Into<String>) -> Self {
        Self::new(ObjectType::SubstLoc, name)
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.obj_type == other.obj_type && self.name == other.name
    }
}
impl Eq for ObjectId {}

impl std::hash::Hash for ObjectId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.obj_type.hash(state);
        self.name.hash(state);
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.obj_type, self.name)
    }
}

/// A tagged scalar attribute value (spec §3: "int, string, enum,
/// list-of-string").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Int(i64),
    Str(String),
    Enum(String),
    List(Vec<String>),
    /// Sentinel used by `SetAttributes` with `MergeBehavior::RemoveNull` to
    /// mark a key for removal.
    Null,
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) | AttributeValue::Enum(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::List(l) => Some(l.as_slice()),
            _ => None,
        }
    }

    /// Empty per `MergeBehavior::RemoveEmpty`: empty string or empty list.
    pub fn is_empty_for_removal(&self) -> bool {
        match self {
            AttributeValue::Str(s) | AttributeValue::Enum(s) => s.is_empty(),
            AttributeValue::List(l) => l.is_empty(),
            AttributeValue::Null => true,
            AttributeValue::Int(_) => false,
        }
    }
}

/// Object-level flags (spec §3: "pinned, final").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFlags {
    /// Pinned objects cannot be removed by `RemoveObject`.
    pub pinned: bool,
    /// Final objects reject further `SetAttributes`/`AddLink` mutation.
    pub is_final: bool,
}

pub type AttributeMap = HashMap<String, AttributeValue>;

/// An immutable, fully-formed view of one object as of the last committed
/// batch that touched it (or any batch, for objects republished as part of
/// a `SyncExternal` boundary). This is what [`crate::publish::Publisher`]
/// hands to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub id: ObjectId,
    pub attributes: AttributeMap,
    pub flags: ObjectFlags,
    pub links_out: Vec<Link>,
    pub links_in: Vec<Link>,
}

impl ObjectSnapshot {
    pub fn attr(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}
