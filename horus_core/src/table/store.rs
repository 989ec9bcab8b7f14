//! The object table: a keyed store of objects and their links, applying
//! update batches atomically and publishing per-object snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{HorusError, HorusResult};
use crate::publish::Publisher;
use crate::settings::GlobalDefaults;

use super::link::{Link, LinkKey};
use super::object::{AttributeMap, AttributeValue, ObjectFlags, ObjectId, ObjectSnapshot, ObjectType};
use super::update::{MergeBehavior, UpdateItem};

#[derive(Debug, Clone, Default)]
struct StoredObject {
    attrs: AttributeMap,
    flags: ObjectFlags,
}

#[derive(Debug, Clone, Default)]
struct TableState {
    objects: HashMap<ObjectId, StoredObject>,
    links_out: HashMap<ObjectId, Vec<Link>>,
    links_in: HashMap<ObjectId, Vec<Link>>,
}

impl TableState {
    fn outgoing(&self, id: &ObjectId) -> &[Link] {
        self.links_out.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn incoming(&self, id: &ObjectId) -> &[Link] {
        self.links_in.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn snapshot(&self, id: &ObjectId) -> Option<ObjectSnapshot> {
        let stored = self.objects.get(id)?;
        Some(ObjectSnapshot {
            id: id.clone(),
            attributes: stored.attrs.clone(),
            flags: stored.flags,
            links_out: self.outgoing(id).to_vec(),
            links_in: self.incoming(id).to_vec(),
        })
    }

    fn remove_link_endpoints(&mut self, link: &Link) {
        if let Some(v) = self.links_out.get_mut(&link.from) {
            v.retain(|l| !(l.key == link.key && l.to == link.to));
        }
        if let Some(v) = self.links_in.get_mut(&link.to) {
            v.retain(|l| !(l.key == link.key && l.from == link.from));
        }
    }

    fn insert_link(&mut self, link: Link) {
        self.links_out.entry(link.from.clone()).or_default().push(link.clone());
        self.links_in.entry(link.to.clone()).or_default().push(link);
    }

    /// Remove every link touching `id`, in either direction. Used when an
    /// object is deleted.
    fn cascade_unlink(&mut self, id: &ObjectId) {
        if let Some(out) = self.links_out.remove(id) {
            for link in out {
                if let Some(v) = self.links_in.get_mut(&link.to) {
                    v.retain(|l| !(l.key == link.key && l.from == link.from));
                }
            }
        }
        if let Some(inc) = self.links_in.remove(id) {
            for link in inc {
                if let Some(v) = self.links_out.get_mut(&link.from) {
                    v.retain(|l| !(l.key == link.key && l.to == link.to));
                }
            }
        }
    }

    fn validate_invariants(&self) -> HorusResult<()> {
        for (id, _) in self.objects.iter() {
            match id.obj_type {
                ObjectType::SubstLoc => {
                    let contains_out = self
                        .outgoing(id)
                        .iter()
                        .filter(|l| l.key == LinkKey::Contains)
                        .count();
                    if contains_out > 1 {
                        return Err(HorusError::Structural(format!(
                            "SubstLoc {} has {} outgoing Contains links, at most 1 allowed",
                            id, contains_out
                        )));
                    }
                }
                ObjectType::Substrate => {
                    let contains_in = self
                        .incoming(id)
                        .iter()
                        .filter(|l| l.key == LinkKey::Contains)
                        .count();
                    if contains_in > 1 {
                        return Err(HorusError::Structural(format!(
                            "Substrate {} is the target of {} Contains links, at most 1 allowed",
                            id, contains_in
                        )));
                    }
                    let src = self.outgoing(id).iter().filter(|l| l.key == LinkKey::SrcLoc).count();
                    let dest = self.outgoing(id).iter().filter(|l| l.key == LinkKey::DestLoc).count();
                    if src != 1 || dest != 1 {
                        return Err(HorusError::Structural(format!(
                            "Substrate {} must have exactly one SrcLoc and one DestLoc link (has {} / {})",
                            id, src, dest
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn merge_attrs(existing: &mut AttributeMap, incoming: AttributeMap, behavior: MergeBehavior) {
    for (k, v) in incoming {
        match behavior {
            MergeBehavior::AddAndUpdate => {
                existing.insert(k, v);
            }
            MergeBehavior::AppendLists => match (existing.get_mut(&k), &v) {
                (Some(AttributeValue::List(old)), AttributeValue::List(new)) => {
                    old.extend(new.iter().cloned());
                }
                _ => {
                    existing.insert(k, v);
                }
            },
            MergeBehavior::RemoveNull => {
                if matches!(v, AttributeValue::Null) {
                    existing.remove(&k);
                } else {
                    existing.insert(k, v);
                }
            }
            MergeBehavior::RemoveEmpty => {
                if v.is_empty_for_removal() {
                    existing.remove(&k);
                } else {
                    existing.insert(k, v);
                }
            }
        }
    }
}

/// A transactional store of named objects and typed links.
///
/// All mutation goes through [`ObjectTable::update`]; reads go through
/// [`ObjectTable::get_object`] (point-in-time) or [`ObjectTable::
/// get_publisher`] (subscribe to future changes).
pub struct ObjectTable {
    state: RwLock<TableState>,
    publishers: Mutex<HashMap<ObjectId, Arc<Publisher<ObjectSnapshot>>>>,
    defaults: GlobalDefaults,
}

impl ObjectTable {
    pub fn new(defaults: GlobalDefaults) -> Self {
        Self {
            state: RwLock::new(TableState::default()),
            publishers: Mutex::new(HashMap::new()),
            defaults,
        }
    }

    /// The `GlobalDefaults` this table was constructed with (spec §6).
    /// Callers building a `RoutingManager`/`Scheduler` around this table
    /// pull their per-call-site `UpdateBehavior`/history-length from here
    /// rather than carrying their own separate copy.
    pub fn defaults(&self) -> GlobalDefaults {
        self.defaults
    }

    /// Apply an ordered batch of update items atomically. On error, no
    /// mutation occurred and no snapshot was published.
    pub fn update(&self, items: Vec<UpdateItem>) -> HorusResult<()> {
        if items.is_empty() {
            return Err(HorusError::Internal("update called with empty batch".into()));
        }

        let mut working = self.state.read().clone();
        let mut touched: Vec<ObjectId> = Vec::new();

        for item in items {
            match item {
                UpdateItem::AddObject {
                    id,
                    attrs,
                    flags,
                    if_needed,
                    merge,
                } => {
                    if working.objects.contains_key(&id) {
                        if if_needed {
                            continue;
                        }
                        return Err(HorusError::Internal(format!(
                            "object {} already exists",
                            id
                        )));
                    }
                    let mut stored = StoredObject::default();
                    stored.flags = flags;
                    merge_attrs(&mut stored.attrs, attrs, merge);
                    working.objects.insert(id.clone(), stored);
                    touched.push(id);
                }
                UpdateItem::RemoveObject { id } => {
                    match working.objects.get(&id) {
                        None => {
                            return Err(HorusError::Internal(format!(
                                "object {} does not exist",
                                id
                            )))
                        }
                        Some(obj) if obj.flags.pinned => {
                            return Err(HorusError::Structural(format!(
                                "object {} is pinned and cannot be removed",
                                id
                            )))
                        }
                        _ => {}
                    }
                    working.cascade_unlink(&id);
                    working.objects.remove(&id);
                    touched.push(id);
                }
                UpdateItem::SetAttributes { id, attrs, merge } => {
                    let stored = working.objects.get_mut(&id).ok_or_else(|| {
                        HorusError::Structural(format!("object {} does not exist", id))
                    })?;
                    if stored.flags.is_final {
                        return Err(HorusError::Structural(format!(
                            "object {} is final and cannot be mutated",
                            id
                        )));
                    }
                    merge_attrs(&mut stored.attrs, attrs, merge);
                    touched.push(id);
                }
                UpdateItem::AddLink {
                    link,
                    auto_unlink_prior_by_key,
                    if_needed,
                } => {
                    if !working.objects.contains_key(&link.from) {
                        return Err(HorusError::Structural(format!(
                            "AddLink from {} does not exist",
                            link.from
                        )));
                    }
                    if !working.objects.contains_key(&link.to) {
                        return Err(HorusError::Structural(format!(
                            "AddLink to {} does not exist",
                            link.to
                        )));
                    }
                    let exists = working
                        .outgoing(&link.from)
                        .iter()
                        .any(|l| l.key == link.key && l.to == link.to);
                    if exists {
                        if if_needed {
                            continue;
                        }
                    }
                    if auto_unlink_prior_by_key {
                        // Clear a prior link from the same source (e.g. a
                        // destination that already held something else)...
                        let prior_out: Vec<Link> = working
                            .outgoing(&link.from)
                            .iter()
                            .filter(|l| l.key == link.key)
                            .cloned()
                            .collect();
                        for p in prior_out {
                            touched.push(p.to.clone());
                            working.remove_link_endpoints(&p);
                        }
                        // ...and detach the target from wherever it was
                        // previously linked under this key. Together these
                        // two sides are what re-homes a `Contains` link on
                        // move: the substrate's old location loses its
                        // outgoing link, the new location gains one.
                        let prior_in: Vec<Link> = working
                            .incoming(&link.to)
                            .iter()
                            .filter(|l| l.key == link.key)
                            .cloned()
                            .collect();
                        for p in prior_in {
                            touched.push(p.from.clone());
                            working.remove_link_endpoints(&p);
                        }
                    }
                    touched.push(link.from.clone());
                    touched.push(link.to.clone());
                    working.insert_link(link);
                }
                UpdateItem::SyncExternal => {}
            }
        }

        working.validate_invariants()?;

        *self.state.write() = working;

        let publishers = self.publishers.lock();
        touched.sort_by(|a, b| (a.obj_type as u8, &a.name).cmp(&(b.obj_type as u8, &b.name)));
        touched.dedup_by(|a, b| a == b);
        let state = self.state.read();
        for id in touched {
            if let Some(publisher) = publishers.get(&id) {
                if let Some(snap) = state.snapshot(&id) {
                    publisher.publish(snap);
                }
            }
        }

        Ok(())
    }

    /// Point-in-time read of one object, independent of any observer.
    pub fn get_object(&self, id: &ObjectId) -> Option<ObjectSnapshot> {
        self.state.read().snapshot(id)
    }

    /// Get (lazily creating) the publisher for `id`. If the object already
    /// exists, the publisher's first snapshot is published immediately so
    /// a freshly attached observer does not have to wait for the next
    /// batch.
    pub fn get_publisher(&self, id: &ObjectId) -> Arc<Publisher<ObjectSnapshot>> {
        let mut publishers = self.publishers.lock();
        if let Some(p) = publishers.get(id) {
            return p.clone();
        }
        let publisher = Arc::new(Publisher::new());
        if let Some(snap) = self.state.read().snapshot(id) {
            publisher.publish(snap);
        }
        publishers.insert(id.clone(), publisher.clone());
        publisher
    }

    /// Full-table dump for tests/debugging; not part of the spec surface.
    pub fn snapshot_all(&self) -> Vec<ObjectSnapshot> {
        let state = self.state.read();
        state.objects.keys().filter_map(|id| state.snapshot(id)).collect()
    }
}
