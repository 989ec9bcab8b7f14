//! Following a `SubstLoc`'s `Contains` link to observe whatever substrate
//! currently occupies it, republishing a [`SubstrateInfo`] projection.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::publish::Observer;
use crate::table::{LinkKey, ObjectId, ObjectSnapshot, ObjectTable};

use super::info::SubstrateInfo;

/// Tracks one location and whatever substrate currently occupies it.
///
/// Re-resolves the occupant each time the location's own snapshot changes,
/// so a substrate arriving or departing picks up a fresh [`Observer`]
/// rather than one left pointed at the previous occupant.
pub struct SubstLocObserver {
    table: Arc<ObjectTable>,
    loc_id: ObjectId,
    loc_observer: Observer<ObjectSnapshot>,
    occupant: RwLock<Option<(ObjectId, Observer<ObjectSnapshot>)>>,
}

impl SubstLocObserver {
    pub fn new(table: Arc<ObjectTable>, loc_id: ObjectId) -> Self {
        let publisher = table.get_publisher(&loc_id);
        Self {
            table,
            loc_id,
            loc_observer: Observer::new(publisher),
            occupant: RwLock::new(None),
        }
    }

    pub fn loc_id(&self) -> &ObjectId {
        &self.loc_id
    }

    /// Polls the location for a fresh snapshot, follows `Contains` to the
    /// current occupant if any, and returns that occupant's projected
    /// [`SubstrateInfo`]. Returns `None` while the location is unoccupied.
    pub fn poll(&self) -> Option<SubstrateInfo> {
        self.loc_observer.update();
        let loc_snapshot = self.loc_observer.latest()?;
        let new_id = loc_snapshot
            .links_out
            .iter()
            .find(|l| l.key == LinkKey::Contains)
            .map(|l| l.to.clone())?;

        let mut guard = self.occupant.write();
        let needs_new = !matches!(&*guard, Some((id, _)) if *id == new_id);
        if needs_new {
            let observer = Observer::new(self.table.get_publisher(&new_id));
            *guard = Some((new_id, observer));
        }
        let (_, observer) = guard.as_ref().expect("just populated above");
        observer.update();
        observer.latest().map(|snap| SubstrateInfo::from_snapshot(&snap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::GlobalDefaults;
    use crate::table::{AttributeMap, Link, MergeBehavior, ObjectFlags, UpdateItem};

    fn loc(name: &str) -> ObjectId {
        ObjectId::subst_loc(name)
    }
    fn subst(name: &str) -> ObjectId {
        ObjectId::substrate(name)
    }

    #[test]
    fn follows_contains_link_to_occupant() {
        let table = Arc::new(ObjectTable::new(GlobalDefaults::default()));
        table
            .update(vec![
                UpdateItem::AddObject {
                    id: loc("LP1.01"),
                    attrs: AttributeMap::new(),
                    flags: ObjectFlags { pinned: true, is_final: false },
                    if_needed: true,
                    merge: MergeBehavior::AddAndUpdate,
                },
                UpdateItem::AddObject {
                    id: subst("W1"),
                    attrs: AttributeMap::new(),
                    flags: ObjectFlags::default(),
                    if_needed: false,
                    merge: MergeBehavior::AddAndUpdate,
                },
                UpdateItem::AddLink {
                    link: Link::new(subst("W1"), LinkKey::SrcLoc, loc("LP1.01")),
                    auto_unlink_prior_by_key: false,
                    if_needed: false,
                },
                UpdateItem::AddLink {
                    link: Link::new(subst("W1"), LinkKey::DestLoc, loc("LP1.01")),
                    auto_unlink_prior_by_key: false,
                    if_needed: false,
                },
            ])
            .unwrap();

        let observer = SubstLocObserver::new(table.clone(), loc("LP1.01"));
        assert!(observer.poll().is_none());

        table
            .update(vec![UpdateItem::AddLink {
                link: Link::new(loc("LP1.01"), LinkKey::Contains, subst("W1")),
                auto_unlink_prior_by_key: true,
                if_needed: false,
            }])
            .unwrap();

        let info = observer.poll().expect("occupant present");
        assert_eq!(info.id, subst("W1"));
    }
}
