use super::bitset::EntityBitSet;
use super::component::{ComponentTypeId, EntityId};

/// Per-tick record of structural and value changes to mirrored state.
///
/// `added` and `deleted` are set when pending spawns/despawns settle;
/// `changed` plus the per-type set are touched on every mutable access to a
/// mirrored component.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    added: EntityBitSet,
    changed: EntityBitSet,
    deleted: EntityBitSet,
    by_type: Vec<EntityBitSet>,
}

impl DirtyTracker {
    pub fn new(component_types: usize) -> Self {
        Self {
            by_type: vec![EntityBitSet::new(); component_types],
            ..Self::default()
        }
    }

    pub fn mark_added(&mut self, id: EntityId) {
        self.added.insert(id.0);
    }

    pub fn mark_deleted(&mut self, id: EntityId) {
        self.deleted.insert(id.0);
    }

    pub fn mark_changed(&mut self, id: EntityId, component: ComponentTypeId) {
        self.changed.insert(id.0);
        if let Some(bits) = self.by_type.get_mut(component.index()) {
            bits.insert(id.0);
        }
    }

    pub fn added(&self) -> &EntityBitSet {
        &self.added
    }

    pub fn changed(&self) -> &EntityBitSet {
        &self.changed
    }

    pub fn deleted(&self) -> &EntityBitSet {
        &self.deleted
    }

    pub fn component_changed(&self, component: ComponentTypeId, id: EntityId) -> bool {
        self.by_type
            .get(component.index())
            .is_some_and(|bits| bits.contains(id.0))
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.deleted.is_empty()
    }

    /// Drops entities that were created and destroyed inside the same window,
    /// then makes the three sets pairwise disjoint.
    pub fn filter_transient(&mut self, scratch: &mut EntityBitSet) {
        scratch.copy_from(&self.added);
        scratch.intersect_with(&self.deleted);
        if !scratch.is_empty() {
            self.added.difference_with(scratch);
            self.changed.difference_with(scratch);
            self.deleted.difference_with(scratch);
            for bits in &mut self.by_type {
                bits.difference_with(scratch);
            }
        }
        self.changed.difference_with(&self.added);
        self.changed.difference_with(&self.deleted);
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.changed.clear();
        self.deleted.clear();
        for bits in &mut self.by_type {
            bits.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::ComponentRegistry;

    fn ids(set: &EntityBitSet) -> Vec<u32> {
        set.iter().collect()
    }

    #[test]
    fn transient_entities_vanish_from_every_set() {
        let registry = ComponentRegistry::builder().build();
        let uuid = registry.mirrored_types()[0];
        let mut tracker = DirtyTracker::new(registry.len());
        let mut scratch = EntityBitSet::new();

        tracker.mark_added(EntityId(1));
        tracker.mark_changed(EntityId(1), uuid);
        tracker.mark_deleted(EntityId(1));
        tracker.mark_added(EntityId(2));
        tracker.mark_changed(EntityId(2), uuid);
        tracker.mark_changed(EntityId(3), uuid);
        tracker.mark_changed(EntityId(4), uuid);
        tracker.mark_deleted(EntityId(4));

        tracker.filter_transient(&mut scratch);

        assert_eq!(ids(tracker.added()), vec![2]);
        assert_eq!(ids(tracker.changed()), vec![3]);
        assert_eq!(ids(tracker.deleted()), vec![4]);
        assert!(!tracker.component_changed(uuid, EntityId(1)));
        assert!(tracker.added().is_disjoint(tracker.changed()));
        assert!(tracker.added().is_disjoint(tracker.deleted()));
        assert!(tracker.changed().is_disjoint(tracker.deleted()));
    }

    #[test]
    fn clear_resets_all_sets() {
        let mut tracker = DirtyTracker::new(2);
        tracker.mark_added(EntityId(7));
        tracker.mark_changed(EntityId(8), ComponentTypeId::from_index(1));
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(!tracker.component_changed(ComponentTypeId::from_index(1), EntityId(8)));
    }
}
