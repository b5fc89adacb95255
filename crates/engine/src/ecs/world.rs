use std::sync::Arc;

use thiserror::Error;

use super::bitset::EntityBitSet;
use super::component::{
    typed, typed_mut, BoxedComponent, Component, ComponentRegistry, ComponentTypeId, EntityId,
    ErasedColumn,
};
use super::derived::DerivedState;
use super::dirty::DirtyTracker;
use crate::identity::{EntityUuid, UuidComponent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity {0} is not active")]
    InactiveEntity(EntityId),
    #[error("entity id {0} is already active")]
    AlreadyActive(EntityId),
    #[error("component type {0} is not registered")]
    UnregisteredComponent(&'static str),
}

/// Structural changes flushed by one settle step.
#[derive(Debug, Default)]
pub struct SettledChanges {
    pub inserted: Vec<EntityId>,
    pub removed: Vec<EntityId>,
}

impl SettledChanges {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    pub fn clear(&mut self) {
        self.inserted.clear();
        self.removed.clear();
    }
}

/// Entity store: id allocation, typed component columns and the pending
/// structural queue.
///
/// A live world carries a [`DirtyTracker`] and recycles ids only after both
/// shadow buffers have observed their deletion. Shadow worlds have no tracker
/// and receive explicit ids from the synchronizer.
pub struct World {
    registry: Arc<ComponentRegistry>,
    columns: Vec<Box<dyn ErasedColumn>>,
    active: EntityBitSet,
    entity_count: usize,
    next_id: u32,
    free_ids: Vec<u32>,
    retired: Vec<EntityId>,
    cooling: Vec<EntityId>,
    pending_inserts: Vec<EntityId>,
    pending_removals: Vec<EntityId>,
    dirty: Option<DirtyTracker>,
    derived: DerivedState,
}

impl World {
    pub fn live(registry: Arc<ComponentRegistry>) -> Self {
        let dirty = DirtyTracker::new(registry.len());
        let mut world = Self::shadow(registry);
        world.dirty = Some(dirty);
        world
    }

    pub fn shadow(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            columns: registry.new_columns(),
            registry,
            active: EntityBitSet::new(),
            entity_count: 0,
            next_id: 0,
            free_ids: Vec::new(),
            retired: Vec::new(),
            cooling: Vec::new(),
            pending_inserts: Vec::new(),
            pending_removals: Vec::new(),
            dirty: None,
            derived: DerivedState::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Allocates an id immediately; the entity is reported as inserted at
    /// the next settle.
    pub fn spawn(&mut self) -> EntityId {
        let id = match self.free_ids.pop() {
            Some(raw) => EntityId(raw),
            None => {
                let raw = self.next_id;
                self.next_id += 1;
                EntityId(raw)
            }
        };
        self.active.insert(id.0);
        self.entity_count += 1;
        self.pending_inserts.push(id);
        id
    }

    /// Queues the entity for destruction at the next settle.
    pub fn despawn(&mut self, id: EntityId) -> bool {
        if !self.is_active(id) {
            return false;
        }
        if !self.pending_removals.contains(&id) {
            self.pending_removals.push(id);
        }
        true
    }

    pub fn is_active(&self, id: EntityId) -> bool {
        self.active.contains(id.0)
    }

    pub fn is_pending_removal(&self, id: EntityId) -> bool {
        self.pending_removals.contains(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    pub fn active(&self) -> &EntityBitSet {
        &self.active
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.active.iter().map(EntityId)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_inserts.is_empty() || !self.pending_removals.is_empty()
    }

    pub fn component_type<T: Component>(&self) -> Result<ComponentTypeId, WorldError> {
        self.registry
            .id_of::<T>()
            .ok_or(WorldError::UnregisteredComponent(std::any::type_name::<T>()))
    }

    pub fn insert<T: Component>(
        &mut self,
        id: EntityId,
        value: T,
    ) -> Result<Option<T>, WorldError> {
        let ty = self.component_type::<T>()?;
        if !self.is_active(id) {
            return Err(WorldError::InactiveEntity(id));
        }
        self.mark_changed_type(id, ty);
        let column = typed_mut::<T>(self.columns[ty.index()].as_mut())
            .ok_or(WorldError::UnregisteredComponent(std::any::type_name::<T>()))?;
        Ok(column.insert(id, value))
    }

    pub fn remove<T: Component>(&mut self, id: EntityId) -> Option<T> {
        let ty = self.registry.id_of::<T>()?;
        let removed = typed_mut::<T>(self.columns[ty.index()].as_mut())?.remove(id);
        if removed.is_some() {
            self.mark_changed_type(id, ty);
        }
        removed
    }

    pub fn get<T: Component>(&self, id: EntityId) -> Option<&T> {
        let ty = self.registry.id_of::<T>()?;
        typed::<T>(self.columns[ty.index()].as_ref())?.get(id)
    }

    /// Mutable access; mirrored types are flagged changed whenever the
    /// component exists.
    pub fn get_mut<T: Component>(&mut self, id: EntityId) -> Option<&mut T> {
        let ty = self.registry.id_of::<T>()?;
        if self.columns[ty.index()].contains(id) {
            self.mark_changed_type(id, ty);
        }
        typed_mut::<T>(self.columns[ty.index()].as_mut())?.get_mut(id)
    }

    pub fn has<T: Component>(&self, id: EntityId) -> bool {
        self.get::<T>(id).is_some()
    }

    pub fn has_type(&self, id: EntityId, ty: ComponentTypeId) -> bool {
        self.columns
            .get(ty.index())
            .is_some_and(|column| column.contains(id))
    }

    pub fn mark_changed<T: Component>(&mut self, id: EntityId) {
        if let Some(ty) = self.registry.id_of::<T>() {
            self.mark_changed_type(id, ty);
        }
    }

    fn mark_changed_type(&mut self, id: EntityId, ty: ComponentTypeId) {
        if !self.registry.is_mirrored(ty) {
            return;
        }
        if let Some(dirty) = &mut self.dirty {
            dirty.mark_changed(id, ty);
        }
    }

    pub fn iter<T: Component>(&self) -> impl Iterator<Item = (EntityId, &T)> + '_ {
        self.registry
            .id_of::<T>()
            .and_then(|ty| typed::<T>(self.columns[ty.index()].as_ref()))
            .into_iter()
            .flat_map(|column| column.iter())
    }

    /// Active entities carrying every listed component type.
    pub fn entities_with<'a>(
        &'a self,
        types: &'a [ComponentTypeId],
    ) -> impl Iterator<Item = EntityId> + 'a {
        self.entities()
            .filter(move |id| types.iter().all(|ty| self.has_type(*id, *ty)))
    }

    pub fn uuid(&self, id: EntityId) -> Option<EntityUuid> {
        self.get::<UuidComponent>(id).map(|component| component.0)
    }

    /// Linear scan over the UUID column.
    pub fn find_by_uuid(&self, uuid: &EntityUuid) -> Option<EntityId> {
        self.iter::<UuidComponent>()
            .find(|(id, component)| component.0 == *uuid && self.is_active(*id))
            .map(|(id, _)| id)
    }

    pub fn derived(&self) -> &DerivedState {
        &self.derived
    }

    pub fn derived_mut(&mut self) -> &mut DerivedState {
        &mut self.derived
    }

    /// First half of a settle: hands out queued inserts and removals. Removed
    /// entities keep their components until `complete_removals` so removal
    /// callbacks can still read them.
    pub fn take_pending(&mut self, settled: &mut SettledChanges) {
        settled.clear();
        for id in self.pending_inserts.drain(..) {
            if let Some(dirty) = &mut self.dirty {
                dirty.mark_added(id);
            }
            settled.inserted.push(id);
        }
        for id in self.pending_removals.drain(..) {
            if self.active.contains(id.0) {
                settled.removed.push(id);
            }
        }
    }

    pub fn complete_removals(&mut self, removed: &[EntityId]) {
        for id in removed {
            if !self.destroy_now(*id) {
                continue;
            }
            if let Some(dirty) = &mut self.dirty {
                dirty.mark_deleted(*id);
                self.retired.push(*id);
            }
        }
    }

    /// Settles without callbacks.
    pub fn apply_pending(&mut self) -> SettledChanges {
        let mut settled = SettledChanges::default();
        self.take_pending(&mut settled);
        self.complete_removals(&settled.removed);
        settled
    }

    pub(crate) fn spawn_at(&mut self, id: EntityId) -> Result<(), WorldError> {
        if self.is_active(id) {
            return Err(WorldError::AlreadyActive(id));
        }
        self.active.insert(id.0);
        self.entity_count += 1;
        self.next_id = self.next_id.max(id.0 + 1);
        Ok(())
    }

    /// Drops every component and deactivates the id; false if it was inactive.
    pub(crate) fn destroy_now(&mut self, id: EntityId) -> bool {
        if !self.active.contains(id.0) {
            return false;
        }
        for column in &mut self.columns {
            column.remove_entity(id);
        }
        self.active.remove(id.0);
        self.entity_count -= 1;
        true
    }

    /// Called after each shadow pass. Ids retired since the previous pass move
    /// to cooling; ids that were already cooling have now been seen by both
    /// buffers and become reusable.
    pub(crate) fn recycle_observed(&mut self) {
        self.free_ids.extend(self.cooling.drain(..).map(|id| id.0));
        std::mem::swap(&mut self.cooling, &mut self.retired);
    }

    pub(crate) fn swap_dirty(&mut self, other: &mut DirtyTracker) {
        if let Some(dirty) = &mut self.dirty {
            std::mem::swap(dirty, other);
        }
    }

    pub(crate) fn column(&self, ty: ComponentTypeId) -> &dyn ErasedColumn {
        self.columns[ty.index()].as_ref()
    }

    pub(crate) fn column_mut(&mut self, ty: ComponentTypeId) -> &mut dyn ErasedColumn {
        self.columns[ty.index()].as_mut()
    }

    /// Clones every mirror-safe component of an entity.
    pub(crate) fn extract_mirrored(&self, id: EntityId) -> Vec<(ComponentTypeId, BoxedComponent)> {
        self.registry
            .mirrored_types()
            .iter()
            .filter_map(|ty| {
                let ops = self.registry.mirror_ops(*ty)?;
                (ops.extract)(self.column(*ty), id).map(|value| (*ty, value))
            })
            .collect()
    }

    pub(crate) fn restore_components(
        &mut self,
        id: EntityId,
        components: Vec<(ComponentTypeId, BoxedComponent)>,
    ) -> usize {
        let mut restored = 0;
        for (ty, value) in components {
            let Some(ops) = self.registry.mirror_ops(ty) else {
                continue;
            };
            if (ops.restore)(self.columns[ty.index()].as_mut(), id, value) {
                self.mark_changed_type(id, ty);
                restored += 1;
            }
        }
        restored
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entity_count)
            .field("tracked", &self.dirty.is_some())
            .field("pending_inserts", &self.pending_inserts.len())
            .field("pending_removals", &self.pending_removals.len())
            .finish()
    }
}
