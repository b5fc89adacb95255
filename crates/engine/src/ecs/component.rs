use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::identity::UuidComponent;

/// Positional entity handle, scoped to one world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl EntityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Small integer assigned to a component type when the registry is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(u16);

impl ComponentTypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u16)
    }
}

pub trait Component: Any + Send + Sync + 'static {}

impl<T: Any + Send + Sync + 'static> Component for T {}

/// A component that may be replicated into shadow worlds.
///
/// `copy_into` writes this value into an existing instance of the same type.
/// The default goes through `clone_from`, which lets `Vec`/`String` fields keep
/// their allocation when the shapes match.
pub trait MirrorComponent: Component + Clone {
    fn copy_into(&self, target: &mut Self) {
        target.clone_from(self);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MirrorOutcome {
    Copied,
    Created,
    Removed,
    Absent,
}

pub(crate) struct Column<T> {
    slots: Vec<Option<T>>,
    len: usize,
}

impl<T> Default for Column<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Column<T> {
    pub(crate) fn get(&self, id: EntityId) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    pub(crate) fn insert(&mut self, id: EntityId, value: T) -> Option<T> {
        if id.index() >= self.slots.len() {
            self.slots.resize_with(id.index() + 1, || None);
        }
        let previous = self.slots[id.index()].replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    pub(crate) fn remove(&mut self, id: EntityId) -> Option<T> {
        let removed = self.slots.get_mut(id.index()).and_then(Option::take);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (EntityId(index as u32), value)))
    }
}

pub(crate) trait ErasedColumn: Send + Sync {
    fn contains(&self, id: EntityId) -> bool;
    fn remove_entity(&mut self, id: EntityId) -> bool;
    fn len(&self) -> usize;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Component> ErasedColumn for Column<T> {
    fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    fn remove_entity(&mut self, id: EntityId) -> bool {
        self.remove(id).is_some()
    }

    fn len(&self) -> usize {
        self.len
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) fn typed<T: Component>(column: &dyn ErasedColumn) -> Option<&Column<T>> {
    column.as_any().downcast_ref::<Column<T>>()
}

pub(crate) fn typed_mut<T: Component>(column: &mut dyn ErasedColumn) -> Option<&mut Column<T>> {
    column.as_any_mut().downcast_mut::<Column<T>>()
}

/// A detached component value, used to carry entities between worlds.
pub type BoxedComponent = Box<dyn Any + Send>;

#[derive(Clone, Copy)]
pub(crate) struct MirrorOps {
    pub(crate) mirror: fn(&dyn ErasedColumn, &mut dyn ErasedColumn, EntityId) -> MirrorOutcome,
    pub(crate) extract: fn(&dyn ErasedColumn, EntityId) -> Option<BoxedComponent>,
    pub(crate) restore: fn(&mut dyn ErasedColumn, EntityId, BoxedComponent) -> bool,
}

fn mirror_column<T: MirrorComponent>(
    source: &dyn ErasedColumn,
    target: &mut dyn ErasedColumn,
    id: EntityId,
) -> MirrorOutcome {
    let (Some(source), Some(target)) = (typed::<T>(source), typed_mut::<T>(target)) else {
        return MirrorOutcome::Absent;
    };
    let Some(live) = source.get(id) else {
        return match target.remove(id) {
            Some(_) => MirrorOutcome::Removed,
            None => MirrorOutcome::Absent,
        };
    };
    if let Some(shadow) = target.get_mut(id) {
        live.copy_into(shadow);
        return MirrorOutcome::Copied;
    }
    target.insert(id, live.clone());
    MirrorOutcome::Created
}

fn extract_component<T: MirrorComponent>(
    source: &dyn ErasedColumn,
    id: EntityId,
) -> Option<BoxedComponent> {
    typed::<T>(source)?
        .get(id)
        .map(|value| Box::new(value.clone()) as BoxedComponent)
}

fn restore_component<T: MirrorComponent>(
    target: &mut dyn ErasedColumn,
    id: EntityId,
    value: BoxedComponent,
) -> bool {
    let (Some(target), Ok(value)) = (typed_mut::<T>(target), value.downcast::<T>()) else {
        return false;
    };
    target.insert(id, *value);
    true
}

fn new_column<T: Component>() -> Box<dyn ErasedColumn> {
    Box::new(Column::<T>::default())
}

pub(crate) struct ComponentInfo {
    name: &'static str,
    new_column: fn() -> Box<dyn ErasedColumn>,
    mirror: Option<MirrorOps>,
}

/// Fixed table of component types shared by a star system's live and shadow
/// worlds. Built once; ids are dense and stable for the registry's lifetime.
pub struct ComponentRegistry {
    infos: Vec<ComponentInfo>,
    by_type: HashMap<TypeId, ComponentTypeId>,
    mirrored: Vec<ComponentTypeId>,
}

impl ComponentRegistry {
    pub fn builder() -> ComponentRegistryBuilder {
        ComponentRegistryBuilder::new()
    }

    pub fn id_of<T: Component>(&self) -> Option<ComponentTypeId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    pub fn name(&self, id: ComponentTypeId) -> &'static str {
        self.infos
            .get(id.index())
            .map(|info| info.name)
            .unwrap_or("<unregistered>")
    }

    pub fn is_mirrored(&self, id: ComponentTypeId) -> bool {
        self.infos
            .get(id.index())
            .is_some_and(|info| info.mirror.is_some())
    }

    pub fn mirrored_types(&self) -> &[ComponentTypeId] {
        &self.mirrored
    }

    pub(crate) fn mirror_ops(&self, id: ComponentTypeId) -> Option<MirrorOps> {
        self.infos.get(id.index()).and_then(|info| info.mirror)
    }

    pub(crate) fn new_columns(&self) -> Vec<Box<dyn ErasedColumn>> {
        self.infos.iter().map(|info| (info.new_column)()).collect()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field(
                "types",
                &self.infos.iter().map(|info| info.name).collect::<Vec<_>>(),
            )
            .field("mirrored", &self.mirrored.len())
            .finish()
    }
}

pub struct ComponentRegistryBuilder {
    registry: ComponentRegistry,
}

impl ComponentRegistryBuilder {
    /// Every registry carries the entity UUID as its first mirrored type.
    pub fn new() -> Self {
        let mut builder = Self {
            registry: ComponentRegistry {
                infos: Vec::new(),
                by_type: HashMap::new(),
                mirrored: Vec::new(),
            },
        };
        builder.register_mirrored::<UuidComponent>();
        builder
    }

    /// Registers a simulation-only component, invisible to shadow worlds.
    pub fn register<T: Component>(&mut self) -> ComponentTypeId {
        self.insert::<T>(None)
    }

    pub fn register_mirrored<T: MirrorComponent>(&mut self) -> ComponentTypeId {
        self.insert::<T>(Some(MirrorOps {
            mirror: mirror_column::<T>,
            extract: extract_component::<T>,
            restore: restore_component::<T>,
        }))
    }

    pub fn with<T: Component>(mut self) -> Self {
        self.register::<T>();
        self
    }

    pub fn with_mirrored<T: MirrorComponent>(mut self) -> Self {
        self.register_mirrored::<T>();
        self
    }

    pub fn build(self) -> Arc<ComponentRegistry> {
        Arc::new(self.registry)
    }

    fn insert<T: Component>(&mut self, mirror: Option<MirrorOps>) -> ComponentTypeId {
        let registry = &mut self.registry;
        if let Some(existing) = registry.by_type.get(&TypeId::of::<T>()).copied() {
            let info = &mut registry.infos[existing.index()];
            if info.mirror.is_none() && mirror.is_some() {
                info.mirror = mirror;
                registry.mirrored.push(existing);
            }
            return existing;
        }

        let id = ComponentTypeId(registry.infos.len() as u16);
        registry.infos.push(ComponentInfo {
            name: type_name::<T>(),
            new_column: new_column::<T>,
            mirror,
        });
        registry.by_type.insert(TypeId::of::<T>(), id);
        if mirror.is_some() {
            registry.mirrored.push(id);
        }
        id
    }
}

impl Default for ComponentRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
