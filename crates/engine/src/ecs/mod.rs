mod bitset;
mod component;
mod derived;
mod dirty;
mod world;

pub use bitset::{EntityBitSet, Ones};
pub use component::{
    BoxedComponent, Component, ComponentRegistry, ComponentRegistryBuilder, ComponentTypeId,
    EntityId, MirrorComponent,
};
pub(crate) use component::MirrorOutcome;
pub use derived::{DerivedMirror, DerivedState, OwnerIndex, SpatialGrid, DEFAULT_CELL_SIZE};
pub use dirty::DirtyTracker;
pub use world::{SettledChanges, World, WorldError};
