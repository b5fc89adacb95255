pub(crate) mod commands;
pub(crate) mod components;
pub(crate) mod galactic;
pub(crate) mod subsystems;

use std::sync::Arc;

use stellar_engine::{ComponentRegistry, StarSystemBuilder};

use components::{Colony, MoveTarget, Name, Orbit, Owner, Position, Ship, TimedLife};
use subsystems::{
    ColonyGrowth, Navigation, OrbitMotion, ShipRegistry, SpatialIndexer, TimedLifeExpiry,
};

/// One registry shared by every star system so migrated entities keep their
/// component ids.
pub(crate) fn registry() -> Arc<ComponentRegistry> {
    ComponentRegistry::builder()
        .with_mirrored::<Position>()
        .with_mirrored::<Orbit>()
        .with_mirrored::<Name>()
        .with_mirrored::<Owner>()
        .with_mirrored::<Ship>()
        .with_mirrored::<TimedLife>()
        .with_mirrored::<Colony>()
        .with_mirrored::<MoveTarget>()
        .build()
}

/// The standard pipeline every demo star system runs.
pub(crate) fn star_system(name: &str) -> StarSystemBuilder {
    StarSystemBuilder::new(name)
        .with_subsystem(ShipRegistry::new())
        .with_subsystem(OrbitMotion)
        .with_subsystem(Navigation)
        .with_subsystem(TimedLifeExpiry)
        .with_subsystem(ColonyGrowth::new())
        .with_subsystem(SpatialIndexer)
}
