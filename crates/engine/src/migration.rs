use std::fmt;

use thiserror::Error;

use crate::ecs::{BoxedComponent, ComponentTypeId, EntityId};
use crate::identity::{EntityUuid, StarSystemId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("entity {0} is not active or already leaving")]
    InactiveEntity(EntityId),
    #[error("entity {0} carries no uuid")]
    MissingUuid(EntityId),
    #[error("entity is already in {0}")]
    SameSystem(StarSystemId),
    #[error("unknown target star system {0}")]
    UnknownSystem(StarSystemId),
}

/// An entity in transit: its mirror-safe components detached from the
/// source world, waiting for delivery after the tick barrier.
pub struct MigratingEntity {
    pub uuid: EntityUuid,
    pub source: StarSystemId,
    pub target: StarSystemId,
    pub(crate) components: Vec<(ComponentTypeId, BoxedComponent)>,
}

impl MigratingEntity {
    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

impl fmt::Debug for MigratingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigratingEntity")
            .field("uuid", &self.uuid)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("components", &self.components.len())
            .finish()
    }
}
