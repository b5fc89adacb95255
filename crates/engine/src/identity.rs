use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::ecs::{EntityId, MirrorComponent};
use crate::locks;
use crate::shadow::ShadowBuffers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StarSystemId(pub u32);

impl StarSystemId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StarSystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "system-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmpireId(pub u32);

/// Stable identity of an entity across ticks, systems and id reuse.
///
/// The hash is computed once at construction and compared before the fields.
#[derive(Debug, Clone, Copy)]
pub struct EntityUuid {
    star_system: StarSystemId,
    empire: EmpireId,
    counter: u64,
    hash: u32,
}

impl EntityUuid {
    pub fn new(star_system: StarSystemId, empire: EmpireId, counter: u64) -> Self {
        let mut hash: u32 = 1;
        hash = hash.wrapping_mul(37).wrapping_add(star_system.0);
        hash = hash.wrapping_mul(37).wrapping_add(empire.0);
        hash = hash
            .wrapping_mul(37)
            .wrapping_add((counter ^ (counter >> 32)) as u32);
        Self {
            star_system,
            empire,
            counter,
            hash,
        }
    }

    /// System the entity was created in; it may have migrated since.
    pub fn origin(&self) -> StarSystemId {
        self.star_system
    }

    pub fn empire(&self) -> EmpireId {
        self.empire
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn cached_hash(&self) -> u32 {
        self.hash
    }
}

impl PartialEq for EntityUuid {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.counter == other.counter
            && self.star_system == other.star_system
            && self.empire == other.empire
    }
}

impl Eq for EntityUuid {}

impl Hash for EntityUuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

impl fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.star_system.0, self.empire.0, self.counter
        )
    }
}

/// UUID attached to every entity created through a star system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UuidComponent(pub EntityUuid);

impl MirrorComponent for UuidComponent {}

/// Hands out UUIDs for one star system. The counter never rewinds.
#[derive(Debug, Clone)]
pub struct UuidAllocator {
    system: StarSystemId,
    next: u64,
}

impl UuidAllocator {
    pub fn new(system: StarSystemId) -> Self {
        Self { system, next: 0 }
    }

    pub fn allocate(&mut self, empire: EmpireId) -> EntityUuid {
        let uuid = EntityUuid::new(self.system, empire, self.next);
        self.next += 1;
        uuid
    }
}

/// Cached pointer to an entity: where it was last seen plus its UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityReference {
    pub system: StarSystemId,
    pub entity: EntityId,
    pub uuid: EntityUuid,
}

impl EntityReference {
    pub fn new(system: StarSystemId, entity: EntityId, uuid: EntityUuid) -> Self {
        Self {
            system,
            entity,
            uuid,
        }
    }

    pub fn set(&mut self, system: StarSystemId, entity: EntityId, uuid: EntityUuid) {
        self.system = system;
        self.entity = entity;
        self.uuid = uuid;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The cached (system, entity) pair still holds the UUID.
    Valid,
    /// Found elsewhere through a global scan; the reference was rewritten.
    Relocated,
    /// Left its system and has not landed in the target yet; the reference
    /// is untouched.
    InTransit(StarSystemId),
    Gone,
}

impl Resolution {
    /// True when the reference now names a published entity. An entity in
    /// transit exists but cannot be addressed until it lands.
    pub fn is_resolved(self) -> bool {
        matches!(self, Resolution::Valid | Resolution::Relocated)
    }
}

/// Resolves references against the published shadow of every star system.
pub struct IdentityResolver {
    shadows: Vec<Arc<ShadowBuffers>>,
    in_transit: RwLock<HashMap<EntityUuid, StarSystemId>>,
    global_scans: AtomicU64,
}

impl IdentityResolver {
    /// `shadows[i]` must belong to `StarSystemId(i)`.
    pub(crate) fn new(shadows: Vec<Arc<ShadowBuffers>>) -> Self {
        Self {
            shadows,
            in_transit: RwLock::new(HashMap::new()),
            global_scans: AtomicU64::new(0),
        }
    }

    pub fn shadow(&self, system: StarSystemId) -> Option<&Arc<ShadowBuffers>> {
        self.shadows.get(system.index())
    }

    pub fn is_valid(&self, reference: &EntityReference) -> bool {
        self.shadow(reference.system)
            .is_some_and(|shadow| shadow.read().is_reference_valid(reference))
    }

    /// Validates the reference, falling back to a scan of every shadow by
    /// UUID. On relocation the reference is updated in place.
    pub fn resolve(&self, reference: &mut EntityReference) -> Resolution {
        if self.is_valid(reference) {
            return Resolution::Valid;
        }
        match self.find(&reference.uuid) {
            Some(found) => {
                reference.set(found.system, found.entity, found.uuid);
                Resolution::Relocated
            }
            None => match self.transit_target(&reference.uuid) {
                Some(target) => Resolution::InTransit(target),
                None => Resolution::Gone,
            },
        }
    }

    /// Target system of an entity extracted from its source but not yet
    /// published by the target.
    pub fn transit_target(&self, uuid: &EntityUuid) -> Option<StarSystemId> {
        locks::read(&self.in_transit, "resolver_in_transit")
            .get(uuid)
            .copied()
    }

    pub(crate) fn begin_transit(&self, uuid: EntityUuid, target: StarSystemId) {
        locks::write(&self.in_transit, "resolver_in_transit").insert(uuid, target);
    }

    pub(crate) fn end_transit(&self, uuid: &EntityUuid) {
        locks::write(&self.in_transit, "resolver_in_transit").remove(uuid);
    }

    pub fn find(&self, uuid: &EntityUuid) -> Option<EntityReference> {
        self.global_scans.fetch_add(1, Ordering::Relaxed);
        self.shadows.iter().find_map(|shadow| {
            let view = shadow.read();
            view.world()
                .find_by_uuid(uuid)
                .map(|entity| EntityReference::new(shadow.system(), entity, *uuid))
        })
    }

    /// Number of full scans performed; valid references never scan.
    pub fn global_scans(&self) -> u64 {
        self.global_scans.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("systems", &self.shadows.len())
            .field(
                "in_transit",
                &locks::read(&self.in_transit, "resolver_in_transit").len(),
            )
            .field("global_scans", &self.global_scans())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_hash_follows_documented_formula() {
        let uuid = EntityUuid::new(StarSystemId(2), EmpireId(5), 7);
        let expected = ((37 + 2) * 37 + 5) * 37 + 7;
        assert_eq!(uuid.cached_hash(), expected);
    }

    #[test]
    fn uuid_equality_requires_all_fields() {
        let a = EntityUuid::new(StarSystemId(1), EmpireId(1), 3);
        let b = EntityUuid::new(StarSystemId(1), EmpireId(1), 3);
        let c = EntityUuid::new(StarSystemId(1), EmpireId(2), 3);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn counter_high_bits_fold_into_hash() {
        let low = EntityUuid::new(StarSystemId(0), EmpireId(0), 1);
        let high = EntityUuid::new(StarSystemId(0), EmpireId(0), 1 | (1 << 32));
        assert_ne!(low.cached_hash(), high.cached_hash());
        assert_ne!(low, high);
    }

    #[test]
    fn allocator_counts_upward_per_system() {
        let mut allocator = UuidAllocator::new(StarSystemId(4));
        let first = allocator.allocate(EmpireId(1));
        let second = allocator.allocate(EmpireId(2));
        assert_eq!(first.counter(), 0);
        assert_eq!(second.counter(), 1);
        assert_eq!(second.origin(), StarSystemId(4));
        assert_eq!(second.empire(), EmpireId(2));
    }
}
