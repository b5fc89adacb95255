use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::trace;

use crate::ecs::{
    ComponentRegistry, DirtyTracker, EntityBitSet, EntityId, MirrorOutcome, World, WorldError,
};
use crate::identity::{EntityReference, StarSystemId};
use crate::locks;

pub const SECONDS_PER_DAY: u64 = 86_400;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("entity {entity} flagged {pass} is not active in the live world")]
    InactiveEntity { entity: EntityId, pass: &'static str },
    #[error("shadow world rejected entity: {0}")]
    Shadow(#[from] WorldError),
}

/// Read-only copy of a star system's entity state at the end of a tick.
pub struct ShadowWorld {
    world: World,
    time: u64,
    generation: u64,
}

impl ShadowWorld {
    fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self {
            world: World::shadow(registry),
            time: 0,
            generation: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Simulated seconds at the tick this shadow reflects.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn day(&self) -> u64 {
        self.time / SECONDS_PER_DAY
    }

    /// Number of synchronization passes written into this buffer.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_reference_valid(&self, reference: &EntityReference) -> bool {
        self.world.is_active(reference.entity)
            && self.world.uuid(reference.entity) == Some(reference.uuid)
    }
}

/// Double-buffered shadow of one star system. Readers take the published
/// front buffer; the synchronizer writes the other one and flips.
pub struct ShadowBuffers {
    system: StarSystemId,
    buffers: [RwLock<ShadowWorld>; 2],
    front: AtomicUsize,
}

impl ShadowBuffers {
    pub fn new(system: StarSystemId, registry: &Arc<ComponentRegistry>) -> Self {
        Self {
            system,
            buffers: [
                RwLock::new(ShadowWorld::new(Arc::clone(registry))),
                RwLock::new(ShadowWorld::new(Arc::clone(registry))),
            ],
            front: AtomicUsize::new(0),
        }
    }

    pub fn system(&self) -> StarSystemId {
        self.system
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ShadowWorld> {
        let front = self.front.load(Ordering::Acquire);
        locks::read(&self.buffers[front], "shadow_buffer")
    }

    fn back(&self) -> (usize, RwLockWriteGuard<'_, ShadowWorld>) {
        let back = 1 - self.front.load(Ordering::Acquire);
        (back, locks::write(&self.buffers[back], "shadow_buffer"))
    }

    fn publish(&self, index: usize) {
        self.front.store(index, Ordering::Release);
    }
}

/// Post-copy hook run on the freshly written shadow before it is published.
pub trait Materializer: Send {
    fn name(&self) -> &'static str;
    fn materialize(&mut self, shadow: &mut World, time: u64);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub deleted: usize,
    pub changed: usize,
    pub added: usize,
    pub components_copied: usize,
    pub derived_mirrored: bool,
}

/// Replicates a live world into its shadow buffers.
///
/// Each buffer is written every other pass, so the diff applied to a buffer
/// is the union of the current pass and the one before it.
pub struct ShadowSynchronizer {
    current: DirtyTracker,
    previous: DirtyTracker,
    scratch: EntityBitSet,
    deletions: EntityBitSet,
    changes: EntityBitSet,
    additions: EntityBitSet,
    materializers: Vec<Box<dyn Materializer>>,
    derived_mirrors: u64,
}

impl ShadowSynchronizer {
    pub fn new(registry: &ComponentRegistry) -> Self {
        Self {
            current: DirtyTracker::new(registry.len()),
            previous: DirtyTracker::new(registry.len()),
            scratch: EntityBitSet::new(),
            deletions: EntityBitSet::new(),
            changes: EntityBitSet::new(),
            additions: EntityBitSet::new(),
            materializers: Vec::new(),
            derived_mirrors: 0,
        }
    }

    /// Passes that copied at least one derived index.
    pub fn derived_mirrors(&self) -> u64 {
        self.derived_mirrors
    }

    pub fn add_materializer(&mut self, materializer: Box<dyn Materializer>) {
        self.materializers.push(materializer);
    }

    pub fn synchronize(
        &mut self,
        live: &mut World,
        time: u64,
        buffers: &ShadowBuffers,
    ) -> Result<SyncStats, SyncError> {
        live.swap_dirty(&mut self.current);
        self.current.filter_transient(&mut self.scratch);
        debug_assert!(self.current.added().is_disjoint(self.current.deleted()));
        debug_assert!(self.current.changed().is_disjoint(self.current.deleted()));

        self.deletions.copy_from(self.current.deleted());
        self.deletions.union_with(self.previous.deleted());

        self.additions.copy_from(self.current.added());
        self.additions.union_with(self.previous.added());
        self.additions.difference_with(self.current.deleted());

        self.changes.copy_from(self.current.changed());
        self.changes.union_with(self.previous.changed());
        self.changes.difference_with(&self.additions);
        self.changes.difference_with(&self.deletions);

        let (back_index, mut back) = buffers.back();
        let mut stats = SyncStats::default();
        let registry = Arc::clone(live.registry());

        for raw in self.deletions.iter() {
            if back.world.destroy_now(EntityId(raw)) {
                stats.deleted += 1;
            }
        }

        for raw in self.changes.iter() {
            let id = EntityId(raw);
            if !live.is_active(id) {
                return Err(SyncError::InactiveEntity {
                    entity: id,
                    pass: "changed",
                });
            }
            for ty in registry.mirrored_types() {
                if !self.current.component_changed(*ty, id)
                    && !self.previous.component_changed(*ty, id)
                {
                    continue;
                }
                let Some(ops) = registry.mirror_ops(*ty) else {
                    continue;
                };
                let outcome = (ops.mirror)(live.column(*ty), back.world.column_mut(*ty), id);
                if outcome != MirrorOutcome::Absent {
                    stats.components_copied += 1;
                }
            }
            stats.changed += 1;
        }

        for raw in self.additions.iter() {
            let id = EntityId(raw);
            if !live.is_active(id) {
                return Err(SyncError::InactiveEntity {
                    entity: id,
                    pass: "added",
                });
            }
            back.world.spawn_at(id)?;
            for ty in registry.mirrored_types() {
                let Some(ops) = registry.mirror_ops(*ty) else {
                    continue;
                };
                if (ops.mirror)(live.column(*ty), back.world.column_mut(*ty), id)
                    == MirrorOutcome::Created
                {
                    stats.components_copied += 1;
                }
            }
            stats.added += 1;
        }

        let mirrored = live.derived().mirror_into(back.world.derived_mut());
        stats.derived_mirrored = mirrored.owners || mirrored.spatial;
        if stats.derived_mirrored {
            self.derived_mirrors += 1;
        }

        for materializer in &mut self.materializers {
            materializer.materialize(&mut back.world, time);
        }

        back.time = time;
        back.generation += 1;
        drop(back);
        buffers.publish(back_index);

        std::mem::swap(&mut self.previous, &mut self.current);
        self.current.clear();
        live.recycle_observed();

        trace!(
            system = buffers.system().0,
            deleted = stats.deleted,
            changed = stats.changed,
            added = stats.added,
            "shadow_synchronized"
        );
        Ok(stats)
    }
}
