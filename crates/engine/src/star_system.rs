use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLockReadGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::command::{Command, CommandQueue, SubmitError};
use crate::ecs::{ComponentRegistry, World};
use crate::identity::{EntityReference, IdentityResolver, StarSystemId};
use crate::locks;
use crate::migration::MigratingEntity;
use crate::pipeline::{Pipeline, PipelineError, Subsystem, TickContext};
use crate::shadow::{
    Materializer, ShadowBuffers, ShadowSynchronizer, ShadowWorld, SyncError, SyncStats,
};

#[derive(Debug, Error)]
pub enum SystemTickError {
    #[error("star system {system} tick failed: {source}")]
    Pipeline {
        system: StarSystemId,
        #[source]
        source: PipelineError,
    },
    #[error("star system {system} panicked during tick: {message}")]
    Panicked {
        system: StarSystemId,
        message: String,
    },
    #[error("star system {system} shadow invariant violated: {source}")]
    Sync {
        system: StarSystemId,
        #[source]
        source: SyncError,
    },
}

impl SystemTickError {
    pub fn system(&self) -> StarSystemId {
        match self {
            SystemTickError::Pipeline { system, .. }
            | SystemTickError::Panicked { system, .. }
            | SystemTickError::Sync { system, .. } => *system,
        }
    }

    /// Invariant violations cannot be resumed from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SystemTickError::Sync { .. })
    }
}

pub struct StarSystemBuilder {
    name: String,
    subsystems: Vec<Box<dyn Subsystem>>,
    materializers: Vec<Box<dyn Materializer>>,
    command_capacity: Option<usize>,
}

impl StarSystemBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subsystems: Vec::new(),
            materializers: Vec::new(),
            command_capacity: None,
        }
    }

    pub fn with_subsystem(mut self, subsystem: impl Subsystem + 'static) -> Self {
        self.subsystems.push(Box::new(subsystem));
        self
    }

    pub fn with_materializer(mut self, materializer: impl Materializer + 'static) -> Self {
        self.materializers.push(Box::new(materializer));
        self
    }

    /// Overrides the galaxy-wide queue capacity for this system.
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = Some(capacity);
        self
    }

    pub fn build(
        self,
        id: StarSystemId,
        registry: &Arc<ComponentRegistry>,
        default_capacity: usize,
    ) -> StarSystem {
        let mut synchronizer = ShadowSynchronizer::new(registry);
        for materializer in self.materializers {
            synchronizer.add_materializer(materializer);
        }
        StarSystem {
            id,
            name: self.name,
            live: Mutex::new(Pipeline::new(
                id,
                World::live(Arc::clone(registry)),
                self.subsystems,
            )),
            synchronizer: Mutex::new(synchronizer),
            shadow: Arc::new(ShadowBuffers::new(id, registry)),
            commands: CommandQueue::new(id, self.command_capacity.unwrap_or(default_capacity)),
            last_update_nanos: AtomicU64::new(0),
        }
    }
}

/// One star system: its live pipeline behind an exclusive lock, the shadow
/// buffers readers use and the inbound command queue.
///
/// Lock order is synchronizer, then live pipeline, then shadow buffer.
pub struct StarSystem {
    id: StarSystemId,
    name: String,
    live: Mutex<Pipeline>,
    synchronizer: Mutex<ShadowSynchronizer>,
    shadow: Arc<ShadowBuffers>,
    commands: CommandQueue,
    last_update_nanos: AtomicU64,
}

impl StarSystem {
    pub fn id(&self) -> StarSystemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shadow(&self) -> &Arc<ShadowBuffers> {
        &self.shadow
    }

    /// The published shadow world; the only view outside callers get.
    pub fn read(&self) -> RwLockReadGuard<'_, ShadowWorld> {
        self.shadow.read()
    }

    pub fn submit(&self, command: Box<dyn Command>) -> Result<(), SubmitError> {
        self.commands.submit(command)
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.len()
    }

    /// Wall-clock duration of the last update, sync included.
    pub fn last_update(&self) -> Duration {
        Duration::from_nanos(self.last_update_nanos.load(Ordering::Relaxed))
    }

    pub fn derived_mirrors(&self) -> u64 {
        locks::lock(&self.synchronizer, "shadow_synchronizer").derived_mirrors()
    }

    /// Runs the pipeline under the write lock, then synchronizes the shadow.
    /// A failed update leaves the shadow at the last successful sync.
    pub fn tick(
        &self,
        tick_size: u32,
        end_time: u64,
        resolver: &IdentityResolver,
    ) -> Result<SyncStats, SystemTickError> {
        let started = Instant::now();
        let result = self
            .update(tick_size, end_time, resolver)
            .and_then(|()| self.synchronize());
        self.last_update_nanos
            .store(started.elapsed().as_nanos() as u64, Ordering::Relaxed);
        result
    }

    pub fn update(
        &self,
        tick_size: u32,
        end_time: u64,
        resolver: &IdentityResolver,
    ) -> Result<(), SystemTickError> {
        let mut pipeline = locks::lock(&self.live, "star_system_live");
        pipeline
            .update(tick_size, end_time, resolver, &self.commands)
            .map_err(|source| SystemTickError::Pipeline {
                system: self.id,
                source,
            })
    }

    pub fn synchronize(&self) -> Result<SyncStats, SystemTickError> {
        let mut synchronizer = locks::lock(&self.synchronizer, "shadow_synchronizer");
        let mut pipeline = locks::lock(&self.live, "star_system_live");
        let time = pipeline.time();
        synchronizer
            .synchronize(pipeline.world_mut(), time, &self.shadow)
            .map_err(|source| SystemTickError::Sync {
                system: self.id,
                source,
            })
    }

    /// Edits the live world outside a tick, then publishes the result.
    pub fn populate<R>(
        &self,
        resolver: &IdentityResolver,
        f: impl FnOnce(&mut TickContext<'_>) -> R,
    ) -> Result<R, SystemTickError> {
        let result = locks::lock(&self.live, "star_system_live").edit(resolver, f);
        self.synchronize()?;
        Ok(result)
    }

    pub(crate) fn take_migrants(&self) -> Vec<MigratingEntity> {
        locks::lock(&self.live, "star_system_live").take_outbox()
    }

    /// Recreates a migrating entity here and publishes it immediately.
    pub(crate) fn receive(
        &self,
        migrant: MigratingEntity,
        resolver: &IdentityResolver,
    ) -> Result<EntityReference, SystemTickError> {
        let MigratingEntity {
            uuid,
            source,
            components,
            ..
        } = migrant;
        let entity = locks::lock(&self.live, "star_system_live").edit(resolver, |ctx| {
            let entity = ctx.world.spawn();
            ctx.world.restore_components(entity, components);
            entity
        });
        let stats = self.synchronize()?;
        info!(
            uuid = %uuid,
            from = source.0,
            to = self.id.0,
            entity = entity.0,
            "entity_migrated"
        );
        debug!(system = self.id.0, added = stats.added, "migration_synchronized");
        Ok(EntityReference::new(self.id, entity, uuid))
    }
}

impl std::fmt::Debug for StarSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarSystem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pending_commands", &self.commands.len())
            .finish()
    }
}
