mod gates;
mod substep;

use std::cmp::Reverse;

use thiserror::Error;
use tracing::{debug, warn};

use crate::command::{Command, CommandQueue};
use crate::ecs::{EntityId, SettledChanges, World, WorldError};
use crate::identity::{
    EmpireId, EntityReference, IdentityResolver, StarSystemId, UuidAllocator, UuidComponent,
};
use crate::migration::{MigratingEntity, MigrationError};
use crate::shadow::SECONDS_PER_DAY;

pub use gates::{DailyGate, IntervalGate};
pub use substep::{SubstepPlan, FINE_STEP_LIMIT};

const MAX_SETTLE_ROUNDS: usize = 16;

#[derive(Debug, Error)]
pub enum SubsystemError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreProcess,
    Process,
    PostProcess,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::PreProcess => "pre_process",
            Phase::Process => "process",
            Phase::PostProcess => "post_process",
        }
    }
}

#[derive(Debug, Error)]
#[error("subsystem {subsystem} failed during {}: {source}", .phase.as_str())]
pub struct PipelineError {
    pub subsystem: &'static str,
    pub phase: Phase,
    #[source]
    pub source: SubsystemError,
}

/// Everything a subsystem or command may touch during one pass.
pub struct TickContext<'a> {
    pub world: &'a mut World,
    pub resolver: &'a IdentityResolver,
    system: StarSystemId,
    delta: u32,
    time: u64,
    uuids: &'a mut UuidAllocator,
    outbox: &'a mut Vec<MigratingEntity>,
}

impl TickContext<'_> {
    pub fn system(&self) -> StarSystemId {
        self.system
    }

    /// Simulated seconds covered by this pass.
    pub fn delta(&self) -> u32 {
        self.delta
    }

    /// Simulated time at the end of this pass.
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn day(&self) -> u64 {
        self.time / SECONDS_PER_DAY
    }

    /// Spawns an entity and attaches a fresh UUID owned by `empire`.
    pub fn create_entity(&mut self, empire: EmpireId) -> Result<EntityReference, WorldError> {
        let entity = self.world.spawn();
        let uuid = self.uuids.allocate(empire);
        self.world.insert(entity, UuidComponent(uuid))?;
        Ok(EntityReference::new(self.system, entity, uuid))
    }

    /// Detaches the entity's mirror-safe components and queues it for
    /// delivery to `target` once every system finished the tick.
    pub fn request_migration(
        &mut self,
        entity: EntityId,
        target: StarSystemId,
    ) -> Result<(), MigrationError> {
        if target == self.system {
            return Err(MigrationError::SameSystem(target));
        }
        if self.resolver.shadow(target).is_none() {
            return Err(MigrationError::UnknownSystem(target));
        }
        if !self.world.is_active(entity) || self.world.is_pending_removal(entity) {
            return Err(MigrationError::InactiveEntity(entity));
        }
        let uuid = self
            .world
            .uuid(entity)
            .ok_or(MigrationError::MissingUuid(entity))?;

        let components = self.world.extract_mirrored(entity);
        self.world.despawn(entity);
        self.outbox.push(MigratingEntity {
            uuid,
            source: self.system,
            target,
            components,
        });
        Ok(())
    }
}

/// One per-tick simulation unit.
///
/// Subsystems run in registration order. Optional pre/post hooks run in extra
/// passes around the main pass, ordered by priority, highest first.
pub trait Subsystem: Send {
    fn name(&self) -> &'static str;

    fn process(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError>;

    fn pre_process_priority(&self) -> Option<i32> {
        None
    }

    fn pre_process(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn post_process_priority(&self) -> Option<i32> {
        None
    }

    fn post_process(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        Ok(())
    }

    /// Called when a spawned entity settles.
    fn entity_inserted(&mut self, _world: &mut World, _entity: EntityId) {}

    /// Called before a despawned entity loses its components.
    fn entity_removed(&mut self, _world: &mut World, _entity: EntityId) {}

    /// Forces one-second sub-steps for the whole tick.
    fn combat_active(&self, _world: &World) -> bool {
        false
    }
}

pub(crate) struct LiveState {
    system: StarSystemId,
    world: World,
    uuids: UuidAllocator,
    outbox: Vec<MigratingEntity>,
    time: u64,
}

impl LiveState {
    fn context<'a>(&'a mut self, delta: u32, resolver: &'a IdentityResolver) -> TickContext<'a> {
        TickContext {
            world: &mut self.world,
            resolver,
            system: self.system,
            delta,
            time: self.time,
            uuids: &mut self.uuids,
            outbox: &mut self.outbox,
        }
    }
}

/// The live world of one star system together with its ordered subsystems.
pub struct Pipeline {
    state: LiveState,
    subsystems: Vec<Box<dyn Subsystem>>,
    pre_order: Vec<usize>,
    post_order: Vec<usize>,
    settled: SettledChanges,
    commands: Vec<Box<dyn Command>>,
}

impl Pipeline {
    pub fn new(system: StarSystemId, world: World, subsystems: Vec<Box<dyn Subsystem>>) -> Self {
        let pre_order = priority_order(&subsystems, |subsystem| subsystem.pre_process_priority());
        let post_order =
            priority_order(&subsystems, |subsystem| subsystem.post_process_priority());
        Self {
            state: LiveState {
                system,
                world,
                uuids: UuidAllocator::new(system),
                outbox: Vec::new(),
                time: 0,
            },
            subsystems,
            pre_order,
            post_order,
            settled: SettledChanges::default(),
            commands: Vec::new(),
        }
    }

    pub fn world(&self) -> &World {
        &self.state.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.state.world
    }

    pub fn time(&self) -> u64 {
        self.state.time
    }

    pub fn subsystem_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.subsystems.iter().map(|subsystem| subsystem.name())
    }

    /// Advances the live world to `end_time`, which is `tick_size` seconds
    /// after the previous tick.
    pub fn update(
        &mut self,
        tick_size: u32,
        end_time: u64,
        resolver: &IdentityResolver,
        queue: &CommandQueue,
    ) -> Result<(), PipelineError> {
        self.state.time = end_time.saturating_sub(u64::from(tick_size));
        self.settle();

        queue.drain_into(&mut self.commands);
        self.apply_commands(resolver);
        self.settle();

        let fine_only = self
            .subsystems
            .iter()
            .any(|subsystem| subsystem.combat_active(&self.state.world));
        for delta in SubstepPlan::new(tick_size, fine_only).deltas() {
            self.state.time += u64::from(delta);
            self.run_pass(delta, resolver)?;
        }
        self.state.time = end_time;
        Ok(())
    }

    /// Runs `f` against the live world outside a tick and settles afterwards.
    pub fn edit<R>(
        &mut self,
        resolver: &IdentityResolver,
        f: impl FnOnce(&mut TickContext<'_>) -> R,
    ) -> R {
        let result = {
            let mut ctx = self.state.context(0, resolver);
            f(&mut ctx)
        };
        self.settle();
        result
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<MigratingEntity> {
        std::mem::take(&mut self.state.outbox)
    }

    /// Settles pending structural changes, notifying subsystems.
    pub fn settle(&mut self) {
        settle(
            &mut self.state.world,
            &mut self.subsystems,
            &mut self.settled,
        );
    }

    fn apply_commands(&mut self, resolver: &IdentityResolver) {
        for mut command in self.commands.drain(..) {
            if !command.is_valid(resolver) {
                debug!(
                    system = self.state.system.0,
                    command = command.name(),
                    "command_dropped"
                );
                continue;
            }
            let mut ctx = self.state.context(0, resolver);
            if let Err(error) = command.apply(&mut ctx) {
                warn!(
                    system = self.state.system.0,
                    command = command.name(),
                    error = %error,
                    "command_failed"
                );
            }
        }
    }

    fn run_pass(&mut self, delta: u32, resolver: &IdentityResolver) -> Result<(), PipelineError> {
        for &index in &self.pre_order {
            let subsystem = &mut self.subsystems[index];
            let mut ctx = self.state.context(delta, resolver);
            subsystem
                .pre_process(&mut ctx)
                .map_err(|source| PipelineError {
                    subsystem: subsystem.name(),
                    phase: Phase::PreProcess,
                    source,
                })?;
        }
        settle(
            &mut self.state.world,
            &mut self.subsystems,
            &mut self.settled,
        );

        for index in 0..self.subsystems.len() {
            let subsystem = &mut self.subsystems[index];
            let mut ctx = self.state.context(delta, resolver);
            subsystem.process(&mut ctx).map_err(|source| PipelineError {
                subsystem: subsystem.name(),
                phase: Phase::Process,
                source,
            })?;
            settle(
                &mut self.state.world,
                &mut self.subsystems,
                &mut self.settled,
            );
        }

        for &index in &self.post_order {
            let subsystem = &mut self.subsystems[index];
            let mut ctx = self.state.context(delta, resolver);
            subsystem
                .post_process(&mut ctx)
                .map_err(|source| PipelineError {
                    subsystem: subsystem.name(),
                    phase: Phase::PostProcess,
                    source,
                })?;
        }
        settle(
            &mut self.state.world,
            &mut self.subsystems,
            &mut self.settled,
        );
        Ok(())
    }
}

fn priority_order(
    subsystems: &[Box<dyn Subsystem>],
    priority: impl Fn(&dyn Subsystem) -> Option<i32>,
) -> Vec<usize> {
    let mut ordered = subsystems
        .iter()
        .enumerate()
        .filter_map(|(index, subsystem)| priority(subsystem.as_ref()).map(|value| (index, value)))
        .collect::<Vec<_>>();
    ordered.sort_by_key(|(_, value)| Reverse(*value));
    ordered.into_iter().map(|(index, _)| index).collect()
}

fn settle(world: &mut World, subsystems: &mut [Box<dyn Subsystem>], settled: &mut SettledChanges) {
    for _ in 0..MAX_SETTLE_ROUNDS {
        world.take_pending(settled);
        if settled.is_empty() {
            return;
        }
        for entity in &settled.inserted {
            for subsystem in subsystems.iter_mut() {
                subsystem.entity_inserted(world, *entity);
            }
        }
        for entity in &settled.removed {
            for subsystem in subsystems.iter_mut() {
                subsystem.entity_removed(world, *entity);
            }
        }
        world.complete_removals(&settled.removed);
    }
    if world.has_pending() {
        warn!(rounds = MAX_SETTLE_ROUNDS, "settle_round_limit_reached");
    }
}
