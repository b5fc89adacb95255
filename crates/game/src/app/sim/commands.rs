use stellar_engine::{
    ensure_local, revalidate, Command, CommandError, EntityReference, IdentityResolver,
    StarSystemId, TickContext,
};
use tracing::info;

use super::components::{MoveTarget, Name, Owner, Position, TimedLife};

/// Orders a ship to fly to another entity, possibly in another system.
#[derive(Debug)]
pub(crate) struct MoveToEntity {
    pub(crate) ship: EntityReference,
    pub(crate) target: EntityReference,
}

impl Command for MoveToEntity {
    fn name(&self) -> &'static str {
        "move_to_entity"
    }

    fn is_valid(&mut self, resolver: &IdentityResolver) -> bool {
        revalidate(&mut self.ship, resolver) && revalidate(&mut self.target, resolver)
    }

    fn apply(&mut self, ctx: &mut TickContext<'_>) -> Result<(), CommandError> {
        ensure_local(&self.ship, ctx)?;
        ctx.world.insert(self.ship.entity, MoveTarget(self.target))?;
        Ok(())
    }
}

/// Spawns a short-lived probe at the launching ship's position.
#[derive(Debug)]
pub(crate) struct LaunchProbe {
    pub(crate) from: EntityReference,
    pub(crate) lifetime_seconds: u64,
}

impl Command for LaunchProbe {
    fn name(&self) -> &'static str {
        "launch_probe"
    }

    fn is_valid(&mut self, resolver: &IdentityResolver) -> bool {
        revalidate(&mut self.from, resolver)
    }

    fn apply(&mut self, ctx: &mut TickContext<'_>) -> Result<(), CommandError> {
        ensure_local(&self.from, ctx)?;
        let launcher = self.from.entity;
        let (Some(position), Some(owner)) = (
            ctx.world.get::<Position>(launcher).copied(),
            ctx.world.get::<Owner>(launcher).copied(),
        ) else {
            return Err(CommandError::Rejected(format!(
                "entity {launcher} cannot launch probes"
            )));
        };

        let probe = ctx.create_entity(owner.0)?;
        ctx.world.insert(probe.entity, position)?;
        ctx.world.insert(probe.entity, owner)?;
        ctx.world.insert(probe.entity, Name("probe".to_string()))?;
        ctx.world.insert(
            probe.entity,
            TimedLife {
                remaining_seconds: self.lifetime_seconds,
            },
        )?;
        info!(
            system = ctx.system().0,
            launcher = launcher.0,
            probe = probe.entity.0,
            "probe_launched"
        );
        Ok(())
    }
}

/// Moves an entity to another star system at the end of the tick.
#[derive(Debug)]
pub(crate) struct Jump {
    pub(crate) entity: EntityReference,
    pub(crate) target: StarSystemId,
}

impl Command for Jump {
    fn name(&self) -> &'static str {
        "jump"
    }

    fn is_valid(&mut self, resolver: &IdentityResolver) -> bool {
        revalidate(&mut self.entity, resolver) && resolver.shadow(self.target).is_some()
    }

    fn apply(&mut self, ctx: &mut TickContext<'_>) -> Result<(), CommandError> {
        ensure_local(&self.entity, ctx)?;
        ctx.request_migration(self.entity.entity, self.target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use stellar_engine::{
        EmpireId, Galaxy, GalaxyBuilder, GalaxyConfig, Resolution, StarSystemBuilder, WorldError,
    };

    use super::*;
    use crate::app::sim::registry;
    use crate::app::sim::subsystems::TimedLifeExpiry;

    fn galaxy() -> Galaxy {
        let config = GalaxyConfig {
            worker_threads: 1,
            ..GalaxyConfig::default()
        };
        let mut builder = GalaxyBuilder::new(config, registry());
        builder.add_system(StarSystemBuilder::new("sol").with_subsystem(TimedLifeExpiry));
        builder.add_system(StarSystemBuilder::new("vega"));
        builder.build().expect("galaxy")
    }

    fn spawn(galaxy: &Galaxy, system: StarSystemId, armed: bool) -> EntityReference {
        galaxy
            .populate(system, |ctx| {
                let reference = ctx.create_entity(EmpireId(3))?;
                ctx.world
                    .insert(reference.entity, Position { x: 4.0, y: 2.0 })?;
                if armed {
                    ctx.world.insert(reference.entity, Owner(EmpireId(3)))?;
                }
                Ok::<_, WorldError>(reference)
            })
            .expect("populate")
            .expect("spawn")
    }

    fn probes(galaxy: &Galaxy) -> usize {
        let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
        shadow.world().iter::<TimedLife>().count()
    }

    #[test]
    fn move_order_attaches_target() {
        let galaxy = galaxy();
        let ship = spawn(&galaxy, StarSystemId(0), true);
        let target = spawn(&galaxy, StarSystemId(1), false);

        galaxy
            .submit(StarSystemId(0), Box::new(MoveToEntity { ship, target }))
            .expect("submit");
        galaxy.step(1).expect("step");

        let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
        assert_eq!(
            shadow.world().get::<MoveTarget>(ship.entity),
            Some(&MoveTarget(target))
        );
    }

    #[test]
    fn order_with_vanished_target_is_dropped() {
        let galaxy = galaxy();
        let ship = spawn(&galaxy, StarSystemId(0), true);
        let target = spawn(&galaxy, StarSystemId(1), false);
        galaxy
            .populate(StarSystemId(1), |ctx| ctx.world.despawn(target.entity))
            .expect("despawn");

        galaxy
            .submit(StarSystemId(0), Box::new(MoveToEntity { ship, target }))
            .expect("submit");
        galaxy.step(1).expect("step");

        let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
        assert!(!shadow.world().has::<MoveTarget>(ship.entity));
    }

    #[test]
    fn probe_inherits_position_and_expires() {
        let galaxy = galaxy();
        let ship = spawn(&galaxy, StarSystemId(0), true);
        galaxy
            .submit(
                StarSystemId(0),
                Box::new(LaunchProbe {
                    from: ship,
                    lifetime_seconds: 2,
                }),
            )
            .expect("submit");

        galaxy.step(1).expect("step");
        assert_eq!(probes(&galaxy), 1);
        galaxy.step(1).expect("step");
        assert_eq!(probes(&galaxy), 0);
    }

    #[test]
    fn unowned_entity_cannot_launch() {
        let galaxy = galaxy();
        let rock = spawn(&galaxy, StarSystemId(0), false);
        galaxy
            .submit(
                StarSystemId(0),
                Box::new(LaunchProbe {
                    from: rock,
                    lifetime_seconds: 60,
                }),
            )
            .expect("submit");

        let report = galaxy.step(1).expect("step");
        assert!(report.failed.is_empty());
        assert_eq!(probes(&galaxy), 0);
    }

    #[test]
    fn jump_relocates_entity() {
        let galaxy = galaxy();
        let mut ship = spawn(&galaxy, StarSystemId(0), true);
        galaxy
            .submit(
                StarSystemId(0),
                Box::new(Jump {
                    entity: ship,
                    target: StarSystemId(1),
                }),
            )
            .expect("submit");

        galaxy.step(1).expect("step");
        assert_eq!(galaxy.resolver().resolve(&mut ship), Resolution::Relocated);
        assert_eq!(ship.system, StarSystemId(1));
    }
}
