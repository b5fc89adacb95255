use std::collections::HashMap;

use stellar_engine::{
    DailyGate, EmpireId, EntityId, Resolution, Subsystem, SubsystemError, TickContext, World,
};
use tracing::{debug, info};

use super::components::{Colony, MoveTarget, Orbit, Owner, Position, Ship, TimedLife};

pub(crate) struct OrbitMotion;

impl Subsystem for OrbitMotion {
    fn name(&self) -> &'static str {
        "orbit_motion"
    }

    fn process(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let time = ctx.time();
        let moved = ctx
            .world
            .iter::<Orbit>()
            .map(|(id, orbit)| (id, orbit.position_at(time)))
            .collect::<Vec<_>>();
        for (id, position) in moved {
            ctx.world.insert(id, position)?;
        }
        Ok(())
    }
}

pub(crate) struct TimedLifeExpiry;

impl Subsystem for TimedLifeExpiry {
    fn name(&self) -> &'static str {
        "timed_life"
    }

    fn process(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let delta = u64::from(ctx.delta());
        let ids = ctx
            .world
            .iter::<TimedLife>()
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        for id in ids {
            let Some(life) = ctx.world.get_mut::<TimedLife>(id) else {
                continue;
            };
            life.remaining_seconds = life.remaining_seconds.saturating_sub(delta);
            if life.remaining_seconds == 0 && ctx.world.despawn(id) {
                debug!(system = ctx.system().0, entity = id.0, "timed_life_expired");
            }
        }
        Ok(())
    }
}

/// Keeps the owner index in step with ships entering and leaving the system,
/// and re-keys ships whose owner or mass changed during the tick.
#[derive(Default)]
pub(crate) struct ShipRegistry {
    keys: HashMap<EntityId, (EmpireId, u64)>,
}

impl ShipRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl Subsystem for ShipRegistry {
    fn name(&self) -> &'static str {
        "ship_registry"
    }

    fn process(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn post_process_priority(&self) -> Option<i32> {
        Some(10)
    }

    fn post_process(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let world = &*ctx.world;
        let current = world
            .iter::<Ship>()
            .filter_map(|(id, _)| ship_key(world, id).map(|key| (id, key)))
            .collect::<HashMap<_, _>>();

        let owners = &mut ctx.world.derived_mut().owners;
        for (entity, key) in &current {
            match self.keys.insert(*entity, *key) {
                Some(previous) if previous == *key => {}
                Some((empire, mass)) => {
                    owners.unregister(empire, mass, *entity);
                    owners.register(key.0, key.1, *entity);
                }
                None => owners.register(key.0, key.1, *entity),
            }
        }
        self.keys.retain(|entity, (empire, mass)| {
            if current.contains_key(entity) {
                return true;
            }
            owners.unregister(*empire, *mass, *entity);
            false
        });
        Ok(())
    }

    fn entity_inserted(&mut self, world: &mut World, entity: EntityId) {
        if let Some((empire, mass)) = ship_key(world, entity) {
            world.derived_mut().owners.register(empire, mass, entity);
            self.keys.insert(entity, (empire, mass));
        }
    }

    fn entity_removed(&mut self, world: &mut World, entity: EntityId) {
        if let Some((empire, mass)) = self.keys.remove(&entity) {
            world.derived_mut().owners.unregister(empire, mass, entity);
        }
    }
}

fn ship_key(world: &World, entity: EntityId) -> Option<(EmpireId, u64)> {
    let ship = world.get::<Ship>(entity)?;
    let owner = world.get::<Owner>(entity)?;
    Some((owner.0, ship.empty_mass))
}

/// Rebuilds the spatial grid after everything else moved.
pub(crate) struct SpatialIndexer;

impl Subsystem for SpatialIndexer {
    fn name(&self) -> &'static str {
        "spatial_indexer"
    }

    fn process(&mut self, _ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn post_process_priority(&self) -> Option<i32> {
        Some(0)
    }

    fn post_process(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let placed = ctx
            .world
            .iter::<Position>()
            .map(|(id, position)| (id, position.grid_coords()))
            .collect::<Vec<_>>();
        let grid = &mut ctx.world.derived_mut().spatial;
        grid.clear();
        for (id, (x, y)) in placed {
            grid.insert(id, x, y);
        }
        Ok(())
    }
}

pub(crate) struct ColonyGrowth {
    gate: DailyGate,
}

impl ColonyGrowth {
    pub(crate) fn new() -> Self {
        Self {
            gate: DailyGate::new(),
        }
    }
}

impl Subsystem for ColonyGrowth {
    fn name(&self) -> &'static str {
        "colony_growth"
    }

    fn process(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        if !self.gate.check(ctx.day()) {
            return Ok(());
        }
        let ids = ctx.world.iter::<Colony>().map(|(id, _)| id).collect::<Vec<_>>();
        for id in ids {
            if let Some(colony) = ctx.world.get_mut::<Colony>(id) {
                colony.population += colony.population * colony.growth_per_mille / 1000;
            }
        }
        Ok(())
    }
}

/// Flies ships toward their move target, jumping systems when the target
/// lives elsewhere.
pub(crate) struct Navigation;

impl Subsystem for Navigation {
    fn name(&self) -> &'static str {
        "navigation"
    }

    fn process(&mut self, ctx: &mut TickContext<'_>) -> Result<(), SubsystemError> {
        let delta = f64::from(ctx.delta());
        let orders = ctx
            .world
            .iter::<MoveTarget>()
            .map(|(id, target)| (id, target.0))
            .collect::<Vec<_>>();

        for (ship, mut target) in orders {
            if ctx.world.is_pending_removal(ship) {
                continue;
            }
            match ctx.resolver.resolve(&mut target) {
                Resolution::Gone => {
                    ctx.world.remove::<MoveTarget>(ship);
                    debug!(entity = ship.0, uuid = %target.uuid, "move_target_lost");
                    continue;
                }
                Resolution::Relocated => {
                    ctx.world.insert(ship, MoveTarget(target))?;
                }
                Resolution::InTransit(_) => continue,
                Resolution::Valid => {}
            }

            if target.system != ctx.system() {
                info!(
                    entity = ship.0,
                    from = ctx.system().0,
                    to = target.system.0,
                    "ship_jump_requested"
                );
                ctx.request_migration(ship, target.system)?;
                continue;
            }

            let (Some(here), Some(there), Some(speed)) = (
                ctx.world.get::<Position>(ship).copied(),
                ctx.world.get::<Position>(target.entity).copied(),
                ctx.world.get::<Ship>(ship).map(|spec| f64::from(spec.speed_km_s)),
            ) else {
                continue;
            };

            let reach = speed * delta;
            let distance = here.distance_to(there);
            if distance <= reach {
                ctx.world.insert(ship, there)?;
                ctx.world.remove::<MoveTarget>(ship);
                info!(entity = ship.0, system = ctx.system().0, "ship_arrived");
            } else {
                let fraction = reach / distance;
                ctx.world.insert(
                    ship,
                    Position {
                        x: here.x + (there.x - here.x) * fraction,
                        y: here.y + (there.y - here.y) * fraction,
                    },
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stellar_engine::{
        ComponentRegistry, EmpireId, EntityReference, Galaxy, GalaxyBuilder, GalaxyConfig,
        StarSystemBuilder, StarSystemId,
    };

    use super::*;
    use crate::app::sim::registry;

    fn galaxy(systems: Vec<StarSystemBuilder>) -> Galaxy {
        let config = GalaxyConfig {
            worker_threads: 1,
            ..GalaxyConfig::default()
        };
        let registry: Arc<ComponentRegistry> = registry();
        let mut builder = GalaxyBuilder::new(config, registry);
        for system in systems {
            builder.add_system(system);
        }
        builder.build().expect("galaxy")
    }

    fn spawn_at(galaxy: &Galaxy, system: StarSystemId, position: Position) -> EntityReference {
        galaxy
            .populate(system, |ctx| {
                let reference = ctx.create_entity(EmpireId(1))?;
                ctx.world.insert(reference.entity, position)?;
                Ok::<_, stellar_engine::WorldError>(reference)
            })
            .expect("populate")
            .expect("spawn")
    }

    fn spawn_ship(
        galaxy: &Galaxy,
        system: StarSystemId,
        empire: EmpireId,
        mass: u64,
    ) -> EntityReference {
        galaxy
            .populate(system, |ctx| {
                let reference = ctx.create_entity(empire)?;
                ctx.world.insert(reference.entity, Owner(empire))?;
                ctx.world.insert(
                    reference.entity,
                    Ship {
                        empty_mass: mass,
                        speed_km_s: 10,
                    },
                )?;
                ctx.world
                    .insert(reference.entity, Position { x: 0.0, y: 0.0 })?;
                Ok::<_, stellar_engine::WorldError>(reference)
            })
            .expect("populate")
            .expect("spawn")
    }

    #[test]
    fn timed_life_despawns_after_its_lifetime() {
        let galaxy = galaxy(vec![StarSystemBuilder::new("sol").with_subsystem(TimedLifeExpiry)]);
        let probe = galaxy
            .populate(StarSystemId(0), |ctx| {
                let reference = ctx.create_entity(EmpireId(1))?;
                ctx.world.insert(
                    reference.entity,
                    TimedLife {
                        remaining_seconds: 3,
                    },
                )?;
                Ok::<_, stellar_engine::WorldError>(reference)
            })
            .expect("populate")
            .expect("spawn");

        galaxy.step(2).expect("step");
        assert!(galaxy.resolver().is_valid(&probe));
        galaxy.step(1).expect("step");
        assert!(!galaxy.resolver().is_valid(&probe));
    }

    #[test]
    fn ship_registry_tracks_ships_in_shadow() {
        let galaxy = galaxy(vec![
            StarSystemBuilder::new("sol").with_subsystem(ShipRegistry::new())
        ]);
        let heavy = spawn_ship(&galaxy, StarSystemId(0), EmpireId(2), 900);
        let light = spawn_ship(&galaxy, StarSystemId(0), EmpireId(2), 100);

        {
            let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
            let ships = shadow
                .world()
                .derived()
                .owners
                .ships_of(EmpireId(2))
                .collect::<Vec<_>>();
            assert_eq!(ships, vec![light.entity, heavy.entity]);
        }

        galaxy
            .populate(StarSystemId(0), |ctx| ctx.world.despawn(heavy.entity))
            .expect("despawn");
        let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
        assert_eq!(shadow.world().derived().owners.ship_count(EmpireId(2)), 1);
    }

    #[test]
    fn ship_registry_rekeys_ships_that_change_after_spawning() {
        let galaxy = galaxy(vec![
            StarSystemBuilder::new("sol").with_subsystem(ShipRegistry::new())
        ]);
        let heavy = spawn_ship(&galaxy, StarSystemId(0), EmpireId(2), 900);
        let late = spawn_at(&galaxy, StarSystemId(0), Position { x: 1.0, y: 1.0 });

        galaxy
            .populate(StarSystemId(0), |ctx| {
                if let Some(ship) = ctx.world.get_mut::<Ship>(heavy.entity) {
                    ship.empty_mass = 50;
                }
                ctx.world.insert(late.entity, Owner(EmpireId(2)))?;
                ctx.world.insert(
                    late.entity,
                    Ship {
                        empty_mass: 100,
                        speed_km_s: 1,
                    },
                )?;
                Ok::<_, stellar_engine::WorldError>(())
            })
            .expect("populate")
            .expect("refit");
        galaxy.step(1).expect("step");
        {
            let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
            let ships = shadow
                .world()
                .derived()
                .owners
                .ships_of(EmpireId(2))
                .collect::<Vec<_>>();
            assert_eq!(ships, vec![heavy.entity, late.entity]);
        }

        galaxy
            .populate(StarSystemId(0), |ctx| ctx.world.remove::<Ship>(heavy.entity))
            .expect("strip");
        galaxy.step(1).expect("step");
        {
            let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
            let ships = shadow
                .world()
                .derived()
                .owners
                .ships_of(EmpireId(2))
                .collect::<Vec<_>>();
            assert_eq!(ships, vec![late.entity]);
        }

        galaxy
            .populate(StarSystemId(0), |ctx| ctx.world.despawn(late.entity))
            .expect("despawn");
        let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
        assert_eq!(shadow.world().derived().owners.empires().count(), 0);
    }

    #[test]
    fn spatial_grid_is_mirrored_only_when_positions_move() {
        let galaxy = galaxy(vec![StarSystemBuilder::new("sol").with_subsystem(SpatialIndexer)]);
        spawn_at(&galaxy, StarSystemId(0), Position { x: 10.0, y: 10.0 });
        let system = galaxy.system(StarSystemId(0)).expect("sol");

        galaxy.step(1).expect("step");
        galaxy.step(1).expect("step");
        let both_buffers_filled = system.derived_mirrors();
        assert_eq!(both_buffers_filled, 2);
        galaxy.step(1).expect("step");
        galaxy.step(1).expect("step");
        assert_eq!(system.derived_mirrors(), both_buffers_filled);

        let shadow = system.read();
        assert_eq!(shadow.world().derived().spatial.occupied_cells(), 1);
    }

    #[test]
    fn colony_grows_once_per_day() {
        let galaxy = galaxy(vec![
            StarSystemBuilder::new("sol").with_subsystem(ColonyGrowth::new())
        ]);
        let colony = galaxy
            .populate(StarSystemId(0), |ctx| {
                let reference = ctx.create_entity(EmpireId(1))?;
                ctx.world.insert(
                    reference.entity,
                    Colony {
                        population: 1000,
                        growth_per_mille: 10,
                    },
                )?;
                Ok::<_, stellar_engine::WorldError>(reference)
            })
            .expect("populate")
            .expect("spawn");

        for _ in 0..5 {
            galaxy.step(60).expect("step");
        }
        let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
        let population = shadow
            .world()
            .get::<Colony>(colony.entity)
            .map(|colony| colony.population);
        assert_eq!(population, Some(1010));
    }

    #[test]
    fn navigation_moves_toward_and_reaches_local_target() {
        let galaxy = galaxy(vec![StarSystemBuilder::new("sol").with_subsystem(Navigation)]);
        let ship = spawn_ship(&galaxy, StarSystemId(0), EmpireId(1), 100);
        let beacon = spawn_at(&galaxy, StarSystemId(0), Position { x: 25.0, y: 0.0 });
        galaxy
            .populate(StarSystemId(0), |ctx| {
                ctx.world.insert(ship.entity, MoveTarget(beacon))
            })
            .expect("populate")
            .expect("order");

        galaxy.step(1).expect("step");
        let position = |galaxy: &Galaxy| {
            let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
            shadow.world().get::<Position>(ship.entity).copied()
        };
        assert_eq!(position(&galaxy), Some(Position { x: 10.0, y: 0.0 }));

        galaxy.step(2).expect("step");
        assert_eq!(position(&galaxy), Some(Position { x: 25.0, y: 0.0 }));
        let shadow = galaxy.system(StarSystemId(0)).expect("sol").read();
        assert!(!shadow.world().has::<MoveTarget>(ship.entity));
    }

    #[test]
    fn navigation_jumps_to_the_target_system() {
        let galaxy = galaxy(vec![
            StarSystemBuilder::new("sol").with_subsystem(Navigation),
            StarSystemBuilder::new("vega").with_subsystem(Navigation),
        ]);
        let mut ship = spawn_ship(&galaxy, StarSystemId(0), EmpireId(1), 100);
        let beacon = spawn_at(&galaxy, StarSystemId(1), Position { x: 5.0, y: 0.0 });
        galaxy
            .populate(StarSystemId(0), |ctx| {
                ctx.world.insert(ship.entity, MoveTarget(beacon))
            })
            .expect("populate")
            .expect("order");

        let report = galaxy.step(1).expect("step");
        assert_eq!(report.migrations, 1);
        assert_eq!(galaxy.resolver().resolve(&mut ship), Resolution::Relocated);
        assert_eq!(ship.system, StarSystemId(1));

        galaxy.step(1).expect("step");
        let shadow = galaxy.system(StarSystemId(1)).expect("vega").read();
        assert_eq!(
            shadow.world().get::<Position>(ship.entity).copied(),
            Some(Position { x: 5.0, y: 0.0 })
        );
    }
}
