use std::collections::HashMap;
use std::time::Duration;

use stellar_engine::{
    Command, ConfigError, EmpireId, EntityReference, Galaxy, GalaxyBuilder, GalaxyConfig,
    GalaxyError, StarSystemId, TickContext, WorldError,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::scenario::{OrderSpec, Scenario, ScenarioError, SystemSpec};
use super::sim::commands::{Jump, LaunchProbe, MoveToEntity};
use super::sim::components::{Colony, Name, Orbit, Owner, Position, Ship};
use super::sim::galactic::Census;
use super::sim::{registry, star_system};

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Galaxy(#[from] GalaxyError),
    #[error("failed to populate {system}: {source}")]
    Populate {
        system: String,
        #[source]
        source: WorldError,
    },
    #[error("order names {0:?}, which was not spawned")]
    UnknownName(String),
    #[error("order names unknown star system {0:?}")]
    UnknownSystem(String),
}

pub(crate) struct AppWiring {
    pub(crate) galaxy: Galaxy,
    pub(crate) orders: Vec<(StarSystemId, Box<dyn Command>)>,
    pub(crate) run_for: Duration,
    pub(crate) report_interval: Duration,
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    init_tracing();
    info!("=== Stellar Galaxy Startup ===");

    let config = GalaxyConfig::from_env()?;
    let scenario = Scenario::from_env()?;
    wire(config, &scenario)
}

pub(crate) fn wire(config: GalaxyConfig, scenario: &Scenario) -> Result<AppWiring, BootstrapError> {
    let report_interval = config.metrics_log_interval();
    let mut builder = GalaxyBuilder::new(config, registry());
    let ids = scenario
        .systems
        .iter()
        .map(|system| builder.add_system(star_system(&system.name)))
        .collect::<Vec<_>>();
    builder.add_galactic_subsystem(Census::new());
    let galaxy = builder.build()?;

    let systems = scenario
        .systems
        .iter()
        .map(|spec| spec.name.clone())
        .zip(ids.iter().copied())
        .collect::<HashMap<_, _>>();
    let mut spawned = HashMap::new();
    for (id, spec) in ids.iter().zip(&scenario.systems) {
        let references = galaxy
            .populate(*id, |ctx| populate_system(ctx, spec))?
            .map_err(|source| BootstrapError::Populate {
                system: spec.name.clone(),
                source,
            })?;
        info!(
            system = %id,
            name = %spec.name,
            entities = references.len(),
            "star_system_populated"
        );
        spawned.extend(references);
    }

    let orders = scenario
        .orders
        .iter()
        .map(|order| build_order(order, &spawned, &systems))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AppWiring {
        galaxy,
        orders,
        run_for: Duration::from_secs(scenario.run_seconds),
        report_interval,
    })
}

fn populate_system(
    ctx: &mut TickContext<'_>,
    spec: &SystemSpec,
) -> Result<Vec<(String, EntityReference)>, WorldError> {
    let mut references = Vec::with_capacity(spec.bodies.len() + spec.ships.len());
    for body in &spec.bodies {
        let owner = body
            .colony
            .as_ref()
            .map_or(EmpireId(0), |colony| EmpireId(colony.empire));
        let reference = ctx.create_entity(owner)?;
        let orbit = Orbit {
            radius_km: body.orbit_radius_km,
            period_seconds: body.orbit_period_days * SECONDS_PER_DAY,
            phase_radians: body.phase_degrees.to_radians(),
        };
        ctx.world.insert(reference.entity, orbit.position_at(ctx.time()))?;
        ctx.world.insert(reference.entity, orbit)?;
        ctx.world.insert(reference.entity, Name(body.name.clone()))?;
        if let Some(colony) = &body.colony {
            ctx.world.insert(reference.entity, Owner(owner))?;
            ctx.world.insert(
                reference.entity,
                Colony {
                    population: colony.population,
                    growth_per_mille: colony.growth_per_mille,
                },
            )?;
        }
        references.push((body.name.clone(), reference));
    }

    for ship in &spec.ships {
        let empire = EmpireId(ship.empire);
        let reference = ctx.create_entity(empire)?;
        ctx.world.insert(reference.entity, Owner(empire))?;
        ctx.world.insert(
            reference.entity,
            Ship {
                empty_mass: ship.empty_mass,
                speed_km_s: ship.speed_km_s,
            },
        )?;
        ctx.world
            .insert(reference.entity, Position { x: ship.x, y: ship.y })?;
        ctx.world.insert(reference.entity, Name(ship.name.clone()))?;
        references.push((ship.name.clone(), reference));
    }
    Ok(references)
}

fn build_order(
    order: &OrderSpec,
    spawned: &HashMap<String, EntityReference>,
    systems: &HashMap<String, StarSystemId>,
) -> Result<(StarSystemId, Box<dyn Command>), BootstrapError> {
    let lookup = |name: &str| {
        spawned
            .get(name)
            .copied()
            .ok_or_else(|| BootstrapError::UnknownName(name.to_string()))
    };
    let (system, command): (StarSystemId, Box<dyn Command>) = match order {
        OrderSpec::Move { ship, target } => {
            let ship = lookup(ship)?;
            let target = lookup(target)?;
            (ship.system, Box::new(MoveToEntity { ship, target }))
        }
        OrderSpec::LaunchProbe {
            ship,
            lifetime_seconds,
        } => {
            let from = lookup(ship)?;
            let probe = LaunchProbe {
                from,
                lifetime_seconds: *lifetime_seconds,
            };
            (from.system, Box::new(probe))
        }
        OrderSpec::Jump { ship, system } => {
            let entity = lookup(ship)?;
            let target = systems
                .get(system)
                .copied()
                .ok_or_else(|| BootstrapError::UnknownSystem(system.clone()))?;
            (entity.system, Box::new(Jump { entity, target }))
        }
    };
    Ok((system, command))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use stellar_engine::GalaxyState;

    use super::*;
    use crate::app::sim::components::MoveTarget;

    const SCENARIO: &str = r#"{
        "systems": [
            {
                "name": "sol",
                "bodies": [ { "name": "terra", "orbit_radius_km": 1000.0, "orbit_period_days": 1.0,
                              "colony": { "empire": 1, "population": 10 } } ],
                "ships": [ { "name": "scout", "empire": 1, "empty_mass": 5, "speed_km_s": 1,
                             "x": 0.0, "y": 0.0 } ]
            },
            { "name": "vega", "bodies": [ { "name": "vega b", "orbit_radius_km": 10.0, "orbit_period_days": 2.0 } ] }
        ],
        "orders": [ { "kind": "move", "ship": "scout", "target": "terra" } ]
    }"#;

    fn config() -> GalaxyConfig {
        GalaxyConfig {
            worker_threads: 1,
            ..GalaxyConfig::default()
        }
    }

    #[test]
    fn wiring_populates_every_system_and_resolves_orders() {
        let scenario = Scenario::parse(SCENARIO).expect("scenario");
        let app = wire(config(), &scenario).expect("wire");

        assert_eq!(app.galaxy.systems().len(), 2);
        assert_eq!(app.orders.len(), 1);
        let sol = app.galaxy.system(StarSystemId(0)).expect("sol");
        {
            let shadow = sol.read();
            assert_eq!(shadow.world().entity_count(), 2);
            assert_eq!(shadow.world().derived().owners.ship_count(EmpireId(1)), 1);
        }

        for (system, command) in app.orders {
            app.galaxy.submit(system, command).expect("submit");
        }
        app.galaxy.step(1).expect("step");
        let shadow = sol.read();
        assert_eq!(shadow.world().iter::<MoveTarget>().count(), 1);
        assert_eq!(app.galaxy.state(), GalaxyState::Running);
    }

    #[test]
    fn bodies_start_on_their_orbit() {
        let scenario = Scenario::parse(SCENARIO).expect("scenario");
        let app = wire(config(), &scenario).expect("wire");
        let vega = app.galaxy.system(StarSystemId(1)).expect("vega");
        let shadow = vega.read();
        let positions = shadow
            .world()
            .iter::<Position>()
            .map(|(_, position)| *position)
            .collect::<Vec<_>>();
        assert_eq!(positions, vec![Position { x: 10.0, y: 0.0 }]);
    }
}
