use std::collections::BTreeMap;

use stellar_engine::{DailyGate, EmpireId, GalacticContext, GalacticSubsystem, SubsystemError};
use tracing::info;

use super::components::Colony;

/// Daily galaxy-wide tally of ships per empire and total population, read
/// from the published shadows.
pub(crate) struct Census {
    gate: DailyGate,
    last: CensusReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CensusReport {
    pub(crate) day: u64,
    pub(crate) ships: BTreeMap<EmpireId, usize>,
    pub(crate) population: u64,
}

impl Census {
    pub(crate) fn new() -> Self {
        Self {
            gate: DailyGate::new(),
            last: CensusReport::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn last(&self) -> &CensusReport {
        &self.last
    }

    fn tally(ctx: &GalacticContext<'_>) -> CensusReport {
        let mut report = CensusReport {
            day: ctx.day(),
            ..CensusReport::default()
        };
        for system in ctx.systems {
            let shadow = system.read();
            let owners = &shadow.world().derived().owners;
            for empire in owners.empires() {
                *report.ships.entry(empire).or_default() += owners.ship_count(empire);
            }
            report.population += shadow
                .world()
                .iter::<Colony>()
                .map(|(_, colony)| colony.population)
                .sum::<u64>();
        }
        report
    }
}

impl GalacticSubsystem for Census {
    fn name(&self) -> &'static str {
        "census"
    }

    fn process(&mut self, ctx: &GalacticContext<'_>) -> Result<(), SubsystemError> {
        if !self.gate.check(ctx.day()) {
            return Ok(());
        }
        self.last = Self::tally(ctx);
        info!(
            day = self.last.day,
            empires = self.last.ships.len(),
            ships = self.last.ships.values().sum::<usize>(),
            population = self.last.population,
            "galaxy_census"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use stellar_engine::{
        GalaxyBuilder, GalaxyConfig, IdentityResolver, StarSystemBuilder, StarSystemId,
        WorldError,
    };

    use super::*;
    use crate::app::sim::components::{Owner, Ship};
    use crate::app::sim::registry;
    use crate::app::sim::subsystems::ShipRegistry;

    #[test]
    fn census_counts_ships_and_population_across_systems() {
        let mut builder = GalaxyBuilder::new(
            GalaxyConfig {
                worker_threads: 1,
                ..GalaxyConfig::default()
            },
            registry(),
        );
        builder.add_system(StarSystemBuilder::new("sol").with_subsystem(ShipRegistry::new()));
        builder.add_system(StarSystemBuilder::new("vega").with_subsystem(ShipRegistry::new()));
        let galaxy = builder.build().expect("galaxy");

        for (system, empire) in [(0, 1), (1, 1), (1, 2)] {
            galaxy
                .populate(StarSystemId(system), |ctx| {
                    let reference = ctx.create_entity(EmpireId(empire))?;
                    ctx.world.insert(reference.entity, Owner(EmpireId(empire)))?;
                    ctx.world.insert(
                        reference.entity,
                        Ship {
                            empty_mass: 10,
                            speed_km_s: 1,
                        },
                    )?;
                    ctx.world.insert(
                        reference.entity,
                        Colony {
                            population: 100,
                            growth_per_mille: 0,
                        },
                    )?;
                    Ok::<_, WorldError>(())
                })
                .expect("populate")
                .expect("spawn");
        }

        let mut census = Census::new();
        let systems = galaxy.systems();
        let resolver: &IdentityResolver = galaxy.resolver();
        let ctx = GalacticContext {
            time: 90_000,
            tick_size: 1,
            resolver,
            systems,
        };
        census.process(&ctx).expect("census");

        assert_eq!(census.last().day, 1);
        assert_eq!(census.last().ships.get(&EmpireId(1)), Some(&2));
        assert_eq!(census.last().ships.get(&EmpireId(2)), Some(&1));
        assert_eq!(census.last().population, 300);
    }
}
