use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub(crate) const SCENARIO_ENV_VAR: &str = "STELLAR_SCENARIO";

const DEFAULT_SCENARIO: &str = include_str!("../../assets/default_scenario.json");

#[derive(Debug, Error)]
pub(crate) enum ScenarioError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to read scenario at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse scenario json at {path}: {message}")]
    Parse { path: String, message: String },
    #[error("validation failed at {path}: {message}")]
    Invalid { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    #[serde(default = "default_run_seconds")]
    pub(crate) run_seconds: u64,
    pub(crate) systems: Vec<SystemSpec>,
    #[serde(default)]
    pub(crate) orders: Vec<OrderSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SystemSpec {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) bodies: Vec<BodySpec>,
    #[serde(default)]
    pub(crate) ships: Vec<ShipSpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BodySpec {
    pub(crate) name: String,
    pub(crate) orbit_radius_km: f64,
    pub(crate) orbit_period_days: f64,
    #[serde(default)]
    pub(crate) phase_degrees: f64,
    #[serde(default)]
    pub(crate) colony: Option<ColonySpec>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ColonySpec {
    pub(crate) empire: u32,
    pub(crate) population: u64,
    #[serde(default)]
    pub(crate) growth_per_mille: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ShipSpec {
    pub(crate) name: String,
    pub(crate) empire: u32,
    pub(crate) empty_mass: u64,
    pub(crate) speed_km_s: u32,
    pub(crate) x: f64,
    pub(crate) y: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum OrderSpec {
    Move { ship: String, target: String },
    LaunchProbe { ship: String, lifetime_seconds: u64 },
    Jump { ship: String, system: String },
}

fn default_run_seconds() -> u64 {
    10
}

impl Scenario {
    /// Reads the file named by `STELLAR_SCENARIO`, or the bundled scenario.
    pub(crate) fn from_env() -> Result<Self, ScenarioError> {
        match env::var(SCENARIO_ENV_VAR) {
            Ok(path) => Self::load(Path::new(&path)),
            Err(env::VarError::NotPresent) => Self::parse(DEFAULT_SCENARIO),
            Err(source) => Err(ScenarioError::EnvVar {
                var: SCENARIO_ENV_VAR,
                source,
            }),
        }
    }

    pub(crate) fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub(crate) fn parse(raw: &str) -> Result<Self, ScenarioError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        let scenario = match serde_path_to_error::deserialize::<_, Scenario>(&mut deserializer) {
            Ok(scenario) => scenario,
            Err(error) => {
                let path = error.path().to_string();
                let message = error.into_inner().to_string();
                return Err(ScenarioError::Parse { path, message });
            }
        };
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        if self.systems.is_empty() {
            return Err(invalid("systems", "at least one star system is required"));
        }

        let mut names = HashSet::new();
        let mut ships = HashSet::new();
        let mut systems = HashSet::new();
        for (system_index, system) in self.systems.iter().enumerate() {
            if !systems.insert(system.name.as_str()) {
                return Err(invalid(
                    &format!("systems[{system_index}]"),
                    format!("duplicate system {:?}", system.name),
                ));
            }
            for (index, body) in system.bodies.iter().enumerate() {
                let path = format!("systems[{system_index}].bodies[{index}]");
                if !names.insert(body.name.as_str()) {
                    return Err(invalid(&path, format!("duplicate name {:?}", body.name)));
                }
                if body.orbit_period_days <= 0.0 {
                    return Err(invalid(&path, "orbit_period_days must be positive"));
                }
            }
            for (index, ship) in system.ships.iter().enumerate() {
                let path = format!("systems[{system_index}].ships[{index}]");
                if !names.insert(ship.name.as_str()) {
                    return Err(invalid(&path, format!("duplicate name {:?}", ship.name)));
                }
                ships.insert(ship.name.as_str());
            }
        }

        for (index, order) in self.orders.iter().enumerate() {
            let path = format!("orders[{index}]");
            let ship = match order {
                OrderSpec::Move { ship, target } => {
                    if !names.contains(target.as_str()) {
                        return Err(invalid(&path, format!("unknown target {target:?}")));
                    }
                    ship
                }
                OrderSpec::LaunchProbe { ship, .. } => ship,
                OrderSpec::Jump { ship, system } => {
                    if !systems.contains(system.as_str()) {
                        return Err(invalid(&path, format!("unknown system {system:?}")));
                    }
                    ship
                }
            };
            if !ships.contains(ship.as_str()) {
                return Err(invalid(&path, format!("unknown ship {ship:?}")));
            }
        }
        Ok(())
    }
}

fn invalid(path: &str, message: impl Into<String>) -> ScenarioError {
    ScenarioError::Invalid {
        path: path.to_string(),
        message: message.into(),
    }
}
