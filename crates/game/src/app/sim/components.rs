use stellar_engine::{EmpireId, EntityReference, MirrorComponent};

/// Position in kilometres relative to the star.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Position {
    pub(crate) x: f64,
    pub(crate) y: f64,
}

impl Position {
    pub(crate) fn distance_to(self, other: Position) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    pub(crate) fn grid_coords(self) -> (i64, i64) {
        (self.x.round() as i64, self.y.round() as i64)
    }
}

impl MirrorComponent for Position {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Orbit {
    pub(crate) radius_km: f64,
    pub(crate) period_seconds: f64,
    pub(crate) phase_radians: f64,
}

impl Orbit {
    pub(crate) fn position_at(&self, time: u64) -> Position {
        let turns = time as f64 / self.period_seconds;
        let angle = self.phase_radians + std::f64::consts::TAU * turns;
        Position {
            x: self.radius_km * angle.cos(),
            y: self.radius_km * angle.sin(),
        }
    }
}

impl MirrorComponent for Orbit {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Name(pub(crate) String);

impl MirrorComponent for Name {
    fn copy_into(&self, target: &mut Self) {
        target.0.clone_from(&self.0);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Owner(pub(crate) EmpireId);

impl MirrorComponent for Owner {}

/// Ships are indexed per owner by empty mass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ship {
    pub(crate) empty_mass: u64,
    pub(crate) speed_km_s: u32,
}

impl MirrorComponent for Ship {}

/// Despawns the entity once `remaining_seconds` runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimedLife {
    pub(crate) remaining_seconds: u64,
}

impl MirrorComponent for TimedLife {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Colony {
    pub(crate) population: u64,
    pub(crate) growth_per_mille: u64,
}

impl MirrorComponent for Colony {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MoveTarget(pub(crate) EntityReference);

impl MirrorComponent for MoveTarget {}
