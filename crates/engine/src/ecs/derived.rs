use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use tracing::warn;

use super::component::EntityId;
use crate::identity::EmpireId;

/// Order-independent digest contribution of one index entry.
fn entry_hash<T: Hash>(entry: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    entry.hash(&mut hasher);
    hasher.finish()
}

/// Ships grouped by owning empire, ordered by a caller-chosen sort key
/// (mass in the demo scenario).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerIndex {
    ships: BTreeMap<EmpireId, BTreeMap<u64, Vec<EntityId>>>,
    hash: u64,
}

impl OwnerIndex {
    pub fn register(&mut self, empire: EmpireId, sort_key: u64, entity: EntityId) {
        let bucket = self
            .ships
            .entry(empire)
            .or_default()
            .entry(sort_key)
            .or_default();
        if bucket.contains(&entity) {
            warn!(
                empire = empire.0,
                entity = entity.0,
                sort_key,
                "owner_index_duplicate_register"
            );
            return;
        }
        bucket.push(entity);
        self.hash = self
            .hash
            .wrapping_add(entry_hash(&(empire, sort_key, entity)));
    }

    /// Returns false when the entity was not registered under that key.
    pub fn unregister(&mut self, empire: EmpireId, sort_key: u64, entity: EntityId) -> bool {
        let Some(by_key) = self.ships.get_mut(&empire) else {
            warn!(empire = empire.0, entity = entity.0, "owner_index_unknown_empire");
            return false;
        };
        let Some(bucket) = by_key.get_mut(&sort_key) else {
            warn!(
                empire = empire.0,
                entity = entity.0,
                sort_key,
                "owner_index_unknown_sort_key"
            );
            return false;
        };
        let Some(position) = bucket.iter().position(|candidate| *candidate == entity) else {
            warn!(
                empire = empire.0,
                entity = entity.0,
                sort_key,
                "owner_index_entity_missing"
            );
            return false;
        };

        bucket.swap_remove(position);
        if bucket.is_empty() {
            by_key.remove(&sort_key);
        }
        if by_key.is_empty() {
            self.ships.remove(&empire);
        }
        self.hash = self
            .hash
            .wrapping_sub(entry_hash(&(empire, sort_key, entity)));
        true
    }

    /// Entities of one empire, ascending by sort key.
    pub fn ships_of(&self, empire: EmpireId) -> impl Iterator<Item = EntityId> + '_ {
        self.ships
            .get(&empire)
            .into_iter()
            .flat_map(|by_key| by_key.values().flatten().copied())
    }

    pub fn ship_count(&self, empire: EmpireId) -> usize {
        self.ships
            .get(&empire)
            .map(|by_key| by_key.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn empires(&self) -> impl Iterator<Item = EmpireId> + '_ {
        self.ships.keys().copied()
    }

    pub fn structural_hash(&self) -> u64 {
        self.hash
    }
}

pub const DEFAULT_CELL_SIZE: i64 = 1_000_000;

/// Uniform grid bucketing entity positions, rebuilt by a post-processing
/// subsystem each pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialGrid {
    cell_size: i64,
    cells: BTreeMap<(i64, i64), Vec<EntityId>>,
    hash: u64,
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl SpatialGrid {
    pub fn new(cell_size: i64) -> Self {
        Self {
            cell_size: cell_size.max(1),
            cells: BTreeMap::new(),
            hash: 0,
        }
    }

    pub fn cell_size(&self) -> i64 {
        self.cell_size
    }

    pub fn cell_of(&self, x: i64, y: i64) -> (i64, i64) {
        (x.div_euclid(self.cell_size), y.div_euclid(self.cell_size))
    }

    pub fn insert(&mut self, entity: EntityId, x: i64, y: i64) {
        let cell = self.cell_of(x, y);
        self.cells.entry(cell).or_default().push(entity);
        self.hash = self.hash.wrapping_add(entry_hash(&(cell, entity)));
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.hash = 0;
    }

    pub fn entities_in_cell(&self, cell: (i64, i64)) -> &[EntityId] {
        self.cells.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entities in every cell overlapping the square of `radius` around the point.
    pub fn entities_near(&self, x: i64, y: i64, radius: i64, out: &mut Vec<EntityId>) {
        out.clear();
        let (min_x, min_y) = self.cell_of(x.saturating_sub(radius), y.saturating_sub(radius));
        let (max_x, max_y) = self.cell_of(x.saturating_add(radius), y.saturating_add(radius));
        for (_, entities) in self
            .cells
            .range((min_x, min_y)..=(max_x, max_y))
            .filter(|((cell_x, cell_y), _)| {
                (min_x..=max_x).contains(cell_x) && (min_y..=max_y).contains(cell_y)
            })
        {
            out.extend_from_slice(entities);
        }
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn structural_hash(&self) -> u64 {
        self.hash
    }
}

/// Secondary indexes kept beside a world's component storage.
#[derive(Debug, Clone, Default)]
pub struct DerivedState {
    pub owners: OwnerIndex,
    pub spatial: SpatialGrid,
}

/// Which derived indexes a mirror pass copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedMirror {
    pub owners: bool,
    pub spatial: bool,
}

impl DerivedState {
    /// Copies each index whose structural hash differs from the target's.
    pub fn mirror_into(&self, target: &mut DerivedState) -> DerivedMirror {
        let mut mirrored = DerivedMirror::default();
        if self.owners.structural_hash() != target.owners.structural_hash() {
            target.owners.clone_from(&self.owners);
            mirrored.owners = true;
        }
        if self.spatial.structural_hash() != target.spatial.structural_hash()
            || self.spatial.cell_size != target.spatial.cell_size
        {
            target.spatial.clone_from(&self.spatial);
            mirrored.spatial = true;
        }
        mirrored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_index_orders_by_key_and_restores_hash_after_unregister() {
        let mut index = OwnerIndex::default();
        let empty_hash = index.structural_hash();

        index.register(EmpireId(1), 500, EntityId(3));
        index.register(EmpireId(1), 100, EntityId(7));
        index.register(EmpireId(2), 50, EntityId(9));

        assert_eq!(
            index.ships_of(EmpireId(1)).collect::<Vec<_>>(),
            vec![EntityId(7), EntityId(3)]
        );
        assert_eq!(index.ship_count(EmpireId(2)), 1);

        assert!(index.unregister(EmpireId(1), 500, EntityId(3)));
        assert!(index.unregister(EmpireId(1), 100, EntityId(7)));
        assert!(index.unregister(EmpireId(2), 50, EntityId(9)));
        assert_eq!(index.structural_hash(), empty_hash);
        assert_eq!(index.empires().count(), 0);
    }

    #[test]
    fn owner_index_rejects_unknown_unregister() {
        let mut index = OwnerIndex::default();
        index.register(EmpireId(1), 10, EntityId(1));
        assert!(!index.unregister(EmpireId(4), 10, EntityId(1)));
        assert!(!index.unregister(EmpireId(1), 11, EntityId(1)));
        assert!(!index.unregister(EmpireId(1), 10, EntityId(2)));
        assert_eq!(index.ship_count(EmpireId(1)), 1);
    }

    #[test]
    fn grid_buckets_negative_coordinates_with_floor_division() {
        let mut grid = SpatialGrid::new(10);
        grid.insert(EntityId(1), -1, 5);
        grid.insert(EntityId(2), 9, 9);
        grid.insert(EntityId(3), 25, 25);

        assert_eq!(grid.entities_in_cell((-1, 0)), &[EntityId(1)]);
        assert_eq!(grid.entities_in_cell((0, 0)), &[EntityId(2)]);

        let mut near = Vec::new();
        grid.entities_near(0, 0, 5, &mut near);
        near.sort();
        assert_eq!(near, vec![EntityId(1), EntityId(2)]);
    }

    #[test]
    fn mirror_skips_unchanged_indexes() {
        let mut live = DerivedState::default();
        let mut shadow = DerivedState::default();

        assert_eq!(live.mirror_into(&mut shadow), DerivedMirror::default());

        live.owners.register(EmpireId(3), 1, EntityId(4));
        let first = live.mirror_into(&mut shadow);
        assert!(first.owners);
        assert!(!first.spatial);
        assert_eq!(shadow.owners.ship_count(EmpireId(3)), 1);

        assert_eq!(live.mirror_into(&mut shadow), DerivedMirror::default());
    }
}
