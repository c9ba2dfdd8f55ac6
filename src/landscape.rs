//! Landscape geometry and the per-resource-unit tree lists that receive
//! initialized trees.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grid::{Grid, GridPos};
use crate::species::SpeciesId;

pub const RESOURCE_UNIT_AREA_M2: f64 = 10_000.0;
pub const PIXEL_SIZE_M: f64 = 10.0;
pub const PIXEL_AREA_M2: f64 = PIXEL_SIZE_M * PIXEL_SIZE_M;
/// Pixels (10 m height cells) along one side of a resource unit.
pub const PIXELS_PER_UNIT_WIDTH: u32 = 10;
/// Light cells (2 m) along one side of a pixel.
pub const LIGHT_CELLS_PER_PIXEL_WIDTH: u32 = 5;
pub const SLOTS_PER_PIXEL: usize = 25;

/// Position of a 10 m pixel in landscape pixel coordinates.
pub type PixelPos = GridPos;
/// Position of a 2 m light cell in landscape light-grid coordinates.
pub type LightCellPos = GridPos;

/// Stand a tree or size class belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandKey {
    Default,
    Id(i32),
}

impl fmt::Display for StandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StandKey::Default => write!(f, "default"),
            StandKey::Id(id) => write!(f, "{id}"),
        }
    }
}

/// Basal area in m² of a stem with the given dbh in cm.
pub fn basal_area(dbh_cm: f64) -> f64 {
    let radius_m = dbh_cm / 200.0;
    PI * radius_m * radius_m
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeId {
    pub resource_unit: usize,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub tag: u64,
    pub species: SpeciesId,
    pub dbh: f64,
    pub height: f64,
    pub age: u32,
    pub stand: StandKey,
    pub resource_unit: usize,
    pub pixel: PixelPos,
    pub slot: Option<u8>,
    pub light_cell: Option<LightCellPos>,
}

impl Tree {
    pub fn basal_area(&self) -> f64 {
        basal_area(self.dbh)
    }
}

/// Attributes of a tree about to be created; the landscape assigns the tag.
#[derive(Debug, Clone, Copy)]
pub struct NewTree {
    pub species: SpeciesId,
    pub dbh: f64,
    pub height: f64,
    pub age: u32,
    pub stand: StandKey,
    pub pixel: PixelPos,
}

#[derive(Debug, Clone)]
pub struct ResourceUnit {
    grid_index: usize,
    position: GridPos,
    trees: Vec<Tree>,
}

impl ResourceUnit {
    /// Linear index of the unit in the resource unit grid.
    pub fn grid_index(&self) -> usize {
        self.grid_index
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// The unit's pixels, ordered column by column (x-major).
    pub fn pixels(&self) -> Vec<PixelPos> {
        let origin_x = self.position.x * PIXELS_PER_UNIT_WIDTH;
        let origin_y = self.position.y * PIXELS_PER_UNIT_WIDTH;
        let count = PIXELS_PER_UNIT_WIDTH * PIXELS_PER_UNIT_WIDTH;
        (0..count)
            .map(|i| {
                GridPos::new(
                    origin_x + i / PIXELS_PER_UNIT_WIDTH,
                    origin_y + i % PIXELS_PER_UNIT_WIDTH,
                )
            })
            .collect()
    }
}

pub struct Landscape {
    next_tag: u64,
    unit_grid: Grid<Option<usize>>,
    units: Vec<ResourceUnit>,
}

impl Landscape {
    /// A rectangular landscape fully covered by resource units.
    pub fn new(width: u32, height: u32) -> Self {
        Self::from_mask(&Grid::filled(width, height, true))
    }

    /// A landscape with resource units wherever the mask is set.
    pub fn from_mask(mask: &Grid<bool>) -> Self {
        let mut unit_grid = Grid::filled(mask.width(), mask.height(), None);
        let mut units = Vec::new();
        for (position, present) in mask.iter() {
            if !*present {
                continue;
            }
            let grid_index = mask.index_of(position).unwrap_or_default();
            if let Some(slot) = unit_grid.get_mut(position) {
                *slot = Some(units.len());
            }
            units.push(ResourceUnit {
                grid_index,
                position,
                trees: Vec::new(),
            });
        }
        Self {
            next_tag: 1,
            unit_grid,
            units,
        }
    }

    pub fn resource_unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn resource_units(&self) -> &[ResourceUnit] {
        &self.units
    }

    pub fn resource_unit(&self, index: usize) -> Option<&ResourceUnit> {
        self.units.get(index)
    }

    /// Index of the resource unit covering a pixel.
    pub fn resource_unit_at(&self, pixel: PixelPos) -> Option<usize> {
        let unit_pos = GridPos::new(
            pixel.x / PIXELS_PER_UNIT_WIDTH,
            pixel.y / PIXELS_PER_UNIT_WIDTH,
        );
        self.unit_grid.get(unit_pos).copied().flatten()
    }

    pub fn contains_light_cell(&self, cell: LightCellPos) -> bool {
        let pixel = GridPos::new(
            cell.x / LIGHT_CELLS_PER_PIXEL_WIDTH,
            cell.y / LIGHT_CELLS_PER_PIXEL_WIDTH,
        );
        self.resource_unit_at(pixel).is_some()
    }

    pub fn spawn_tree(&mut self, resource_unit: usize, tree: NewTree) -> Option<TreeId> {
        let tag = self.next_tag;
        let unit = self.units.get_mut(resource_unit)?;
        unit.trees.push(Tree {
            tag,
            species: tree.species,
            dbh: tree.dbh,
            height: tree.height,
            age: tree.age,
            stand: tree.stand,
            resource_unit,
            pixel: tree.pixel,
            slot: None,
            light_cell: None,
        });
        self.next_tag += 1;
        Some(TreeId {
            resource_unit,
            index: unit.trees.len() - 1,
        })
    }

    pub fn tree(&self, id: TreeId) -> Option<&Tree> {
        self.units.get(id.resource_unit)?.trees.get(id.index)
    }

    pub fn tree_mut(&mut self, id: TreeId) -> Option<&mut Tree> {
        self.units.get_mut(id.resource_unit)?.trees.get_mut(id.index)
    }

    pub fn trees(&self) -> impl Iterator<Item = &Tree> + '_ {
        self.units.iter().flat_map(|unit| unit.trees.iter())
    }

    pub fn total_trees(&self) -> usize {
        self.units.iter().map(|unit| unit.trees.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tree(pixel: PixelPos) -> NewTree {
        NewTree {
            species: SpeciesId(0),
            dbh: 20.0,
            height: 16.0,
            age: 40,
            stand: StandKey::Default,
            pixel,
        }
    }

    #[test]
    fn basal_area_of_one_metre_stem() {
        assert!((basal_area(200.0) - PI).abs() < 1e-12);
    }

    #[test]
    fn unit_pixels_are_x_major() {
        let landscape = Landscape::new(2, 1);
        let pixels = landscape.resource_unit(1).unwrap().pixels();
        assert_eq!(pixels.len(), 100);
        assert_eq!(pixels[0], GridPos::new(10, 0));
        assert_eq!(pixels[1], GridPos::new(10, 1));
        assert_eq!(pixels[10], GridPos::new(11, 0));
    }

    #[test]
    fn masked_units_are_absent() {
        let mask = Grid::from_cells(2, 1, vec![true, false]).unwrap();
        let landscape = Landscape::from_mask(&mask);
        assert_eq!(landscape.resource_unit_count(), 1);
        assert_eq!(landscape.resource_unit_at(GridPos::new(5, 5)), Some(0));
        assert_eq!(landscape.resource_unit_at(GridPos::new(15, 5)), None);
        assert!(landscape.contains_light_cell(GridPos::new(49, 49)));
        assert!(!landscape.contains_light_cell(GridPos::new(50, 0)));
    }

    #[test]
    fn spawned_trees_get_increasing_tags() {
        let mut landscape = Landscape::new(1, 1);
        let a = landscape.spawn_tree(0, new_tree(GridPos::new(0, 0))).unwrap();
        let b = landscape.spawn_tree(0, new_tree(GridPos::new(1, 0))).unwrap();
        assert_eq!(landscape.tree(a).unwrap().tag, 1);
        assert_eq!(landscape.tree(b).unwrap().tag, 2);
        assert!(landscape.spawn_tree(3, new_tree(GridPos::new(0, 0))).is_none());
        assert_eq!(landscape.total_trees(), 2);
    }
}
