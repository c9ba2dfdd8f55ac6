//! Working set of pixels for one area, ranked by canopy load.
//!
//! The ledger is an ordinary vector that is re-sorted on a fixed cadence
//! rather than kept ordered; the resulting ranks feed the placement draws, so
//! the cadence is part of the reproducible output for a given seed.

use serde::{Deserialize, Serialize};

use crate::landscape::{PixelPos, TreeId};
use crate::rng::RngExt;
use crate::species::SpeciesId;

/// One 10 m pixel under initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightCell {
    pub pixel: PixelPos,
    /// Index of the owning resource unit in the landscape.
    pub resource_unit: usize,
    /// Grid index of the owning resource unit; selects the slot table.
    pub unit_grid_index: usize,
    /// Predefined maximum height, when a height raster is active.
    pub max_height: Option<f64>,
    basal_area: f64,
    locked_by: Option<SpeciesId>,
    residents: Vec<TreeId>,
}

impl HeightCell {
    pub fn new(
        pixel: PixelPos,
        resource_unit: usize,
        unit_grid_index: usize,
        max_height: Option<f64>,
    ) -> Self {
        Self {
            pixel,
            resource_unit,
            unit_grid_index,
            max_height,
            basal_area: 0.0,
            locked_by: None,
            residents: Vec::new(),
        }
    }

    /// Accumulated basal area (m²) of resident trees.
    pub fn basal_area(&self) -> f64 {
        self.basal_area
    }

    /// True when the pixel was claimed by a species other than `species`.
    pub fn is_locked_against(&self, species: SpeciesId) -> bool {
        matches!(self.locked_by, Some(owner) if owner != species)
    }

    /// Trees placed on this pixel, in placement order.
    pub fn residents(&self) -> &[TreeId] {
        &self.residents
    }
}

/// How often the ledger is re-sorted by basal area while trees are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResortCadence {
    pub early_limit: usize,
    pub early_interval: usize,
    pub middle_limit: usize,
    pub middle_interval: usize,
    pub late_interval: usize,
}

impl Default for ResortCadence {
    fn default() -> Self {
        Self {
            early_limit: 20,
            early_interval: 2,
            middle_limit: 100,
            middle_interval: 10,
            late_interval: 30,
        }
    }
}

impl ResortCadence {
    /// `placed_in_area` counts trees placed in the area so far (including the
    /// current one); `index_in_class` is the 0-based index within its class.
    pub fn is_due(&self, placed_in_area: usize, index_in_class: usize) -> bool {
        let every = |interval: usize| interval > 0 && index_in_class % interval == 0;
        (placed_in_area < self.early_limit && every(self.early_interval))
            || (placed_in_area < self.middle_limit && every(self.middle_interval))
            || every(self.late_interval)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeightCellLedger {
    cells: Vec<HeightCell>,
    placed: usize,
}

impl HeightCellLedger {
    pub fn new(cells: Vec<HeightCell>) -> Self {
        Self { cells, placed: 0 }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Trees placed in this area so far.
    pub fn placed(&self) -> usize {
        self.placed
    }

    pub fn cell(&self, rank: usize) -> &HeightCell {
        &self.cells[rank]
    }

    pub fn cells(&self) -> &[HeightCell] {
        &self.cells
    }

    /// Least loaded pixels first; ties keep their current order.
    pub fn sort_by_basal_area(&mut self) {
        self.cells
            .sort_by(|a, b| a.basal_area.total_cmp(&b.basal_area));
    }

    /// Gives every pixel a one-off random key (drawn in current rank order)
    /// and sorts by it.
    pub fn shuffle<R: RngExt + ?Sized>(&mut self, rng: &mut R) {
        let mut keyed: Vec<(f64, HeightCell)> = self
            .cells
            .drain(..)
            .map(|cell| (rng.probability(), cell))
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.cells = keyed.into_iter().map(|(_, cell)| cell).collect();
    }

    /// Unclaimed pixels before claimed ones; order is otherwise kept.
    pub fn sort_unlocked_first(&mut self) {
        self.cells.sort_by_key(|cell| cell.locked_by.is_some());
    }

    /// Best-ranked pixel not claimed by a species other than `species`.
    pub fn first_rank_open_to(&self, species: SpeciesId) -> Option<usize> {
        self.cells
            .iter()
            .position(|cell| !cell.is_locked_against(species))
    }

    /// Books a tree onto the pixel at `rank`; `claim` locks a pixel that is
    /// not yet claimed.
    pub fn record_tree(
        &mut self,
        rank: usize,
        tree: TreeId,
        basal_area: f64,
        claim: Option<SpeciesId>,
    ) {
        let cell = &mut self.cells[rank];
        cell.basal_area += basal_area;
        cell.residents.push(tree);
        if cell.locked_by.is_none() {
            cell.locked_by = claim;
        }
        self.placed += 1;
    }

    pub fn total_basal_area(&self) -> f64 {
        self.cells.iter().map(|cell| cell.basal_area).sum()
    }
}
