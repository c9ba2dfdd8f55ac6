//! Per-tree placement: pixel selection against the ledger, optional height
//! fitting and species locks, then fine slot assignment within each pixel.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::SizeClassRow;
use crate::curve::ResponseCurve;
use crate::error::InitError;
use crate::grid::GridPos;
use crate::landscape::{
    basal_area, Landscape, LightCellPos, NewTree, PixelPos, StandKey,
    LIGHT_CELLS_PER_PIXEL_WIDTH, SLOTS_PER_PIXEL,
};
use crate::ledger::{HeightCell, HeightCellLedger, ResortCadence};
use crate::rng::RngExt;
use crate::sampler::PlacementSampler;
use crate::species::SpeciesId;

/// Order in which the 5x5 light cells of a pixel are handed out, indexed by
/// the parity of the resource unit's grid index. Odd units start at the
/// pixel centre (cell 12); even units use a shifted order so neighbouring
/// units do not repeat the same pattern.
pub const SLOT_ORDER: [[u8; SLOTS_PER_PIXEL]; 2] = [
    [
        11, 13, 7, 17, 1, 19, 5, 21, 9, 23, 3, 15, 6, 18, 2, 10, 4, 24, 12, 0, 8, 14, 20, 22, 16,
    ],
    [
        12, 6, 18, 16, 8, 22, 2, 10, 14, 0, 24, 20, 4, 1, 13, 15, 19, 21, 3, 7, 11, 17, 23, 5, 9,
    ],
];

/// Light cell offset (0..25, x-major within the pixel) for a slot index.
pub fn slot_offset(unit_grid_index: usize, slot: usize) -> u8 {
    SLOT_ORDER[unit_grid_index % 2][slot]
}

pub fn light_cell_for(pixel: PixelPos, offset: u8) -> LightCellPos {
    let offset = u32::from(offset);
    GridPos::new(
        pixel.x * LIGHT_CELLS_PER_PIXEL_WIDTH + offset / LIGHT_CELLS_PER_PIXEL_WIDTH,
        pixel.y * LIGHT_CELLS_PER_PIXEL_WIDTH + offset % LIGHT_CELLS_PER_PIXEL_WIDTH,
    )
}

/// Hand-tuned placement constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementTuning {
    pub cadence: ResortCadence,
    /// Pixel draws per tree while fitting heights or avoiding claimed pixels:
    /// a tree gets exactly `max_tries` draws (at least one) before the last
    /// candidate is kept.
    pub max_tries: usize,
    /// Draws spent searching a free slot before giving up.
    pub slot_search_draws: usize,
    /// Pixels with more residents get slots round-robin.
    pub crowded_pixel_threshold: usize,
}

impl Default for PlacementTuning {
    fn default() -> Self {
        Self {
            cadence: ResortCadence::default(),
            max_tries: 10,
            slot_search_draws: 1000,
            crowded_pixel_threshold: 18,
        }
    }
}

/// Pixels to fill and the size of the area in resource units.
#[derive(Debug, Clone)]
pub struct AllocationArea {
    pub stand: StandKey,
    pub cells: Vec<HeightCell>,
    pub area_scale: f64,
}

/// Final load of one occupied pixel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PixelLoad {
    pub pixel: PixelPos,
    pub basal_area: f64,
    pub trees: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationReport {
    pub stand: StandKey,
    pub pixels: usize,
    pub trees_created: usize,
    /// Pixel draws over all trees.
    pub tries: usize,
    /// Trees placed after the retry budget ran out.
    pub misses: usize,
    /// Trees that had to share a pixel claimed by another species.
    pub lock_conflicts: usize,
    /// Trees placed on an occupied slot after the slot search ran out.
    pub slot_search_exhausted: usize,
    pub pixel_loads: Vec<PixelLoad>,
}

impl AllocationReport {
    fn new(stand: StandKey, pixels: usize) -> Self {
        Self {
            stand,
            pixels,
            trees_created: 0,
            tries: 0,
            misses: 0,
            lock_conflicts: 0,
            slot_search_exhausted: 0,
            pixel_loads: Vec::new(),
        }
    }
}

pub struct SpatialAllocator<'a> {
    sampler: &'a PlacementSampler,
    height_fit: Option<&'a dyn ResponseCurve>,
    tuning: PlacementTuning,
    reference_height: f64,
}

impl<'a> SpatialAllocator<'a> {
    /// `reference_height` anchors the linear height/age relation used for
    /// classes without an explicit age.
    pub fn new(sampler: &'a PlacementSampler, tuning: PlacementTuning, reference_height: f64) -> Self {
        Self {
            sampler,
            height_fit: None,
            tuning,
            reference_height,
        }
    }

    /// Accept pixels with a probability given by `curve` applied to the
    /// ratio of class height to the pixel's predefined height.
    pub fn with_height_fit(mut self, curve: &'a dyn ResponseCurve) -> Self {
        self.height_fit = Some(curve);
        self
    }

    pub fn populate<R: RngExt + ?Sized>(
        &self,
        area: AllocationArea,
        classes: &[SizeClassRow],
        landscape: &mut Landscape,
        rng: &mut R,
    ) -> Result<AllocationReport, InitError> {
        let stand = area.stand;
        let mut ledger = HeightCellLedger::new(area.cells);
        let mut report = AllocationReport::new(stand, ledger.len());
        if ledger.is_empty() {
            return Ok(report);
        }

        let mut claimant: Option<SpeciesId> = None;
        for class in classes {
            if class.claims_area() {
                if ledger.placed() == 0 {
                    ledger.shuffle(rng);
                }
                if claimant != Some(class.species) {
                    claimant = Some(class.species);
                    ledger.sort_unlocked_first();
                }
            } else {
                ledger.sort_by_basal_area();
                claimant = None;
            }

            for index in 0..class.target_count(area.area_scale) {
                let rank = self.choose_rank(&ledger, class, claimant, rng, &mut report);
                let dbh = rng.uniform(class.dbh_from, class.dbh_to);
                let height = class.height_for(dbh);
                let cell = ledger.cell(rank);
                let tree = NewTree {
                    species: class.species,
                    dbh,
                    height,
                    age: class.age_for(height, self.reference_height),
                    stand,
                    pixel: cell.pixel,
                };
                let id = landscape.spawn_tree(cell.resource_unit, tree).ok_or(
                    InitError::PixelWithoutResourceUnit {
                        stand,
                        pixel: cell.pixel,
                    },
                )?;
                ledger.record_tree(rank, id, basal_area(dbh), claimant);
                report.trees_created += 1;

                if claimant.is_none() && self.tuning.cadence.is_due(ledger.placed(), index) {
                    ledger.sort_by_basal_area();
                }
            }
        }

        self.assign_slots(&ledger, landscape, rng, &mut report)?;
        report.pixel_loads = ledger
            .cells()
            .iter()
            .filter(|cell| !cell.residents().is_empty())
            .map(|cell| PixelLoad {
                pixel: cell.pixel,
                basal_area: cell.basal_area(),
                trees: cell.residents().len(),
            })
            .collect();

        debug!(
            stand = %stand,
            pixels = report.pixels,
            trees = report.trees_created,
            tries = report.tries,
            misses = report.misses,
            "area populated"
        );
        Ok(report)
    }

    /// Draws pixel ranks until one is accepted or the retry budget is spent.
    fn choose_rank<R: RngExt + ?Sized>(
        &self,
        ledger: &HeightCellLedger,
        class: &SizeClassRow,
        claimant: Option<SpeciesId>,
        rng: &mut R,
        report: &mut AllocationReport,
    ) -> usize {
        let pixel_count = ledger.len();
        let class_height = class.max_height();
        let mut rank = 0;
        for _ in 0..self.tuning.max_tries.max(1) {
            let fraction = self.sampler.draw(class.density, rng);
            report.tries += 1;
            rank = ((pixel_count as f64 * fraction).floor().max(0.0) as usize).min(pixel_count - 1);

            let cell = ledger.cell(rank);
            let mut accepted = match self.height_fit {
                Some(curve) => {
                    let fit = match cell.max_height {
                        Some(max_height) if max_height > 0.0 => {
                            curve.evaluate(class_height / max_height)
                        }
                        _ => 0.0,
                    };
                    rng.probability() < fit
                }
                None => true,
            };
            if let Some(species) = claimant {
                if cell.is_locked_against(species) {
                    accepted = false;
                }
            }
            if accepted {
                return rank;
            }
        }

        report.misses += 1;
        if let Some(species) = claimant {
            if ledger.cell(rank).is_locked_against(species) {
                match ledger.first_rank_open_to(species) {
                    Some(open) => return open,
                    None => {
                        report.lock_conflicts += 1;
                        warn!(
                            stand = %report.stand,
                            species = species.0,
                            "every pixel is claimed by another species; sharing a claimed pixel"
                        );
                    }
                }
            }
        }
        rank
    }

    fn assign_slots<R: RngExt + ?Sized>(
        &self,
        ledger: &HeightCellLedger,
        landscape: &mut Landscape,
        rng: &mut R,
        report: &mut AllocationReport,
    ) -> Result<(), InitError> {
        for cell in ledger.cells() {
            let residents = cell.residents();
            let crowded = residents.len() > self.tuning.crowded_pixel_threshold;
            let mut occupied: u32 = 0;
            let mut next_slot = 0;

            for &tree_id in residents {
                let slot = if crowded {
                    let slot = next_slot;
                    next_slot = (next_slot + 1) % SLOTS_PER_PIXEL;
                    slot
                } else {
                    let (slot, free) = self.search_free_slot(occupied, rng);
                    if free {
                        occupied |= 1 << slot;
                    } else {
                        report.slot_search_exhausted += 1;
                        warn!(
                            pixel_x = cell.pixel.x,
                            pixel_y = cell.pixel.y,
                            "found no free slot; tree shares slot {slot}"
                        );
                    }
                    slot
                };

                let light_cell = light_cell_for(cell.pixel, slot_offset(cell.unit_grid_index, slot));
                if !landscape.contains_light_cell(light_cell) {
                    return Err(InitError::OutsideLandscape {
                        pixel: cell.pixel,
                        cell: light_cell,
                    });
                }
                if let Some(tree) = landscape.tree_mut(tree_id) {
                    tree.slot = Some(slot as u8);
                    tree.light_cell = Some(light_cell);
                }
            }
        }
        Ok(())
    }

    /// Biased search towards low slot indices: `floor(25 r²)`. Returns the
    /// last candidate and `false` when every draw hit an occupied slot.
    fn search_free_slot<R: RngExt + ?Sized>(&self, occupied: u32, rng: &mut R) -> (usize, bool) {
        let mut slot = 0;
        for _ in 0..self.tuning.slot_search_draws.max(1) {
            let r = rng.probability();
            slot = ((SLOTS_PER_PIXEL as f64 * r * r).floor() as usize).min(SLOTS_PER_PIXEL - 1);
            if occupied & (1 << slot) == 0 {
                return (slot, true);
            }
        }
        (slot, false)
    }
}
