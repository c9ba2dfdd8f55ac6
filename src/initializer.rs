//! Drives a complete initialization run over the landscape.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::allocator::{AllocationArea, AllocationReport, PlacementTuning, SpatialAllocator};
use crate::catalog::{CatalogRules, SizeClassCatalog};
use crate::curve::ResponseCurve;
use crate::error::InitError;
use crate::landscape::{Landscape, PixelPos, StandKey, RESOURCE_UNIT_AREA_M2};
use crate::ledger::HeightCell;
use crate::raster::{HeightRaster, StandGrid};
use crate::rng::RngExt;
use crate::sampler::PlacementSampler;
use crate::species::SpeciesLookup;
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// One resource unit filled from the default size classes.
    #[default]
    SingleUnit,
    /// The default size classes repeated on every resource unit.
    UnitReplicate,
    /// Per-stand size classes placed on the pixels of a stand map.
    StandMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitPhase {
    Idle,
    ParsingCatalog,
    SingleUnit,
    UnitReplicate,
    StandMap,
    Done,
}

impl From<InitMode> for InitPhase {
    fn from(mode: InitMode) -> Self {
        match mode {
            InitMode::SingleUnit => InitPhase::SingleUnit,
            InitMode::UnitReplicate => InitPhase::UnitReplicate,
            InitMode::StandMap => InitPhase::StandMap,
        }
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitSummary {
    pub mode: InitMode,
    pub reports: Vec<AllocationReport>,
    /// Stands with size classes but no pixels on the stand map.
    pub skipped_stands: Vec<i32>,
    pub total_trees: usize,
    pub total_tries: usize,
    pub total_misses: usize,
}

impl InitSummary {
    fn new(mode: InitMode, reports: Vec<AllocationReport>, skipped_stands: Vec<i32>) -> Self {
        Self {
            mode,
            total_trees: reports.iter().map(|r| r.trees_created).sum(),
            total_tries: reports.iter().map(|r| r.tries).sum(),
            total_misses: reports.iter().map(|r| r.misses).sum(),
            reports,
            skipped_stands,
        }
    }
}

pub struct StandInitializer {
    sampler: PlacementSampler,
    tuning: PlacementTuning,
    rules: CatalogRules,
    height_raster: Option<Box<dyn HeightRaster>>,
    height_fit: Option<Box<dyn ResponseCurve>>,
    stand_grid: Option<Box<dyn StandGrid>>,
    phase: InitPhase,
}

impl StandInitializer {
    pub fn new(sampler: PlacementSampler, tuning: PlacementTuning, rules: CatalogRules) -> Self {
        Self {
            sampler,
            tuning,
            rules,
            height_raster: None,
            height_fit: None,
            stand_grid: None,
            phase: InitPhase::Idle,
        }
    }

    pub fn with_height_raster(mut self, raster: Box<dyn HeightRaster>) -> Self {
        self.height_raster = Some(raster);
        self
    }

    pub fn with_height_fit(mut self, curve: Box<dyn ResponseCurve>) -> Self {
        self.height_fit = Some(curve);
        self
    }

    pub fn with_stand_grid(mut self, grid: Box<dyn StandGrid>) -> Self {
        self.stand_grid = Some(grid);
        self
    }

    pub fn phase(&self) -> InitPhase {
        self.phase
    }

    pub fn tuning(&self) -> &PlacementTuning {
        &self.tuning
    }

    pub fn parse_catalog(
        &mut self,
        table: &Table,
        species: &dyn SpeciesLookup,
    ) -> Result<SizeClassCatalog, InitError> {
        self.phase = InitPhase::ParsingCatalog;
        SizeClassCatalog::from_table(table, species, &self.rules)
    }

    pub fn run<R: RngExt + ?Sized>(
        &mut self,
        mode: InitMode,
        catalog: &SizeClassCatalog,
        landscape: &mut Landscape,
        rng: &mut R,
    ) -> Result<InitSummary, InitError> {
        self.phase = mode.into();
        let summary = match mode {
            InitMode::SingleUnit => self.run_single_unit(catalog, landscape, rng)?,
            InitMode::UnitReplicate => self.run_unit_replicate(catalog, landscape, rng)?,
            InitMode::StandMap => self.run_stand_map(catalog, landscape, rng)?,
        };
        self.phase = InitPhase::Done;

        info!(
            mode = ?mode,
            areas = summary.reports.len(),
            trees = summary.total_trees,
            misses = summary.total_misses,
            "initialization finished"
        );
        Ok(summary)
    }

    fn allocator(&self) -> SpatialAllocator<'_> {
        SpatialAllocator::new(&self.sampler, self.tuning, self.rules.min_sapling_height)
    }

    /// Allocator that fits heights whenever a height raster is configured.
    fn fitting_allocator(
        &self,
    ) -> Result<(SpatialAllocator<'_>, Option<&dyn HeightRaster>), InitError> {
        let raster = self.height_raster.as_deref();
        let mut allocator = self.allocator();
        if raster.is_some() {
            let curve = self
                .height_fit
                .as_deref()
                .ok_or(InitError::MissingResponseCurve)?;
            allocator = allocator.with_height_fit(curve);
        }
        Ok((allocator, raster))
    }

    fn run_single_unit<R: RngExt + ?Sized>(
        &self,
        catalog: &SizeClassCatalog,
        landscape: &mut Landscape,
        rng: &mut R,
    ) -> Result<InitSummary, InitError> {
        if landscape.resource_unit_count() != 1 {
            return Err(InitError::TooManyResourceUnits(
                landscape.resource_unit_count(),
            ));
        }
        warn_ignored_stand_rows(catalog);
        let (allocator, raster) = self.fitting_allocator()?;
        let area = unit_area(landscape, 0, raster);
        let report = allocator.populate(area, catalog.default_rows(), landscape, rng)?;
        Ok(InitSummary::new(InitMode::SingleUnit, vec![report], Vec::new()))
    }

    fn run_unit_replicate<R: RngExt + ?Sized>(
        &self,
        catalog: &SizeClassCatalog,
        landscape: &mut Landscape,
        rng: &mut R,
    ) -> Result<InitSummary, InitError> {
        warn_ignored_stand_rows(catalog);
        if self.height_raster.is_some() {
            warn!("height grid is not used when replicating size classes over resource units");
        }
        let allocator = self.allocator();
        let mut reports = Vec::with_capacity(landscape.resource_unit_count());
        for unit in 0..landscape.resource_unit_count() {
            let area = unit_area(landscape, unit, None);
            reports.push(allocator.populate(area, catalog.default_rows(), landscape, rng)?);
        }
        Ok(InitSummary::new(InitMode::UnitReplicate, reports, Vec::new()))
    }

    fn run_stand_map<R: RngExt + ?Sized>(
        &self,
        catalog: &SizeClassCatalog,
        landscape: &mut Landscape,
        rng: &mut R,
    ) -> Result<InitSummary, InitError> {
        let grid = self.stand_grid.as_deref().ok_or(InitError::MissingStandGrid)?;
        let (allocator, raster) = self.fitting_allocator()?;
        if !catalog.default_rows().is_empty() {
            warn!(
                classes = catalog.default_rows().len(),
                "size classes without a stand id are ignored in stand map mode"
            );
        }

        let mut reports = Vec::new();
        let mut skipped = Vec::new();
        for id in catalog.stand_ids() {
            let pixels = grid.pixels_for_stand(id);
            if pixels.is_empty() {
                warn!(stand = id, "stand has size classes but no pixels on the stand map; skipped");
                skipped.push(id);
                continue;
            }
            let stand = StandKey::Id(id);
            let area = AllocationArea {
                stand,
                cells: stand_cells(stand, &pixels, landscape, raster)?,
                area_scale: grid.area_for_stand(id) / RESOURCE_UNIT_AREA_M2,
            };
            reports.push(allocator.populate(area, catalog.rows(stand), landscape, rng)?);
        }
        Ok(InitSummary::new(InitMode::StandMap, reports, skipped))
    }
}

fn warn_ignored_stand_rows(catalog: &SizeClassCatalog) {
    let stands = catalog.stand_ids().count();
    if stands > 0 {
        warn!(stands, "size classes with a stand id are ignored in resource unit modes");
    }
}

fn unit_area(landscape: &Landscape, unit: usize, raster: Option<&dyn HeightRaster>) -> AllocationArea {
    let cells = landscape
        .resource_unit(unit)
        .map(|ru| {
            ru.pixels()
                .into_iter()
                .map(|pixel| {
                    HeightCell::new(pixel, unit, ru.grid_index(), raster_height(raster, pixel))
                })
                .collect()
        })
        .unwrap_or_default();
    AllocationArea {
        stand: StandKey::Default,
        cells,
        area_scale: 1.0,
    }
}

fn raster_height(raster: Option<&dyn HeightRaster>, pixel: PixelPos) -> Option<f64> {
    raster
        .filter(|r| r.is_on_landscape(pixel))
        .and_then(|r| r.max_height(pixel))
}

fn stand_cells(
    stand: StandKey,
    pixels: &[PixelPos],
    landscape: &Landscape,
    raster: Option<&dyn HeightRaster>,
) -> Result<Vec<HeightCell>, InitError> {
    pixels
        .iter()
        .map(|&pixel| {
            let unit = landscape
                .resource_unit_at(pixel)
                .ok_or(InitError::PixelWithoutResourceUnit { stand, pixel })?;
            let grid_index = landscape
                .resource_unit(unit)
                .map_or(0, |ru| ru.grid_index());
            Ok(HeightCell::new(pixel, unit, grid_index, raster_height(raster, pixel)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SizeClassRecord;
    use crate::grid::GridPos;
    use crate::raster::StandRaster;
    use crate::rng::InitRng;
    use crate::sampler::DensityShape;
    use crate::species::SpeciesSet;

    fn record(species: &str, count: f64, stand_id: Option<i32>) -> SizeClassRecord {
        SizeClassRecord {
            line: 2,
            species: species.into(),
            count,
            dbh_from: 20.0,
            dbh_to: 30.0,
            hd_ratio: 80.0,
            age: Some(50),
            density: None,
            stand_id,
            age_at_reference_height: None,
        }
    }

    fn catalog(records: Vec<SizeClassRecord>) -> SizeClassCatalog {
        let species = SpeciesSet::new(["piab", "fasy"]);
        SizeClassCatalog::build(records, &species, &CatalogRules::default()).unwrap()
    }

    fn initializer() -> StandInitializer {
        let sampler = PlacementSampler::from_shape(&DensityShape::default()).unwrap();
        StandInitializer::new(sampler, PlacementTuning::default(), CatalogRules::default())
    }

    #[test]
    fn single_unit_rejects_larger_landscapes() {
        let mut init = initializer();
        let mut landscape = Landscape::new(2, 1);
        let result = init.run(
            InitMode::SingleUnit,
            &catalog(vec![record("piab", 10.0, None)]),
            &mut landscape,
            &mut InitRng::new(1),
        );
        assert!(matches!(result, Err(InitError::TooManyResourceUnits(2))));
    }

    #[test]
    fn unit_replicate_fills_every_unit() {
        let mut init = initializer();
        let mut landscape = Landscape::new(3, 2);
        let summary = init
            .run(
                InitMode::UnitReplicate,
                &catalog(vec![record("piab", 10.0, None), record("fasy", 3.0, Some(4))]),
                &mut landscape,
                &mut InitRng::new(1),
            )
            .unwrap();
        assert_eq!(summary.reports.len(), 6);
        assert_eq!(summary.total_trees, 60);
        assert_eq!(init.phase(), InitPhase::Done);
        for unit in landscape.resource_units() {
            assert_eq!(unit.trees().len(), 10);
            assert!(unit.trees().iter().all(|t| t.species.0 == 0));
        }
    }

    #[test]
    fn stand_map_requires_a_grid() {
        let mut init = initializer();
        let result = init.run(
            InitMode::StandMap,
            &catalog(vec![record("piab", 10.0, Some(1))]),
            &mut Landscape::new(1, 1),
            &mut InitRng::new(1),
        );
        assert!(matches!(result, Err(InitError::MissingStandGrid)));
    }

    #[test]
    fn stand_map_scales_by_area_and_skips_empty_stands() {
        // stand 1 covers half a hectare
        let grid = StandRaster::from_assignments(
            (0..50).map(|i| (1, GridPos::new(i % 10, i / 10))),
        );
        let mut init = initializer().with_stand_grid(Box::new(grid));
        let mut landscape = Landscape::new(1, 1);
        let summary = init
            .run(
                InitMode::StandMap,
                &catalog(vec![record("piab", 100.0, Some(1)), record("fasy", 10.0, Some(9))]),
                &mut landscape,
                &mut InitRng::new(1),
            )
            .unwrap();
        assert_eq!(summary.total_trees, 50);
        assert_eq!(summary.skipped_stands, vec![9]);
        assert!(landscape.trees().all(|t| t.stand == StandKey::Id(1) && t.pixel.y < 5));
    }

    #[test]
    fn stand_pixels_outside_units_are_fatal() {
        let grid = StandRaster::from_assignments([(1, GridPos::new(25, 0))]);
        let mut init = initializer().with_stand_grid(Box::new(grid));
        let result = init.run(
            InitMode::StandMap,
            &catalog(vec![record("piab", 10.0, Some(1))]),
            &mut Landscape::new(1, 1),
            &mut InitRng::new(1),
        );
        assert!(matches!(
            result,
            Err(InitError::PixelWithoutResourceUnit { stand: StandKey::Id(1), .. })
        ));
    }

    struct Flat(f64);

    impl HeightRaster for Flat {
        fn max_height(&self, _pixel: PixelPos) -> Option<f64> {
            Some(self.0)
        }

        fn is_on_landscape(&self, _pixel: PixelPos) -> bool {
            true
        }
    }

    #[test]
    fn height_raster_needs_a_curve() {
        let grid = StandRaster::from_assignments([(1, GridPos::new(0, 0))]);
        let mut init = initializer()
            .with_stand_grid(Box::new(grid))
            .with_height_raster(Box::new(Flat(20.0)));
        let result = init.run(
            InitMode::StandMap,
            &catalog(vec![record("piab", 10.0, Some(1))]),
            &mut Landscape::new(1, 1),
            &mut InitRng::new(1),
        );
        assert!(matches!(result, Err(InitError::MissingResponseCurve)));
    }

    #[test]
    fn single_unit_fits_heights_to_the_raster() {
        let curve = |ratio: f64| if ratio > 1.0 { 0.0 } else { 1.0 };
        let mut init = initializer()
            .with_height_raster(Box::new(Flat(5.0)))
            .with_height_fit(Box::new(curve));
        let mut landscape = Landscape::new(1, 1);
        let summary = init
            .run(
                InitMode::SingleUnit,
                &catalog(vec![record("piab", 10.0, None)]),
                &mut landscape,
                &mut InitRng::new(1),
            )
            .unwrap();
        assert_eq!(landscape.total_trees(), 10);
        assert_eq!(summary.total_misses, 10);
        assert_eq!(summary.total_tries, 100);
    }

    #[test]
    fn single_unit_raster_needs_a_curve() {
        let mut init = initializer().with_height_raster(Box::new(Flat(20.0)));
        let result = init.run(
            InitMode::SingleUnit,
            &catalog(vec![record("piab", 10.0, None)]),
            &mut Landscape::new(1, 1),
            &mut InitRng::new(1),
        );
        assert!(matches!(result, Err(InitError::MissingResponseCurve)));
    }

    #[test]
    fn unit_replicate_ignores_the_raster() {
        let mut init = initializer().with_height_raster(Box::new(Flat(5.0)));
        let summary = init
            .run(
                InitMode::UnitReplicate,
                &catalog(vec![record("piab", 10.0, None)]),
                &mut Landscape::new(2, 1),
                &mut InitRng::new(1),
            )
            .unwrap();
        assert_eq!(summary.total_trees, 20);
        assert_eq!(summary.total_misses, 0);
    }
}
