//! YAML project files and the wiring from a project to a ready initializer.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::allocator::PlacementTuning;
use crate::catalog::{CatalogRules, SizeClassCatalog};
use crate::curve::PolygonCurve;
use crate::initializer::{InitMode, InitSummary, StandInitializer};
use crate::landscape::Landscape;
use crate::raster::{AsciiGrid, HeightGrid, StandRaster};
use crate::rng::InitRng;
use crate::sampler::{DensityShape, PlacementSampler};
use crate::species::SpeciesSet;
use crate::table::Table;

fn default_units() -> u32 {
    1
}

fn default_min_sapling_height() -> f64 {
    4.0
}

fn default_age_at_reference_height() -> f64 {
    10.0
}

fn default_fit_curve() -> Vec<[f64; 2]> {
    PolygonCurve::default_height_fit()
        .points()
        .iter()
        .map(|&(x, y)| [x, y])
        .collect()
}

fn default_tree_file() -> PathBuf {
    PathBuf::from("output/trees.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub name: String,
    pub description: Option<String>,
    pub seed: u64,
    #[serde(default)]
    pub landscape: LandscapeConfig,
    pub species: Vec<String>,
    pub initialization: InitializationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Directory of the project file; relative paths resolve against it.
    #[serde(skip)]
    pub root: PathBuf,
}

/// Landscape size in resource units (100 m squares).
#[derive(Debug, Clone, Deserialize)]
pub struct LandscapeConfig {
    #[serde(default = "default_units")]
    pub width: u32,
    #[serde(default = "default_units")]
    pub height: u32,
}

impl Default for LandscapeConfig {
    fn default() -> Self {
        Self {
            width: default_units(),
            height: default_units(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializationConfig {
    #[serde(default)]
    pub mode: InitMode,
    /// Size class table; in stand map mode it may carry a `stand_id` column.
    pub catalog_file: Option<PathBuf>,
    /// One size class table per stand id (stand map mode).
    #[serde(default)]
    pub stand_files: BTreeMap<i32, PathBuf>,
    pub stand_grid_file: Option<PathBuf>,
    #[serde(default)]
    pub random_function: DensityShape,
    pub height_grid: Option<HeightGridConfig>,
    #[serde(default = "default_min_sapling_height")]
    pub min_sapling_height: f64,
    #[serde(default = "default_age_at_reference_height")]
    pub age_at_reference_height: f64,
    #[serde(default)]
    pub tuning: PlacementTuning,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeightGridConfig {
    pub file: PathBuf,
    #[serde(default = "default_fit_curve")]
    pub fit_curve: Vec<[f64; 2]>,
    /// Overrides `tuning.max_tries` when given.
    pub max_tries: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_tree_file")]
    pub tree_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            tree_file: default_tree_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub struct ProjectLoader {
    base_dir: PathBuf,
}

impl ProjectLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Project> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read project file {}", path.display()))?;
        let mut project: Project = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        project.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(project)
    }
}

/// Everything a run produced.
pub struct RunOutcome {
    pub landscape: Landscape,
    pub species: SpeciesSet,
    pub summary: InitSummary,
}

impl Project {
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    pub fn build_landscape(&self) -> Landscape {
        Landscape::new(self.landscape.width, self.landscape.height)
    }

    pub fn species_set(&self) -> SpeciesSet {
        SpeciesSet::new(self.species.iter().cloned())
    }

    pub fn catalog_rules(&self) -> CatalogRules {
        CatalogRules {
            min_sapling_height: self.initialization.min_sapling_height,
            age_at_reference_height: self.initialization.age_at_reference_height,
        }
    }

    pub fn build_initializer(&self) -> Result<StandInitializer> {
        let init = &self.initialization;
        let sampler = PlacementSampler::from_shape(&init.random_function)
            .context("Invalid random_function")?;
        let mut tuning = init.tuning;

        let mut initializer = if let Some(height_grid) = &init.height_grid {
            if let Some(max_tries) = height_grid.max_tries {
                tuning.max_tries = max_tries;
            }
            let path = self.resolve(&height_grid.file);
            let grid = AsciiGrid::load(&path)
                .with_context(|| format!("Failed to load height grid {}", path.display()))?;
            let points = height_grid.fit_curve.iter().map(|p| (p[0], p[1])).collect();
            let Some(curve) = PolygonCurve::new(points) else {
                bail!("height_grid.fit_curve needs at least one point with ascending x values");
            };
            StandInitializer::new(sampler, tuning, self.catalog_rules())
                .with_height_raster(Box::new(HeightGrid::new(grid)))
                .with_height_fit(Box::new(curve))
        } else {
            StandInitializer::new(sampler, tuning, self.catalog_rules())
        };

        if let Some(file) = &init.stand_grid_file {
            let path = self.resolve(file);
            let grid = AsciiGrid::load(&path)
                .with_context(|| format!("Failed to load stand grid {}", path.display()))?;
            initializer = initializer.with_stand_grid(Box::new(StandRaster::new(&grid)));
        }
        Ok(initializer)
    }

    /// Reads the catalog table and any per-stand tables.
    pub fn load_catalog(
        &self,
        initializer: &mut StandInitializer,
        species: &SpeciesSet,
    ) -> Result<SizeClassCatalog> {
        let init = &self.initialization;
        if init.catalog_file.is_none() && init.stand_files.is_empty() {
            bail!("initialization needs a catalog_file or stand_files");
        }

        let mut catalog = match &init.catalog_file {
            Some(file) => self.parse_table(initializer, species, file)?,
            None => SizeClassCatalog::default(),
        };
        for (&id, file) in &init.stand_files {
            let stand = self.parse_table(initializer, species, file)?;
            catalog.insert_stand(id, stand);
        }
        Ok(catalog)
    }

    fn parse_table(
        &self,
        initializer: &mut StandInitializer,
        species: &SpeciesSet,
        file: &Path,
    ) -> Result<SizeClassCatalog> {
        let path = self.resolve(file);
        let table = Table::load(&path)
            .with_context(|| format!("Failed to read size classes {}", path.display()))?;
        initializer
            .parse_catalog(&table, species)
            .with_context(|| format!("Invalid size classes in {}", path.display()))
    }

    /// Runs a full initialization; `seed` overrides the project seed.
    pub fn run(&self, seed: Option<u64>) -> Result<RunOutcome> {
        let seed = seed.unwrap_or(self.seed);
        let species = self.species_set();
        let mut initializer = self.build_initializer()?;
        let catalog = self.load_catalog(&mut initializer, &species)?;
        let mut landscape = self.build_landscape();
        info!(
            project = %self.name,
            seed,
            classes = catalog.class_count(),
            units = landscape.resource_unit_count(),
            "starting initialization"
        );

        let mut rng = InitRng::new(seed);
        let summary = initializer
            .run(self.initialization.mode, &catalog, &mut landscape, &mut rng)
            .with_context(|| format!("Initialization of project '{}' failed", self.name))?;
        Ok(RunOutcome {
            landscape,
            species,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let yaml = "name: tiny\nseed: 3\nspecies: [piab]\ninitialization:\n  catalog_file: trees.csv\n";
        let project: Project = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(project.landscape.width, 1);
        assert_eq!(project.initialization.mode, InitMode::SingleUnit);
        assert_eq!(project.initialization.random_function, DensityShape::default());
        assert_eq!(project.initialization.tuning, PlacementTuning::default());
        assert_eq!(project.output.tree_file, PathBuf::from("output/trees.json"));
        assert_eq!(project.logging.level, "info");
    }

    #[test]
    fn stand_files_and_height_grid_parse() {
        let yaml = "\
name: map
seed: 1
species: [piab, fasy]
initialization:
  mode: stand_map
  stand_files:
    2: stand2.csv
    1: stand1.csv
  stand_grid_file: stands.asc
  random_function:
    kind: polygon
    points: [[0, 1], [1, 0]]
  height_grid:
    file: heights.asc
  tuning:
    max_tries: 4
";
        let project: Project = serde_yaml::from_str(yaml).unwrap();
        let init = &project.initialization;
        assert_eq!(init.mode, InitMode::StandMap);
        assert_eq!(init.stand_files.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(init.tuning.max_tries, 4);
        assert_eq!(init.tuning.slot_search_draws, 1000);
        let height_grid = init.height_grid.as_ref().unwrap();
        assert_eq!(height_grid.max_tries, None);
        assert_eq!(height_grid.fit_curve.len(), 4);
    }

    #[test]
    fn missing_tables_are_reported() {
        let yaml = "name: empty\nseed: 1\nspecies: [piab]\ninitialization: {}\n";
        let project: Project = serde_yaml::from_str(yaml).unwrap();
        let mut initializer = project.build_initializer().unwrap();
        let err = project
            .load_catalog(&mut initializer, &project.species_set())
            .unwrap_err();
        assert!(err.to_string().contains("catalog_file"));
    }

    fn project_with_height_grid(height_grid: &str) -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("heights.asc"),
            "ncols 1\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 10\n25\n",
        )
        .unwrap();
        let yaml = format!(
            "name: fit\nseed: 1\nspecies: [piab]\ninitialization:\n  \
             catalog_file: trees.csv\n  tuning:\n    max_tries: 4\n  height_grid:\n{height_grid}"
        );
        let mut project: Project = serde_yaml::from_str(&yaml).unwrap();
        project.root = dir.path().to_path_buf();
        (dir, project)
    }

    #[test]
    fn tuning_retry_budget_survives_a_height_grid() {
        let (_dir, project) = project_with_height_grid("    file: heights.asc\n");
        let initializer = project.build_initializer().unwrap();
        assert_eq!(initializer.tuning().max_tries, 4);
    }

    #[test]
    fn height_grid_retry_budget_overrides_tuning() {
        let (_dir, project) =
            project_with_height_grid("    file: heights.asc\n    max_tries: 6\n");
        let initializer = project.build_initializer().unwrap();
        assert_eq!(initializer.tuning().max_tries, 6);
    }
}
