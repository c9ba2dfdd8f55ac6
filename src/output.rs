//! JSON tree list written after a run.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::initializer::InitSummary;
use crate::landscape::{Landscape, StandKey, Tree};
use crate::species::SpeciesSet;

#[derive(Debug, Clone, Serialize)]
pub struct TreeListMetadata {
    pub project: String,
    pub seed: u64,
    pub timestamp: String,
    pub tree_count: usize,
}

#[derive(Debug, Serialize)]
struct TreeRecord<'a> {
    tag: u64,
    species: &'a str,
    dbh: f64,
    height: f64,
    age: u32,
    stand: StandKey,
    resource_unit: usize,
    pixel: [u32; 2],
    slot: Option<u8>,
    /// Light cell centre in metres from the landscape origin.
    position: Option<[f64; 2]>,
}

impl<'a> TreeRecord<'a> {
    fn new(tree: &Tree, species: &'a SpeciesSet) -> Self {
        Self {
            tag: tree.tag,
            species: species.code(tree.species).unwrap_or("?"),
            dbh: tree.dbh,
            height: tree.height,
            age: tree.age,
            stand: tree.stand,
            resource_unit: tree.resource_unit,
            pixel: [tree.pixel.x, tree.pixel.y],
            slot: tree.slot,
            position: tree
                .light_cell
                .map(|cell| [cell.x as f64 * 2.0 + 1.0, cell.y as f64 * 2.0 + 1.0]),
        }
    }
}

#[derive(Serialize)]
struct TreeList<'a> {
    metadata: TreeListMetadata,
    summary: &'a InitSummary,
    trees: Vec<TreeRecord<'a>>,
}

pub struct TreeListWriter {
    path: PathBuf,
}

impl TreeListWriter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes every tree of the landscape, creating parent directories.
    pub fn write(
        &self,
        project: &str,
        seed: u64,
        landscape: &Landscape,
        species: &SpeciesSet,
        summary: &InitSummary,
    ) -> std::io::Result<TreeListMetadata> {
        let metadata = TreeListMetadata {
            project: project.to_string(),
            seed,
            timestamp: chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
            tree_count: landscape.total_trees(),
        };
        let list = TreeList {
            metadata: metadata.clone(),
            summary,
            trees: landscape
                .trees()
                .map(|tree| TreeRecord::new(tree, species))
                .collect(),
        };

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&list)?;
        let mut file = File::create(&self.path)?;
        file.write_all(json.as_bytes())?;
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridPos;
    use crate::initializer::InitMode;
    use crate::landscape::NewTree;
    use crate::species::SpeciesId;

    #[test]
    fn writes_trees_with_species_codes() {
        let dir = tempfile::tempdir().unwrap();
        let mut landscape = Landscape::new(1, 1);
        let id = landscape
            .spawn_tree(
                0,
                NewTree {
                    species: SpeciesId(1),
                    dbh: 25.0,
                    height: 20.0,
                    age: 50,
                    stand: StandKey::Default,
                    pixel: GridPos::new(2, 3),
                },
            )
            .unwrap();
        if let Some(tree) = landscape.tree_mut(id) {
            tree.slot = Some(0);
            tree.light_cell = Some(GridPos::new(10, 15));
        }
        let species = SpeciesSet::new(["piab", "fasy"]);
        let summary = InitSummary {
            mode: InitMode::SingleUnit,
            reports: Vec::new(),
            skipped_stands: Vec::new(),
            total_trees: 1,
            total_tries: 1,
            total_misses: 0,
        };

        let writer = TreeListWriter::new(dir.path().join("out/trees.json"));
        let metadata = writer.write("tiny", 7, &landscape, &species, &summary).unwrap();
        assert_eq!(metadata.tree_count, 1);

        let text = fs::read_to_string(writer.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["metadata"]["seed"], 7);
        assert_eq!(value["trees"][0]["species"], "fasy");
        assert_eq!(value["trees"][0]["position"][0], 21.0);
        assert_eq!(value["trees"][0]["position"][1], 31.0);
    }
}
