//! Size class catalog: validated cohort descriptions grouped by stand.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::InitError;
use crate::landscape::StandKey;
use crate::species::{SpeciesId, SpeciesLookup};
use crate::table::{Table, TableRow};

const MANDATORY_COLUMNS: [&str; 5] = ["species", "count", "dbh_from", "dbh_to", "hd"];

/// Limits applied while validating size classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CatalogRules {
    /// Trees must start at or above this height (m); it is also the
    /// reference height for deriving ages.
    pub min_sapling_height: f64,
    /// Age (years) of a tree at the reference height, used when a class
    /// gives no age.
    pub age_at_reference_height: f64,
}

impl Default for CatalogRules {
    fn default() -> Self {
        Self {
            min_sapling_height: 4.0,
            age_at_reference_height: 10.0,
        }
    }
}

/// One typed row of a size class table.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeClassRecord {
    pub line: usize,
    pub species: String,
    pub count: f64,
    pub dbh_from: f64,
    pub dbh_to: f64,
    pub hd_ratio: f64,
    pub age: Option<u32>,
    pub density: Option<f64>,
    pub stand_id: Option<i32>,
    pub age_at_reference_height: Option<f64>,
}

struct ColumnMap {
    species: usize,
    count: usize,
    dbh_from: usize,
    dbh_to: usize,
    hd: usize,
    age: Option<usize>,
    density: Option<usize>,
    stand_id: Option<usize>,
    age4m: Option<usize>,
}

impl SizeClassRecord {
    /// Maps table columns onto records; all missing mandatory columns are
    /// reported together.
    pub fn from_table(table: &Table) -> Result<Vec<Self>, InitError> {
        let missing: Vec<&str> = MANDATORY_COLUMNS
            .iter()
            .copied()
            .filter(|name| table.column_index(name).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(InitError::MissingColumns(missing.join(", ")));
        }
        let required = |name: &str| table.column_index(name).unwrap_or_default();
        let columns = ColumnMap {
            species: required("species"),
            count: required("count"),
            dbh_from: required("dbh_from"),
            dbh_to: required("dbh_to"),
            hd: required("hd"),
            age: table.column_index("age"),
            density: table.column_index("density"),
            stand_id: table.column_index("stand_id"),
            age4m: table.column_index("age4m"),
        };
        table
            .rows()
            .iter()
            .map(|row| Self::from_row(row, &columns))
            .collect()
    }

    fn from_row(row: &TableRow, columns: &ColumnMap) -> Result<Self, InitError> {
        let value = |index: usize| row.values[index].as_str();
        let optional = |index: Option<usize>| {
            index
                .map(|i| row.values[i].as_str())
                .filter(|text| !text.is_empty())
        };

        let stand_id = match optional(columns.stand_id) {
            Some(text) => Some(text.parse::<i32>().map_err(|_| InitError::InvalidNumber {
                line: row.line,
                column: "stand_id",
                value: text.to_string(),
            })?),
            None => None,
        };
        let density = optional(columns.density)
            .map(|text| parse_f64(row.line, "density", text))
            .transpose()?;
        let age_at_reference_height = optional(columns.age4m)
            .map(|text| parse_f64(row.line, "age4m", text))
            .transpose()?;

        Ok(Self {
            line: row.line,
            species: value(columns.species).to_string(),
            count: parse_f64(row.line, "count", value(columns.count))?,
            dbh_from: parse_f64(row.line, "dbh_from", value(columns.dbh_from))?,
            dbh_to: parse_f64(row.line, "dbh_to", value(columns.dbh_to))?,
            hd_ratio: parse_f64(row.line, "hd", value(columns.hd))?,
            // unparsable ages fall back to a derived age
            age: optional(columns.age).and_then(|text| text.parse::<u32>().ok()),
            density,
            stand_id,
            age_at_reference_height,
        })
    }
}

fn parse_f64(line: usize, column: &'static str, text: &str) -> Result<f64, InitError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| InitError::InvalidNumber {
            line,
            column,
            value: text.to_string(),
        })
}

/// A validated cohort to be instantiated into individual trees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeClassRow {
    pub species: SpeciesId,
    pub species_code: String,
    pub count: f64,
    pub dbh_from: f64,
    pub dbh_to: f64,
    pub hd_ratio: f64,
    /// Age in years; 0 means derive from height.
    pub age: u32,
    pub density: f64,
    pub stand: StandKey,
    pub age_at_reference_height: f64,
}

impl SizeClassRow {
    /// Number of trees to create for an area of `area_scale` resource units.
    pub fn target_count(&self, area_scale: f64) -> usize {
        (self.count * area_scale).round().max(0.0) as usize
    }

    /// Height of the largest tree the class can produce.
    pub fn max_height(&self) -> f64 {
        self.dbh_to / 100.0 * self.hd_ratio
    }

    pub fn height_for(&self, dbh: f64) -> f64 {
        dbh / 100.0 * self.hd_ratio
    }

    /// Explicit age, or an age from a linear height/age relation through
    /// the reference height.
    pub fn age_for(&self, height: f64, reference_height: f64) -> u32 {
        if self.age > 0 {
            return self.age;
        }
        let derived = (height / reference_height * self.age_at_reference_height).round();
        derived.max(1.0) as u32
    }

    /// Single-species-area classes claim pixels exclusively.
    pub fn claims_area(&self) -> bool {
        self.density > 1.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct SizeClassCatalog {
    stands: BTreeMap<StandKey, Vec<SizeClassRow>>,
}

impl SizeClassCatalog {
    pub fn build(
        records: Vec<SizeClassRecord>,
        species: &dyn SpeciesLookup,
        rules: &CatalogRules,
    ) -> Result<Self, InitError> {
        let mut catalog = Self::default();
        for record in records {
            let row = validate(record, species, rules)?;
            catalog.stands.entry(row.stand).or_default().push(row);
        }
        Ok(catalog)
    }

    pub fn from_table(
        table: &Table,
        species: &dyn SpeciesLookup,
        rules: &CatalogRules,
    ) -> Result<Self, InitError> {
        Self::build(SizeClassRecord::from_table(table)?, species, rules)
    }

    /// Moves every class of `other` into stand `id`, after existing classes.
    pub fn insert_stand(&mut self, id: i32, other: SizeClassCatalog) {
        let rows = self.stands.entry(StandKey::Id(id)).or_default();
        for (_, classes) in other.stands {
            rows.extend(classes.into_iter().map(|mut row| {
                row.stand = StandKey::Id(id);
                row
            }));
        }
    }

    pub fn rows(&self, stand: StandKey) -> &[SizeClassRow] {
        self.stands.get(&stand).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn default_rows(&self) -> &[SizeClassRow] {
        self.rows(StandKey::Default)
    }

    /// Ids of stands with their own classes, ascending.
    pub fn stand_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.stands.keys().filter_map(|key| match key {
            StandKey::Id(id) => Some(*id),
            StandKey::Default => None,
        })
    }

    pub fn class_count(&self) -> usize {
        self.stands.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.class_count() == 0
    }
}

fn validate(
    record: SizeClassRecord,
    species: &dyn SpeciesLookup,
    rules: &CatalogRules,
) -> Result<SizeClassRow, InitError> {
    let line = record.line;
    if record.species.trim().is_empty() {
        return Err(InitError::InvalidRow {
            line,
            message: "missing species".into(),
        });
    }
    let species_id = species
        .resolve(&record.species)
        .ok_or_else(|| InitError::UnknownSpecies {
            code: record.species.clone(),
            line,
        })?;
    if record.hd_ratio == 0.0
        || record.dbh_from / 100.0 * record.hd_ratio < rules.min_sapling_height
    {
        return Err(InitError::BelowSaplingHeight {
            line,
            hd_ratio: record.hd_ratio,
            dbh_from: record.dbh_from,
            threshold: rules.min_sapling_height,
        });
    }
    if record.count < 0.0 {
        return Err(InitError::InvalidRow {
            line,
            message: format!("negative tree count {}", record.count),
        });
    }
    if record.dbh_to < record.dbh_from {
        return Err(InitError::InvalidRow {
            line,
            message: format!(
                "dbh_to ({}) is smaller than dbh_from ({})",
                record.dbh_to, record.dbh_from
            ),
        });
    }
    let density = record.density.unwrap_or(0.0);
    if density < -1.0 {
        return Err(InitError::InvalidDensity { line, density });
    }

    Ok(SizeClassRow {
        species: species_id,
        species_code: record.species,
        count: record.count,
        dbh_from: record.dbh_from,
        dbh_to: record.dbh_to,
        hd_ratio: record.hd_ratio,
        age: record.age.unwrap_or(0),
        density,
        stand: record.stand_id.map_or(StandKey::Default, StandKey::Id),
        age_at_reference_height: record
            .age_at_reference_height
            .unwrap_or(rules.age_at_reference_height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species::SpeciesSet;

    fn species() -> SpeciesSet {
        SpeciesSet::new(["piab", "fasy"])
    }

    fn build(text: &str) -> Result<SizeClassCatalog, InitError> {
        let table = Table::parse(text)?;
        SizeClassCatalog::from_table(&table, &species(), &CatalogRules::default())
    }

    #[test]
    fn groups_rows_by_stand() {
        let catalog = build(
            "species,count,dbh_from,dbh_to,hd,age,density,stand_id\n\
             piab,10,20,30,80,50,0,\n\
             fasy,5,15,25,90,,0.5,7\n\
             piab,3,30,40,70,80,,2\n",
        )
        .unwrap();
        assert_eq!(catalog.class_count(), 3);
        assert_eq!(catalog.default_rows().len(), 1);
        assert_eq!(catalog.stand_ids().collect::<Vec<_>>(), vec![2, 7]);

        let beech = &catalog.rows(StandKey::Id(7))[0];
        assert_eq!(beech.species, SpeciesId(1));
        assert_eq!(beech.age, 0);
        assert_eq!(beech.density, 0.5);
        assert_eq!(catalog.rows(StandKey::Id(2))[0].density, 0.0);
    }

    #[test]
    fn reports_all_missing_columns() {
        let err = build("species,count,dbh_from\npiab,1,20\n").unwrap_err();
        match err {
            InitError::MissingColumns(names) => assert_eq!(names, "dbh_to, hd"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn rejects_classes_below_sapling_height() {
        let err = build("species,count,dbh_from,dbh_to,hd\npiab,10,4,8,80\n").unwrap_err();
        assert!(matches!(err, InitError::BelowSaplingHeight { line: 2, .. }));

        let err = build("species,count,dbh_from,dbh_to,hd\npiab,10,20,30,0\n").unwrap_err();
        assert!(matches!(err, InitError::BelowSaplingHeight { .. }));
    }

    #[test]
    fn rejects_invalid_values() {
        let header = "species,count,dbh_from,dbh_to,hd,density\n";
        assert!(matches!(
            build(&format!("{header}piab,10,20,30,80,-1.5\n")),
            Err(InitError::InvalidDensity { .. })
        ));
        assert!(matches!(
            build(&format!("{header}abal,10,20,30,80,0\n")),
            Err(InitError::UnknownSpecies { .. })
        ));
        assert!(matches!(
            build(&format!("{header}piab,ten,20,30,80,0\n")),
            Err(InitError::InvalidNumber { column: "count", .. })
        ));
        assert!(matches!(
            build(&format!("{header}piab,10,30,20,80,0\n")),
            Err(InitError::InvalidRow { .. })
        ));
        // densities above one request single-species areas
        assert!(build(&format!("{header}piab,10,20,30,80,40\n")).is_ok());
    }

    #[test]
    fn derives_ages_and_counts() {
        let catalog = build(
            "species,count,dbh_from,dbh_to,hd,age4m\npiab,12.4,20,30,80,8\n",
        )
        .unwrap();
        let row = &catalog.default_rows()[0];
        assert_eq!(row.target_count(1.0), 12);
        assert_eq!(row.target_count(2.5), 31);
        assert_eq!(row.max_height(), 24.0);
        // 16 m at 8 years per 4 m
        assert_eq!(row.age_for(16.0, 4.0), 32);
        assert_eq!(row.age_for(0.1, 4.0), 1);
    }

    #[test]
    fn stand_files_are_merged_under_their_id() {
        let mut catalog = SizeClassCatalog::default();
        let stand = build("species,count,dbh_from,dbh_to,hd\nfasy,4,20,30,80\n").unwrap();
        catalog.insert_stand(12, stand);
        assert_eq!(catalog.rows(StandKey::Id(12))[0].stand, StandKey::Id(12));
        assert!(catalog.default_rows().is_empty());
    }
}
