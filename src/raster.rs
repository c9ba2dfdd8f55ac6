//! Raster collaborators: predefined canopy heights and the stand map.
//!
//! Both are read from ESRI ASCII grids with 10 m cells whose lower-left
//! corner is given in metres relative to the landscape origin.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::InitError;
use crate::grid::{Grid, GridPos};
use crate::landscape::{PixelPos, PIXEL_AREA_M2, PIXEL_SIZE_M};

/// Predefined maximum tree height per pixel, e.g. from a canopy height model.
pub trait HeightRaster {
    /// Height in metres, `None` where the raster holds no valid value.
    fn max_height(&self, pixel: PixelPos) -> Option<f64>;
    fn is_on_landscape(&self, pixel: PixelPos) -> bool;
}

/// Mapping of stand ids to the pixels they cover.
pub trait StandGrid {
    fn pixels_for_stand(&self, id: i32) -> Vec<PixelPos>;
    /// Stand area in m².
    fn area_for_stand(&self, id: i32) -> f64;
}

/// Values of an ESRI ASCII grid placed in landscape pixel coordinates.
#[derive(Debug, Clone)]
pub struct AsciiGrid {
    offset: GridPos,
    values: Grid<Option<f64>>,
}

impl AsciiGrid {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, InitError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| InitError::Grid(format!("cannot read {}: {err}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, InitError> {
        let mut tokens = text.split_whitespace().peekable();
        let mut ncols = None;
        let mut nrows = None;
        let mut xll = 0.0;
        let mut yll = 0.0;
        let mut cell_size = None;
        let mut no_data = None;

        while let Some(key) = tokens.peek() {
            if key.parse::<f64>().is_ok() {
                break;
            }
            let key = key.to_ascii_lowercase();
            tokens.next();
            let value = tokens
                .next()
                .ok_or_else(|| InitError::Grid(format!("missing value for header '{key}'")))?;
            let number = parse_number(value)?;
            match key.as_str() {
                "ncols" => ncols = Some(number as u32),
                "nrows" => nrows = Some(number as u32),
                "xllcorner" | "xllcenter" => xll = number,
                "yllcorner" | "yllcenter" => yll = number,
                "cellsize" => cell_size = Some(number),
                "nodata_value" => no_data = Some(number),
                other => return Err(InitError::Grid(format!("unknown header '{other}'"))),
            }
        }

        let ncols = ncols.ok_or_else(|| InitError::Grid("missing header 'ncols'".into()))?;
        let nrows = nrows.ok_or_else(|| InitError::Grid("missing header 'nrows'".into()))?;
        let cell_size =
            cell_size.ok_or_else(|| InitError::Grid("missing header 'cellsize'".into()))?;
        if cell_size != PIXEL_SIZE_M {
            return Err(InitError::Grid(format!(
                "cell size {cell_size} m does not match the {PIXEL_SIZE_M} m pixel size"
            )));
        }
        let offset = GridPos::new(pixel_offset(xll)?, pixel_offset(yll)?);

        let mut rows_top_down = Vec::with_capacity(nrows as usize);
        for row in 0..nrows {
            let mut values = Vec::with_capacity(ncols as usize);
            for _ in 0..ncols {
                let token = tokens.next().ok_or_else(|| {
                    InitError::Grid(format!("row {row} holds fewer than {ncols} values"))
                })?;
                let value = parse_number(token)?;
                let valid = no_data.map_or(true, |nd| value != nd) && value.is_finite();
                values.push(valid.then_some(value));
            }
            rows_top_down.push(values);
        }
        if tokens.next().is_some() {
            return Err(InitError::Grid(format!(
                "more values than {ncols} x {nrows} cells"
            )));
        }

        // the first row in the file is the northern one
        let cells: Vec<Option<f64>> = rows_top_down.into_iter().rev().flatten().collect();
        let values = Grid::from_cells(ncols, nrows, cells)
            .ok_or_else(|| InitError::Grid("inconsistent grid dimensions".into()))?;
        Ok(Self { offset, values })
    }

    pub fn value(&self, pixel: PixelPos) -> Option<f64> {
        if pixel.x < self.offset.x || pixel.y < self.offset.y {
            return None;
        }
        let local = GridPos::new(pixel.x - self.offset.x, pixel.y - self.offset.y);
        self.values.get(local).copied().flatten()
    }

    fn iter(&self) -> impl Iterator<Item = (PixelPos, Option<f64>)> + '_ {
        self.values.iter().map(move |(pos, value)| {
            (
                GridPos::new(pos.x + self.offset.x, pos.y + self.offset.y),
                *value,
            )
        })
    }
}

fn parse_number(token: &str) -> Result<f64, InitError> {
    token
        .parse::<f64>()
        .map_err(|_| InitError::Grid(format!("unable to parse number from '{token}'")))
}

fn pixel_offset(metres: f64) -> Result<u32, InitError> {
    let cells = metres / PIXEL_SIZE_M;
    if metres < 0.0 || cells.fract() != 0.0 {
        return Err(InitError::Grid(format!(
            "grid corner {metres} m is not aligned to the landscape's 10 m pixels"
        )));
    }
    Ok(cells as u32)
}

/// Canopy heights used to fit initial trees.
#[derive(Debug, Clone)]
pub struct HeightGrid {
    grid: AsciiGrid,
}

impl HeightGrid {
    pub fn new(grid: AsciiGrid) -> Self {
        Self { grid }
    }
}

impl HeightRaster for HeightGrid {
    fn max_height(&self, pixel: PixelPos) -> Option<f64> {
        self.grid.value(pixel)
    }

    fn is_on_landscape(&self, pixel: PixelPos) -> bool {
        self.grid.value(pixel).is_some()
    }
}

/// Stand ids per pixel, indexed by stand for fast lookup. Only positive
/// ids name stands.
#[derive(Debug, Clone, Default)]
pub struct StandRaster {
    pixels_by_stand: BTreeMap<i32, Vec<PixelPos>>,
}

impl StandRaster {
    pub fn new(grid: &AsciiGrid) -> Self {
        let mut pixels_by_stand: BTreeMap<i32, Vec<PixelPos>> = BTreeMap::new();
        for (pixel, value) in grid.iter() {
            if let Some(value) = value.filter(|&v| v.round() > 0.0) {
                pixels_by_stand
                    .entry(value.round() as i32)
                    .or_default()
                    .push(pixel);
            }
        }
        Self { pixels_by_stand }
    }

    pub fn from_assignments(assignments: impl IntoIterator<Item = (i32, PixelPos)>) -> Self {
        let mut pixels_by_stand: BTreeMap<i32, Vec<PixelPos>> = BTreeMap::new();
        for (stand, pixel) in assignments {
            pixels_by_stand.entry(stand).or_default().push(pixel);
        }
        Self { pixels_by_stand }
    }

    pub fn stand_ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.pixels_by_stand.keys().copied()
    }
}

impl StandGrid for StandRaster {
    fn pixels_for_stand(&self, id: i32) -> Vec<PixelPos> {
        self.pixels_by_stand.get(&id).cloned().unwrap_or_default()
    }

    fn area_for_stand(&self, id: i32) -> f64 {
        self.pixels_by_stand
            .get(&id)
            .map_or(0.0, |pixels| pixels.len() as f64 * PIXEL_AREA_M2)
    }
}
