use thiserror::Error;

use crate::landscape::{LightCellPos, PixelPos, StandKey};

/// Fatal conditions that abort an initialization run.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("unknown species '{code}' at line {line}")]
    UnknownSpecies { code: String, line: usize },

    #[error("size class table is missing mandatory column(s): {0}")]
    MissingColumns(String),

    #[error("line {line}: column '{column}' holds '{value}', which is not a valid number")]
    InvalidNumber {
        line: usize,
        column: &'static str,
        value: String,
    },

    #[error(
        "line {line}: trees would start below {threshold} m height (hd = {hd_ratio}, dbh_from = {dbh_from})"
    )]
    BelowSaplingHeight {
        line: usize,
        hd_ratio: f64,
        dbh_from: f64,
        threshold: f64,
    },

    #[error("line {line}: invalid density {density}, allowed range is -1 and above")]
    InvalidDensity { line: usize, density: f64 },

    #[error("line {line}: {message}")]
    InvalidRow { line: usize, message: String },

    #[error("a height grid is configured but no response curve was given")]
    MissingResponseCurve,

    #[error("tree in pixel ({}, {}) maps to light cell ({}, {}) outside the landscape", .pixel.x, .pixel.y, .cell.x, .cell.y)]
    OutsideLandscape { pixel: PixelPos, cell: LightCellPos },

    #[error("pixel ({}, {}) of stand {stand} is not covered by a resource unit", .pixel.x, .pixel.y)]
    PixelWithoutResourceUnit { stand: StandKey, pixel: PixelPos },

    #[error("single-unit initialization requires exactly one resource unit, found {0}")]
    TooManyResourceUnits(usize),

    #[error("stand map initialization requires a valid stand grid")]
    MissingStandGrid,

    #[error("invalid density function: {0}")]
    InvalidDensityFunction(String),

    #[error("table format error: {0}")]
    Table(String),

    #[error("grid format error: {0}")]
    Grid(String),
}
