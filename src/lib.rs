pub mod allocator;
pub mod catalog;
pub mod config;
pub mod curve;
pub mod error;
pub mod grid;
pub mod initializer;
pub mod landscape;
pub mod ledger;
pub mod output;
pub mod raster;
pub mod rng;
pub mod sampler;
pub mod species;
pub mod table;

pub use config::{Project, ProjectLoader};
pub use error::InitError;
pub use initializer::{InitMode, InitSummary, StandInitializer};
pub use landscape::{Landscape, Tree};
