//! hsimap: habitat suitability index mapping from satellite ocean variables
//!
//! Resamples chlorophyll, sea surface temperature and salinity grids onto a
//! common lattice, scores each cell with per-variable response curves, folds
//! the daily composite into calendar months and publishes the months as
//! GeoJSON point collections with land points masked out via bathymetry.

pub mod types;
pub mod io;
pub mod core;
pub mod fields;
pub mod config;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    AggregationMethod, BoundingBox, Field2, Field3, FieldSummary, HsiError, HsiResult,
    InterpolationMethod, Variable, YearMonth,
};

pub use config::PipelineConfig;
pub use fields::{HsiFields, MonthlyFields, RawFields};
pub use io::{GriddedReader, MemoryReader, NetcdfReader};
pub use pipeline::{HsiPipeline, Stage};
