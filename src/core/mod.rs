//! Core HSI processing modules

pub mod grid;
pub mod resample;
pub mod preprocess;
pub mod suitability;
pub mod aggregate;
pub mod land_mask;

// Re-export main types
pub use grid::TargetGrid;
pub use resample::{resample_to_grid, ScatteredResampler, SourcePoints};
pub use preprocess::{PreprocessParams, SourceRef, VariablePreprocessor};
pub use suitability::{HsiCalculator, PeakedCurve, PlateauCurve, SuitabilityParams};
pub use aggregate::{aggregate_monthly, year_month_labels, MonthlyAggregator};
pub use land_mask::{FilterStats, OceanMask};
