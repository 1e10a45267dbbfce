use crate::config::PipelineConfig;
use crate::core::aggregate::MonthlyAggregator;
use crate::core::grid::TargetGrid;
use crate::core::land_mask::OceanMask;
use crate::core::preprocess::{SourceRef, VariablePreprocessor};
use crate::core::suitability::HsiCalculator;
use crate::fields::{HsiFields, MonthlyFields, RawFields};
use crate::io::geojson::GeoJsonExporter;
use crate::io::metadata::ExportMetadata;
use crate::io::netcdf::NetcdfReader;
use crate::io::source::GriddedReader;
use crate::types::HsiResult;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preprocess,
    Score,
    Aggregate,
    Export,
    FilterLand,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Preprocess,
        Stage::Score,
        Stage::Aggregate,
        Stage::Export,
        Stage::FilterLand,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preprocess => "preprocess",
            Stage::Score => "score",
            Stage::Aggregate => "aggregate",
            Stage::Export => "export",
            Stage::FilterLand => "filter-land",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Stage {
    type Err = crate::types::HsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.to_string() == s.trim().to_lowercase())
            .ok_or_else(|| crate::types::HsiError::Config(format!("Unknown stage: {}", s)))
    }
}

/// Runs the pipeline stages; each one reads the previous stage's container
/// from disk, so any stage can be re-run on its own
pub struct HsiPipeline {
    config: PipelineConfig,
}

impl HsiPipeline {
    pub fn new(config: PipelineConfig) -> HsiResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn grid(&self) -> HsiResult<TargetGrid> {
        TargetGrid::from_bbox(&self.config.bbox, self.config.resolution)
    }

    /// Resample the NetCDF inputs named in the configuration
    pub fn preprocess(&self) -> HsiResult<RawFields> {
        let inputs = &self.config.inputs;
        let chl = NetcdfReader::open(&inputs.chl.path)?;
        let sst = NetcdfReader::open(&inputs.sst.path)?;
        let salinity = NetcdfReader::open(&inputs.salinity.path)?;
        self.preprocess_with(&chl, &sst, &salinity)
    }

    /// Resample from arbitrary readers and persist the result
    pub fn preprocess_with(
        &self,
        chl: &dyn GriddedReader,
        sst: &dyn GriddedReader,
        salinity: &dyn GriddedReader,
    ) -> HsiResult<RawFields> {
        let inputs = &self.config.inputs;
        let preprocessor =
            VariablePreprocessor::with_params(self.grid()?, self.config.preprocess_params())?;

        let raw = preprocessor.process(
            SourceRef::new(chl, &inputs.chl.variable),
            SourceRef::new(sst, &inputs.sst.variable),
            SourceRef::new(salinity, &inputs.salinity.variable),
            self.config.start_date,
        )?;
        raw.save(self.config.processed_path())?;
        Ok(raw)
    }

    pub fn score(&self) -> HsiResult<HsiFields> {
        let raw = RawFields::load(self.config.processed_path())?;
        let hsi = HsiCalculator::with_params(self.config.suitability)?.calculate(raw)?;
        hsi.save(self.config.hsi_path())?;
        Ok(hsi)
    }

    pub fn aggregate(&self) -> HsiResult<MonthlyFields> {
        let hsi = HsiFields::load(self.config.hsi_path())?;
        let monthly = MonthlyAggregator::new(self.config.aggregation).aggregate(&hsi)?;
        monthly.save(self.config.monthly_path())?;
        Ok(monthly)
    }

    pub fn export(&self) -> HsiResult<ExportMetadata> {
        let monthly = MonthlyFields::load(self.config.monthly_path())?;
        GeoJsonExporter::new(self.config.geojson_dir()).export(&monthly)
    }

    /// Drop exported points that fall on land, using the configured
    /// bathymetry file
    pub fn filter_land(&self) -> HsiResult<ExportMetadata> {
        let bathymetry = NetcdfReader::open(&self.config.inputs.bathymetry.path)?;
        self.filter_land_with(&bathymetry)
    }

    pub fn filter_land_with(&self, bathymetry: &dyn GriddedReader) -> HsiResult<ExportMetadata> {
        let monthly = MonthlyFields::load(self.config.monthly_path())?;
        let grid = TargetGrid::from_axes(monthly.lat_grid, monthly.lon_grid)?;

        let elevation =
            bathymetry.read_variable(&self.config.inputs.bathymetry.variable, None)?;
        let mask = OceanMask::from_bathymetry(grid, &elevation)?;
        mask.filter_directory(self.config.geojson_dir())
    }

    pub fn run(&self, stage: Stage) -> HsiResult<()> {
        let start = Instant::now();
        log::info!("=== Stage: {} ===", stage);
        match stage {
            Stage::Preprocess => {
                self.preprocess()?;
            }
            Stage::Score => {
                self.score()?;
            }
            Stage::Aggregate => {
                self.aggregate()?;
            }
            Stage::Export => {
                self.export()?;
            }
            Stage::FilterLand => {
                self.filter_land()?;
            }
        }
        log::info!(
            "Stage {} finished in {:.1}s",
            stage,
            start.elapsed().as_secs_f64()
        );
        Ok(())
    }

    pub fn run_all(&self) -> HsiResult<()> {
        for stage in Stage::ALL {
            self.run(stage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HsiError;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir) -> HsiPipeline {
        HsiPipeline::new(PipelineConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_stage_names() {
        for stage in Stage::ALL {
            assert_eq!(stage.to_string().parse::<Stage>().unwrap(), stage);
        }
        assert_eq!("filter-land".parse::<Stage>().unwrap(), Stage::FilterLand);
        assert!("plot".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stages_require_previous_output() {
        let dir = TempDir::new().unwrap();
        let pipeline = pipeline(&dir);
        assert!(matches!(pipeline.score(), Err(HsiError::MissingInput(_))));
        assert!(matches!(pipeline.aggregate(), Err(HsiError::MissingInput(_))));
        assert!(matches!(pipeline.export(), Err(HsiError::MissingInput(_))));
    }

    #[test]
    fn test_missing_source_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut config = PipelineConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.inputs.chl.path = dir.path().join("absent.nc");
        let pipeline = HsiPipeline::new(config).unwrap();
        assert!(matches!(
            pipeline.preprocess(),
            Err(HsiError::MissingInput(p)) if p.ends_with("absent.nc")
        ));
    }
}
