use crate::core::preprocess::PreprocessParams;
use crate::core::suitability::SuitabilityParams;
use crate::types::{AggregationMethod, BoundingBox, HsiError, HsiResult, InterpolationMethod};
use chrono::NaiveDate;
use serde::de::Error;
use serde::{Deserialize, Deserializer};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// One variable of one input file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InputSpec {
    pub path: PathBuf,
    pub variable: String,
}

impl InputSpec {
    pub fn new<P: Into<PathBuf>>(path: P, variable: &str) -> Self {
        Self {
            path: path.into(),
            variable: variable.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InputFiles {
    pub chl: InputSpec,
    pub sst: InputSpec,
    pub salinity: InputSpec,
    pub bathymetry: InputSpec,
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            chl: InputSpec::new("data/CHL 21-24.nc", "CHL"),
            sst: InputSpec::new("data/SST 21-24.nc", "analysed_sst"),
            salinity: InputSpec::new("data/SO 21-24.nc", "so"),
            bathymetry: InputSpec::new("data/BatimetriSelatSunda.nc", "elevation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ParallelSettings {
    pub enabled: bool,
    pub batch_size: usize,
    pub max_workers: usize,
}

impl Default for ParallelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 100,
            max_workers: 4,
        }
    }
}

/// Validated pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub bbox: BoundingBox,
    /// Target grid step in degrees
    pub resolution: f64,
    /// Date of time index 0; taken from the CHL time axis when absent
    pub start_date: Option<NaiveDate>,
    pub inputs: InputFiles,
    pub output_dir: PathBuf,
    pub interpolation: InterpolationMethod,
    pub aggregation: AggregationMethod,
    pub parallel: ParallelSettings,
    pub max_time_steps: Option<usize>,
    pub suitability: SuitabilityParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bbox: BoundingBox {
                lat_min: -6.775,
                lat_max: -5.475,
                lon_min: 104.5625,
                lon_max: 105.9375,
            },
            resolution: 0.05,
            start_date: None,
            inputs: InputFiles::default(),
            output_dir: PathBuf::from("data"),
            interpolation: InterpolationMethod::Nearest,
            aggregation: AggregationMethod::Mean,
            parallel: ParallelSettings::default(),
            max_time_steps: None,
            suitability: SuitabilityParams::default(),
        }
    }
}

impl<'de> Deserialize<'de> for PipelineConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct ConfigHelper {
            bbox: Option<BboxHelper>,
            resolution: Option<f64>,
            start_date: Option<String>,
            #[serde(default)]
            inputs: InputFiles,
            output_dir: Option<PathBuf>,
            interpolation: Option<String>,
            aggregation: Option<String>,
            #[serde(default)]
            parallel: ParallelSettings,
            max_time_steps: Option<usize>,
            #[serde(default)]
            suitability: SuitabilityParams,
        }

        #[derive(Deserialize)]
        struct BboxHelper {
            lat_min: f64,
            lat_max: f64,
            lon_min: f64,
            lon_max: f64,
        }

        let helper = ConfigHelper::deserialize(deserializer)?;
        let defaults = PipelineConfig::default();

        let bbox = match helper.bbox {
            Some(b) => BoundingBox::new(b.lat_min, b.lat_max, b.lon_min, b.lon_max)
                .map_err(|e| D::Error::custom(format!("Invalid bbox: {}", e)))?,
            None => defaults.bbox,
        };

        let start_date = match helper.start_date {
            Some(text) => Some(
                NaiveDate::parse_from_str(&text, DATE_FORMAT)
                    .map_err(|e| D::Error::custom(format!("Invalid start_date format: {}", e)))?,
            ),
            None => None,
        };

        let interpolation = match helper.interpolation {
            Some(name) => name
                .parse::<InterpolationMethod>()
                .map_err(D::Error::custom)?,
            None => defaults.interpolation,
        };
        let aggregation = match helper.aggregation {
            Some(name) => name
                .parse::<AggregationMethod>()
                .map_err(D::Error::custom)?,
            None => defaults.aggregation,
        };

        let config = PipelineConfig {
            bbox,
            resolution: helper.resolution.unwrap_or(defaults.resolution),
            start_date,
            inputs: helper.inputs,
            output_dir: helper.output_dir.unwrap_or(defaults.output_dir),
            interpolation,
            aggregation,
            parallel: helper.parallel,
            max_time_steps: helper.max_time_steps,
            suitability: helper.suitability,
        };
        config.validate().map_err(D::Error::custom)?;
        Ok(config)
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            HsiError::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| HsiError::Config(format!("{}: {}", path.display(), e)))?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Checks everything that must hold before any processing starts
    pub fn validate(&self) -> HsiResult<()> {
        self.bbox.validate()?;
        if !self.resolution.is_finite() || self.resolution <= 0.0 {
            return Err(HsiError::Config(format!(
                "Resolution must be positive, got {}",
                self.resolution
            )));
        }
        if self.parallel.batch_size == 0 || self.parallel.max_workers == 0 {
            return Err(HsiError::Config(
                "parallel.batch_size and parallel.max_workers must be positive".to_string(),
            ));
        }
        if self.max_time_steps == Some(0) {
            return Err(HsiError::Config(
                "max_time_steps must be positive when set".to_string(),
            ));
        }
        self.suitability.validate()
    }

    pub fn preprocess_params(&self) -> PreprocessParams {
        PreprocessParams {
            method: self.interpolation,
            parallel: self.parallel.enabled,
            batch_size: self.parallel.batch_size,
            max_workers: self.parallel.max_workers,
            max_time_steps: self.max_time_steps,
        }
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.output_dir.join("processed")
    }

    pub fn processed_path(&self) -> PathBuf {
        self.processed_dir().join("processed_data.npz")
    }

    pub fn hsi_path(&self) -> PathBuf {
        self.processed_dir().join("hsi_data.npz")
    }

    pub fn monthly_path(&self) -> PathBuf {
        self.processed_dir().join("monthly_hsi_data.npz")
    }

    pub fn geojson_dir(&self) -> PathBuf {
        self.output_dir.join("geojson")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_study_region_defaults() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.inputs.sst.variable, "analysed_sst");
        assert_eq!(
            config.monthly_path(),
            PathBuf::from("data/processed/monthly_hsi_data.npz")
        );
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "bbox": {"lat_min": -2.0, "lat_max": 0.0, "lon_min": 100.0, "lon_max": 102.0},
            "resolution": 0.25,
            "start_date": "2022-03-01",
            "inputs": {
                "chl": {"path": "in/chl.nc", "variable": "chlor_a"},
                "sst": {"path": "in/sst.nc", "variable": "sst"},
                "salinity": {"path": "in/so.nc", "variable": "so"},
                "bathymetry": {"path": "in/bathy.nc", "variable": "z"}
            },
            "output_dir": "out",
            "interpolation": "linear",
            "aggregation": "median",
            "parallel": {"enabled": false, "batch_size": 10},
            "max_time_steps": 30,
            "suitability": {"sst": {"min_acceptable": 24.0, "optimal_min": 26.0, "optimal_max": 29.0, "max_acceptable": 31.0}}
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.resolution, 0.25);
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2022, 3, 1));
        assert_eq!(config.interpolation, InterpolationMethod::Linear);
        assert_eq!(config.aggregation, AggregationMethod::Median);
        assert!(!config.parallel.enabled);
        assert_eq!(config.parallel.max_workers, 4);
        assert_eq!(config.suitability.sst.min_acceptable, 24.0);
        assert_eq!(config.suitability.chl, SuitabilityParams::default().chl);
        assert_eq!(config.inputs.bathymetry.variable, "z");

        let params = config.preprocess_params();
        assert_eq!(params.batch_size, 10);
        assert_eq!(params.max_time_steps, Some(30));
        assert_eq!(config.geojson_dir(), PathBuf::from("out/geojson"));
    }

    #[test]
    fn test_example_config_parses() {
        let json = include_str!("../config/hsimap.example.json");
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.bbox, PipelineConfig::default().bbox);
        assert_eq!(config.start_date, NaiveDate::from_ymd_opt(2021, 1, 1));
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        for json in [
            r#"{"bbox": {"lat_min": 0.0, "lat_max": -1.0, "lon_min": 100.0, "lon_max": 101.0}}"#,
            r#"{"resolution": 0.0}"#,
            r#"{"resolution": -0.05}"#,
            r#"{"interpolation": "cubic"}"#,
            r#"{"aggregation": "max"}"#,
            r#"{"start_date": "01/03/2021"}"#,
            r#"{"parallel": {"batch_size": 0}}"#,
            r#"{"unknown_key": 1}"#,
        ] {
            assert!(
                serde_json::from_str::<PipelineConfig>(json).is_err(),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_from_file_maps_errors_to_config() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            PipelineConfig::from_file(dir.path().join("missing.json")),
            Err(HsiError::Config(_))
        ));

        let path = dir.path().join("bad.json");
        let mut file = File::create(&path).unwrap();
        write!(file, r#"{{"resolution": -1}}"#).unwrap();
        assert!(matches!(
            PipelineConfig::from_file(&path),
            Err(HsiError::Config(_))
        ));
    }
}
