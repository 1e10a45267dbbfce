use chrono::{Datelike, NaiveDate};
use ndarray::{Array2, Array3, ArrayBase, Data, Dimension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Single snapshot on the target grid (lat x lon)
pub type Field2 = Array2<f64>;

/// Time series on the target grid (time x lat x lon)
pub type Field3 = Array3<f64>;

/// Geographic bounding box of the study region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    /// Create a bounding box, rejecting out-of-range or inverted bounds
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> HsiResult<Self> {
        let bbox = Self {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> HsiResult<()> {
        let values = [self.lat_min, self.lat_max, self.lon_min, self.lon_max];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(HsiError::Config(format!(
                "Bounding box contains non-finite values: {:?}",
                self
            )));
        }

        if !(-90.0..=90.0).contains(&self.lat_min) || !(-90.0..=90.0).contains(&self.lat_max) {
            return Err(HsiError::Config(
                "Latitude values must be between -90 and 90".to_string(),
            ));
        }

        if !(-180.0..=180.0).contains(&self.lon_min) || !(-180.0..=180.0).contains(&self.lon_max)
        {
            return Err(HsiError::Config(
                "Longitude values must be between -180 and 180".to_string(),
            ));
        }

        if self.lat_min >= self.lat_max || self.lon_min >= self.lon_max {
            return Err(HsiError::Config(format!(
                "Bounding box min values must be < max values: {:?}",
                self
            )));
        }

        Ok(())
    }
}

/// Scattered interpolation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Value of the closest valid source sample
    #[default]
    Nearest,
    /// Barycentric interpolation inside the Delaunay triangulation
    Linear,
}

impl FromStr for InterpolationMethod {
    type Err = HsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "nearest" => Ok(InterpolationMethod::Nearest),
            "linear" => Ok(InterpolationMethod::Linear),
            other => Err(HsiError::Config(format!(
                "Unknown interpolation method: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for InterpolationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationMethod::Nearest => write!(f, "nearest"),
            InterpolationMethod::Linear => write!(f, "linear"),
        }
    }
}

/// Reduction applied to the days of a month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    #[default]
    Mean,
    Median,
}

impl FromStr for AggregationMethod {
    type Err = HsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(AggregationMethod::Mean),
            "median" => Ok(AggregationMethod::Median),
            other => Err(HsiError::Config(format!(
                "Unknown aggregation method: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationMethod::Mean => write!(f, "mean"),
            AggregationMethod::Median => write!(f, "median"),
        }
    }
}

/// Ocean variables entering the habitat model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variable {
    /// Chlorophyll-a concentration (mg/m³)
    Chlorophyll,
    /// Sea surface temperature (°C after conversion)
    SeaSurfaceTemperature,
    /// Surface salinity (PSU)
    Salinity,
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variable::Chlorophyll => write!(f, "CHL"),
            Variable::SeaSurfaceTemperature => write!(f, "SST"),
            Variable::Salinity => write!(f, "SO"),
        }
    }
}

/// Calendar month used as aggregation bucket key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> HsiResult<Self> {
        if !(1..=12).contains(&month) {
            return Err(HsiError::InvalidFormat(format!("Invalid month: {}", month)));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Stem used for exported point files, e.g. `2021_03`
    pub fn file_stem(&self) -> String {
        format!("{:04}_{:02}", self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = HsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| HsiError::InvalidFormat(format!("Invalid year-month label: {}", s)))?;
        let year = year
            .parse::<i32>()
            .map_err(|e| HsiError::InvalidFormat(format!("Invalid year in '{}': {}", s, e)))?;
        let month = month
            .parse::<u32>()
            .map_err(|e| HsiError::InvalidFormat(format!("Invalid month in '{}': {}", s, e)))?;
        Self::new(year, month)
    }
}

/// Valid-data statistics of a field, NaN cells excluded
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSummary {
    pub total: usize,
    pub valid: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl FieldSummary {
    pub fn of<S, D>(field: &ArrayBase<S, D>) -> Self
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let mut valid = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for &v in field.iter().filter(|v| !v.is_nan()) {
            valid += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }

        if valid == 0 {
            return Self {
                total: field.len(),
                valid,
                min: f64::NAN,
                max: f64::NAN,
                mean: f64::NAN,
            };
        }

        Self {
            total: field.len(),
            valid,
            min,
            max,
            mean: sum / valid as f64,
        }
    }

    pub fn valid_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.valid as f64 / self.total as f64
        }
    }
}

impl fmt::Display for FieldSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "valid {:.1}% ({}/{}), range {:.4} to {:.4}, mean {:.4}",
            self.valid_percent(),
            self.valid,
            self.total,
            self.min,
            self.max,
            self.mean
        )
    }
}

/// Error types for HSI processing
#[derive(Debug, thiserror::Error)]
pub enum HsiError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing input: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Missing field in container: {0}")]
    MissingField(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<ndarray::ShapeError> for HsiError {
    fn from(err: ndarray::ShapeError) -> Self {
        HsiError::Shape(err.to_string())
    }
}

/// Result type for HSI operations
pub type HsiResult<T> = Result<T, HsiError>;
