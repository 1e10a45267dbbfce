use crate::types::{BoundingBox, HsiError, HsiResult, YearMonth};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRange {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridInfo {
    pub n_lat: usize,
    pub n_lon: usize,
    pub total_points: usize,
    pub resolution: f64,
}

/// One exported month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthEntry {
    pub year: i32,
    pub month: u32,
    /// Features currently in the month's file
    pub features: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_features: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_points_removed: Option<usize>,
}

impl MonthEntry {
    pub fn year_month(&self) -> HsiResult<YearMonth> {
        YearMonth::new(self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSummary {
    pub description: String,
    pub threshold: String,
    pub total_land_points_removed: usize,
}

/// Sidecar describing the exported point collections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub total_months: usize,
    pub data_range: DataRange,
    pub spatial_bounds: BoundingBox,
    pub grid_info: GridInfo,
    pub available_data: Vec<MonthEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_applied: Option<FilterSummary>,
}

impl ExportMetadata {
    pub fn load<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(HsiError::MissingInput(path.to_path_buf()));
        }
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> HsiResult<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        log::debug!("Wrote {}", path.as_ref().display());
        Ok(())
    }

    pub fn entry_mut(&mut self, month: YearMonth) -> Option<&mut MonthEntry> {
        self.available_data
            .iter_mut()
            .find(|e| e.year == month.year && e.month == month.month)
    }
}
