//! GeoJSON point collections, one file per month.
//!
//! Each grid cell with a finite composite index becomes a `Point` feature
//! carrying the index, its components and the underlying variables. Land is
//! not masked here; the land filter removes land points afterwards.

use crate::core::grid::TargetGrid;
use crate::fields::MonthlyFields;
use crate::io::metadata::{DataRange, ExportMetadata, GridInfo, MonthEntry, METADATA_FILE};
use crate::types::{HsiError, HsiResult, YearMonth};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A GeoJSON FeatureCollection of grid points
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointCollection {
    #[serde(rename = "type")]
    pub type_: String,
    pub features: Vec<PointFeature>,
}

impl PointCollection {
    pub fn new() -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            features: Vec::new(),
        }
    }

    pub fn with_features(mut self, features: Vec<PointFeature>) -> Self {
        self.features.extend(features);
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(HsiError::MissingInput(path.to_path_buf()));
        }
        let collection: Self = serde_json::from_reader(BufReader::new(File::open(path)?))?;
        if collection.type_ != "FeatureCollection" {
            return Err(HsiError::InvalidFormat(format!(
                "{} is a '{}', expected a FeatureCollection",
                path.display(),
                collection.type_
            )));
        }
        Ok(collection)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> HsiResult<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

impl Default for PointCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// A point feature; properties are kept as raw JSON so unknown keys survive a
/// read-filter-write cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PointFeature {
    #[serde(rename = "type")]
    pub type_: String,
    pub geometry: PointGeometry,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl PointFeature {
    pub fn point(lon: f64, lat: f64) -> Self {
        Self {
            type_: "Feature".to_string(),
            geometry: PointGeometry::Point {
                coordinates: [lon, lat],
            },
            properties: Map::new(),
        }
    }

    /// Set a numeric property; non-finite values are left out
    pub fn with_property(mut self, name: &str, value: f64) -> Self {
        if let Some(number) = serde_json::Number::from_f64(value) {
            self.properties.insert(name.to_string(), Value::Number(number));
        }
        self
    }

    /// (lon, lat)
    pub fn coordinates(&self) -> (f64, f64) {
        match self.geometry {
            PointGeometry::Point { coordinates } => (coordinates[0], coordinates[1]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PointGeometry {
    Point {
        /// [longitude, latitude]
        coordinates: [f64; 2],
    },
}

/// `hsi_YYYY_MM.geojson`
pub fn month_file_name(month: YearMonth) -> String {
    format!("hsi_{}.geojson", month.file_stem())
}

/// Build the point collection of month `index` of `monthly`
pub fn month_collection(monthly: &MonthlyFields, index: usize) -> HsiResult<PointCollection> {
    if index >= monthly.n_months() {
        return Err(HsiError::Shape(format!(
            "Month index {} out of range ({} months)",
            index,
            monthly.n_months()
        )));
    }

    let mut features = Vec::new();
    for (i, &lat) in monthly.lat_grid.iter().enumerate() {
        for (j, &lon) in monthly.lon_grid.iter().enumerate() {
            let hsi = monthly.hsi_total[[index, i, j]];
            if !hsi.is_finite() {
                continue;
            }
            features.push(
                PointFeature::point(lon, lat)
                    .with_property("hsi", hsi)
                    .with_property("hsi_chl", monthly.hsi_chl[[index, i, j]])
                    .with_property("hsi_sst", monthly.hsi_sst[[index, i, j]])
                    .with_property("hsi_so", monthly.hsi_so[[index, i, j]])
                    .with_property("chlor_a", monthly.chl[[index, i, j]])
                    .with_property("sst", monthly.sst[[index, i, j]])
                    .with_property("salinity", monthly.salinity[[index, i, j]]),
            );
        }
    }

    Ok(PointCollection::new().with_features(features))
}

/// Writes monthly fields as point collections plus the metadata sidecar
pub struct GeoJsonExporter {
    output_dir: PathBuf,
}

impl GeoJsonExporter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn export(&self, monthly: &MonthlyFields) -> HsiResult<ExportMetadata> {
        monthly.validate()?;
        let (first, last) = match (monthly.months.first(), monthly.months.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(HsiError::Processing(
                    "No months to export".to_string(),
                ))
            }
        };

        std::fs::create_dir_all(&self.output_dir)?;
        log::info!(
            "Exporting {} months to {}",
            monthly.n_months(),
            self.output_dir.display()
        );

        let mut available_data = Vec::with_capacity(monthly.n_months());
        for (index, &month) in monthly.months.iter().enumerate() {
            let collection = month_collection(monthly, index)?;
            let path = self.output_dir.join(month_file_name(month));
            collection.save(&path)?;
            log::debug!("{}: {} features", month, collection.len());

            available_data.push(MonthEntry {
                year: month.year,
                month: month.month,
                features: collection.len(),
                original_features: None,
                land_points_removed: None,
            });
        }

        let grid = TargetGrid::from_axes(monthly.lat_grid.clone(), monthly.lon_grid.clone())?;
        let metadata = ExportMetadata {
            total_months: monthly.n_months(),
            data_range: DataRange {
                start: first.to_string(),
                end: last.to_string(),
            },
            spatial_bounds: grid.bounds(),
            grid_info: GridInfo {
                n_lat: grid.shape().0,
                n_lon: grid.shape().1,
                total_points: grid.cell_count(),
                resolution: grid.resolution(),
            },
            available_data,
            filter_applied: None,
        };
        metadata.save(self.output_dir.join(METADATA_FILE))?;

        let total: usize = metadata.available_data.iter().map(|e| e.features).sum();
        log::info!(
            "Exported {} features over {} months ({} to {})",
            total,
            metadata.total_months,
            first,
            last
        );
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array3};
    use tempfile::TempDir;

    fn monthly() -> MonthlyFields {
        let cube = |v: f64| Array3::from_elem((2, 2, 3), v);
        let mut hsi_total = cube(0.8);
        hsi_total[[0, 0, 0]] = f64::NAN;
        hsi_total[[1, 1, 2]] = f64::NAN;
        let mut sst = cube(28.0);
        sst[[0, 1, 1]] = f64::NAN;

        MonthlyFields {
            lat_grid: Array1::from(vec![-6.0, -5.95]),
            lon_grid: Array1::from(vec![105.0, 105.05, 105.1]),
            months: vec![
                YearMonth::new(2021, 1).unwrap(),
                YearMonth::new(2021, 2).unwrap(),
            ],
            chl: cube(1.0),
            sst,
            salinity: cube(33.5),
            hsi_chl: cube(1.0),
            hsi_sst: cube(1.0),
            hsi_so: cube(1.0),
            hsi_total,
        }
    }

    #[test]
    fn test_only_finite_cells_are_exported() {
        let collection = month_collection(&monthly(), 0).unwrap();
        assert_eq!(collection.len(), 5);

        let first = &collection.features[0];
        assert_eq!(first.coordinates(), (105.05, -6.0));
        assert_eq!(first.properties["hsi"], 0.8);
        assert_eq!(first.properties["chlor_a"], 1.0);

        // Cell (1, 1) lacks SST: the property is omitted, the point is kept
        let gap = collection
            .features
            .iter()
            .find(|f| f.coordinates() == (105.05, -5.95))
            .unwrap();
        assert!(gap.properties.get("sst").is_none());
        assert!(gap.properties.get("salinity").is_some());

        assert!(month_collection(&monthly(), 2).is_err());
    }

    #[test]
    fn test_every_finite_grid_cell_is_exported() {
        let mut fields = monthly();
        fields.hsi_total.fill(0.6);
        let collection = month_collection(&fields, 1).unwrap();
        assert_eq!(collection.len(), fields.lat_grid.len() * fields.lon_grid.len());

        for (i, &lat) in fields.lat_grid.iter().enumerate() {
            for (j, &lon) in fields.lon_grid.iter().enumerate() {
                assert!(
                    collection.features.iter().any(|f| f.coordinates() == (lon, lat)),
                    "missing cell ({}, {})",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_export_writes_files_and_metadata() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("geojson");
        let metadata = GeoJsonExporter::new(&out).export(&monthly()).unwrap();

        assert_eq!(metadata.total_months, 2);
        assert_eq!(metadata.data_range.start, "2021-01");
        assert_eq!(metadata.data_range.end, "2021-02");
        assert_eq!(metadata.grid_info.total_points, 6);
        assert_eq!(metadata.available_data[1].features, 5);

        let feb = PointCollection::load(out.join("hsi_2021_02.geojson")).unwrap();
        assert_eq!(feb.len(), 5);
        assert_eq!(feb.type_, "FeatureCollection");

        let saved = ExportMetadata::load(out.join(METADATA_FILE)).unwrap();
        assert_eq!(saved, metadata);
    }

    #[test]
    fn test_feature_json_layout() {
        let feature = PointFeature::point(105.0, -6.0).with_property("hsi", 0.5);
        let json = serde_json::to_value(&feature).unwrap();
        assert_eq!(json["type"], "Feature");
        assert_eq!(json["geometry"]["type"], "Point");
        assert_eq!(json["geometry"]["coordinates"][0], 105.0);
        assert_eq!(json["properties"]["hsi"], 0.5);
    }
}
