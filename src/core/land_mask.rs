use crate::core::grid::TargetGrid;
use crate::core::resample::{resample_to_grid, SourcePoints};
use crate::io::geojson::{month_file_name, PointCollection};
use crate::io::metadata::{ExportMetadata, FilterSummary, METADATA_FILE};
use crate::io::source::SourceField;
use crate::types::{Field2, HsiError, HsiResult, InterpolationMethod};
use ndarray::{Array2, Axis};
use std::path::Path;
use std::time::Instant;

/// Boolean sea/land grid aligned with the target grid (true = ocean)
#[derive(Debug, Clone)]
pub struct OceanMask {
    grid: TargetGrid,
    ocean: Array2<bool>,
}

impl OceanMask {
    /// Threshold noted in the metadata sidecar
    pub const THRESHOLD: &'static str = "elevation <= 0 (ocean only)";

    /// Mask from elevation already on the target grid. NaN compares false
    /// against the threshold and therefore counts as land.
    pub fn from_elevation(grid: TargetGrid, elevation: &Field2) -> HsiResult<Self> {
        if elevation.dim() != grid.shape() {
            return Err(HsiError::Shape(format!(
                "Elevation {:?} does not match grid {:?}",
                elevation.dim(),
                grid.shape()
            )));
        }

        let ocean = elevation.mapv(|z| z <= 0.0);
        let mask = Self { grid, ocean };
        log::info!(
            "Ocean mask: {} ocean cells, {} land cells",
            mask.ocean_count(),
            mask.land_count()
        );
        Ok(mask)
    }

    /// Resample bathymetric elevation (linear) onto the grid and threshold it
    pub fn from_bathymetry(grid: TargetGrid, bathymetry: &SourceField) -> HsiResult<Self> {
        if bathymetry.n_times() == 0 {
            return Err(HsiError::InvalidFormat(
                "Bathymetry has no elevation band".to_string(),
            ));
        }
        let points = SourcePoints::from_axes(&bathymetry.lat, &bathymetry.lon);
        let elevation = resample_to_grid(
            bathymetry.data.index_axis(Axis(0), 0),
            &points,
            &grid,
            InterpolationMethod::Linear,
        )?;
        Self::from_elevation(grid, &elevation)
    }

    pub fn grid(&self) -> &TargetGrid {
        &self.grid
    }

    pub fn ocean(&self) -> &Array2<bool> {
        &self.ocean
    }

    pub fn ocean_count(&self) -> usize {
        self.ocean.iter().filter(|&&o| o).count()
    }

    pub fn land_count(&self) -> usize {
        self.ocean.len() - self.ocean_count()
    }

    /// Whether the grid cell nearest to (lon, lat) is ocean; each axis is
    /// snapped independently
    pub fn is_ocean(&self, lon: f64, lat: f64) -> bool {
        let i = self.grid.nearest_lat_index(lat);
        let j = self.grid.nearest_lon_index(lon);
        self.ocean[[i, j]]
    }

    /// Keep only the features that snap to an ocean cell
    pub fn filter_collection(&self, collection: PointCollection) -> (PointCollection, FilterStats) {
        let original = collection.len();
        let kept: Vec<_> = collection
            .features
            .into_iter()
            .filter(|f| {
                let (lon, lat) = f.coordinates();
                self.is_ocean(lon, lat)
            })
            .collect();

        let stats = FilterStats {
            original,
            kept: kept.len(),
        };
        (PointCollection::new().with_features(kept), stats)
    }

    /// Filter every exported month in `dir` in place and update the sidecar
    pub fn filter_directory<P: AsRef<Path>>(&self, dir: P) -> HsiResult<ExportMetadata> {
        let dir = dir.as_ref();
        let metadata_path = dir.join(METADATA_FILE);
        let mut metadata = ExportMetadata::load(&metadata_path)?;

        let start = Instant::now();
        let months = metadata
            .available_data
            .iter()
            .map(|e| e.year_month())
            .collect::<HsiResult<Vec<_>>>()?;
        let mut total_removed = 0usize;
        let mut total_original = 0usize;

        for (i, month) in months.iter().enumerate() {
            let path = dir.join(month_file_name(*month));
            if !path.exists() {
                log::warn!("File not found, skipping: {}", path.display());
                continue;
            }

            let (filtered, stats) = self.filter_collection(PointCollection::load(&path)?);
            filtered.save(&path)?;

            total_removed += stats.removed();
            total_original += stats.original;
            if let Some(entry) = metadata.entry_mut(*month) {
                entry.features = stats.kept;
                entry.original_features = Some(stats.original);
                entry.land_points_removed = Some(stats.removed());
            }

            if i == 0 || (i + 1) % 6 == 0 {
                log::info!(
                    "Filtered {}/{}: {} ({}/{} features)",
                    i + 1,
                    months.len(),
                    month,
                    stats.kept,
                    stats.original
                );
            }
        }

        metadata.filter_applied = Some(FilterSummary {
            description: "Land points filtered using bathymetry data".to_string(),
            threshold: Self::THRESHOLD.to_string(),
            total_land_points_removed: total_removed,
        });
        metadata.save(&metadata_path)?;

        log::info!(
            "Land filtering done in {:.1}s: removed {} of {} features",
            start.elapsed().as_secs_f64(),
            total_removed,
            total_original
        );
        Ok(metadata)
    }
}

/// Feature counts of one filtered collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub original: usize,
    pub kept: usize,
}

impl FilterStats {
    pub fn removed(&self) -> usize {
        self.original - self.kept
    }
}
