use crate::types::{BoundingBox, HsiError, HsiResult};
use ndarray::Array1;

/// Common target lattice every source variable is resampled onto
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    lat: Array1<f64>,
    lon: Array1<f64>,
    resolution: f64,
}

impl TargetGrid {
    /// Build the grid covering `bbox` with a fixed step of `resolution` degrees.
    ///
    /// Each axis follows `arange(min, max + resolution, resolution)`: the upper
    /// bound is padded by one step so that `max` survives floating-point
    /// accumulation of the step.
    pub fn from_bbox(bbox: &BoundingBox, resolution: f64) -> HsiResult<Self> {
        if !resolution.is_finite() || resolution <= 0.0 {
            return Err(HsiError::Config(format!(
                "Grid resolution must be positive, got {}",
                resolution
            )));
        }
        bbox.validate()?;

        let lat = Self::axis(bbox.lat_min, bbox.lat_max, resolution);
        let lon = Self::axis(bbox.lon_min, bbox.lon_max, resolution);

        log::info!(
            "Target grid: {} x {} = {} cells at {}° (~{:.1} km)",
            lat.len(),
            lon.len(),
            lat.len() * lon.len(),
            resolution,
            resolution * 111.0
        );

        Ok(Self {
            lat,
            lon,
            resolution,
        })
    }

    /// Wrap existing coordinate axes, e.g. those loaded from a container
    pub fn from_axes(lat: Array1<f64>, lon: Array1<f64>) -> HsiResult<Self> {
        for (name, axis) in [("lat", &lat), ("lon", &lon)] {
            if axis.is_empty() {
                return Err(HsiError::Shape(format!("{} axis is empty", name)));
            }
            if (1..axis.len()).any(|i| !(axis[i] > axis[i - 1])) {
                return Err(HsiError::Shape(format!(
                    "{} axis must be strictly increasing",
                    name
                )));
            }
        }

        let resolution = if lat.len() > 1 {
            lat[1] - lat[0]
        } else if lon.len() > 1 {
            lon[1] - lon[0]
        } else {
            // Single cell: no step to infer
            0.0
        };

        Ok(Self {
            lat,
            lon,
            resolution,
        })
    }

    fn axis(min: f64, max: f64, step: f64) -> Array1<f64> {
        let stop = max + step;
        let count = ((stop - min) / step).ceil().max(0.0) as usize;
        Array1::from_iter((0..count).map(|i| min + i as f64 * step))
    }

    pub fn lat(&self) -> &Array1<f64> {
        &self.lat
    }

    pub fn lon(&self) -> &Array1<f64> {
        &self.lon
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// (n_lat, n_lon)
    pub fn shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }

    pub fn cell_count(&self) -> usize {
        self.lat.len() * self.lon.len()
    }

    /// Flattened (lon, lat) pairs of the meshgrid, row-major over [lat, lon]
    pub fn target_points(&self) -> Vec<[f64; 2]> {
        let mut points = Vec::with_capacity(self.cell_count());
        for &lat in self.lat.iter() {
            for &lon in self.lon.iter() {
                points.push([lon, lat]);
            }
        }
        points
    }

    pub fn nearest_lat_index(&self, lat: f64) -> usize {
        nearest_index(&self.lat, lat)
    }

    pub fn nearest_lon_index(&self, lon: f64) -> usize {
        nearest_index(&self.lon, lon)
    }

    /// Bounds actually covered by the grid (may exceed the configured bbox by one step)
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox {
            lat_min: self.lat[0],
            lat_max: self.lat[self.lat.len() - 1],
            lon_min: self.lon[0],
            lon_max: self.lon[self.lon.len() - 1],
        }
    }
}

/// Index of the axis value with minimum absolute distance (first one on ties)
pub fn nearest_index(axis: &Array1<f64>, value: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &v) in axis.iter().enumerate() {
        let dist = (v - value).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_grid_includes_upper_bound() {
        let bbox = BoundingBox::new(-2.0, 0.0, 100.0, 102.0).unwrap();
        let grid = TargetGrid::from_bbox(&bbox, 1.0).unwrap();

        assert_eq!(grid.lat(), &array![-2.0, -1.0, 0.0]);
        assert_eq!(grid.lon(), &array![100.0, 101.0, 102.0]);
        assert_eq!(grid.shape(), (3, 3));
        assert_eq!(grid.cell_count(), 9);
    }

    #[test]
    fn test_fractional_resolution() {
        let bbox = BoundingBox::new(-6.775, -5.475, 104.5625, 105.9375).unwrap();
        let grid = TargetGrid::from_bbox(&bbox, 0.05).unwrap();

        let lat = grid.lat();
        assert_abs_diff_eq!(lat[0], -6.775, epsilon = 1e-12);
        assert!(lat[lat.len() - 1] >= -5.475 - 1e-9);
        assert!((1..lat.len()).all(|i| lat[i] > lat[i - 1]));

        let lon = grid.lon();
        assert!(lon[lon.len() - 1] >= 105.9375 - 1e-9);
        assert_abs_diff_eq!(lon[1] - lon[0], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_resolution_is_rejected() {
        let bbox = BoundingBox::new(-2.0, 0.0, 100.0, 102.0).unwrap();
        assert!(matches!(
            TargetGrid::from_bbox(&bbox, 0.0),
            Err(HsiError::Config(_))
        ));
        assert!(TargetGrid::from_bbox(&bbox, -0.5).is_err());
        assert!(TargetGrid::from_bbox(&bbox, f64::NAN).is_err());
    }

    #[test]
    fn test_inverted_bbox_is_rejected() {
        let bbox = BoundingBox {
            lat_min: 0.0,
            lat_max: -2.0,
            lon_min: 100.0,
            lon_max: 102.0,
        };
        assert!(TargetGrid::from_bbox(&bbox, 1.0).is_err());
    }

    #[test]
    fn test_target_points_are_row_major() {
        let bbox = BoundingBox::new(-2.0, 0.0, 100.0, 102.0).unwrap();
        let grid = TargetGrid::from_bbox(&bbox, 1.0).unwrap();
        let points = grid.target_points();

        assert_eq!(points.len(), 9);
        assert_eq!(points[0], [100.0, -2.0]);
        assert_eq!(points[1], [101.0, -2.0]);
        assert_eq!(points[3], [100.0, -1.0]);
        assert_eq!(points[8], [102.0, 0.0]);
    }

    #[test]
    fn test_nearest_index_per_axis() {
        let axis = array![0.0, 1.0, 2.0];
        assert_eq!(nearest_index(&axis, -5.0), 0);
        assert_eq!(nearest_index(&axis, 1.4), 1);
        assert_eq!(nearest_index(&axis, 1.6), 2);
        // Ties resolve to the first index, like argmin
        assert_eq!(nearest_index(&axis, 0.5), 0);
    }

    #[test]
    fn test_from_axes_requires_increasing() {
        assert!(TargetGrid::from_axes(array![0.0, 1.0], array![5.0, 6.0]).is_ok());
        assert!(TargetGrid::from_axes(array![1.0, 0.0], array![5.0, 6.0]).is_err());
        assert!(TargetGrid::from_axes(array![], array![5.0]).is_err());
    }
}
