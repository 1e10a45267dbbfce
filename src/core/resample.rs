use crate::core::grid::TargetGrid;
use crate::types::{Field2, HsiError, HsiResult, InterpolationMethod};
use kd_tree::KdTree2;
use ndarray::{Array1, Array2, ArrayView2};
use ordered_float::OrderedFloat;
use spade::{DelaunayTriangulation, FloatTriangulation, HasPosition, Point2, Triangulation};

/// Flattened (lon, lat) coordinates of the samples of a source field.
///
/// Built once per source variable and reused for every time step, since the
/// source coordinates do not change along the time axis.
#[derive(Debug, Clone)]
pub struct SourcePoints {
    coords: Vec<[f64; 2]>,
}

impl SourcePoints {
    /// Meshgrid of a rectilinear source grid, row-major over [lat, lon]
    pub fn from_axes(lat: &Array1<f64>, lon: &Array1<f64>) -> Self {
        let mut coords = Vec::with_capacity(lat.len() * lon.len());
        for &y in lat.iter() {
            for &x in lon.iter() {
                coords.push([x, y]);
            }
        }
        Self { coords }
    }

    /// Irregular sample locations given as (lon, lat) pairs
    pub fn from_pairs(coords: Vec<[f64; 2]>) -> Self {
        Self { coords }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn coords(&self) -> &[[f64; 2]] {
        &self.coords
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    position: Point2<f64>,
    value: f64,
}

impl HasPosition for Sample {
    type Scalar = f64;

    fn position(&self) -> Point2<f64> {
        self.position
    }
}

/// Scattered-data resampler onto a fixed target grid
#[derive(Debug, Clone)]
pub struct ScatteredResampler {
    targets: Vec<[f64; 2]>,
    shape: (usize, usize),
    method: InterpolationMethod,
}

impl ScatteredResampler {
    pub fn new(grid: &TargetGrid, method: InterpolationMethod) -> Self {
        Self {
            targets: grid.target_points(),
            shape: grid.shape(),
            method,
        }
    }

    pub fn method(&self) -> InterpolationMethod {
        self.method
    }

    /// Interpolate a 2D source field onto the target grid.
    ///
    /// NaN source samples are dropped before interpolation so they cannot
    /// contaminate valid neighbours. With no valid sample left the result is
    /// an all-NaN field of target shape.
    pub fn resample(&self, values: ArrayView2<f64>, points: &SourcePoints) -> HsiResult<Field2> {
        if values.len() != points.len() {
            return Err(HsiError::Shape(format!(
                "Source field has {} samples but {} coordinates were supplied",
                values.len(),
                points.len()
            )));
        }

        let valid: Vec<([f64; 2], f64)> = points
            .coords()
            .iter()
            .zip(values.iter())
            .filter(|(c, v)| !v.is_nan() && c[0].is_finite() && c[1].is_finite())
            .map(|(c, &v)| (*c, v))
            .collect();

        if valid.is_empty() {
            return Ok(Array2::from_elem(self.shape, f64::NAN));
        }

        let interpolated = match self.method {
            InterpolationMethod::Nearest => self.nearest(valid),
            InterpolationMethod::Linear => self.linear(valid)?,
        };

        Ok(Array2::from_shape_vec(self.shape, interpolated)?)
    }

    fn nearest(&self, valid: Vec<([f64; 2], f64)>) -> Vec<f64> {
        let tree = KdTree2::build_by_key(valid, |item, k| OrderedFloat(item.0[k]));

        self.targets
            .iter()
            .map(|target| {
                tree.nearest_by(target, |item, k| item.0[k])
                    .map(|found| found.item.1)
                    .unwrap_or(f64::NAN)
            })
            .collect()
    }

    fn linear(&self, valid: Vec<([f64; 2], f64)>) -> HsiResult<Vec<f64>> {
        let samples: Vec<Sample> = valid
            .into_iter()
            .map(|(c, value)| Sample {
                position: Point2::new(c[0], c[1]),
                value,
            })
            .collect();

        let triangulation = DelaunayTriangulation::<Sample>::bulk_load(samples)
            .map_err(|e| HsiError::Processing(format!("Triangulation failed: {:?}", e)))?;
        let barycentric = triangulation.barycentric();

        // Outside the convex hull there is no enclosing triangle: no extrapolation
        Ok(self
            .targets
            .iter()
            .map(|t| {
                barycentric
                    .interpolate(|v| v.data().value, Point2::new(t[0], t[1]))
                    .unwrap_or(f64::NAN)
            })
            .collect())
    }
}

/// One-shot convenience wrapper around [`ScatteredResampler`]
pub fn resample_to_grid(
    values: ArrayView2<f64>,
    points: &SourcePoints,
    grid: &TargetGrid,
    method: InterpolationMethod,
) -> HsiResult<Field2> {
    ScatteredResampler::new(grid, method).resample(values, points)
}
