use crate::fields::{HsiFields, RawFields};
use crate::types::{Field3, FieldSummary, HsiError, HsiResult};
use ndarray::{Array, ArrayBase, Data, Dimension, Zip};
use serde::{Deserialize, Serialize};

/// Score lost across the optimal band of a peaked curve
const PEAK_BAND_DROP: f64 = 0.3;
/// Score at the edge of the optimal band of a peaked curve
const PEAK_BAND_EDGE: f64 = 1.0 - PEAK_BAND_DROP;
/// Divisor of the linear decay outside the optimal band
const PEAK_OUTER_DECAY: f64 = 2.0;

/// Response peaking at a single optimum, used for chlorophyll.
///
/// Inside `optimum ± tolerance` the score falls linearly from 1.0 to 0.7;
/// beyond it the score keeps falling with slope `1 / 2` per unit distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakedCurve {
    pub min_acceptable: f64,
    pub max_acceptable: f64,
    pub optimum: f64,
    pub tolerance: f64,
}

impl PeakedCurve {
    pub fn validate(&self) -> HsiResult<()> {
        let ordered = self.min_acceptable <= self.optimum && self.optimum <= self.max_acceptable;
        if !ordered || self.min_acceptable >= self.max_acceptable || !(self.tolerance > 0.0) {
            return Err(HsiError::Config(format!(
                "Invalid peaked response curve: {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn score(&self, x: f64) -> f64 {
        if x.is_nan() || x < self.min_acceptable || x > self.max_acceptable {
            return f64::NAN;
        }

        let distance = (x - self.optimum).abs();
        let score = if distance <= self.tolerance {
            1.0 - (distance / self.tolerance) * PEAK_BAND_DROP
        } else {
            PEAK_BAND_EDGE - (distance - self.tolerance) / PEAK_OUTER_DECAY
        };
        score.clamp(0.0, 1.0)
    }
}

/// Trapezoidal response: 1.0 across the optimal band, linear ramps to 0 at
/// the acceptable limits. Used for temperature and salinity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauCurve {
    pub min_acceptable: f64,
    pub optimal_min: f64,
    pub optimal_max: f64,
    pub max_acceptable: f64,
}

impl PlateauCurve {
    pub fn validate(&self) -> HsiResult<()> {
        if !(self.min_acceptable < self.optimal_min
            && self.optimal_min <= self.optimal_max
            && self.optimal_max < self.max_acceptable)
        {
            return Err(HsiError::Config(format!(
                "Invalid plateau response curve: {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn score(&self, x: f64) -> f64 {
        if x.is_nan() || x < self.min_acceptable || x > self.max_acceptable {
            return f64::NAN;
        }

        let score = if x < self.optimal_min {
            (x - self.min_acceptable) / (self.optimal_min - self.min_acceptable)
        } else if x > self.optimal_max {
            (self.max_acceptable - x) / (self.max_acceptable - self.optimal_max)
        } else {
            1.0
        };
        score.clamp(0.0, 1.0)
    }
}

/// Default chlorophyll curve (mg/m³)
pub const DEFAULT_CHL_CURVE: PeakedCurve = PeakedCurve {
    min_acceptable: 0.1,
    max_acceptable: 3.0,
    optimum: 1.0,
    tolerance: 0.5,
};

/// Default temperature curve (°C)
pub const DEFAULT_SST_CURVE: PlateauCurve = PlateauCurve {
    min_acceptable: 25.0,
    optimal_min: 27.0,
    optimal_max: 29.0,
    max_acceptable: 31.0,
};

/// Default salinity curve (PSU)
pub const DEFAULT_SALINITY_CURVE: PlateauCurve = PlateauCurve {
    min_acceptable: 31.0,
    optimal_min: 33.0,
    optimal_max: 34.0,
    max_acceptable: 36.0,
};

/// Response curves of the three habitat variables
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuitabilityParams {
    pub chl: PeakedCurve,
    pub sst: PlateauCurve,
    pub salinity: PlateauCurve,
}

impl Default for SuitabilityParams {
    fn default() -> Self {
        Self {
            chl: DEFAULT_CHL_CURVE,
            sst: DEFAULT_SST_CURVE,
            salinity: DEFAULT_SALINITY_CURVE,
        }
    }
}

impl SuitabilityParams {
    pub fn validate(&self) -> HsiResult<()> {
        self.chl.validate()?;
        self.sst.validate()?;
        self.salinity.validate()
    }
}

/// Chlorophyll suitability with the default curve
pub fn chl_score(x: f64) -> f64 {
    DEFAULT_CHL_CURVE.score(x)
}

/// Temperature (°C) suitability with the default curve
pub fn sst_score(x: f64) -> f64 {
    DEFAULT_SST_CURVE.score(x)
}

/// Salinity (PSU) suitability with the default curve
pub fn salinity_score(x: f64) -> f64 {
    DEFAULT_SALINITY_CURVE.score(x)
}

/// Apply a scalar scoring function elementwise, any dimensionality
pub fn score_array<S, D, F>(values: &ArrayBase<S, D>, score: F) -> Array<f64, D>
where
    S: Data<Elem = f64>,
    D: Dimension,
    F: Fn(f64) -> f64,
{
    values.mapv(score)
}

fn geometric_mean(chl: f64, sst: f64, so: f64) -> f64 {
    if chl.is_nan() || sst.is_nan() || so.is_nan() {
        return f64::NAN;
    }
    (chl * sst * so).cbrt()
}

/// Composite index: cube root of the product of the three scores, NaN when
/// any component is NaN
pub fn composite_index<D: Dimension>(
    chl: &Array<f64, D>,
    sst: &Array<f64, D>,
    so: &Array<f64, D>,
) -> HsiResult<Array<f64, D>> {
    if chl.shape() != sst.shape() || chl.shape() != so.shape() {
        return Err(HsiError::Shape(format!(
            "Score arrays differ in shape: {:?}, {:?}, {:?}",
            chl.shape(),
            sst.shape(),
            so.shape()
        )));
    }

    #[cfg(feature = "parallel")]
    let total = Zip::from(chl)
        .and(sst)
        .and(so)
        .par_map_collect(|&c, &t, &s| geometric_mean(c, t, s));

    #[cfg(not(feature = "parallel"))]
    let total = Zip::from(chl)
        .and(sst)
        .and(so)
        .map_collect(|&c, &t, &s| geometric_mean(c, t, s));

    Ok(total)
}

/// Scores a preprocessed record into per-variable and composite indices
pub struct HsiCalculator {
    params: SuitabilityParams,
}

impl HsiCalculator {
    /// Create a calculator with the default response curves
    pub fn new() -> Self {
        Self {
            params: SuitabilityParams::default(),
        }
    }

    /// Create a calculator with custom response curves
    pub fn with_params(params: SuitabilityParams) -> HsiResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &SuitabilityParams {
        &self.params
    }

    fn score_cube<F>(values: &Field3, score: F) -> Field3
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        let scored = Zip::from(values).par_map_collect(|&v| score(v));

        #[cfg(not(feature = "parallel"))]
        let scored = score_array(values, score);

        scored
    }

    pub fn calculate(&self, raw: RawFields) -> HsiResult<HsiFields> {
        raw.validate()?;
        log::info!(
            "Calculating HSI for {} time steps on a {}x{} grid",
            raw.n_times(),
            raw.lat_grid.len(),
            raw.lon_grid.len()
        );

        let params = self.params;
        let hsi_chl = Self::score_cube(&raw.chl, |x| params.chl.score(x));
        let hsi_sst = Self::score_cube(&raw.sst, |x| params.sst.score(x));
        let hsi_so = Self::score_cube(&raw.salinity, |x| params.salinity.score(x));
        let hsi_total = composite_index(&hsi_chl, &hsi_sst, &hsi_so)?;

        for (name, field) in [
            ("HSI_CHL", &hsi_chl),
            ("HSI_SST", &hsi_sst),
            ("HSI_SO", &hsi_so),
            ("HSI_total", &hsi_total),
        ] {
            log::info!("{}: {}", name, FieldSummary::of(field));
        }

        HsiFields::new(raw, hsi_chl, hsi_sst, hsi_so, hsi_total)
    }
}

impl Default for HsiCalculator {
    fn default() -> Self {
        Self::new()
    }
}
