use crate::core::grid::TargetGrid;
use crate::core::resample::{ScatteredResampler, SourcePoints};
use crate::fields::RawFields;
use crate::io::netcdf::decode_time;
use crate::io::source::{GriddedReader, SourceField};
use crate::types::{
    Field2, Field3, FieldSummary, HsiError, HsiResult, InterpolationMethod, Variable,
};
use chrono::NaiveDate;
use ndarray::{Array3, Axis};
use std::time::Instant;

/// Kelvin to Celsius offset
pub const KELVIN_OFFSET: f64 = 273.15;

const SEQUENTIAL_PROGRESS_INTERVAL: usize = 50;

/// Preprocessing parameters
#[derive(Debug, Clone)]
pub struct PreprocessParams {
    /// Scattered interpolation method
    pub method: InterpolationMethod,
    /// Resample time steps on a worker pool
    pub parallel: bool,
    /// Time steps per batch in parallel mode
    pub batch_size: usize,
    /// Upper bound of the worker pool size
    pub max_workers: usize,
    /// Only process the first N time steps
    pub max_time_steps: Option<usize>,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            method: InterpolationMethod::Nearest,
            parallel: true,
            batch_size: 100,
            max_workers: 4,
            max_time_steps: None,
        }
    }
}

/// A named variable inside a gridded source
#[derive(Clone, Copy)]
pub struct SourceRef<'a> {
    pub reader: &'a dyn GriddedReader,
    pub variable: &'a str,
}

impl<'a> SourceRef<'a> {
    pub fn new(reader: &'a dyn GriddedReader, variable: &'a str) -> Self {
        Self { reader, variable }
    }
}

fn is_kelvin(units: &str) -> bool {
    matches!(
        units.trim().to_lowercase().as_str(),
        "k" | "kelvin" | "kelvins" | "degree_kelvin" | "degrees_kelvin" | "deg_k" | "degk"
    )
}

/// Brings the three habitat variables onto the target grid, one time step at
/// a time
pub struct VariablePreprocessor {
    grid: TargetGrid,
    params: PreprocessParams,
}

impl VariablePreprocessor {
    pub fn new(grid: TargetGrid) -> Self {
        Self {
            grid,
            params: PreprocessParams::default(),
        }
    }

    pub fn with_params(grid: TargetGrid, params: PreprocessParams) -> HsiResult<Self> {
        if params.batch_size == 0 || params.max_workers == 0 {
            return Err(HsiError::Config(format!(
                "Batch size and worker count must be positive: {:?}",
                params
            )));
        }
        Ok(Self { grid, params })
    }

    pub fn grid(&self) -> &TargetGrid {
        &self.grid
    }

    pub fn params(&self) -> &PreprocessParams {
        &self.params
    }

    /// Read a variable into memory and apply its slice selection and unit
    /// conversion
    pub fn load_source(&self, source: SourceRef<'_>, kind: Variable) -> HsiResult<SourceField> {
        let info = source.reader.describe(source.variable)?;
        log::info!(
            "{} ({}): {} time steps, units {}",
            kind,
            info.long_name.as_deref().unwrap_or(source.variable),
            info.n_times,
            info.units.as_deref().unwrap_or("unknown")
        );

        let depth_index = match kind {
            Variable::Salinity => {
                let level = info.surface_level();
                if let Some(i) = level {
                    log::info!("{}: using surface level {} ({} m)", kind, i, info.depth_levels[i]);
                }
                level
            }
            _ => None,
        };

        let mut field = source.reader.read_variable(source.variable, depth_index)?;

        if kind == Variable::SeaSurfaceTemperature {
            match info.units.as_deref() {
                Some(units) if !is_kelvin(units) => log::warn!(
                    "{} units are '{}', not Kelvin; converting to Celsius anyway",
                    kind,
                    units
                ),
                None => log::debug!("{} has no units attribute, assuming Kelvin", kind),
                _ => {}
            }
            field.data.mapv_inplace(|k| k - KELVIN_OFFSET);
        }

        Ok(field)
    }

    /// Resample the first `n_times` steps of a source onto the target grid
    pub fn resample_series(&self, source: &SourceField, n_times: usize, kind: Variable) -> HsiResult<Field3> {
        if n_times > source.n_times() {
            return Err(HsiError::Shape(format!(
                "{}: {} time steps requested, {} available",
                kind,
                n_times,
                source.n_times()
            )));
        }

        let points = SourcePoints::from_axes(&source.lat, &source.lon);
        let resampler = ScatteredResampler::new(&self.grid, self.params.method);
        log::info!(
            "Resampling {} ({} steps, {} source points, {})",
            kind,
            n_times,
            points.len(),
            resampler.method()
        );

        let step = |t: usize| resampler.resample(source.data.index_axis(Axis(0), t), &points);
        self.run_steps(n_times, kind, step)
    }

    /// Drive `step` over every time index, sequentially or on the worker
    /// pool. A failing step is logged and its slot stays NaN.
    pub fn run_steps<F>(&self, n_times: usize, kind: Variable, step: F) -> HsiResult<Field3>
    where
        F: Fn(usize) -> HsiResult<Field2> + Sync,
    {
        let (n_lat, n_lon) = self.grid.shape();
        let mut output = Array3::from_elem((n_times, n_lat, n_lon), f64::NAN);

        if self.params.parallel {
            #[cfg(feature = "parallel")]
            {
                self.run_parallel(&mut output, kind, &step)?;
                return Ok(output);
            }

            #[cfg(not(feature = "parallel"))]
            log::warn!("Built without the parallel feature, processing {} sequentially", kind);
        }

        self.run_sequential(&mut output, kind, &step);
        Ok(output)
    }

    fn store(output: &mut Field3, t: usize, kind: Variable, result: HsiResult<Field2>) {
        match result {
            Ok(field) if field.dim() == (output.dim().1, output.dim().2) => {
                output.index_axis_mut(Axis(0), t).assign(&field);
            }
            Ok(field) => log::error!(
                "{} time step {}: result shape {:?} does not match grid",
                kind,
                t,
                field.dim()
            ),
            Err(e) => log::error!("{} time step {} failed: {}", kind, t, e),
        }
    }

    fn run_sequential<F>(&self, output: &mut Field3, kind: Variable, step: &F)
    where
        F: Fn(usize) -> HsiResult<Field2>,
    {
        let n_times = output.dim().0;
        let start = Instant::now();

        for t in 0..n_times {
            Self::store(output, t, kind, step(t));

            if (t + 1) % SEQUENTIAL_PROGRESS_INTERVAL == 0 || t + 1 == n_times {
                log::info!(
                    "{}: {}/{} steps ({:.1}s)",
                    kind,
                    t + 1,
                    n_times,
                    start.elapsed().as_secs_f64()
                );
            }
        }
    }

    #[cfg(feature = "parallel")]
    fn run_parallel<F>(&self, output: &mut Field3, kind: Variable, step: &F) -> HsiResult<()>
    where
        F: Fn(usize) -> HsiResult<Field2> + Sync,
    {
        use rayon::prelude::*;

        let n_times = output.dim().0;
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let workers = self.params.max_workers.min(cpus).max(1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| HsiError::Processing(format!("Failed to build worker pool: {}", e)))?;

        let indices: Vec<usize> = (0..n_times).collect();
        let n_batches = (n_times + self.params.batch_size - 1) / self.params.batch_size;
        log::info!(
            "{}: {} steps in {} batches of {} on {} workers",
            kind,
            n_times,
            n_batches,
            self.params.batch_size,
            workers
        );

        let start = Instant::now();
        for (b, batch) in indices.chunks(self.params.batch_size).enumerate() {
            let results: Vec<(usize, HsiResult<Field2>)> =
                pool.install(|| batch.par_iter().map(|&t| (t, step(t))).collect());

            for (t, result) in results {
                Self::store(output, t, kind, result);
            }

            log::info!(
                "{}: batch {}/{} done ({:.1}s)",
                kind,
                b + 1,
                n_batches,
                start.elapsed().as_secs_f64()
            );
        }

        Ok(())
    }

    /// Start date from the time axis of a source
    fn infer_start_date(source: SourceRef<'_>) -> HsiResult<NaiveDate> {
        let info = source.reader.describe(source.variable)?;
        let units = info.time_units.as_deref().ok_or_else(|| {
            HsiError::Config(format!(
                "No start_date configured and '{}' has no time units",
                source.variable
            ))
        })?;
        let first = info.time_values.first().copied().ok_or_else(|| {
            HsiError::Config(format!(
                "No start_date configured and '{}' has no time values",
                source.variable
            ))
        })?;
        Ok(decode_time(units, first)?.date())
    }

    /// Run the whole preprocessing stage for the three habitat variables
    pub fn process(
        &self,
        chl: SourceRef<'_>,
        sst: SourceRef<'_>,
        salinity: SourceRef<'_>,
        start_date: Option<NaiveDate>,
    ) -> HsiResult<RawFields> {
        let start_date = match start_date {
            Some(date) => date,
            None => {
                let date = Self::infer_start_date(chl)?;
                log::info!("Start date taken from the CHL time axis: {}", date);
                date
            }
        };

        let chl_source = self.load_source(chl, Variable::Chlorophyll)?;
        let sst_source = self.load_source(sst, Variable::SeaSurfaceTemperature)?;
        let so_source = self.load_source(salinity, Variable::Salinity)?;

        let lengths = [
            chl_source.n_times(),
            sst_source.n_times(),
            so_source.n_times(),
        ];
        let mut n_times = lengths.iter().copied().min().unwrap_or(0);
        if lengths.iter().any(|&n| n != n_times) {
            log::warn!(
                "Time axes differ (CHL {}, SST {}, SO {}); using the first {} steps",
                lengths[0],
                lengths[1],
                lengths[2],
                n_times
            );
        }
        if let Some(limit) = self.params.max_time_steps {
            if limit < n_times {
                log::info!("Limiting processing to {} of {} time steps", limit, n_times);
                n_times = limit;
            }
        }

        let total = Instant::now();
        let chl_grid = self.resample_series(&chl_source, n_times, Variable::Chlorophyll)?;
        drop(chl_source);
        let sst_grid =
            self.resample_series(&sst_source, n_times, Variable::SeaSurfaceTemperature)?;
        drop(sst_source);
        let so_grid = self.resample_series(&so_source, n_times, Variable::Salinity)?;
        drop(so_source);

        log::info!(
            "Preprocessing finished in {:.1}s",
            total.elapsed().as_secs_f64()
        );
        for (kind, field) in [
            (Variable::Chlorophyll, &chl_grid),
            (Variable::SeaSurfaceTemperature, &sst_grid),
            (Variable::Salinity, &so_grid),
        ] {
            let summary = FieldSummary::of(field);
            log::info!("{}: {}", kind, summary);
            if summary.valid == 0 {
                log::warn!("{} has no valid data on the target grid", kind);
            }
        }

        RawFields::new(
            self.grid.lat().clone(),
            self.grid.lon().clone(),
            start_date,
            chl_grid,
            sst_grid,
            so_grid,
        )
    }
}
