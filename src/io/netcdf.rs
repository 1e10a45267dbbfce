use crate::io::source::{GriddedReader, SourceField, VariableInfo};
use crate::types::{HsiError, HsiResult};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use gdal::{Dataset, Metadata};
use ndarray::{Array1, Array2, Axis};
use std::path::{Path, PathBuf};

/// Convert a CF time offset (`"<unit> since <reference>"`) to a timestamp
pub fn decode_time(units: &str, value: f64) -> HsiResult<NaiveDateTime> {
    if !value.is_finite() {
        return Err(HsiError::InvalidFormat(format!(
            "Non-finite time value {}",
            value
        )));
    }

    let (unit, reference) = units
        .split_once(" since ")
        .ok_or_else(|| HsiError::InvalidFormat(format!("Unsupported time units: {}", units)))?;

    let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        other => {
            return Err(HsiError::InvalidFormat(format!(
                "Unsupported time unit: {}",
                other
            )))
        }
    };

    let reference = parse_reference(reference)?;
    let millis = (value * seconds_per_unit * 1000.0).round() as i64;
    Ok(reference + Duration::milliseconds(millis))
}

fn parse_reference(text: &str) -> HsiResult<NaiveDateTime> {
    let text = text
        .trim()
        .trim_end_matches(" UTC")
        .trim_end_matches('Z')
        .trim();

    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }

    // Date only, possibly with a non-padded time we do not need
    let date_part = text.split([' ', 'T']).next().unwrap_or(text);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| HsiError::InvalidFormat(format!("Invalid time reference: {}", text)))
}

/// Parse GDAL list metadata such as `{0.494,1.541,2.645}`
fn parse_value_list(text: &str) -> Vec<f64> {
    text.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .split(',')
        .filter_map(|v| v.trim().parse::<f64>().ok())
        .collect()
}

/// NetCDF reader backed by GDAL's netCDF driver.
///
/// Each variable is opened as a `NETCDF:"file":variable` subdataset whose
/// bands enumerate the (time, depth) combinations of the variable.
pub struct NetcdfReader {
    path: PathBuf,
}

impl NetcdfReader {
    pub fn open<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(HsiError::MissingInput(path));
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_variable(&self, variable: &str) -> HsiResult<Dataset> {
        let subdataset = format!("NETCDF:\"{}\":{}", self.path.display(), variable);
        log::debug!("Opening {}", subdataset);
        Dataset::open(subdataset).map_err(|e| {
            HsiError::InvalidFormat(format!(
                "Cannot open variable '{}' in {}: {}",
                variable,
                self.path.display(),
                e
            ))
        })
    }
}

impl GriddedReader for NetcdfReader {
    fn describe(&self, variable: &str) -> HsiResult<VariableInfo> {
        let dataset = self.open_variable(variable)?;
        let item = |key: &str| dataset.metadata_item(key, "");

        let depth_levels = item("NETCDF_DIM_depth_VALUES")
            .map(|v| parse_value_list(&v))
            .unwrap_or_default();
        let time_values = item("NETCDF_DIM_time_VALUES")
            .map(|v| parse_value_list(&v))
            .unwrap_or_default();

        let band_count = dataset.raster_count().max(0) as usize;
        let n_times = if !time_values.is_empty() {
            time_values.len()
        } else {
            band_count / depth_levels.len().max(1)
        };

        let info = VariableInfo {
            name: variable.to_string(),
            units: item(&format!("{}#units", variable)),
            long_name: item(&format!("{}#long_name", variable)),
            time_units: item("time#units"),
            time_values,
            depth_levels,
            n_times,
        };
        log::debug!("{}: {:?}", variable, info);
        Ok(info)
    }

    fn read_variable(&self, variable: &str, depth_index: Option<usize>) -> HsiResult<SourceField> {
        let info = self.describe(variable)?;
        let depth = match (depth_index, info.depth_levels.len()) {
            (None, 0) => None,
            (Some(i), n) if i < n => Some(info.depth_levels[i]),
            (None, n) => {
                return Err(HsiError::InvalidFormat(format!(
                    "Variable '{}' has {} depth levels, a level must be selected",
                    variable, n
                )))
            }
            (Some(i), n) => {
                return Err(HsiError::InvalidFormat(format!(
                    "Depth index {} out of range for '{}' ({} levels)",
                    i, variable, n
                )))
            }
        };

        let dataset = self.open_variable(variable)?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();

        let lon = Array1::from_iter(
            (0..width).map(|j| geo_transform[0] + (j as f64 + 0.5) * geo_transform[1]),
        );
        let mut lat = Array1::from_iter(
            (0..height).map(|i| geo_transform[3] + (i as f64 + 0.5) * geo_transform[5]),
        );

        let mut slices: Vec<Array2<f64>> = Vec::with_capacity(info.n_times);
        for b in 1..=dataset.raster_count() {
            let band = dataset.rasterband(b)?;

            if let Some(level) = depth {
                let band_depth = band
                    .metadata_item("NETCDF_DIM_depth", "")
                    .and_then(|v| v.trim().parse::<f64>().ok());
                match band_depth {
                    Some(d) if (d - level).abs() <= 1e-6 * level.abs().max(1.0) => {}
                    _ => continue,
                }
            }

            let buffer = band.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
            let mut slice = Array2::from_shape_vec((height, width), buffer.data)?;

            let no_data = band.no_data_value();
            let scale = band.scale().unwrap_or(1.0);
            let offset = band.offset().unwrap_or(0.0);
            slice.mapv_inplace(|v| match no_data {
                Some(nd) if v == nd => f64::NAN,
                _ => v * scale + offset,
            });
            slices.push(slice);
        }

        if slices.is_empty() {
            return Err(HsiError::InvalidFormat(format!(
                "No bands read for '{}' in {}",
                variable,
                self.path.display()
            )));
        }

        let views: Vec<_> = slices.iter().map(|s| s.view()).collect();
        let mut data = ndarray::stack(Axis(0), &views)?;
        drop(dataset);

        // North-up rasters come top row first; keep latitude increasing
        if geo_transform[5] < 0.0 {
            data.invert_axis(Axis(1));
            lat.invert_axis(Axis(0));
        }

        log::info!(
            "Read {} from {}: {} time steps on {}x{} source grid",
            variable,
            self.path.display(),
            data.dim().0,
            height,
            width
        );

        SourceField::new(lat, lon, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use tempfile::TempDir;

    #[test]
    fn test_decode_days_since() {
        let t = decode_time("days since 2021-01-01", 31.0).unwrap();
        assert_eq!(t.date(), NaiveDate::from_ymd_opt(2021, 2, 1).unwrap());
    }

    #[test]
    fn test_decode_seconds_since_with_time_reference() {
        let t = decode_time("seconds since 1981-01-01 00:00:00", 86400.0 * 2.0 + 3600.0).unwrap();
        assert_eq!(t.year(), 1981);
        assert_eq!(t.day(), 3);
        assert_eq!(t.hour(), 1);

        let t = decode_time("hours since 1950-01-01T00:00:00Z", 48.0).unwrap();
        assert_eq!(t.date(), NaiveDate::from_ymd_opt(1950, 1, 3).unwrap());
    }

    #[test]
    fn test_decode_rejects_unknown_units() {
        assert!(decode_time("fortnights since 2021-01-01", 1.0).is_err());
        assert!(decode_time("days", 1.0).is_err());
        assert!(decode_time("days since yesterday", 1.0).is_err());
        assert!(decode_time("days since 2021-01-01", f64::NAN).is_err());
    }

    #[test]
    fn test_parse_value_list() {
        assert_eq!(parse_value_list("{0.5,1.5, 2}"), vec![0.5, 1.5, 2.0]);
        assert!(parse_value_list("{}").is_empty());
    }

    #[test]
    fn test_missing_file_is_missing_input() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            NetcdfReader::open(dir.path().join("CHL.nc")),
            Err(HsiError::MissingInput(_))
        ));
    }
}
