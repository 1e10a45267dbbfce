use crate::types::{HsiError, HsiResult};
use ndarray::{s, Array1, Array3, Array4};
use std::collections::HashMap;

/// Descriptive attributes of a gridded source variable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    pub units: Option<String>,
    pub long_name: Option<String>,
    pub time_units: Option<String>,
    /// Raw values of the time coordinate, in `time_units`
    pub time_values: Vec<f64>,
    /// Depth levels in metres; empty when the variable has no depth axis
    pub depth_levels: Vec<f64>,
    pub n_times: usize,
}

impl VariableInfo {
    /// Index of the shallowest depth level, if the variable is depth-resolved
    pub fn surface_level(&self) -> Option<usize> {
        self.depth_levels
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.is_nan())
            .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
    }
}

/// Materialized source slice: plain arrays, no live file handle
#[derive(Debug, Clone)]
pub struct SourceField {
    pub lat: Array1<f64>,
    pub lon: Array1<f64>,
    /// [time, lat, lon], NaN for missing values
    pub data: Array3<f64>,
}

impl SourceField {
    pub fn new(lat: Array1<f64>, lon: Array1<f64>, data: Array3<f64>) -> HsiResult<Self> {
        let (_, n_lat, n_lon) = data.dim();
        if n_lat != lat.len() || n_lon != lon.len() {
            return Err(HsiError::Shape(format!(
                "Source data {:?} does not match axes lat={} lon={}",
                data.dim(),
                lat.len(),
                lon.len()
            )));
        }
        Ok(Self { lat, lon, data })
    }

    pub fn n_times(&self) -> usize {
        self.data.dim().0
    }
}

/// Reader of named gridded variables.
///
/// Implementations do all file I/O on the calling thread and hand back owned
/// arrays, so processing never touches a live dataset handle.
pub trait GriddedReader {
    fn describe(&self, variable: &str) -> HsiResult<VariableInfo>;

    /// Read every time step of `variable`. `depth_index` selects one level of a
    /// depth-resolved variable and must be `None` for 2D-in-space variables.
    fn read_variable(&self, variable: &str, depth_index: Option<usize>) -> HsiResult<SourceField>;
}

struct MemoryVariable {
    info: VariableInfo,
    lat: Array1<f64>,
    lon: Array1<f64>,
    data: Array4<f64>,
}

/// In-memory [`GriddedReader`], for synthetic inputs and tests
#[derive(Default)]
pub struct MemoryReader {
    variables: HashMap<String, MemoryVariable>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable without depth axis; `data` is [time, lat, lon]
    pub fn with_variable(
        self,
        name: &str,
        units: Option<&str>,
        lat: Array1<f64>,
        lon: Array1<f64>,
        data: Array3<f64>,
    ) -> HsiResult<Self> {
        let (t, y, x) = data.dim();
        let data = data.into_shape((t, 1, y, x))?;
        self.insert(name, units, Vec::new(), lat, lon, data)
    }

    /// Register a depth-resolved variable; `data` is [time, depth, lat, lon]
    pub fn with_depth_variable(
        self,
        name: &str,
        units: Option<&str>,
        depth_levels: Vec<f64>,
        lat: Array1<f64>,
        lon: Array1<f64>,
        data: Array4<f64>,
    ) -> HsiResult<Self> {
        if data.dim().1 != depth_levels.len() {
            return Err(HsiError::Shape(format!(
                "{}: {} depth levels for data {:?}",
                name,
                depth_levels.len(),
                data.dim()
            )));
        }
        self.insert(name, units, depth_levels, lat, lon, data)
    }

    fn insert(
        mut self,
        name: &str,
        units: Option<&str>,
        depth_levels: Vec<f64>,
        lat: Array1<f64>,
        lon: Array1<f64>,
        data: Array4<f64>,
    ) -> HsiResult<Self> {
        let (n_times, _, n_lat, n_lon) = data.dim();
        if n_lat != lat.len() || n_lon != lon.len() {
            return Err(HsiError::Shape(format!(
                "{}: data {:?} does not match axes lat={} lon={}",
                name,
                data.dim(),
                lat.len(),
                lon.len()
            )));
        }

        let info = VariableInfo {
            name: name.to_string(),
            units: units.map(str::to_string),
            long_name: None,
            time_units: Some("days since 1970-01-01".to_string()),
            time_values: (0..n_times).map(|t| t as f64).collect(),
            depth_levels,
            n_times,
        };
        self.variables.insert(
            name.to_string(),
            MemoryVariable {
                info,
                lat,
                lon,
                data,
            },
        );
        Ok(self)
    }

    fn get(&self, variable: &str) -> HsiResult<&MemoryVariable> {
        self.variables.get(variable).ok_or_else(|| {
            HsiError::InvalidFormat(format!("Variable '{}' not found", variable))
        })
    }
}

impl GriddedReader for MemoryReader {
    fn describe(&self, variable: &str) -> HsiResult<VariableInfo> {
        Ok(self.get(variable)?.info.clone())
    }

    fn read_variable(&self, variable: &str, depth_index: Option<usize>) -> HsiResult<SourceField> {
        let entry = self.get(variable)?;
        let level = match (depth_index, entry.info.depth_levels.len()) {
            (None, 0) => 0,
            (Some(i), n) if i < n => i,
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

        let data = entry.data.slice(s![.., level, .., ..]).to_owned();
        SourceField::new(entry.lat.clone(), entry.lon.clone(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array4};

    #[test]
    fn test_surface_level_is_shallowest() {
        let info = VariableInfo {
            depth_levels: vec![5.0, 0.494, 1.54],
            ..Default::default()
        };
        assert_eq!(info.surface_level(), Some(1));
        assert_eq!(VariableInfo::default().surface_level(), None);
    }

    #[test]
    fn test_memory_reader_depth_selection() {
        let lat = Array1::linspace(0.0, 1.0, 2);
        let lon = Array1::linspace(10.0, 12.0, 3);
        let mut data = Array4::zeros((4, 2, 2, 3));
        data.slice_mut(s![.., 1, .., ..]).fill(7.0);

        let reader = MemoryReader::new()
            .with_depth_variable("so", Some("PSU"), vec![0.5, 10.0], lat, lon, data)
            .unwrap();

        let surface = reader.read_variable("so", Some(0)).unwrap();
        assert_eq!(surface.data.dim(), (4, 2, 3));
        assert!(surface.data.iter().all(|&v| v == 0.0));

        let deep = reader.read_variable("so", Some(1)).unwrap();
        assert!(deep.data.iter().all(|&v| v == 7.0));

        assert!(reader.read_variable("so", None).is_err());
        assert!(reader.read_variable("so", Some(2)).is_err());
        assert!(reader.read_variable("missing", None).is_err());
    }
}
