//! Typed records handed from one pipeline stage to the next.
//!
//! Every record checks its array shapes against the coordinate axes when it is
//! built and again when it is loaded, so a stage never runs on a
//! half-populated container.

use crate::io::container::{ArchiveReader, ArchiveWriter};
use crate::types::{Field3, HsiError, HsiResult, YearMonth};
use chrono::{Datelike, NaiveDate};
use ndarray::{Array1, Ix1, Ix3};
use std::path::Path;

fn check_cube(name: &str, field: &Field3, n: usize, n_lat: usize, n_lon: usize) -> HsiResult<()> {
    if field.dim() != (n, n_lat, n_lon) {
        return Err(HsiError::Shape(format!(
            "'{}' has shape {:?}, expected ({}, {}, {})",
            name,
            field.dim(),
            n,
            n_lat,
            n_lon
        )));
    }
    Ok(())
}

/// Dates are stored as proleptic Gregorian day ordinals, 0001-01-01 being day 1
fn write_start_date(writer: &mut ArchiveWriter, date: NaiveDate) -> HsiResult<()> {
    let ordinal = Array1::from(vec![i64::from(date.num_days_from_ce())]);
    writer.write_array("start_date", &ordinal)
}

fn read_start_date(reader: &mut ArchiveReader) -> HsiResult<NaiveDate> {
    let values = reader.read_array::<i64, Ix1>("start_date")?;
    let ordinal = *values
        .iter()
        .next()
        .ok_or_else(|| HsiError::MissingField("start_date".to_string()))?;
    i32::try_from(ordinal)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| HsiError::InvalidFormat(format!("Invalid start_date ordinal {}", ordinal)))
}

/// Months are stored as parallel `year` and `month` integer arrays
fn write_months(writer: &mut ArchiveWriter, months: &[YearMonth]) -> HsiResult<()> {
    let years: Array1<i64> = months.iter().map(|m| i64::from(m.year)).collect();
    let numbers: Array1<i64> = months.iter().map(|m| i64::from(m.month)).collect();
    writer.write_array("year", &years)?;
    writer.write_array("month", &numbers)
}

fn read_months(reader: &mut ArchiveReader) -> HsiResult<Vec<YearMonth>> {
    let years = reader.read_array::<i64, Ix1>("year")?;
    let numbers = reader.read_array::<i64, Ix1>("month")?;
    if years.len() != numbers.len() {
        return Err(HsiError::Shape(format!(
            "'year' has {} entries but 'month' has {}",
            years.len(),
            numbers.len()
        )));
    }
    years
        .iter()
        .zip(numbers.iter())
        .map(|(&year, &month)| {
            let year = i32::try_from(year)
                .map_err(|_| HsiError::InvalidFormat(format!("Invalid year: {}", year)))?;
            let month = u32::try_from(month)
                .map_err(|_| HsiError::InvalidFormat(format!("Invalid month: {}", month)))?;
            YearMonth::new(year, month)
        })
        .collect()
}

/// Preprocessed variables on the target grid, one slice per day
#[derive(Debug, Clone)]
pub struct RawFields {
    pub lat_grid: Array1<f64>,
    pub lon_grid: Array1<f64>,
    pub time_indices: Array1<i64>,
    /// Calendar date of time index 0
    pub start_date: NaiveDate,
    /// Chlorophyll-a (mg/m³)
    pub chl: Field3,
    /// Sea surface temperature (°C)
    pub sst: Field3,
    /// Surface salinity (PSU)
    pub salinity: Field3,
}

impl RawFields {
    pub fn new(
        lat_grid: Array1<f64>,
        lon_grid: Array1<f64>,
        start_date: NaiveDate,
        chl: Field3,
        sst: Field3,
        salinity: Field3,
    ) -> HsiResult<Self> {
        let n_times = chl.dim().0;
        let fields = Self {
            lat_grid,
            lon_grid,
            time_indices: Array1::from_iter(0..n_times as i64),
            start_date,
            chl,
            sst,
            salinity,
        };
        fields.validate()?;
        Ok(fields)
    }

    pub fn n_times(&self) -> usize {
        self.time_indices.len()
    }

    pub fn validate(&self) -> HsiResult<()> {
        let n = self.n_times();
        let (n_lat, n_lon) = (self.lat_grid.len(), self.lon_grid.len());
        check_cube("chl", &self.chl, n, n_lat, n_lon)?;
        check_cube("sst", &self.sst, n, n_lat, n_lon)?;
        check_cube("salinity", &self.salinity, n, n_lat, n_lon)
    }

    fn write_entries(&self, writer: &mut ArchiveWriter) -> HsiResult<()> {
        writer.write_array("chl", &self.chl)?;
        writer.write_array("sst", &self.sst)?;
        writer.write_array("salinity", &self.salinity)?;
        writer.write_array("lat_grid", &self.lat_grid)?;
        writer.write_array("lon_grid", &self.lon_grid)?;
        writer.write_array("time_indices", &self.time_indices)?;
        write_start_date(writer, self.start_date)
    }

    fn read_entries(reader: &mut ArchiveReader) -> HsiResult<Self> {
        let fields = Self {
            lat_grid: reader.read_array::<f64, Ix1>("lat_grid")?,
            lon_grid: reader.read_array::<f64, Ix1>("lon_grid")?,
            time_indices: reader.read_array::<i64, Ix1>("time_indices")?,
            start_date: read_start_date(reader)?,
            chl: reader.read_array::<f64, Ix3>("chl")?,
            sst: reader.read_array::<f64, Ix3>("sst")?,
            salinity: reader.read_array::<f64, Ix3>("salinity")?,
        };
        fields.validate()?;
        Ok(fields)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> HsiResult<()> {
        self.validate()?;
        let mut writer = ArchiveWriter::create(path)?;
        self.write_entries(&mut writer)?;
        writer.finish()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let mut reader = ArchiveReader::open(path)?;
        Self::read_entries(&mut reader)
    }
}

/// Raw variables plus their suitability scores
#[derive(Debug, Clone)]
pub struct HsiFields {
    pub raw: RawFields,
    pub hsi_chl: Field3,
    pub hsi_sst: Field3,
    pub hsi_so: Field3,
    pub hsi_total: Field3,
}

impl HsiFields {
    pub fn new(
        raw: RawFields,
        hsi_chl: Field3,
        hsi_sst: Field3,
        hsi_so: Field3,
        hsi_total: Field3,
    ) -> HsiResult<Self> {
        let fields = Self {
            raw,
            hsi_chl,
            hsi_sst,
            hsi_so,
            hsi_total,
        };
        fields.validate()?;
        Ok(fields)
    }

    pub fn validate(&self) -> HsiResult<()> {
        self.raw.validate()?;
        let n = self.raw.n_times();
        let (n_lat, n_lon) = (self.raw.lat_grid.len(), self.raw.lon_grid.len());
        check_cube("hsi_chl", &self.hsi_chl, n, n_lat, n_lon)?;
        check_cube("hsi_sst", &self.hsi_sst, n, n_lat, n_lon)?;
        check_cube("hsi_so", &self.hsi_so, n, n_lat, n_lon)?;
        check_cube("hsi_total", &self.hsi_total, n, n_lat, n_lon)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> HsiResult<()> {
        self.validate()?;
        let mut writer = ArchiveWriter::create(path)?;
        self.raw.write_entries(&mut writer)?;
        writer.write_array("hsi_total", &self.hsi_total)?;
        writer.write_array("hsi_chl", &self.hsi_chl)?;
        writer.write_array("hsi_sst", &self.hsi_sst)?;
        writer.write_array("hsi_so", &self.hsi_so)?;
        writer.finish()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let mut reader = ArchiveReader::open(path)?;
        let raw = RawFields::read_entries(&mut reader)?;
        Self::new(
            raw,
            reader.read_array::<f64, Ix3>("hsi_chl")?,
            reader.read_array::<f64, Ix3>("hsi_sst")?,
            reader.read_array::<f64, Ix3>("hsi_so")?,
            reader.read_array::<f64, Ix3>("hsi_total")?,
        )
    }
}

/// Month-aggregated fields, first axis ordered like `months`
#[derive(Debug, Clone)]
pub struct MonthlyFields {
    pub lat_grid: Array1<f64>,
    pub lon_grid: Array1<f64>,
    pub months: Vec<YearMonth>,
    pub chl: Field3,
    pub sst: Field3,
    pub salinity: Field3,
    pub hsi_chl: Field3,
    pub hsi_sst: Field3,
    pub hsi_so: Field3,
    pub hsi_total: Field3,
}

impl MonthlyFields {
    pub fn n_months(&self) -> usize {
        self.months.len()
    }

    /// Arrays in their persisted order
    pub fn named_fields(&self) -> [(&'static str, &Field3); 7] {
        [
            ("chl", &self.chl),
            ("sst", &self.sst),
            ("salinity", &self.salinity),
            ("hsi_total", &self.hsi_total),
            ("hsi_chl", &self.hsi_chl),
            ("hsi_sst", &self.hsi_sst),
            ("hsi_so", &self.hsi_so),
        ]
    }

    pub fn validate(&self) -> HsiResult<()> {
        if (1..self.months.len()).any(|i| self.months[i] <= self.months[i - 1]) {
            return Err(HsiError::InvalidFormat(
                "Months must be strictly chronological".to_string(),
            ));
        }
        let n = self.n_months();
        let (n_lat, n_lon) = (self.lat_grid.len(), self.lon_grid.len());
        for (name, field) in self.named_fields() {
            check_cube(name, field, n, n_lat, n_lon)?;
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> HsiResult<()> {
        self.validate()?;
        let mut writer = ArchiveWriter::create(path)?;
        for (name, field) in self.named_fields() {
            writer.write_array(name, field)?;
        }
        writer.write_array("lat_grid", &self.lat_grid)?;
        writer.write_array("lon_grid", &self.lon_grid)?;
        write_months(&mut writer, &self.months)?;
        writer.finish()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> HsiResult<Self> {
        let mut reader = ArchiveReader::open(path)?;
        let months = read_months(&mut reader)?;

        let fields = Self {
            lat_grid: reader.read_array::<f64, Ix1>("lat_grid")?,
            lon_grid: reader.read_array::<f64, Ix1>("lon_grid")?,
            months,
            chl: reader.read_array::<f64, Ix3>("chl")?,
            sst: reader.read_array::<f64, Ix3>("sst")?,
            salinity: reader.read_array::<f64, Ix3>("salinity")?,
            hsi_chl: reader.read_array::<f64, Ix3>("hsi_chl")?,
            hsi_sst: reader.read_array::<f64, Ix3>("hsi_sst")?,
            hsi_so: reader.read_array::<f64, Ix3>("hsi_so")?,
            hsi_total: reader.read_array::<f64, Ix3>("hsi_total")?,
        };
        fields.validate()?;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::container::ArchiveWriter;
    use ndarray::{Array1, Array3};
    use tempfile::TempDir;

    fn sample_raw(n: usize) -> RawFields {
        let lat = Array1::linspace(-2.0, 0.0, 3);
        let lon = Array1::linspace(100.0, 101.0, 2);
        RawFields::new(
            lat,
            lon,
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            Array3::from_elem((n, 3, 2), 1.0),
            Array3::from_elem((n, 3, 2), 28.0),
            Array3::from_elem((n, 3, 2), 33.5),
        )
        .unwrap()
    }

    #[test]
    fn test_raw_fields_reject_mismatched_shapes() {
        let lat = Array1::linspace(-2.0, 0.0, 3);
        let lon = Array1::linspace(100.0, 101.0, 2);
        let result = RawFields::new(
            lat,
            lon,
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            Array3::zeros((4, 3, 2)),
            Array3::zeros((4, 3, 2)),
            Array3::zeros((3, 3, 2)),
        );
        assert!(matches!(result, Err(HsiError::Shape(_))));
    }

    #[test]
    fn test_raw_fields_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed_data.npz");
        let raw = sample_raw(4);
        raw.save(&path).unwrap();

        let loaded = RawFields::load(&path).unwrap();
        assert_eq!(loaded.start_date, raw.start_date);
        assert_eq!(loaded.time_indices, raw.time_indices);
        assert_eq!(loaded.sst, raw.sst);
        assert_eq!(loaded.lat_grid, raw.lat_grid);
    }

    #[test]
    fn test_load_fails_on_missing_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.npz");
        let raw = sample_raw(2);

        let mut writer = ArchiveWriter::create(&path).unwrap();
        writer.write_array("chl", &raw.chl).unwrap();
        writer.write_array("lat_grid", &raw.lat_grid).unwrap();
        writer.finish().unwrap();

        assert!(matches!(
            RawFields::load(&path),
            Err(HsiError::MissingField(_))
        ));
    }

    fn sample_monthly(months: Vec<YearMonth>) -> MonthlyFields {
        let n = months.len();
        let cube = Array3::from_shape_fn((n, 2, 1), |(t, i, _)| (t * 10 + i) as f64);
        let mut hsi = cube.mapv(|v| v / 100.0);
        hsi[[0, 1, 0]] = f64::NAN;
        MonthlyFields {
            lat_grid: Array1::from(vec![-1.0, 0.0]),
            lon_grid: Array1::from(vec![100.0]),
            months,
            chl: cube.clone(),
            sst: cube.clone(),
            salinity: cube,
            hsi_chl: hsi.clone(),
            hsi_sst: hsi.clone(),
            hsi_so: hsi.clone(),
            hsi_total: hsi,
        }
    }

    #[test]
    fn test_start_date_is_stored_as_day_ordinal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed_data.npz");
        sample_raw(1).save(&path).unwrap();

        let mut reader = ArchiveReader::open(&path).unwrap();
        let ordinal = reader.read_array::<i64, Ix1>("start_date").unwrap();
        // 2021-01-01 is day 737791 counting 0001-01-01 as day 1
        assert_eq!(ordinal, Array1::from(vec![737_791i64]));
    }

    #[test]
    fn test_monthly_fields_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monthly_hsi_data.npz");
        let monthly = sample_monthly(vec![
            YearMonth::new(2021, 12).unwrap(),
            YearMonth::new(2022, 1).unwrap(),
            YearMonth::new(2022, 3).unwrap(),
        ]);
        monthly.save(&path).unwrap();

        let mut reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(
            reader.read_array::<i64, Ix1>("year").unwrap(),
            Array1::from(vec![2021i64, 2022, 2022])
        );
        assert_eq!(
            reader.read_array::<i64, Ix1>("month").unwrap(),
            Array1::from(vec![12i64, 1, 3])
        );

        let loaded = MonthlyFields::load(&path).unwrap();
        assert_eq!(loaded.months, monthly.months);
        assert_eq!(loaded.chl, monthly.chl);
        assert_eq!(
            loaded.hsi_total.mapv(f64::to_bits),
            monthly.hsi_total.mapv(f64::to_bits)
        );
    }

    #[test]
    fn test_monthly_load_rejects_invalid_month_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monthly_hsi_data.npz");
        let monthly = sample_monthly(vec![YearMonth::new(2021, 1).unwrap()]);

        let mut writer = ArchiveWriter::create(&path).unwrap();
        for (name, field) in monthly.named_fields() {
            writer.write_array(name, field).unwrap();
        }
        writer.write_array("lat_grid", &monthly.lat_grid).unwrap();
        writer.write_array("lon_grid", &monthly.lon_grid).unwrap();
        writer.write_array("year", &Array1::from(vec![2021i64])).unwrap();
        writer.write_array("month", &Array1::from(vec![13i64])).unwrap();
        writer.finish().unwrap();

        assert!(matches!(
            MonthlyFields::load(&path),
            Err(HsiError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_monthly_fields_require_chronological_months() {
        let cube = Array3::zeros((2, 1, 1));
        let fields = MonthlyFields {
            lat_grid: Array1::from(vec![0.0]),
            lon_grid: Array1::from(vec![0.0]),
            months: vec![
                YearMonth::new(2021, 2).unwrap(),
                YearMonth::new(2021, 1).unwrap(),
            ],
            chl: cube.clone(),
            sst: cube.clone(),
            salinity: cube.clone(),
            hsi_chl: cube.clone(),
            hsi_sst: cube.clone(),
            hsi_so: cube.clone(),
            hsi_total: cube,
        };
        assert!(fields.validate().is_err());
    }
}
