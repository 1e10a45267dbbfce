use crate::fields::{HsiFields, MonthlyFields};
use crate::types::{AggregationMethod, Field2, Field3, HsiError, HsiResult, YearMonth};
use chrono::{Duration, NaiveDate};
use ndarray::{Array2, ArrayView1, Axis};
use num_traits::Float;
use std::collections::BTreeMap;

/// Mean of the non-NaN values, NaN when there are none
pub fn nan_mean<T: Float>(values: ArrayView1<T>) -> T {
    let mut sum = T::zero();
    let mut count = 0usize;
    for &v in values.iter().filter(|v| !v.is_nan()) {
        sum = sum + v;
        count += 1;
    }
    match T::from(count) {
        Some(n) if count > 0 => sum / n,
        _ => T::nan(),
    }
}

/// Median of the non-NaN values, NaN when there are none
pub fn nan_median<T: Float>(values: ArrayView1<T>) -> T {
    let mut valid: Vec<T> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return T::nan();
    }
    valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = valid.len() / 2;
    if valid.len() % 2 == 1 {
        valid[mid]
    } else {
        let two = T::one() + T::one();
        (valid[mid - 1] + valid[mid]) / two
    }
}

/// Calendar month of each day index, starting at `start`
pub fn year_month_labels(start: NaiveDate, n_days: usize) -> Vec<YearMonth> {
    (0..n_days)
        .map(|t| YearMonth::from_date(start + Duration::days(t as i64)))
        .collect()
}

/// Reduce a daily `[time, lat, lon]` field to one 2D field per month.
///
/// A cell is NaN only when every day of the month is NaN there. Months with no
/// contributing day do not appear in the result.
pub fn aggregate_monthly(
    field: &Field3,
    labels: &[YearMonth],
    method: AggregationMethod,
) -> HsiResult<BTreeMap<YearMonth, Field2>> {
    let n_times = field.len_of(Axis(0));
    if labels.len() != n_times {
        return Err(HsiError::Shape(format!(
            "{} month labels for {} time steps",
            labels.len(),
            n_times
        )));
    }

    let mut groups: BTreeMap<YearMonth, Vec<usize>> = BTreeMap::new();
    for (t, label) in labels.iter().enumerate() {
        groups.entry(*label).or_default().push(t);
    }

    let reduce: fn(ArrayView1<f64>) -> f64 = match method {
        AggregationMethod::Mean => nan_mean::<f64>,
        AggregationMethod::Median => nan_median::<f64>,
    };

    let mut monthly = BTreeMap::new();
    for (month, indices) in groups {
        let days = field.select(Axis(0), &indices);
        let reduced: Array2<f64> = days.map_axis(Axis(0), reduce);
        log::debug!("{}: {} days", month, indices.len());
        monthly.insert(month, reduced);
    }

    Ok(monthly)
}

/// Months between two labels, both inclusive
fn months_spanned(first: YearMonth, last: YearMonth) -> usize {
    let first = first.year as i64 * 12 + first.month as i64;
    let last = last.year as i64 * 12 + last.month as i64;
    (last - first + 1).max(0) as usize
}

/// Aggregates every field of a scored record to calendar months
pub struct MonthlyAggregator {
    method: AggregationMethod,
}

impl MonthlyAggregator {
    pub fn new(method: AggregationMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> AggregationMethod {
        self.method
    }

    pub fn aggregate(&self, hsi: &HsiFields) -> HsiResult<MonthlyFields> {
        hsi.validate()?;
        let raw = &hsi.raw;
        let labels = year_month_labels(raw.start_date, raw.n_times());
        log::info!(
            "Aggregating {} days from {} by monthly {}",
            labels.len(),
            raw.start_date,
            self.method
        );

        let stack = |field: &Field3| -> HsiResult<(Vec<YearMonth>, Field3)> {
            let monthly = aggregate_monthly(field, &labels, self.method)?;
            let months: Vec<YearMonth> = monthly.keys().copied().collect();
            let views: Vec<_> = monthly.values().map(|m| m.view()).collect();
            let cube = if views.is_empty() {
                Field3::zeros((0, raw.lat_grid.len(), raw.lon_grid.len()))
            } else {
                ndarray::stack(Axis(0), &views)?
            };
            Ok((months, cube))
        };

        let (months, chl) = stack(&raw.chl)?;
        let (_, sst) = stack(&raw.sst)?;
        let (_, salinity) = stack(&raw.salinity)?;
        let (_, hsi_chl) = stack(&hsi.hsi_chl)?;
        let (_, hsi_sst) = stack(&hsi.hsi_sst)?;
        let (_, hsi_so) = stack(&hsi.hsi_so)?;
        let (_, hsi_total) = stack(&hsi.hsi_total)?;

        if let (Some(first), Some(last)) = (months.first(), months.last()) {
            let expected = months_spanned(*first, *last);
            if expected != months.len() {
                log::warn!(
                    "Monthly series has gaps: {} months between {} and {}, {} present",
                    expected,
                    first,
                    last,
                    months.len()
                );
            }
            log::info!("Aggregated {} months ({} to {})", months.len(), first, last);
        } else {
            log::warn!("No time steps to aggregate");
        }

        let fields = MonthlyFields {
            lat_grid: raw.lat_grid.clone(),
            lon_grid: raw.lon_grid.clone(),
            months,
            chl,
            sst,
            salinity,
            hsi_chl,
            hsi_sst,
            hsi_so,
            hsi_total,
        };
        fields.validate()?;
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::suitability::HsiCalculator;
    use crate::fields::RawFields;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array3};

    fn ym(year: i32, month: u32) -> YearMonth {
        YearMonth::new(year, month).unwrap()
    }

    #[test]
    fn test_labels_cross_month_and_year_boundaries() {
        let start = NaiveDate::from_ymd_opt(2021, 12, 30).unwrap();
        let labels = year_month_labels(start, 4);
        assert_eq!(
            labels,
            vec![ym(2021, 12), ym(2021, 12), ym(2022, 1), ym(2022, 1)]
        );
        assert_eq!(labels[2].to_string(), "2022-01");
    }

    #[test]
    fn test_nan_aware_reductions() {
        let values = array![1.0, f64::NAN, 3.0, 10.0];
        assert_abs_diff_eq!(nan_mean(values.view()), 14.0 / 3.0, epsilon = 1e-12);
        assert_eq!(nan_median(values.view()), 3.0);
        assert_eq!(nan_median(array![4.0, 1.0, f64::NAN, 2.0, 3.0].view()), 2.5);

        let empty = array![f64::NAN, f64::NAN];
        assert!(nan_mean(empty.view()).is_nan());
        assert!(nan_median(empty.view()).is_nan());
    }

    #[test]
    fn test_monthly_mean_skips_nan_days() {
        // 3 days in January, 2 in February, on a 1x2 grid
        let mut field = Array3::zeros((5, 1, 2));
        field.index_axis_mut(Axis(0), 0).assign(&array![[1.0, f64::NAN]]);
        field.index_axis_mut(Axis(0), 1).assign(&array![[2.0, f64::NAN]]);
        field.index_axis_mut(Axis(0), 2).assign(&array![[6.0, f64::NAN]]);
        field.index_axis_mut(Axis(0), 3).assign(&array![[f64::NAN, 5.0]]);
        field.index_axis_mut(Axis(0), 4).assign(&array![[4.0, 7.0]]);

        let labels = vec![ym(2021, 1), ym(2021, 1), ym(2021, 1), ym(2021, 2), ym(2021, 2)];

        let mean = aggregate_monthly(&field, &labels, AggregationMethod::Mean).unwrap();
        assert_eq!(mean.len(), 2);
        let jan = &mean[&ym(2021, 1)];
        assert_abs_diff_eq!(jan[[0, 0]], 3.0, epsilon = 1e-12);
        assert!(jan[[0, 1]].is_nan());
        let feb = &mean[&ym(2021, 2)];
        assert_eq!(feb[[0, 0]], 4.0);
        assert_eq!(feb[[0, 1]], 6.0);

        let median = aggregate_monthly(&field, &labels, AggregationMethod::Median).unwrap();
        assert_eq!(median[&ym(2021, 1)][[0, 0]], 2.0);
    }

    #[test]
    fn test_months_are_chronological() {
        let field = Array3::from_elem((3, 1, 1), 1.0);
        let labels = vec![ym(2022, 1), ym(2021, 11), ym(2021, 12)];
        let monthly = aggregate_monthly(&field, &labels, AggregationMethod::Mean).unwrap();
        let keys: Vec<String> = monthly.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["2021-11", "2021-12", "2022-01"]);
    }

    #[test]
    fn test_label_count_must_match() {
        let field = Array3::from_elem((3, 1, 1), 1.0);
        assert!(matches!(
            aggregate_monthly(&field, &[ym(2021, 1)], AggregationMethod::Mean),
            Err(HsiError::Shape(_))
        ));
    }

    #[test]
    fn test_months_spanned() {
        assert_eq!(months_spanned(ym(2021, 11), ym(2022, 2)), 4);
        assert_eq!(months_spanned(ym(2021, 3), ym(2021, 3)), 1);
    }

    #[test]
    fn test_aggregator_builds_monthly_record() {
        let n = 40;
        let raw = RawFields::new(
            Array1::from(vec![0.0, 1.0]),
            Array1::from(vec![10.0, 11.0]),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            Array3::from_elem((n, 2, 2), 1.0),
            Array3::from_elem((n, 2, 2), 28.0),
            Array3::from_elem((n, 2, 2), 33.5),
        )
        .unwrap();
        let hsi = HsiCalculator::new().calculate(raw).unwrap();

        let monthly = MonthlyAggregator::new(AggregationMethod::Mean)
            .aggregate(&hsi)
            .unwrap();
        assert_eq!(monthly.months, vec![ym(2021, 1), ym(2021, 2)]);
        assert_eq!(monthly.hsi_total.dim(), (2, 2, 2));
        assert_abs_diff_eq!(monthly.hsi_total[[1, 1, 1]], 1.0, epsilon = 1e-12);
        assert_eq!(monthly.sst[[0, 0, 0]], 28.0);
    }
}
