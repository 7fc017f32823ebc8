//! Turning cumulative warehouse rows into a clean daily series

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::SeriesPoint;
use crate::data::{row_date, row_number, Metric, Row};

/// First date considered for modelling (2020-03-01)
pub fn default_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 3, 1).unwrap_or_default()
}

/// One day of a cumulative count; `None` when missing or not a finite number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CumulativePoint {
    pub date: NaiveDate,
    pub total: Option<f64>,
}

/// Reads cumulative counts for `metric`, one point per date in date order
///
/// Rows without a parseable date are skipped; a repeated date keeps its last
/// row. Missing or non-numeric counts stay missing here so differencing can
/// tell them apart from a real zero.
pub fn cumulative_points(rows: &[Row], metric: Metric) -> Vec<CumulativePoint> {
    let column = metric.cumulative_column();
    let mut by_date = BTreeMap::new();
    for row in rows {
        if let Some(date) = row_date(row) {
            by_date.insert(date, row_number(row, column).filter(|v| v.is_finite()));
        }
    }
    by_date
        .into_iter()
        .map(|(date, total)| CumulativePoint { date, total })
        .collect()
}

/// Day-over-day difference of two cumulative readings
///
/// Zero when either reading is missing.
pub fn delta_or_zero(current: Option<f64>, previous: Option<f64>) -> f64 {
    match (current, previous) {
        (Some(current), Some(previous)) => current - previous,
        _ => 0.0,
    }
}

/// Differences a cumulative series day over day
///
/// The first delta is the first cumulative value itself (zero if missing).
pub fn daily_deltas(cumulative: &[CumulativePoint]) -> Vec<SeriesPoint> {
    cumulative
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let delta = match i.checked_sub(1) {
                Some(prev) => delta_or_zero(point.total, cumulative[prev].total),
                None => point.total.unwrap_or(0.0),
            };
            SeriesPoint::new(point.date, delta)
        })
        .collect()
}

/// Zeroes non-finite values and drops negative ones
pub fn drop_invalid(points: Vec<SeriesPoint>) -> Vec<SeriesPoint> {
    points
        .into_iter()
        .map(|p| {
            if p.value.is_finite() {
                p
            } else {
                SeriesPoint::new(p.date, 0.0)
            }
        })
        .filter(|p| p.value >= 0.0)
        .collect()
}

/// Full cleaning pipeline: cumulative rows to non-negative daily counts on or after `epoch`
pub fn clean_series(rows: &[Row], metric: Metric, epoch: NaiveDate) -> Vec<SeriesPoint> {
    let deltas = daily_deltas(&cumulative_points(rows, metric));
    drop_invalid(deltas.into_iter().filter(|p| p.date >= epoch).collect())
}
