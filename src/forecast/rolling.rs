//! Trailing moving-average fallback model

use super::{future_dates, ForecastError, ForecastPoint, ForecastStrategy, SeriesPoint};

/// Default number of trailing observations averaged
pub const DEFAULT_WINDOW: usize = 14;

/// Deterministic trend-extrapolation model
///
/// The historical half is a trailing moving average over up to `window`
/// observations (the first points average whatever is available). The
/// future half repeats the last average for every day of the horizon.
#[derive(Debug, Clone, Copy)]
pub struct RollingAverageStrategy {
    window: usize,
}

impl RollingAverageStrategy {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    fn moving_average(&self, values: &[f64]) -> Vec<f64> {
        (0..values.len())
            .map(|i| {
                let start = (i + 1).saturating_sub(self.window);
                let slice = &values[start..=i];
                slice.iter().sum::<f64>() / slice.len() as f64
            })
            .collect()
    }
}

impl Default for RollingAverageStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ForecastStrategy for RollingAverageStrategy {
    fn name(&self) -> &'static str {
        "rolling_average"
    }

    fn forecast(
        &self,
        history: &[SeriesPoint],
        horizon_days: usize,
    ) -> Result<Vec<ForecastPoint>, ForecastError> {
        let Some(last) = history.last() else {
            return Err(ForecastError::ModelFit("no observations".to_string()));
        };

        let values: Vec<f64> = history.iter().map(|p| p.value).collect();
        let averages = self.moving_average(&values);
        let level = averages
            .last()
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(last.value);

        let mut points: Vec<ForecastPoint> = history
            .iter()
            .zip(averages)
            .map(|(p, yhat)| ForecastPoint { date: p.date, yhat })
            .collect();
        points.extend(
            future_dates(last.date, horizon_days)
                .into_iter()
                .map(|date| ForecastPoint { date, yhat: level }),
        );
        Ok(points)
    }
}
