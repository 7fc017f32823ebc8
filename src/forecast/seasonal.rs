//! Additive trend + seasonality model
//!
//! The series is modelled as
//!
//! ```text
//! y(t) = k + m·t + Σ δ_j·max(0, t - s_j) + weekly(t) + yearly(t)
//! ```
//!
//! where `s_j` are changepoints spread over the first 80% of the history and
//! the seasonal terms are Fourier series (weekly order 3, yearly order 10).
//! Coefficients are the ridge-penalized least-squares solution; changepoint
//! deltas are shrunk according to the changepoint prior scale so the trend
//! only bends where the data insists. There is no sub-daily component.

use chrono::{Datelike, NaiveDate};
use std::f64::consts::PI;

use super::{future_dates, ForecastError, ForecastPoint, ForecastStrategy, SeriesPoint};

/// Default changepoint prior scale
pub const DEFAULT_CHANGEPOINT_PRIOR_SCALE: f64 = 0.05;

const MAX_CHANGEPOINTS: usize = 25;
const CHANGEPOINT_RANGE: f64 = 0.8;
const WEEKLY_PERIOD: f64 = 7.0;
const WEEKLY_ORDER: usize = 3;
const YEARLY_PERIOD: f64 = 365.25;
const YEARLY_ORDER: usize = 10;
const SEASONALITY_PRIOR_SCALE: f64 = 10.0;
const TREND_PENALTY: f64 = 1e-8;

/// Piecewise-linear trend with weekly and yearly seasonality
#[derive(Debug, Clone, Copy)]
pub struct SeasonalModelStrategy {
    changepoint_prior_scale: f64,
}

impl SeasonalModelStrategy {
    pub fn new(changepoint_prior_scale: f64) -> Self {
        Self {
            changepoint_prior_scale,
        }
    }
}

impl Default for SeasonalModelStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGEPOINT_PRIOR_SCALE)
    }
}

/// Scaling and changepoints fixed by the training data
struct Design {
    start: NaiveDate,
    span_days: f64,
    changepoints: Vec<f64>,
}

impl Design {
    fn fit(history: &[SeriesPoint]) -> Option<Self> {
        let start = history.first()?.date;
        let end = history.last()?.date;
        let span_days = (end - start).num_days() as f64;
        if span_days <= 0.0 {
            return None;
        }

        let design = Self {
            start,
            span_days,
            changepoints: Vec::new(),
        };
        let t: Vec<f64> = history.iter().map(|p| design.scaled_time(p.date)).collect();

        // Evenly spaced over the first 80% of observations, first one excluded
        let hist_size = (history.len() as f64 * CHANGEPOINT_RANGE).floor() as usize;
        let count = MAX_CHANGEPOINTS.min(hist_size.saturating_sub(1));
        let changepoints = if count == 0 {
            Vec::new()
        } else {
            (1..=count)
                .map(|i| {
                    let idx = (i as f64 * (hist_size - 1) as f64 / count as f64).round() as usize;
                    t[idx]
                })
                .collect()
        };

        Some(Self {
            changepoints,
            ..design
        })
    }

    fn scaled_time(&self, date: NaiveDate) -> f64 {
        (date - self.start).num_days() as f64 / self.span_days
    }

    fn width(&self) -> usize {
        2 + self.changepoints.len() + 2 * WEEKLY_ORDER + 2 * YEARLY_ORDER
    }

    fn row(&self, date: NaiveDate) -> Vec<f64> {
        let t = self.scaled_time(date);
        let mut row = Vec::with_capacity(self.width());
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));

        let day = date.num_days_from_ce() as f64;
        for (period, order) in [(WEEKLY_PERIOD, WEEKLY_ORDER), (YEARLY_PERIOD, YEARLY_ORDER)] {
            for k in 1..=order {
                let angle = 2.0 * PI * k as f64 * day / period;
                row.push(angle.sin());
                row.push(angle.cos());
            }
        }
        row
    }

    fn penalties(&self, changepoint_prior_scale: f64) -> Vec<f64> {
        let mut penalties = vec![TREND_PENALTY, TREND_PENALTY];
        let cp = 1.0 / (changepoint_prior_scale * changepoint_prior_scale);
        penalties.extend(std::iter::repeat(cp).take(self.changepoints.len()));
        let seasonal = 1.0 / (SEASONALITY_PRIOR_SCALE * SEASONALITY_PRIOR_SCALE);
        penalties.extend(std::iter::repeat(seasonal).take(2 * (WEEKLY_ORDER + YEARLY_ORDER)));
        penalties
    }
}

impl ForecastStrategy for SeasonalModelStrategy {
    fn name(&self) -> &'static str {
        "seasonal"
    }

    fn forecast(
        &self,
        history: &[SeriesPoint],
        horizon_days: usize,
    ) -> Result<Vec<ForecastPoint>, ForecastError> {
        if history.len() < 2 {
            return Err(ForecastError::ModelFit(format!(
                "need at least 2 observations, got {}",
                history.len()
            )));
        }
        if !(self.changepoint_prior_scale > 0.0 && self.changepoint_prior_scale.is_finite()) {
            return Err(ForecastError::ModelFit(format!(
                "changepoint prior scale must be positive, got {}",
                self.changepoint_prior_scale
            )));
        }
        let design = Design::fit(history)
            .ok_or_else(|| ForecastError::ModelFit("history spans a single day".to_string()))?;

        // Absmax scaling: a single outlier day compresses every other value,
        // which makes the penalties below relatively stronger
        let y_scale = history
            .iter()
            .map(|p| p.value.abs())
            .fold(0.0_f64, f64::max);
        let y_scale = if y_scale > 0.0 && y_scale.is_finite() {
            y_scale
        } else {
            1.0
        };

        let p = design.width();
        let mut normal = vec![vec![0.0; p]; p];
        let mut rhs = vec![0.0; p];
        for point in history {
            let x = design.row(point.date);
            let y = point.value / y_scale;
            for i in 0..p {
                rhs[i] += x[i] * y;
                for j in 0..=i {
                    normal[i][j] += x[i] * x[j];
                }
            }
        }
        for (i, penalty) in design.penalties(self.changepoint_prior_scale).into_iter().enumerate() {
            normal[i][i] += penalty;
        }

        let beta = solve_cholesky(normal, rhs).ok_or_else(|| {
            ForecastError::ModelFit("normal equations are not positive definite".to_string())
        })?;

        let last = history[history.len() - 1].date;
        let dates = history
            .iter()
            .map(|p| p.date)
            .chain(future_dates(last, horizon_days));

        Ok(dates
            .map(|date| {
                let x = design.row(date);
                let yhat: f64 = x.iter().zip(&beta).map(|(a, b)| a * b).sum();
                ForecastPoint {
                    date,
                    yhat: yhat * y_scale,
                }
            })
            .collect())
    }
}

/// Solves `A·x = b` for symmetric positive-definite `A` (lower triangle used)
fn solve_cholesky(mut a: Vec<Vec<f64>>, b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for j in 0..n {
        let mut diag = a[j][j];
        for k in 0..j {
            diag -= a[j][k] * a[j][k];
        }
        if !(diag > 0.0 && diag.is_finite()) {
            return None;
        }
        let diag = diag.sqrt();
        a[j][j] = diag;
        for i in (j + 1)..n {
            let mut sum = a[i][j];
            for k in 0..j {
                sum -= a[i][k] * a[j][k];
            }
            a[i][j] = sum / diag;
        }
    }

    // Forward then back substitution through L and Lᵀ
    let mut z = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= a[i][k] * z[k];
        }
        z[i] = sum / a[i][i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in (i + 1)..n {
            sum -= a[k][i] * x[k];
        }
        x[i] = sum / a[i][i];
    }
    Some(x)
}
