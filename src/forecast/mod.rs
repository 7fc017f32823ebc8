//! Short-horizon forecasting
//!
//! A cleaned daily series goes in; a combined historical + future series comes
//! out. The model is a [`ForecastStrategy`] chosen once when the
//! [`ForecastEngine`] is built.

pub mod cleaning;
pub mod engine;
pub mod rolling;
#[cfg(feature = "seasonal-model")]
pub mod seasonal;

pub use cleaning::{
    clean_series, cumulative_points, daily_deltas, default_epoch, delta_or_zero, drop_invalid,
    CumulativePoint,
};
pub use engine::{
    seasonal_model_available, select_strategy, ForecastEngine, ForecastSettings, ModelPreference,
};
pub use rolling::RollingAverageStrategy;
#[cfg(feature = "seasonal-model")]
pub use seasonal::SeasonalModelStrategy;

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::data::{EntityKey, Metric};
use crate::resolver::ResolveError;

/// One observation of a daily series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(date: NaiveDate, value: f64) -> Self {
        Self { date, value }
    }
}

/// One point of a forecast (fitted or predicted)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub yhat: f64,
}

/// Historical observations plus the forecast over history and horizon
///
/// `points` covers every historical date followed by `horizon_days`
/// consecutive future dates, so `points.len() == history.len() + horizon_days`.
#[derive(Debug, Clone, Serialize)]
pub struct CombinedSeries {
    pub entity: EntityKey,
    pub metric: Metric,
    /// Name of the strategy that produced `points`
    pub model: String,
    pub horizon_days: usize,
    pub history: Vec<SeriesPoint>,
    pub points: Vec<ForecastPoint>,
}

impl CombinedSeries {
    /// The predicted points after the last historical date
    pub fn future(&self) -> &[ForecastPoint] {
        &self.points[self.history.len().min(self.points.len())..]
    }
}

/// Errors raised while producing a forecast
#[derive(Debug, Error)]
pub enum ForecastError {
    /// Nothing left to model after cleaning
    #[error("No data to forecast for '{entity}'")]
    InputEmpty { entity: String },

    /// The model could not be fitted to the series
    #[error("Model fit failed: {0}")]
    ModelFit(String),

    /// The input series could not be resolved
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// A forecasting model
pub trait ForecastStrategy: Send + Sync {
    /// Short name reported alongside results
    fn name(&self) -> &'static str;

    /// Produces fitted values for every point of `history` followed by
    /// `horizon_days` daily predictions after its last date
    ///
    /// `history` is non-empty with strictly increasing dates.
    fn forecast(
        &self,
        history: &[SeriesPoint],
        horizon_days: usize,
    ) -> Result<Vec<ForecastPoint>, ForecastError>;
}

/// The `horizon_days` consecutive dates following `last`
pub fn future_dates(last: NaiveDate, horizon_days: usize) -> Vec<NaiveDate> {
    last.iter_days().skip(1).take(horizon_days).collect()
}
