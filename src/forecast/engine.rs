//! Forecast engine: resolve, clean, model

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cleaning::{clean_series, default_epoch};
use super::rolling::RollingAverageStrategy;
use super::{CombinedSeries, ForecastError, ForecastStrategy, SeriesPoint};
use crate::data::{EntityKey, Metric};
use crate::resolver::SeriesResolver;

/// Which model the engine should use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelPreference {
    /// Seasonal model when compiled in, rolling average otherwise
    #[default]
    Auto,
    Seasonal,
    Rolling,
}

impl fmt::Display for ModelPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelPreference::Auto => "auto",
            ModelPreference::Seasonal => "seasonal",
            ModelPreference::Rolling => "rolling",
        };
        f.write_str(name)
    }
}

impl FromStr for ModelPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ModelPreference::Auto),
            "seasonal" => Ok(ModelPreference::Seasonal),
            "rolling" => Ok(ModelPreference::Rolling),
            other => Err(other.to_string()),
        }
    }
}

/// Engine behaviour knobs
#[derive(Debug, Clone)]
pub struct ForecastSettings {
    pub model: ModelPreference,
    /// Retry with the rolling average when the primary model fails to fit
    pub fallback_on_model_failure: bool,
    pub changepoint_prior_scale: f64,
    /// Observations before this date are ignored
    pub epoch: NaiveDate,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            model: ModelPreference::Auto,
            fallback_on_model_failure: false,
            changepoint_prior_scale: 0.05,
            epoch: default_epoch(),
        }
    }
}

/// Whether the seasonal model was compiled in
pub fn seasonal_model_available() -> bool {
    cfg!(feature = "seasonal-model")
}

/// Picks the strategy for `settings`
///
/// Asking for the seasonal model in a build without it logs a warning and
/// returns the rolling average.
pub fn select_strategy(settings: &ForecastSettings) -> Box<dyn ForecastStrategy> {
    if settings.model == ModelPreference::Rolling {
        return Box::new(RollingAverageStrategy::default());
    }
    match seasonal_strategy(settings) {
        Some(strategy) => strategy,
        None => {
            if settings.model == ModelPreference::Seasonal {
                warn!("seasonal model not compiled in, using rolling average");
            }
            Box::new(RollingAverageStrategy::default())
        }
    }
}

#[cfg(feature = "seasonal-model")]
fn seasonal_strategy(settings: &ForecastSettings) -> Option<Box<dyn ForecastStrategy>> {
    Some(Box::new(super::seasonal::SeasonalModelStrategy::new(
        settings.changepoint_prior_scale,
    )))
}

#[cfg(not(feature = "seasonal-model"))]
fn seasonal_strategy(_settings: &ForecastSettings) -> Option<Box<dyn ForecastStrategy>> {
    None
}

/// Produces combined historical + forecast series for a state
pub struct ForecastEngine {
    resolver: Arc<SeriesResolver>,
    strategy: Box<dyn ForecastStrategy>,
    fallback: RollingAverageStrategy,
    settings: ForecastSettings,
}

impl ForecastEngine {
    /// Creates an engine, choosing the strategy once from `settings`
    pub fn new(resolver: Arc<SeriesResolver>, settings: ForecastSettings) -> Self {
        let strategy = select_strategy(&settings);
        info!(model = strategy.name(), "forecast strategy selected");
        Self::with_strategy(resolver, settings, strategy)
    }

    /// Creates an engine with an explicit strategy
    pub fn with_strategy(
        resolver: Arc<SeriesResolver>,
        settings: ForecastSettings,
        strategy: Box<dyn ForecastStrategy>,
    ) -> Self {
        Self {
            resolver,
            strategy,
            fallback: RollingAverageStrategy::default(),
            settings,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Forecasts daily new cases
    pub async fn forecast(
        &self,
        key: &EntityKey,
        horizon_days: usize,
    ) -> Result<CombinedSeries, ForecastError> {
        self.forecast_metric(key, Metric::Cases, horizon_days).await
    }

    /// Forecasts the daily increments of `metric`
    ///
    /// # Arguments
    /// * `key` - State to forecast
    /// * `metric` - Cases or deaths
    /// * `horizon_days` - Number of future days to predict
    ///
    /// # Returns
    /// * `Ok(CombinedSeries)` with `history.len() + horizon_days` points
    /// * `Err(ForecastError::InputEmpty)` if nothing is left after cleaning
    /// * `Err(ForecastError::ModelFit)` if the model fails and fallback is off
    pub async fn forecast_metric(
        &self,
        key: &EntityKey,
        metric: Metric,
        horizon_days: usize,
    ) -> Result<CombinedSeries, ForecastError> {
        let rows = self.resolver.cumulative_for_state(key).await?;
        let history = clean_series(&rows, metric, self.settings.epoch);
        debug!(entity = %key, rows = rows.len(), points = history.len(), "series cleaned");
        self.forecast_history(key, metric, history, horizon_days)
    }

    /// Runs the model over an already-cleaned series
    pub fn forecast_history(
        &self,
        key: &EntityKey,
        metric: Metric,
        history: Vec<SeriesPoint>,
        horizon_days: usize,
    ) -> Result<CombinedSeries, ForecastError> {
        if history.is_empty() {
            return Err(ForecastError::InputEmpty {
                entity: key.to_string(),
            });
        }

        let (model, points) = match self.strategy.forecast(&history, horizon_days) {
            Ok(points) => (self.strategy.name(), points),
            Err(ForecastError::ModelFit(reason)) if self.settings.fallback_on_model_failure => {
                warn!(entity = %key, model = self.strategy.name(), %reason, "model fit failed, using rolling average");
                (
                    self.fallback.name(),
                    self.fallback.forecast(&history, horizon_days)?,
                )
            }
            Err(e) => return Err(e),
        };

        Ok(CombinedSeries {
            entity: key.clone(),
            metric,
            model: model.to_string(),
            horizon_days,
            history,
            points,
        })
    }
}
