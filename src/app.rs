//! Application wiring for covidcast
//!
//! Builds the executor, snapshot store, resolver, forecast engine and report
//! sink from configuration, then answers [`Request`]s with JSON values. This
//! is the layer that decides an empty series means "not found".

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::cli::Request;
use crate::config::{Config, WarehouseBackend};
use crate::data::{
    EntityKey, FileSnapshotStore, QueryExecutor, Row, SeriesScope, SnapshotError,
    SnowflakeExecutor, SqliteExecutor,
};
use crate::forecast::{ForecastEngine, ForecastError, ForecastSettings};
use crate::report::{daily_table, FileReportSink, ReportError, ReportSink};
use crate::resolver::{ResolveError, SeriesResolver};

/// Error types surfaced to the command line
#[derive(Debug, Error)]
pub enum AppError {
    /// The request resolved to an empty series
    #[error("{0}")]
    NoData(String),

    /// No home directory to derive a default location from
    #[error("Could not determine a {0} directory; set it in the config")]
    MissingDirectory(&'static str),

    /// Snapshots can only be materialized from the live warehouse
    #[error("Cannot materialize a snapshot while offline")]
    Offline,

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything a request needs, built once per process
pub struct App {
    resolver: Arc<SeriesResolver>,
    engine: ForecastEngine,
    snapshots: FileSnapshotStore,
    reports: Arc<dyn ReportSink>,
    default_horizon: usize,
}

impl App {
    /// Builds the application from validated configuration
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let executor: Arc<dyn QueryExecutor> = match config.warehouse.backend {
            WarehouseBackend::Sqlite => {
                Arc::new(SqliteExecutor::new(config.warehouse.sqlite_path.clone()))
            }
            WarehouseBackend::Snowflake => Arc::new(SnowflakeExecutor::new(config.snowflake())),
        };

        let snapshots = match &config.snapshot_dir {
            Some(dir) => FileSnapshotStore::with_dir(dir.clone()),
            None => FileSnapshotStore::new().ok_or(AppError::MissingDirectory("snapshot"))?,
        };
        let reports = match &config.report_dir {
            Some(dir) => FileReportSink::with_dir(dir.clone()),
            None => FileReportSink::new().ok_or(AppError::MissingDirectory("report"))?,
        };

        info!(
            backend = ?config.warehouse.backend,
            offline = config.offline,
            snapshots = %snapshots.root().display(),
            "covidcast starting"
        );

        Ok(Self::with_parts(
            executor,
            snapshots,
            Arc::new(reports),
            config,
        ))
    }

    /// Builds the application around an explicit executor and sinks
    pub fn with_parts(
        executor: Arc<dyn QueryExecutor>,
        snapshots: FileSnapshotStore,
        reports: Arc<dyn ReportSink>,
        config: &Config,
    ) -> Self {
        let resolver = Arc::new(SeriesResolver::new(
            executor,
            Arc::new(snapshots.clone()),
            config.resolver_settings(),
        ));
        let engine = ForecastEngine::new(resolver.clone(), config.forecast_settings());
        Self {
            resolver,
            engine,
            snapshots,
            reports,
            default_horizon: config.forecast.horizon_days,
        }
    }

    /// Replaces the forecast engine settings (used by tests and embedders)
    pub fn with_forecast_settings(mut self, settings: ForecastSettings) -> Self {
        self.engine = ForecastEngine::new(self.resolver.clone(), settings);
        self
    }

    /// Answers one request
    ///
    /// # Returns
    /// * `Ok(Value)` ready to print as JSON
    /// * `Err(AppError::NoData)` where an empty series means "not found"
    pub async fn execute(&self, request: Request) -> Result<Value, AppError> {
        match request {
            Request::Cases { state } => {
                let rows = self.resolver.daily_for_state(&state).await?;
                non_empty(rows, || format!("No data for state '{}'", state))
            }
            Request::National => Ok(rows_value(self.resolver.daily_national().await?)),
            Request::Rates { state } => {
                let rows = self.resolver.rates_for_state(&state).await?;
                non_empty(rows, || format!("No per-100k data for state '{}'", state))
            }
            Request::Patterns { state } => {
                Ok(rows_value(self.resolver.waves_for_state(&state).await?))
            }
            Request::Forecast {
                state,
                days,
                metric,
                write_report,
            } => {
                let horizon = days.unwrap_or(self.default_horizon);
                let series = self.engine.forecast_metric(&state, metric, horizon).await?;
                let mut output = serde_json::to_value(&series)?;
                if write_report {
                    let url = self.reports.write_forecast(&series)?;
                    output["url"] = Value::String(url);
                }
                Ok(output)
            }
            Request::Eda { state } => self.eda(&state).await,
            Request::Snapshot { scope } => self.snapshot(&scope).await,
        }
    }

    async fn eda(&self, state: &EntityKey) -> Result<Value, AppError> {
        let rows = self.resolver.cumulative_for_state(state).await?;
        if rows.is_empty() {
            return Err(AppError::NoData(format!("No data for state '{}'", state)));
        }
        let table = daily_table(&rows);
        let locators = self.reports.write_daily_table(state, &table)?;
        Ok(json!({ "url": locators.json, "csv": locators.csv, "rows": table.len() }))
    }

    async fn snapshot(&self, scope: &SeriesScope) -> Result<Value, AppError> {
        if self.resolver.is_offline() {
            return Err(AppError::Offline);
        }
        let rows = self.resolver.fetch_live(scope).await?;
        if rows.is_empty() {
            return Err(AppError::NoData(format!("No rows to snapshot for {}", scope)));
        }
        let path: PathBuf = self.snapshots.write(scope, &rows)?;
        info!(%scope, rows = rows.len(), path = %path.display(), "snapshot written");
        Ok(json!({ "path": path.display().to_string(), "rows": rows.len() }))
    }
}

fn rows_value(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

fn non_empty(rows: Vec<Row>, message: impl FnOnce() -> String) -> Result<Value, AppError> {
    if rows.is_empty() {
        Err(AppError::NoData(message()))
    } else {
        Ok(rows_value(rows))
    }
}
