//! Resilient series resolver
//!
//! Answers series requests from the live warehouse, falling back to a
//! pre-materialized snapshot when the warehouse cannot answer. Every operation
//! sits behind its own [`ExpiringMemo`], keyed by the canonical entity key (or
//! the empty key for the national series).

use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, Clock, ExpiringMemo, SystemClock};
use crate::data::queries::{
    state_cumulative, SeriesQuery, DEFAULT_CUMULATIVE_TABLE, MA_WINDOW, NATIONAL_DAILY,
    STATE_DAILY, STATE_RATES, STATE_WAVES,
};
use crate::data::{
    with_trailing_averages, EntityKey, QueryExecutor, QueryParam, Row, SeriesScope,
    SnapshotError, SnapshotStore, SourceError,
};

/// Default freshness window for resolved series
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Errors surfaced by the resolver
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The live source failed and no snapshot could stand in for it
    #[error("Warehouse unavailable: {message}")]
    UpstreamUnavailable { message: String },

    /// A snapshot exists but could not be read
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// The executor failed in a way that must not be masked by a fallback
    #[error(transparent)]
    Executor(SourceError),
}

/// Resolver behaviour knobs
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Skip the live source entirely
    pub offline: bool,
    /// How long a resolved series stays fresh
    pub ttl: Duration,
    /// Optional bound on entries per operation
    pub max_entries: Option<usize>,
    /// Table (optionally `database.schema.table`) holding county-level
    /// cumulative counts
    pub cumulative_table: String,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            offline: false,
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
            max_entries: None,
            cumulative_table: DEFAULT_CUMULATIVE_TABLE.to_string(),
        }
    }
}

type SeriesMemo = ExpiringMemo<CacheKey, Vec<Row>>;

/// Live warehouse plus snapshot tier, behind per-operation memos
pub struct SeriesResolver {
    executor: Arc<dyn QueryExecutor>,
    snapshots: Arc<dyn SnapshotStore>,
    offline: bool,
    cumulative_query: SeriesQuery,
    state_daily: SeriesMemo,
    national_daily: SeriesMemo,
    state_rates: SeriesMemo,
    state_waves: SeriesMemo,
    state_cumulative: SeriesMemo,
}

impl SeriesResolver {
    /// Creates a resolver using the system clock
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        snapshots: Arc<dyn SnapshotStore>,
        settings: ResolverSettings,
    ) -> Self {
        Self::with_clock(executor, snapshots, settings, Arc::new(SystemClock))
    }

    /// Creates a resolver whose memos read time from `clock`
    pub fn with_clock(
        executor: Arc<dyn QueryExecutor>,
        snapshots: Arc<dyn SnapshotStore>,
        settings: ResolverSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let memo = || {
            let memo = SeriesMemo::new(settings.ttl).with_clock(clock.clone());
            match settings.max_entries {
                Some(max) => memo.with_max_entries(max),
                None => memo,
            }
        };

        Self {
            executor,
            snapshots,
            offline: settings.offline,
            cumulative_query: state_cumulative(&settings.cumulative_table),
            state_daily: memo(),
            national_daily: memo(),
            state_rates: memo(),
            state_waves: memo(),
            state_cumulative: memo(),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Daily new cases/deaths with 7-row moving averages for one state
    ///
    /// # Returns
    /// * `Ok(rows)` from the warehouse, or from the state snapshot if the
    ///   warehouse failed; empty when offline without a snapshot
    /// * `Err(ResolveError::UpstreamUnavailable)` if both tiers fail
    pub async fn daily_for_state(&self, key: &EntityKey) -> Result<Vec<Row>, ResolveError> {
        let scope = SeriesScope::State(key.clone());
        self.state_daily
            .get_or_try_insert_with_async(CacheKey::new().arg(key), || {
                self.with_snapshot_fallback(&STATE_DAILY, &scope)
            })
            .await
    }

    /// Daily new cases/deaths with 7-row moving averages for the country
    pub async fn daily_national(&self) -> Result<Vec<Row>, ResolveError> {
        let scope = SeriesScope::National;
        self.national_daily
            .get_or_try_insert_with_async(CacheKey::new(), || {
                self.with_snapshot_fallback(&NATIONAL_DAILY, &scope)
            })
            .await
    }

    /// Per-100k daily rates with 7-row moving averages for one state
    ///
    /// There is no snapshot tier for rates; offline this is always empty.
    pub async fn rates_for_state(&self, key: &EntityKey) -> Result<Vec<Row>, ResolveError> {
        let scope = SeriesScope::State(key.clone());
        self.state_rates
            .get_or_try_insert_with_async(CacheKey::new().arg(key), || {
                self.live_only(&STATE_RATES, &scope)
            })
            .await
    }

    /// Detected waves (start, end, length) for one state
    pub async fn waves_for_state(&self, key: &EntityKey) -> Result<Vec<Row>, ResolveError> {
        let scope = SeriesScope::State(key.clone());
        self.state_waves
            .get_or_try_insert_with_async(CacheKey::new().arg(key), || {
                self.live_only(&STATE_WAVES, &scope)
            })
            .await
    }

    /// Cumulative cases/deaths per date for one state
    pub async fn cumulative_for_state(&self, key: &EntityKey) -> Result<Vec<Row>, ResolveError> {
        let scope = SeriesScope::State(key.clone());
        self.state_cumulative
            .get_or_try_insert_with_async(CacheKey::new().arg(key), || {
                self.live_only(&self.cumulative_query, &scope)
            })
            .await
    }

    /// Runs the daily query for `scope` against the warehouse only
    ///
    /// Bypasses the memo and the snapshot tier; used to materialize snapshots.
    pub async fn fetch_live(&self, scope: &SeriesScope) -> Result<Vec<Row>, ResolveError> {
        let query = match scope {
            SeriesScope::National => &NATIONAL_DAILY,
            SeriesScope::State(_) => &STATE_DAILY,
        };
        self.run_live(query, scope).await.map_err(upstream_error)
    }

    async fn with_snapshot_fallback(
        &self,
        query: &SeriesQuery,
        scope: &SeriesScope,
    ) -> Result<Vec<Row>, ResolveError> {
        if self.offline {
            debug!(%scope, "offline, answering from snapshot");
            return Ok(self.snapshots.read(scope)?.unwrap_or_default());
        }

        match self.run_live(query, scope).await {
            Ok(rows) => Ok(rows),
            Err(e) if e.is_recoverable() => {
                warn!(%scope, query = query.name, error = %e, "live query failed, trying snapshot");
                match self.snapshots.read(scope)? {
                    Some(rows) => {
                        info!(%scope, rows = rows.len(), "served from snapshot");
                        Ok(rows)
                    }
                    None => Err(ResolveError::UpstreamUnavailable {
                        message: e.to_string(),
                    }),
                }
            }
            Err(e) => Err(ResolveError::Executor(e)),
        }
    }

    async fn live_only(
        &self,
        query: &SeriesQuery,
        scope: &SeriesScope,
    ) -> Result<Vec<Row>, ResolveError> {
        if self.offline {
            debug!(%scope, query = query.name, "offline, no snapshot tier");
            return Ok(Vec::new());
        }
        self.run_live(query, scope).await.map_err(|e| {
            warn!(%scope, query = query.name, error = %e, "live query failed");
            upstream_error(e)
        })
    }

    async fn run_live(
        &self,
        query: &SeriesQuery,
        scope: &SeriesScope,
    ) -> Result<Vec<Row>, SourceError> {
        let params = match scope {
            SeriesScope::National => Vec::new(),
            SeriesScope::State(key) => vec![QueryParam::Text(key.as_str().to_string())],
        };

        let in_process = !query.averages.is_empty() && !self.executor.supports_window_functions();
        let sql: &str = if in_process { &query.plain } else { &query.windowed };

        debug!(%scope, query = query.name, in_process, "running live query");
        let rows = self.executor.execute(sql, &params).await?.into_rows()?;

        if in_process {
            Ok(with_trailing_averages(rows, query.averages, MA_WINDOW))
        } else {
            Ok(rows)
        }
    }
}

fn upstream_error(e: SourceError) -> ResolveError {
    if e.is_recoverable() {
        ResolveError::UpstreamUnavailable {
            message: e.to_string(),
        }
    } else {
        ResolveError::Executor(e)
    }
}
