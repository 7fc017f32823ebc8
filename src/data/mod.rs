//! Core data types for covidcast
//!
//! Rows are ordered JSON maps with lower-cased column names. The live
//! warehouse and the snapshot files both produce this shape, so callers never
//! need to know which tier answered.

pub mod entity;
pub mod executor;
pub mod queries;
pub mod snapshot;
pub mod snowflake;
pub mod sqlite;

pub use entity::{EntityKey, EntityKeyError};
pub use executor::{with_trailing_averages, QueryExecutor, QueryParam, QueryResult, SourceError};
pub use snapshot::{FileSnapshotStore, SnapshotError, SnapshotStore};
pub use snowflake::{SnowflakeConfig, SnowflakeExecutor};
pub use sqlite::SqliteExecutor;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// One result row: lower-cased column name to value, in column order
pub type Row = serde_json::Map<String, Value>;

/// Column names shared with the renderer
pub mod columns {
    pub const DATE: &str = "date";
    pub const NEW_CASES: &str = "new_cases";
    pub const NEW_DEATHS: &str = "new_deaths";
    pub const MA7_NEW_CASES: &str = "ma7_new_cases";
    pub const MA7_NEW_DEATHS: &str = "ma7_new_deaths";
    pub const CASES: &str = "cases";
    pub const DEATHS: &str = "deaths";
    pub const TOTAL_CASES: &str = "total_cases";
    pub const TOTAL_DEATHS: &str = "total_deaths";
}

/// Which series a request addresses
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SeriesScope {
    /// The aggregate national series
    National,
    /// A single state's series
    State(EntityKey),
}

impl fmt::Display for SeriesScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesScope::National => write!(f, "national"),
            SeriesScope::State(key) => write!(f, "state:{}", key),
        }
    }
}

/// Reported metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cases,
    Deaths,
}

impl Metric {
    /// Column holding the cumulative count
    pub fn cumulative_column(&self) -> &'static str {
        match self {
            Metric::Cases => columns::CASES,
            Metric::Deaths => columns::DEATHS,
        }
    }

    /// Human-readable name
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Cases => "cases",
            Metric::Deaths => "deaths",
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cases" | "case" => Ok(Metric::Cases),
            "deaths" | "death" => Ok(Metric::Deaths),
            other => Err(other.to_string()),
        }
    }
}

/// Reads the `date` column of a row
///
/// Accepts `YYYY-MM-DD` and timestamps that start with one.
pub fn row_date(row: &Row) -> Option<NaiveDate> {
    let raw = row.get(columns::DATE)?.as_str()?;
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// Reads a numeric column, accepting numbers and numeric strings
pub fn row_number(row: &Row, column: &str) -> Option<f64> {
    match row.get(column)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Converts a float into a JSON value, mapping non-finite values to null
pub fn number_value(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
