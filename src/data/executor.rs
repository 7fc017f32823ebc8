//! Query executor abstraction over the analytical warehouse
//!
//! The resolver only needs "run this parameterized SQL and give me columns
//! and rows". Connection handling lives entirely inside each executor; every
//! call obtains and releases its own handle.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::{number_value, row_number, Row};

/// A positional query parameter
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Text(String),
    Integer(i64),
}

/// Raw result of a query: column names plus rows of values in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Converts into rows keyed by lower-cased column name
    ///
    /// Returns `SourceError::Decode` if a row's width does not match the
    /// column list.
    pub fn into_rows(self) -> Result<Vec<Row>, SourceError> {
        let columns: Vec<String> = self.columns.iter().map(|c| c.to_lowercase()).collect();
        self.rows
            .into_iter()
            .enumerate()
            .map(|(index, values)| {
                if values.len() != columns.len() {
                    return Err(SourceError::Decode(format!(
                        "row {} has {} values for {} columns",
                        index,
                        values.len(),
                        columns.len()
                    )));
                }
                Ok(columns.iter().cloned().zip(values).collect())
            })
            .collect()
    }
}

/// Failures reported by a query executor
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// The warehouse could not be reached or refused the session
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The warehouse rejected or failed the statement
    #[error("Query failed: {0}")]
    Query(String),

    /// The result could not be decoded into rows
    #[error("Failed to decode result: {0}")]
    Decode(String),

    /// The executor itself broke (e.g. its worker task panicked)
    #[error("Executor failure: {0}")]
    Internal(String),
}

impl SourceError {
    /// Whether a resolver may answer from the next tier instead
    ///
    /// Connection, query and decode failures are upstream conditions.
    /// `Internal` points at a bug in this process and must surface.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SourceError::Internal(_))
    }
}

/// Executes parameterized, read-only SQL against the warehouse
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs `sql` with positional `params`
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult, SourceError>;

    /// Whether the dialect supports `AVG(..) OVER (.. ROWS BETWEEN ..)`
    ///
    /// When false, callers run a plain query and compute trailing averages
    /// with [`with_trailing_averages`].
    fn supports_window_functions(&self) -> bool {
        true
    }
}

/// Adds trailing moving-average columns computed in-process
///
/// For each `(source, target)` pair, `target` is inserted right after
/// `source` and holds the mean of the non-null `source` values over the last
/// `window` rows (the current row included), matching SQL's
/// `AVG(source) OVER (ORDER BY date ROWS BETWEEN window-1 PRECEDING AND CURRENT ROW)`.
/// Rows must already be in date order.
pub fn with_trailing_averages(rows: Vec<Row>, pairs: &[(&str, &str)], window: usize) -> Vec<Row> {
    let window = window.max(1);
    let averages: Vec<Vec<Value>> = pairs
        .iter()
        .map(|(source, _)| {
            let values: Vec<Option<f64>> = rows.iter().map(|r| row_number(r, source)).collect();
            (0..values.len())
                .map(|i| {
                    let start = (i + 1).saturating_sub(window);
                    let present: Vec<f64> = values[start..=i].iter().flatten().copied().collect();
                    if present.is_empty() {
                        Value::Null
                    } else {
                        number_value(present.iter().sum::<f64>() / present.len() as f64)
                    }
                })
                .collect()
        })
        .collect();

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| {
            let mut out = Row::new();
            for (column, value) in row {
                let pair = pairs.iter().position(|(source, _)| *source == column);
                out.insert(column, value);
                if let Some(p) = pair {
                    out.insert(pairs[p].1.to_string(), averages[p][i].clone());
                }
            }
            out
        })
        .collect()
}
