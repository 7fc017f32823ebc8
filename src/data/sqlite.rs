//! SQLite warehouse executor
//!
//! Runs statements against a local SQLite file holding the same views as the
//! production warehouse. Each call opens its own read-only connection on a
//! blocking task.

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::executor::{QueryExecutor, QueryParam, QueryResult, SourceError};
use super::number_value;

/// Executor backed by a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    path: PathBuf,
}

impl SqliteExecutor {
    /// Creates an executor for the database at `path`
    ///
    /// The file is not touched until the first query.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult, SourceError> {
        let path = self.path.clone();
        let sql = sql.to_string();
        let params = params.to_vec();

        tokio::task::spawn_blocking(move || run_query(&path, &sql, &params))
            .await
            .map_err(|e| SourceError::Internal(format!("SQLite worker failed: {}", e)))?
    }
}

fn run_query(path: &Path, sql: &str, params: &[QueryParam]) -> Result<QueryResult, SourceError> {
    debug!(path = %path.display(), "opening SQLite warehouse");
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| SourceError::Connection(e.to_string()))?;

    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| SourceError::Query(e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let bound: Vec<SqlValue> = params
        .iter()
        .map(|p| match p {
            QueryParam::Text(s) => SqlValue::Text(s.clone()),
            QueryParam::Integer(i) => SqlValue::Integer(*i),
        })
        .collect();

    let mut rows = stmt
        .query(params_from_iter(bound.iter()))
        .map_err(|e| SourceError::Query(e.to_string()))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| SourceError::Query(e.to_string()))? {
        let mut record = Vec::with_capacity(columns.len());
        for index in 0..columns.len() {
            let value = row
                .get_ref(index)
                .map_err(|e| SourceError::Decode(e.to_string()))?;
            record.push(to_json(value)?);
        }
        out.push(record);
    }

    Ok(QueryResult { columns, rows: out })
}

fn to_json(value: ValueRef<'_>) -> Result<Value, SourceError> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => number_value(f),
        ValueRef::Text(bytes) => Value::String(
            std::str::from_utf8(bytes)
                .map_err(|e| SourceError::Decode(e.to_string()))?
                .to_string(),
        ),
        ValueRef::Blob(_) => {
            return Err(SourceError::Decode("unexpected BLOB column".to_string()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_db() -> (SqliteExecutor, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("warehouse.db");
        let conn = Connection::open(&path).expect("Failed to create database");
        conn.execute_batch(
            "CREATE TABLE readings (state TEXT, date TEXT, value INTEGER, ratio REAL);
             INSERT INTO readings VALUES ('Ohio', '2021-01-01', 3, 0.5);
             INSERT INTO readings VALUES ('Ohio', '2021-01-02', 4, NULL);
             INSERT INTO readings VALUES ('Utah', '2021-01-01', 9, 1.5);",
        )
        .expect("Failed to seed database");
        (SqliteExecutor::new(path), temp_dir)
    }

    #[tokio::test]
    async fn test_execute_binds_parameters_and_maps_types() {
        let (executor, _temp_dir) = create_test_db();

        let result = executor
            .execute(
                "SELECT date, value, ratio FROM readings WHERE state = ? ORDER BY date",
                &[QueryParam::Text("Ohio".into())],
            )
            .await
            .expect("Query should succeed");

        assert_eq!(result.columns, vec!["date", "value", "ratio"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0], vec![json!("2021-01-01"), json!(3), json!(0.5)]);
        assert_eq!(result.rows[1][2], Value::Null);
    }

    #[tokio::test]
    async fn test_missing_database_is_a_connection_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let executor = SqliteExecutor::new(temp_dir.path().join("absent.db"));

        let err = executor.execute("SELECT 1", &[]).await.unwrap_err();

        assert!(matches!(err, SourceError::Connection(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_bad_sql_is_a_query_error() {
        let (executor, _temp_dir) = create_test_db();

        let err = executor
            .execute("SELECT nope FROM nowhere", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Query(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_window_functions_are_supported() {
        let (executor, _temp_dir) = create_test_db();
        assert!(executor.supports_window_functions());

        let result = executor
            .execute(
                "SELECT AVG(value) OVER (ORDER BY date ROWS BETWEEN 6 PRECEDING AND CURRENT ROW) AS ma
                 FROM readings WHERE state = ? ORDER BY date",
                &[QueryParam::Text("Ohio".into())],
            )
            .await
            .expect("Window query should succeed");

        assert_eq!(result.rows[1][0], json!(3.5));
    }
}
