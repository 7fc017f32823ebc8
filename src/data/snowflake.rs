//! Snowflake SQL API executor
//!
//! Submits statements to `POST /api/v2/statements` and decodes the JSON result
//! set. Every value arrives as a string (or null) and is typed using the
//! column metadata in `resultSetMetaData.rowType`. Large results are split
//! into partitions; partitions after the first are fetched with
//! `GET /api/v2/statements/{handle}?partition=n`.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

use super::executor::{QueryExecutor, QueryParam, QueryResult, SourceError};
use super::number_value;

const STATEMENTS_PATH: &str = "/api/v2/statements";

/// Days from 0001-01-01 (CE day 1) to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Connection settings for a Snowflake account
#[derive(Debug, Clone, PartialEq)]
pub struct SnowflakeConfig {
    /// Account identifier, e.g. `myorg-myaccount`
    pub account: String,
    /// Bearer token (key-pair JWT, OAuth or programmatic access token)
    pub token: String,
    /// Value of `X-Snowflake-Authorization-Token-Type`
    pub token_type: String,
    pub database: String,
    pub schema: String,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    /// Server-side statement timeout in seconds
    pub statement_timeout_secs: u64,
}

/// Request body for `POST /api/v2/statements`
#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    database: &'a str,
    schema: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: BTreeMap<String, Binding>,
}

#[derive(Debug, Serialize, PartialEq)]
struct Binding {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    row_type: Vec<ColumnMeta>,
    #[serde(default)]
    partition_info: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ColumnMeta {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PartitionResponse {
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

/// Executor speaking the Snowflake SQL API over HTTPS
#[derive(Debug, Clone)]
pub struct SnowflakeExecutor {
    client: Client,
    base_url: String,
    config: SnowflakeConfig,
}

impl SnowflakeExecutor {
    /// Creates an executor for `https://<account>.snowflakecomputing.com`
    pub fn new(config: SnowflakeConfig) -> Self {
        let base_url = format!("https://{}.snowflakecomputing.com", config.account);
        Self {
            client: Client::new(),
            base_url,
            config,
        }
    }

    /// Overrides the API base URL (private link endpoints, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body<'a>(&'a self, sql: &'a str, params: &[QueryParam]) -> StatementRequest<'a> {
        let bindings = params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let binding = match param {
                    QueryParam::Text(s) => Binding {
                        kind: "TEXT",
                        value: s.clone(),
                    },
                    QueryParam::Integer(n) => Binding {
                        kind: "FIXED",
                        value: n.to_string(),
                    },
                };
                ((i + 1).to_string(), binding)
            })
            .collect();

        StatementRequest {
            statement: sql.trim(),
            timeout: self.config.statement_timeout_secs,
            database: &self.config.database,
            schema: &self.config.schema,
            warehouse: self.config.warehouse.as_deref(),
            role: self.config.role.as_deref(),
            bindings,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.config.token)
            .header("X-Snowflake-Authorization-Token-Type", &self.config.token_type)
            .header(header::ACCEPT, "application/json")
            .header(header::USER_AGENT, concat!("covidcast/", env!("CARGO_PKG_VERSION")))
    }

    async fn fetch_partition(
        &self,
        handle: &str,
        partition: usize,
    ) -> Result<Vec<Vec<Option<String>>>, SourceError> {
        let url = format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle);
        debug!(handle, partition, "fetching result partition");

        let response = self
            .authorized(self.client.get(&url))
            .query(&[("partition", partition)])
            .send()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        if !status.is_success() {
            return Err(classify_status(status, error_message(&text)));
        }

        let parsed: PartitionResponse =
            serde_json::from_str(&text).map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(parsed.data)
    }
}

#[async_trait]
impl QueryExecutor for SnowflakeExecutor {
    async fn execute(&self, sql: &str, params: &[QueryParam]) -> Result<QueryResult, SourceError> {
        let url = format!("{}{}", self.base_url, STATEMENTS_PATH);
        let body = self.request_body(sql, params);
        debug!(url = %url, bindings = body.bindings.len(), "submitting statement");

        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        if status == StatusCode::ACCEPTED {
            return Err(SourceError::Query(format!(
                "statement still running after {}s",
                self.config.statement_timeout_secs
            )));
        }
        if !status.is_success() {
            return Err(classify_status(status, error_message(&text)));
        }

        let parsed: StatementResponse =
            serde_json::from_str(&text).map_err(|e| SourceError::Decode(e.to_string()))?;
        let meta = parsed
            .result_set_meta_data
            .ok_or_else(|| SourceError::Decode("response has no resultSetMetaData".to_string()))?;

        let mut data = parsed.data;
        if meta.partition_info.len() > 1 {
            let handle = parsed.statement_handle.ok_or_else(|| {
                SourceError::Decode("partitioned result without statementHandle".to_string())
            })?;
            for partition in 1..meta.partition_info.len() {
                data.extend(self.fetch_partition(&handle, partition).await?);
            }
        }

        decode_rows(&meta.row_type, data)
    }
}

/// Maps an HTTP failure onto the executor error taxonomy
fn classify_status(status: StatusCode, message: String) -> SourceError {
    let detail = format!("HTTP {}: {}", status.as_u16(), message);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        SourceError::Connection(detail)
    } else {
        SourceError::Query(detail)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<StatementResponse>(body)
        .ok()
        .and_then(|r| r.message)
        .unwrap_or_else(|| body.trim().to_string())
}

fn decode_rows(
    row_type: &[ColumnMeta],
    data: Vec<Vec<Option<String>>>,
) -> Result<QueryResult, SourceError> {
    let columns = row_type.iter().map(|c| c.name.clone()).collect();
    let rows = data
        .into_iter()
        .map(|raw| {
            if raw.len() != row_type.len() {
                return Err(SourceError::Decode(format!(
                    "row has {} values for {} columns",
                    raw.len(),
                    row_type.len()
                )));
            }
            row_type
                .iter()
                .zip(raw)
                .map(|(column, value)| decode_value(column, value))
                .collect::<Result<Vec<Value>, SourceError>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(QueryResult { columns, rows })
}

fn decode_value(column: &ColumnMeta, raw: Option<String>) -> Result<Value, SourceError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let bad = |what: &str| {
        SourceError::Decode(format!("column {}: '{}' is not a valid {}", column.name, raw, what))
    };

    match column.kind.to_lowercase().as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| bad("integer")),
        "fixed" | "real" => raw
            .parse::<f64>()
            .map(number_value)
            .map_err(|_| bad("number")),
        "date" => raw
            .parse::<i32>()
            .ok()
            .and_then(|days| days.checked_add(UNIX_EPOCH_DAYS_FROM_CE))
            .and_then(NaiveDate::from_num_days_from_ce_opt)
            .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
            .ok_or_else(|| bad("date")),
        "boolean" => match raw.to_lowercase().as_str() {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(bad("boolean")),
        },
        _ => Ok(Value::String(raw.clone())),
    }
}
