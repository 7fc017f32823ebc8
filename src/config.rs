//! Configuration loading
//!
//! Settings come from an optional TOML file (`--config <path>` or
//! `COVIDCAST_CONFIG`), then environment variables override individual keys.
//! Secrets are only ever read from the environment.

use chrono::Duration;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data::queries::{
    is_table_identifier, DEFAULT_CUMULATIVE_TABLE, SNOWFLAKE_CUMULATIVE_TABLE,
};
use crate::data::SnowflakeConfig;
use crate::forecast::{default_epoch, ForecastSettings, ModelPreference};
use crate::resolver::{ResolverSettings, DEFAULT_TTL_SECS};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "COVIDCAST_CONFIG";

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config:\n - {}", .0.join("\n - "))]
    Invalid(Vec<String>),
}

/// Which warehouse backend answers live queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseBackend {
    /// Local SQLite file with the warehouse views
    #[default]
    Sqlite,
    /// Snowflake SQL API
    Snowflake,
}

/// `[warehouse]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub backend: WarehouseBackend,
    pub sqlite_path: PathBuf,
    pub account: Option<String>,
    /// Bearer token, from `SNOWFLAKE_TOKEN` only
    #[serde(skip)]
    pub token: Option<String>,
    pub token_type: String,
    pub database: String,
    pub schema: String,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    pub statement_timeout_secs: u64,
    /// County-level cumulative table; defaults per backend when unset
    pub nyt_table: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::Sqlite,
            sqlite_path: PathBuf::from("covid.db"),
            account: None,
            token: None,
            token_type: "KEYPAIR_JWT".to_string(),
            database: "COVID_DB".to_string(),
            schema: "MARTS".to_string(),
            warehouse: None,
            role: None,
            statement_timeout_secs: 60,
            nyt_table: None,
        }
    }
}

/// `[forecast]` section
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub model: ModelPreference,
    pub horizon_days: usize,
    pub fallback_on_model_failure: bool,
    pub changepoint_prior_scale: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model: ModelPreference::Auto,
            horizon_days: 30,
            fallback_on_model_failure: false,
            changepoint_prior_scale: 0.05,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Answer from snapshots only, never touching the warehouse
    pub offline: bool,
    pub cache_ttl_secs: i64,
    pub cache_max_entries: Option<usize>,
    /// Snapshot directory; the XDG data directory when unset
    pub snapshot_dir: Option<PathBuf>,
    /// Report directory; the XDG data directory when unset
    pub report_dir: Option<PathBuf>,
    pub warehouse: WarehouseConfig,
    pub forecast: ForecastConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            offline: false,
            cache_ttl_secs: DEFAULT_TTL_SECS,
            cache_max_entries: None,
            snapshot_dir: None,
            report_dir: None,
            warehouse: WarehouseConfig::default(),
            forecast: ForecastConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, else `COVIDCAST_CONFIG`, else defaults,
    /// then applies environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies `SNOWFLAKE_OFFLINE`, `SNOWFLAKE_TOKEN` and `SNOWFLAKE_ACCOUNT`
    ///
    /// `lookup` returns the variable's value, if set.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("SNOWFLAKE_OFFLINE") {
            self.offline = parse_flag(&raw);
        }
        if let Some(token) = lookup("SNOWFLAKE_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.warehouse.token = Some(token);
        }
        if let Some(account) = lookup("SNOWFLAKE_ACCOUNT").filter(|a| !a.trim().is_empty()) {
            self.warehouse.account = Some(account);
        }
    }

    /// Checks every setting, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues: Vec<String> = Vec::new();

        if self.cache_ttl_secs <= 0 {
            issues.push("cache_ttl_secs must be > 0".into());
        }
        if self.cache_max_entries == Some(0) {
            issues.push("cache_max_entries must be > 0 when set".into());
        }
        if self.forecast.horizon_days == 0 {
            issues.push("forecast.horizon_days must be > 0".into());
        }
        if !(self.forecast.changepoint_prior_scale > 0.0
            && self.forecast.changepoint_prior_scale.is_finite())
        {
            issues.push("forecast.changepoint_prior_scale must be > 0".into());
        }
        if self.warehouse.statement_timeout_secs == 0 {
            issues.push("warehouse.statement_timeout_secs must be > 0".into());
        }
        if let Some(table) = &self.warehouse.nyt_table {
            if !is_table_identifier(table) {
                issues.push(format!(
                    "warehouse.nyt_table must be [database.][schema.]table, got '{}'",
                    table
                ));
            }
        }

        // Offline runs never reach the warehouse, so its credentials are optional
        if self.warehouse.backend == WarehouseBackend::Snowflake && !self.offline {
            if self.warehouse.account.as_deref().map_or(true, str::is_empty) {
                issues.push("warehouse.account (or SNOWFLAKE_ACCOUNT) is required for snowflake".into());
            }
            if self.warehouse.token.is_none() {
                issues.push("SNOWFLAKE_TOKEN is required for snowflake".into());
            }
            if self.warehouse.database.is_empty() {
                issues.push("warehouse.database must not be empty".into());
            }
            if self.warehouse.schema.is_empty() {
                issues.push("warehouse.schema must not be empty".into());
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            offline: self.offline,
            ttl: Duration::seconds(self.cache_ttl_secs),
            max_entries: self.cache_max_entries,
            cumulative_table: self.cumulative_table(),
        }
    }

    /// Table the cumulative (forecast and EDA) query reads from
    ///
    /// Snowflake deployments read the marketplace share in its own database;
    /// a local warehouse carries the table alongside its views.
    pub fn cumulative_table(&self) -> String {
        match (&self.warehouse.nyt_table, self.warehouse.backend) {
            (Some(table), _) => table.clone(),
            (None, WarehouseBackend::Snowflake) => SNOWFLAKE_CUMULATIVE_TABLE.to_string(),
            (None, WarehouseBackend::Sqlite) => DEFAULT_CUMULATIVE_TABLE.to_string(),
        }
    }

    pub fn forecast_settings(&self) -> ForecastSettings {
        ForecastSettings {
            model: self.forecast.model,
            fallback_on_model_failure: self.forecast.fallback_on_model_failure,
            changepoint_prior_scale: self.forecast.changepoint_prior_scale,
            epoch: default_epoch(),
        }
    }

    /// Snowflake connection settings
    ///
    /// Missing credentials come back empty; [`validate`](Self::validate)
    /// rejects them for online runs.
    pub fn snowflake(&self) -> SnowflakeConfig {
        let warehouse = &self.warehouse;
        SnowflakeConfig {
            account: warehouse.account.clone().unwrap_or_default(),
            token: warehouse.token.clone().unwrap_or_default(),
            token_type: warehouse.token_type.clone(),
            database: warehouse.database.clone(),
            schema: warehouse.schema.clone(),
            warehouse: warehouse.warehouse.clone(),
            role: warehouse.role.clone(),
            statement_timeout_secs: warehouse.statement_timeout_secs,
        }
    }
}

/// Reads a boolean flag the way the deployment scripts set it
fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}
