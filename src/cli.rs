//! Command-line interface parsing for covidcast
//!
//! This module handles parsing of CLI arguments using clap and turns the
//! parsed subcommand into a validated [`Request`] for the application.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::Config;
use crate::data::{EntityKey, EntityKeyError, Metric, SeriesScope};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified metric name is not recognized
    #[error("Invalid metric: '{0}'. Valid metrics: cases, deaths")]
    InvalidMetric(String),

    /// The state name is blank
    #[error("Invalid state: {0}")]
    InvalidState(#[from] EntityKeyError),
}

/// covidcast - COVID-19 case series, snapshots and forecasts
#[derive(Parser, Debug)]
#[command(name = "covidcast")]
#[command(about = "COVID-19 case series with warehouse fallback and short-horizon forecasts")]
#[command(version)]
pub struct Cli {
    /// Path to a TOML config file (defaults to $COVIDCAST_CONFIG)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Answer from snapshots only, never touching the warehouse
    #[arg(long, global = true)]
    pub offline: bool,

    /// Directory holding snapshot files
    #[arg(long, global = true, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Daily cases and deaths with 7-day averages for a state
    Cases {
        #[arg(long, default_value = "New York")]
        state: String,
    },

    /// Daily cases and deaths with 7-day averages for the whole country
    National,

    /// Daily per-100k rates for a state
    Rates {
        #[arg(long, default_value = "New York")]
        state: String,
    },

    /// Detected epidemic waves for a state
    Patterns {
        #[arg(long, default_value = "New York")]
        state: String,
    },

    /// Forecast daily new cases (or deaths) for a state
    ///
    /// Examples:
    ///   covidcast forecast --state ohio --days 14
    ///   covidcast forecast --state "new york" --metric deaths --write-report
    Forecast {
        #[arg(long, default_value = "California")]
        state: String,

        /// Days to predict (defaults to the configured horizon)
        #[arg(long)]
        days: Option<usize>,

        /// cases or deaths
        #[arg(long, default_value = "cases", value_name = "METRIC")]
        metric: String,

        /// Also write the forecast as a report file
        #[arg(long)]
        write_report: bool,
    },

    /// Write the exploratory daily table for a state
    Eda {
        #[arg(long, default_value = "California")]
        state: String,
    },

    /// Materialize a snapshot from the live warehouse
    Snapshot {
        #[arg(long, conflicts_with = "national", required_unless_present = "national")]
        state: Option<String>,

        #[arg(long)]
        national: bool,
    },
}

/// A validated request for the application
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Cases { state: EntityKey },
    National,
    Rates { state: EntityKey },
    Patterns { state: EntityKey },
    Forecast {
        state: EntityKey,
        /// `None` means the configured default horizon
        days: Option<usize>,
        metric: Metric,
        write_report: bool,
    },
    Eda { state: EntityKey },
    Snapshot { scope: SeriesScope },
}

/// Parses a metric string argument into a Metric enum.
///
/// # Arguments
/// * `s` - The metric string from CLI
///
/// # Returns
/// * `Ok(Metric)` if the string matches a valid metric
/// * `Err(CliError::InvalidMetric)` if the string doesn't match
pub fn parse_metric_arg(s: &str) -> Result<Metric, CliError> {
    s.parse::<Metric>()
        .map_err(|_| CliError::InvalidMetric(s.to_string()))
}

impl Request {
    /// Creates a Request from a parsed subcommand.
    ///
    /// State names are normalized here so every later layer sees the same key.
    /// A horizon of zero days falls back to the configured default.
    pub fn from_command(command: &Command) -> Result<Self, CliError> {
        Ok(match command {
            Command::Cases { state } => Request::Cases {
                state: EntityKey::parse(state)?,
            },
            Command::National => Request::National,
            Command::Rates { state } => Request::Rates {
                state: EntityKey::parse(state)?,
            },
            Command::Patterns { state } => Request::Patterns {
                state: EntityKey::parse(state)?,
            },
            Command::Forecast {
                state,
                days,
                metric,
                write_report,
            } => Request::Forecast {
                state: EntityKey::parse(state)?,
                days: days.filter(|d| *d > 0),
                metric: parse_metric_arg(metric)?,
                write_report: *write_report,
            },
            Command::Eda { state } => Request::Eda {
                state: EntityKey::parse(state)?,
            },
            Command::Snapshot { state, .. } => Request::Snapshot {
                scope: match state {
                    Some(state) => SeriesScope::State(EntityKey::parse(state)?),
                    None => SeriesScope::National,
                },
            },
        })
    }
}

impl Cli {
    /// Applies global flags on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if self.offline {
            config.offline = true;
        }
        if let Some(dir) = &self.snapshot_dir {
            config.snapshot_dir = Some(dir.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(args: &[&str]) -> Result<Request, CliError> {
        let cli = Cli::parse_from(args);
        Request::from_command(&cli.command)
    }

    #[test]
    fn test_parse_metric_arg_aliases() {
        assert_eq!(parse_metric_arg("cases").unwrap(), Metric::Cases);
        assert_eq!(parse_metric_arg("case").unwrap(), Metric::Cases);
        assert_eq!(parse_metric_arg("Deaths").unwrap(), Metric::Deaths);
    }

    #[test]
    fn test_parse_metric_arg_invalid() {
        let result = parse_metric_arg("hospital");
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Invalid metric"));
        assert!(err.to_string().contains("hospital"));
    }

    #[test]
    fn test_cases_defaults_to_new_york() {
        let req = request(&["covidcast", "cases"]).unwrap();
        assert_eq!(
            req,
            Request::Cases {
                state: EntityKey::parse("New York").unwrap()
            }
        );
    }

    #[test]
    fn test_state_is_normalized() {
        let req = request(&["covidcast", "rates", "--state", "  north   carolina "]).unwrap();
        assert_eq!(
            req,
            Request::Rates {
                state: EntityKey::parse("North Carolina").unwrap()
            }
        );
    }

    #[test]
    fn test_blank_state_is_rejected() {
        let err = request(&["covidcast", "patterns", "--state", "  "]).unwrap_err();
        assert!(matches!(err, CliError::InvalidState(_)));
    }

    #[test]
    fn test_forecast_defaults() {
        let req = request(&["covidcast", "forecast"]).unwrap();
        assert_eq!(
            req,
            Request::Forecast {
                state: EntityKey::parse("California").unwrap(),
                days: None,
                metric: Metric::Cases,
                write_report: false,
            }
        );
    }

    #[test]
    fn test_forecast_with_all_options() {
        let req = request(&[
            "covidcast", "forecast", "--state", "tx", "--days", "14", "--metric", "deaths",
            "--write-report",
        ])
        .unwrap();
        assert_eq!(
            req,
            Request::Forecast {
                state: EntityKey::parse("Texas").unwrap(),
                days: Some(14),
                metric: Metric::Deaths,
                write_report: true,
            }
        );
    }

    #[test]
    fn test_forecast_zero_days_uses_default() {
        match request(&["covidcast", "forecast", "--days", "0"]).unwrap() {
            Request::Forecast { days, .. } => assert_eq!(days, None),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_scopes() {
        assert_eq!(
            request(&["covidcast", "snapshot", "--national"]).unwrap(),
            Request::Snapshot {
                scope: SeriesScope::National
            }
        );
        assert_eq!(
            request(&["covidcast", "snapshot", "--state", "ohio"]).unwrap(),
            Request::Snapshot {
                scope: SeriesScope::State(EntityKey::parse("Ohio").unwrap())
            }
        );
    }

    #[test]
    fn test_snapshot_requires_a_scope() {
        assert!(Cli::try_parse_from(["covidcast", "snapshot"]).is_err());
        assert!(Cli::try_parse_from(["covidcast", "snapshot", "--state", "ohio", "--national"]).is_err());
    }

    #[test]
    fn test_global_flags_override_config() {
        let cli = Cli::parse_from(["covidcast", "national", "--offline", "--snapshot-dir", "/tmp/snaps"]);
        let mut config = Config::default();

        cli.apply_overrides(&mut config);

        assert!(config.offline);
        assert_eq!(config.snapshot_dir, Some(PathBuf::from("/tmp/snaps")));
    }

    #[test]
    fn test_missing_offline_flag_keeps_config_value() {
        let cli = Cli::parse_from(["covidcast", "national"]);
        let mut config = Config::default();
        config.offline = true;

        cli.apply_overrides(&mut config);

        assert!(config.offline);
    }
}
