//! Report artifacts handed to the chart renderer
//!
//! A sink persists forecasts and daily tables and answers with a locator
//! string (`/static/report/<file>`) the web layer can serve. Daily tables are
//! written twice: JSON for the renderer and CSV for download.

use directories::ProjectDirs;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data::{columns, number_value, row_date, row_number, EntityKey, Metric, Row};
use crate::forecast::delta_or_zero;
use crate::forecast::CombinedSeries;

/// URL prefix under which report files are served
pub const REPORT_URL_PREFIX: &str = "/static/report";

/// Errors from writing report artifacts
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write CSV report: {0}")]
    Csv(#[from] csv::Error),
}

/// Locators of one daily table's artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLocators {
    pub json: String,
    pub csv: String,
}

/// Destination for rendered-report inputs
pub trait ReportSink: Send + Sync {
    /// Persists a forecast and returns its locator
    fn write_forecast(&self, series: &CombinedSeries) -> Result<String, ReportError>;

    /// Persists a daily table for `key` and returns its locators
    fn write_daily_table(
        &self,
        key: &EntityKey,
        table: &[Row],
    ) -> Result<TableLocators, ReportError>;
}

#[derive(Serialize)]
struct ForecastReport<'a> {
    title: String,
    y_axis: String,
    #[serde(flatten)]
    series: &'a CombinedSeries,
}

#[derive(Serialize)]
struct DailyTableReport<'a> {
    entity: &'a EntityKey,
    rows: &'a [Row],
}

/// Writes report files into one directory
#[derive(Debug, Clone)]
pub struct FileReportSink {
    dir: PathBuf,
}

impl FileReportSink {
    /// Creates a sink in the XDG data directory (`~/.local/share/covidcast/report` on Linux)
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "covidcast")?;
        Some(Self::with_dir(project_dirs.data_dir().join("report")))
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_dir(&self) -> Result<(), ReportError> {
        fs::create_dir_all(&self.dir).map_err(|source| ReportError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<String, ReportError> {
        let path = self.dir.join(file_name);
        self.ensure_dir()?;
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(format!("{}/{}", REPORT_URL_PREFIX, file_name))
    }

    /// Writes `table` as CSV with a header row from the first row's columns
    fn write_csv(&self, file_name: &str, table: &[Row]) -> Result<String, ReportError> {
        self.ensure_dir()?;
        let mut writer = csv::Writer::from_path(self.dir.join(file_name))?;
        if let Some(first) = table.first() {
            writer.write_record(first.keys())?;
        }
        for row in table {
            writer.write_record(row.values().map(csv_field))?;
        }
        writer.flush().map_err(|source| ReportError::Io {
            path: self.dir.join(file_name),
            source,
        })?;
        Ok(format!("{}/{}", REPORT_URL_PREFIX, file_name))
    }
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ReportSink for FileReportSink {
    fn write_forecast(&self, series: &CombinedSeries) -> Result<String, ReportError> {
        let label = match series.metric {
            Metric::Cases => "Cases",
            Metric::Deaths => "Deaths",
        };
        let report = ForecastReport {
            title: format!("COVID-19 {} Forecast - {}", label, series.entity),
            y_axis: format!("New {} (predicted)", label),
            series,
        };
        self.write_json(
            &format!("forecast_{}.json", series.entity.storage_stem()),
            &report,
        )
    }

    fn write_daily_table(
        &self,
        key: &EntityKey,
        table: &[Row],
    ) -> Result<TableLocators, ReportError> {
        let stem = key.storage_stem();
        let report = DailyTableReport { entity: key, rows: table };
        Ok(TableLocators {
            json: self.write_json(&format!("eda_{}.json", stem), &report)?,
            csv: self.write_csv(&format!("eda_{}.csv", stem), table)?,
        })
    }
}

/// Builds the exploratory daily table from cumulative rows
///
/// Each output row holds `date`, `total_cases`, `total_deaths`, `new_cases`
/// and `new_deaths`. New counts are day-over-day differences and are not
/// clamped, so reporting corrections show up as negative values. A new count
/// is zero on the first day and wherever either total is missing; missing
/// totals are written as null.
pub fn daily_table(cumulative: &[Row]) -> Vec<Row> {
    let mut dated: Vec<_> = cumulative
        .iter()
        .filter_map(|row| row_date(row).map(|d| (d, row)))
        .collect();
    dated.sort_by_key(|(d, _)| *d);

    let total = |row: &Row, column: &str| row_number(row, column).filter(|v| v.is_finite());
    let optional = |value: Option<f64>| value.map_or(Value::Null, number_value);

    let mut previous: Option<(Option<f64>, Option<f64>)> = None;
    dated
        .into_iter()
        .map(|(date, row)| {
            let cases = total(row, columns::CASES);
            let deaths = total(row, columns::DEATHS);
            let (new_cases, new_deaths) = match previous {
                Some((pc, pd)) => (delta_or_zero(cases, pc), delta_or_zero(deaths, pd)),
                None => (0.0, 0.0),
            };
            previous = Some((cases, deaths));

            let mut out = Row::new();
            out.insert(columns::DATE.into(), date.to_string().into());
            out.insert(columns::TOTAL_CASES.into(), optional(cases));
            out.insert(columns::TOTAL_DEATHS.into(), optional(deaths));
            out.insert(columns::NEW_CASES.into(), number_value(new_cases));
            out.insert(columns::NEW_DEATHS.into(), number_value(new_deaths));
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{ForecastPoint, SeriesPoint};
    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_sink() -> (FileReportSink, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let sink = FileReportSink::with_dir(temp_dir.path().join("report"));
        (sink, temp_dir)
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_write_forecast_returns_locator_and_writes_file() {
        let (sink, _temp_dir) = create_test_sink();
        let date = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let series = CombinedSeries {
            entity: EntityKey::parse("new york").unwrap(),
            metric: Metric::Cases,
            model: "rolling_average".into(),
            horizon_days: 0,
            history: vec![SeriesPoint::new(date, 4.0)],
            points: vec![ForecastPoint { date, yhat: 4.0 }],
        };

        let locator = sink.write_forecast(&series).expect("Write should succeed");

        assert_eq!(locator, "/static/report/forecast_New_York.json");
        let content = fs::read_to_string(sink.dir().join("forecast_New_York.json"))
            .expect("Report file should exist");
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["title"], json!("COVID-19 Cases Forecast - New York"));
        assert_eq!(parsed["entity"], json!("New York"));
        assert_eq!(parsed["points"][0]["date"], json!("2021-01-01"));
        assert_eq!(parsed["points"][0]["yhat"], json!(4.0));
    }

    #[test]
    fn test_write_daily_table_writes_json_and_csv() {
        let (sink, _temp_dir) = create_test_sink();
        let key = EntityKey::parse("new york").unwrap();
        let table = daily_table(&[
            row(json!({"date": "2021-01-01", "cases": 1, "deaths": 0})),
            row(json!({"date": "2021-01-02", "cases": null, "deaths": 0})),
        ]);

        let locators = sink.write_daily_table(&key, &table).expect("Write should succeed");

        assert_eq!(locators.json, "/static/report/eda_New_York.json");
        assert_eq!(locators.csv, "/static/report/eda_New_York.csv");
        assert!(sink.dir().join("eda_New_York.json").exists());
        let csv = fs::read_to_string(sink.dir().join("eda_New_York.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "date,total_cases,total_deaths,new_cases,new_deaths",
                "2021-01-01,1.0,0.0,0.0,0.0",
                "2021-01-02,,0.0,0.0,0.0",
            ]
        );
    }

    #[test]
    fn test_daily_table_missing_total_gives_zero_deltas() {
        let table = daily_table(&[
            row(json!({"date": "2021-01-01", "cases": 1000, "deaths": 5})),
            row(json!({"date": "2021-01-02", "cases": null, "deaths": 6})),
            row(json!({"date": "2021-01-03", "cases": 1010, "deaths": 7})),
        ]);

        let new_cases: Vec<Value> = table.iter().map(|r| r["new_cases"].clone()).collect();
        assert_eq!(new_cases, vec![json!(0.0), json!(0.0), json!(0.0)]);
        assert_eq!(table[1]["total_cases"], Value::Null);
        assert_eq!(table[2]["new_deaths"], json!(1.0));
    }

    #[test]
    fn test_daily_table_differences_and_keeps_negatives() {
        let table = daily_table(&[
            row(json!({"date": "2021-01-02", "cases": 8, "deaths": 1})),
            row(json!({"date": "2021-01-01", "cases": 10, "deaths": 1})),
            row(json!({"date": "2021-01-03", "cases": 15, "deaths": 2})),
        ]);

        let new_cases: Vec<Value> = table.iter().map(|r| r["new_cases"].clone()).collect();
        assert_eq!(new_cases, vec![json!(0.0), json!(-2.0), json!(7.0)]);
        assert_eq!(table[2]["total_deaths"], json!(2.0));
        assert_eq!(table[2]["new_deaths"], json!(1.0));

        let keys: Vec<&str> = table[0].keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["date", "total_cases", "total_deaths", "new_cases", "new_deaths"]
        );
    }

    #[test]
    fn test_new_uses_project_directory() {
        if let Some(sink) = FileReportSink::new() {
            assert!(sink.dir().to_string_lossy().contains("covidcast"));
        }
    }
}
