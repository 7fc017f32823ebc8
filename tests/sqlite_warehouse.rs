//! Integration tests against a real SQLite warehouse file
//!
//! Seeds the warehouse views as plain tables and exercises the resolver,
//! the forecast engine and the binary end to end.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

use covidcast::data::{EntityKey, FileSnapshotStore, SnapshotStore, SqliteExecutor};
use covidcast::forecast::{ForecastEngine, ForecastSettings, ModelPreference};
use covidcast::resolver::{ResolveError, ResolverSettings, SeriesResolver};

fn create_warehouse(dir: &Path) -> PathBuf {
    let path = dir.join("covid.db");
    let conn = Connection::open(&path).expect("Failed to create warehouse");
    conn.execute_batch(
        "CREATE TABLE v_daily_states (state TEXT, date TEXT, new_cases INTEGER, new_deaths INTEGER);
         CREATE TABLE v_daily_us (date TEXT, new_cases INTEGER, new_deaths INTEGER);
         CREATE TABLE v_daily_states_per100k (state TEXT, date TEXT, new_cases_per_100k REAL, new_deaths_per_100k REAL);
         CREATE TABLE v_state_waves (state TEXT, wave_start TEXT, wave_end TEXT, wave_len INTEGER);
         CREATE TABLE nyt_us_covid19 (date TEXT, state TEXT, county TEXT, cases INTEGER, deaths INTEGER);
         INSERT INTO v_state_waves VALUES ('New York', '2020-03-10', '2020-05-20', 71);
         INSERT INTO v_daily_states_per100k VALUES ('New York', '2021-01-01', 10.0, 0.5);
         INSERT INTO v_daily_states_per100k VALUES ('New York', '2021-01-02', 20.0, 1.5);",
    )
    .expect("Failed to create schema");

    for day in 1..=8 {
        let date = format!("2021-01-0{}", day);
        conn.execute(
            "INSERT INTO v_daily_states VALUES ('New York', ?1, ?2, ?3)",
            rusqlite::params![date, day, day % 2],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO v_daily_us VALUES (?1, ?2, 0)",
            rusqlite::params![date, day * 10],
        )
        .unwrap();
    }

    // Cumulative counts split over two counties; the state total dips on day 3
    for (day, a, b) in [(1, 6, 4), (2, 5, 3), (3, 10, 5), (4, 12, 6)] {
        let date = format!("2021-01-0{}", day);
        conn.execute(
            "INSERT INTO nyt_us_covid19 VALUES (?1, 'New York', 'Kings', ?2, 0)",
            rusqlite::params![date, a],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO nyt_us_covid19 VALUES (?1, 'New York', 'Queens', ?2, 0)",
            rusqlite::params![date, b],
        )
        .unwrap();
    }
    path
}

fn resolver(db: &Path, snapshots: &Path) -> Arc<SeriesResolver> {
    Arc::new(SeriesResolver::new(
        Arc::new(SqliteExecutor::new(db)),
        Arc::new(FileSnapshotStore::with_dir(snapshots.to_path_buf())),
        ResolverSettings::default(),
    ))
}

fn new_york() -> EntityKey {
    EntityKey::parse("new york").unwrap()
}

#[tokio::test]
async fn test_state_daily_series_with_moving_averages() {
    let temp_dir = TempDir::new().unwrap();
    let db = create_warehouse(temp_dir.path());
    let resolver = resolver(&db, &temp_dir.path().join("snapshots"));

    let rows = resolver.daily_for_state(&new_york()).await.expect("Should resolve");

    assert_eq!(rows.len(), 8);
    let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        vec!["date", "new_cases", "ma7_new_cases", "new_deaths", "ma7_new_deaths"]
    );
    assert_eq!(rows[0]["ma7_new_cases"], json!(1.0));
    // Day 8 averages days 2..=8
    assert_eq!(rows[7]["ma7_new_cases"], json!(5.0));
}

#[tokio::test]
async fn test_state_match_ignores_case() {
    let temp_dir = TempDir::new().unwrap();
    let db = create_warehouse(temp_dir.path());
    let conn = Connection::open(&db).unwrap();
    conn.execute("UPDATE v_daily_states SET state = 'NEW YORK'", []).unwrap();
    let resolver = resolver(&db, &temp_dir.path().join("snapshots"));

    let rows = resolver.daily_for_state(&new_york()).await.unwrap();

    assert_eq!(rows.len(), 8);
}

#[tokio::test]
async fn test_national_rates_and_waves() {
    let temp_dir = TempDir::new().unwrap();
    let db = create_warehouse(temp_dir.path());
    let resolver = resolver(&db, &temp_dir.path().join("snapshots"));

    let national = resolver.daily_national().await.unwrap();
    assert_eq!(national[1]["ma7_new_cases"], json!(15.0));

    let rates = resolver.rates_for_state(&new_york()).await.unwrap();
    assert_eq!(rates[1]["ma7_cases_per_100k"], json!(15.0));
    assert_eq!(rates[1]["ma7_deaths_per_100k"], json!(1.0));

    let waves = resolver.waves_for_state(&new_york()).await.unwrap();
    assert_eq!(waves.len(), 1);
    assert_eq!(waves[0]["wave_len"], json!(71));
}

#[tokio::test]
async fn test_cumulative_rows_are_summed_over_counties() {
    let temp_dir = TempDir::new().unwrap();
    let db = create_warehouse(temp_dir.path());
    let resolver = resolver(&db, &temp_dir.path().join("snapshots"));

    let rows = resolver.cumulative_for_state(&new_york()).await.unwrap();

    let cases: Vec<_> = rows.iter().map(|r| r["cases"].clone()).collect();
    assert_eq!(cases, vec![json!(10), json!(8), json!(15), json!(18)]);
}

#[tokio::test]
async fn test_rolling_forecast_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let db = create_warehouse(temp_dir.path());
    let settings = ForecastSettings {
        model: ModelPreference::Rolling,
        ..ForecastSettings::default()
    };
    let engine = ForecastEngine::new(resolver(&db, &temp_dir.path().join("snapshots")), settings);

    let series = engine.forecast(&new_york(), 7).await.expect("Forecast should succeed");

    // Deltas 10, -2, 7, 3 with the negative day dropped
    let history: Vec<f64> = series.history.iter().map(|p| p.value).collect();
    assert_eq!(history, vec![10.0, 7.0, 3.0]);
    assert_eq!(series.points.len(), 3 + 7);
    let level = (10.0 + 7.0 + 3.0) / 3.0;
    assert!(series.future().iter().all(|p| (p.yhat - level).abs() < 1e-12));
    assert_eq!(series.future()[0].date.to_string(), "2021-01-05");
}

#[cfg(feature = "seasonal-model")]
#[tokio::test]
async fn test_seasonal_forecast_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let db = create_warehouse(temp_dir.path());
    let engine = ForecastEngine::new(
        resolver(&db, &temp_dir.path().join("snapshots")),
        ForecastSettings::default(),
    );

    let series = engine.forecast(&new_york(), 5).await.expect("Forecast should succeed");

    assert_eq!(series.model, "seasonal");
    assert_eq!(series.points.len(), series.history.len() + 5);
    assert!(series.points.iter().all(|p| p.yhat.is_finite()));
}

#[tokio::test]
async fn test_missing_warehouse_falls_back_to_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let snapshots = temp_dir.path().join("snapshots");
    let store = FileSnapshotStore::with_dir(snapshots.clone());
    let scope = covidcast::data::SeriesScope::State(new_york());
    let row = json!({"date": "2021-01-01", "new_cases": 5})
        .as_object()
        .cloned()
        .unwrap();
    store.write(&scope, &[row]).unwrap();

    let resolver = resolver(&temp_dir.path().join("absent.db"), &snapshots);

    let rows = resolver.daily_for_state(&new_york()).await.expect("Should fall back");
    assert_eq!(rows, store.read(&scope).unwrap().unwrap());

    let err = resolver.rates_for_state(&new_york()).await.unwrap_err();
    assert!(matches!(err, ResolveError::UpstreamUnavailable { .. }));
}

#[test]
fn test_binary_reads_sqlite_warehouse_and_writes_snapshot() {
    let temp_dir = TempDir::new().unwrap();
    let db = create_warehouse(temp_dir.path());
    let config = temp_dir.path().join("covidcast.toml");
    std::fs::write(
        &config,
        format!(
            "snapshot_dir = {:?}\nreport_dir = {:?}\n\n[warehouse]\nbackend = \"sqlite\"\nsqlite_path = {:?}\n",
            temp_dir.path().join("snapshots").display().to_string(),
            temp_dir.path().join("report").display().to_string(),
            db.display().to_string(),
        ),
    )
    .unwrap();
    let config = config.display().to_string();

    let run = |args: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_covidcast"))
            .arg("--config")
            .arg(&config)
            .args(args)
            .env_remove("COVIDCAST_CONFIG")
            .env_remove("SNOWFLAKE_OFFLINE")
            .output()
            .expect("Failed to execute covidcast")
    };

    let output = run(&["cases", "--state", "NY"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 8);

    let output = run(&["snapshot", "--state", "new york"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(temp_dir.path().join("snapshots/states/New_York.json").exists());

    let output = run(&["--offline", "cases", "--state", "New York"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let offline_rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(offline_rows, rows);

    let output = run(&["forecast", "--state", "New York", "--days", "3", "--write-report"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let forecast: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(forecast["url"], json!("/static/report/forecast_New_York.json"));
    assert!(temp_dir.path().join("report/forecast_New_York.json").exists());

    let output = run(&["eda", "--state", "ny"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let eda: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(eda["csv"], json!("/static/report/eda_New_York.csv"));
    assert_eq!(eda["rows"], json!(4));
    let csv = std::fs::read_to_string(temp_dir.path().join("report/eda_New_York.csv")).unwrap();
    assert!(csv.starts_with("date,total_cases,total_deaths,new_cases,new_deaths\n"));
}
