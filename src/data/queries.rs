//! SQL issued against the warehouse
//!
//! Every statement is read-only, ordered by date ascending, and takes the
//! canonical entity name as its only positional parameter (if any). Views are
//! referenced unqualified; the executor's session picks the database and
//! schema. The raw county-level table may live elsewhere, so the cumulative
//! query is built around a configurable (possibly fully qualified) name.

use std::borrow::Cow;

use super::columns;

/// Window length of the `ma7_*` columns
pub const MA_WINDOW: usize = 7;

/// A series query in two dialect flavours
///
/// `windowed` computes the `averages` in SQL; `plain` omits them so they can
/// be computed in-process for executors without window functions.
#[derive(Debug)]
pub struct SeriesQuery {
    pub name: &'static str,
    pub windowed: Cow<'static, str>,
    pub plain: Cow<'static, str>,
    pub averages: &'static [(&'static str, &'static str)],
}

const DAILY_AVERAGES: &[(&str, &str)] = &[
    (columns::NEW_CASES, columns::MA7_NEW_CASES),
    (columns::NEW_DEATHS, columns::MA7_NEW_DEATHS),
];

const RATE_AVERAGES: &[(&str, &str)] = &[
    ("new_cases_per_100k", "ma7_cases_per_100k"),
    ("new_deaths_per_100k", "ma7_deaths_per_100k"),
];

/// Daily cases/deaths for one state
pub static STATE_DAILY: SeriesQuery = SeriesQuery {
    name: "state_daily",
    windowed: Cow::Borrowed("
SELECT
  date,
  new_cases,
  AVG(new_cases)  OVER (ORDER BY date ROWS BETWEEN 6 PRECEDING AND CURRENT ROW) AS ma7_new_cases,
  new_deaths,
  AVG(new_deaths) OVER (ORDER BY date ROWS BETWEEN 6 PRECEDING AND CURRENT ROW) AS ma7_new_deaths
FROM v_daily_states
WHERE UPPER(state) = UPPER(?)
ORDER BY date"),
    plain: Cow::Borrowed("
SELECT date, new_cases, new_deaths
FROM v_daily_states
WHERE UPPER(state) = UPPER(?)
ORDER BY date"),
    averages: DAILY_AVERAGES,
};

/// Daily cases/deaths for the whole country
pub static NATIONAL_DAILY: SeriesQuery = SeriesQuery {
    name: "national_daily",
    windowed: Cow::Borrowed("
SELECT
  date,
  new_cases,
  AVG(new_cases)  OVER (ORDER BY date ROWS BETWEEN 6 PRECEDING AND CURRENT ROW) AS ma7_new_cases,
  new_deaths,
  AVG(new_deaths) OVER (ORDER BY date ROWS BETWEEN 6 PRECEDING AND CURRENT ROW) AS ma7_new_deaths
FROM v_daily_us
ORDER BY date"),
    plain: Cow::Borrowed("
SELECT date, new_cases, new_deaths
FROM v_daily_us
ORDER BY date"),
    averages: DAILY_AVERAGES,
};

/// Daily per-100k rates for one state
pub static STATE_RATES: SeriesQuery = SeriesQuery {
    name: "state_rates",
    windowed: Cow::Borrowed("
SELECT
  date,
  new_cases_per_100k,
  AVG(new_cases_per_100k)  OVER (ORDER BY date ROWS BETWEEN 6 PRECEDING AND CURRENT ROW) AS ma7_cases_per_100k,
  new_deaths_per_100k,
  AVG(new_deaths_per_100k) OVER (ORDER BY date ROWS BETWEEN 6 PRECEDING AND CURRENT ROW) AS ma7_deaths_per_100k
FROM v_daily_states_per100k
WHERE UPPER(state) = UPPER(?)
ORDER BY date"),
    plain: Cow::Borrowed("
SELECT date, new_cases_per_100k, new_deaths_per_100k
FROM v_daily_states_per100k
WHERE UPPER(state) = UPPER(?)
ORDER BY date"),
    averages: RATE_AVERAGES,
};

/// Detected epidemic waves for one state
pub static STATE_WAVES: SeriesQuery = SeriesQuery {
    name: "state_waves",
    windowed: Cow::Borrowed("
SELECT state, wave_start, wave_end, wave_len
FROM v_state_waves
WHERE UPPER(state) = UPPER(?)
ORDER BY wave_start"),
    plain: Cow::Borrowed("
SELECT state, wave_start, wave_end, wave_len
FROM v_state_waves
WHERE UPPER(state) = UPPER(?)
ORDER BY wave_start"),
    averages: &[],
};

/// County-level cumulative table in a local warehouse
pub const DEFAULT_CUMULATIVE_TABLE: &str = "nyt_us_covid19";

/// County-level cumulative table in the Snowflake data marketplace share
pub const SNOWFLAKE_CUMULATIVE_TABLE: &str = "COVID19_EPIDEMIOLOGICAL_DATA.PUBLIC.NYT_US_COVID19";

/// Cumulative cases/deaths for one state, summed over counties per date
///
/// `table` must pass [`is_table_identifier`]; it is spliced into the SQL.
pub fn state_cumulative(table: &str) -> SeriesQuery {
    let sql = format!(
        "
SELECT date, SUM(cases) AS cases, SUM(deaths) AS deaths
FROM {}
WHERE UPPER(state) = UPPER(?)
GROUP BY date
ORDER BY date",
        table
    );
    SeriesQuery {
        name: "state_cumulative",
        windowed: Cow::Owned(sql.clone()),
        plain: Cow::Owned(sql),
        averages: &[],
    }
}

/// Whether `name` is a plain `[database.][schema.]table` identifier
pub fn is_table_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 3
        && parts.iter().all(|part| {
            part.chars().next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}
