//! covidcast library
//!
//! Cached warehouse reads with snapshot fallback, plus short-horizon
//! forecasts. The binary in `main.rs` is a thin layer over [`app::App`].

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod forecast;
pub mod report;
pub mod resolver;
