//! covidcast - COVID-19 case series with warehouse fallback and forecasts
//!
//! Resolves daily series from the analytical warehouse (or snapshots when it
//! is unreachable), forecasts new cases, and prints JSON to stdout. Logs go
//! to stderr so the output stays machine-readable.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use covidcast::app::App;
use covidcast::cli::{Cli, Request};
use covidcast::config::Config;

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let request = Request::from_command(&cli.command)?;

    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let app = App::from_config(&config)?;
    let output = app.execute(request).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "covidcast=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
