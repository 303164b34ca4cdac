//! Fuel reconciliation CLI
//!
//! # Usage
//!
//! ```bash
//! fuel-recon --tenant acme --readings readings.csv --tanks tanks.csv \
//!     --from 2024-03-01T00:00:00Z --to 2024-03-08T00:00:00Z > records.csv
//! fuel-recon --tenant acme --station s1 --readings readings.csv --tanks tanks.csv \
//!     --tank-events events.csv --from 2024-03-01T00:00:00Z --to 2024-03-02T00:00:00Z \
//!     --window-hours 6 --report summary --strategy sync
//! ```
//!
//! The report goes to stdout; logs go to stderr (`RUST_LOG`, default `warn`).
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (invalid period, missing tenant, file not found, bad config, etc.)

use fuel_reconciliation_engine::cli;
use fuel_reconciliation_engine::strategy;
use fuel_reconciliation_engine::types::{EngineConfig, ReconError};
use std::process;
use tracing_subscriber::EnvFilter;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(args: &cli::CliArgs) -> Result<(), ReconError> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };
    let request = args.to_request()?;

    let batch = matches!(args.strategy, cli::StrategyType::Async).then(|| args.to_batch_config());
    let strategy = strategy::create_strategy(args.strategy.clone(), config, batch);

    let mut output = std::io::stdout().lock();
    strategy.process(&request, &mut output)
}

fn main() {
    let args = cli::parse_args();
    init_logging(args.log_json);

    if let Err(e) = run(&args) {
        tracing::error!(error = %e, "run failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
