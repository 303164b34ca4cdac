use crate::strategy::{BatchConfig, RunRequest};
use crate::types::{ReconError, TenantContext};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Reconcile meter, payment and inventory volumes of fuel stations
#[derive(Parser, Debug)]
#[command(name = "fuel-recon")]
#[command(about = "Reconcile meter, payment and inventory volumes of fuel stations", long_about = None)]
pub struct CliArgs {
    /// Tenant whose data is processed; rows of other tenants are ignored
    #[arg(long = "tenant", value_name = "TENANT")]
    pub tenant: String,

    /// Restrict processing to one station of the tenant
    #[arg(long = "station", value_name = "STATION")]
    pub station: Option<String>,

    #[arg(long = "readings", value_name = "FILE", help = "Meter readings CSV")]
    pub readings: PathBuf,

    #[arg(long = "tanks", value_name = "FILE", help = "Tank snapshots CSV")]
    pub tanks: PathBuf,

    #[arg(
        long = "tank-events",
        value_name = "FILE",
        help = "Refills, stock counts and confirmed dispenses CSV"
    )]
    pub tank_events: Option<PathBuf>,

    /// Start of the reconciled period (RFC 3339)
    #[arg(long = "from", value_name = "TIME", value_parser = parse_timestamp)]
    pub from: DateTime<Utc>,

    /// End of the reconciled period, exclusive (RFC 3339)
    #[arg(long = "to", value_name = "TIME", value_parser = parse_timestamp)]
    pub to: DateTime<Utc>,

    /// Length of each reconciliation window
    #[arg(
        long = "window-hours",
        value_name = "HOURS",
        default_value_t = 24,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub window_hours: u32,

    #[arg(
        long = "report",
        value_name = "REPORT",
        default_value = "records",
        help = "Output: 'records', 'summary', 'inventory' or 'overview'"
    )]
    pub report: ReportKind,

    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        help = "Processing strategy: 'sync' for synchronous or 'async' for asynchronous"
    )]
    pub strategy: StrategyType,

    /// JSON file with engine thresholds
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Number of readings per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of readings per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of concurrent tasks (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of windows reconciling concurrently (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long = "log-json")]
    pub log_json: bool,
}

/// Available processing strategies
#[derive(Clone, Debug, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

/// What the run writes to stdout
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    /// One CSV row per reconciled unit
    Records,
    /// Discrepancy summary of the period as JSON
    Summary,
    /// Tank levels after ingestion as CSV
    Inventory,
    /// Fleet-wide inventory figures as JSON
    Overview,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {}", e))
}

impl CliArgs {
    /// Create a BatchConfig from CLI arguments, falling back to defaults
    pub fn to_batch_config(&self) -> BatchConfig {
        if self.batch_size.is_some() || self.max_concurrent.is_some() {
            let default = BatchConfig::default();
            BatchConfig::new(
                self.batch_size.unwrap_or(default.batch_size),
                self.max_concurrent.unwrap_or(default.max_concurrent),
            )
        } else {
            BatchConfig::default()
        }
    }

    /// Resolve the tenant scope and period into a run request
    ///
    /// # Errors
    ///
    /// `MissingTenantContext` for a blank tenant, `InvalidWindow` unless
    /// `from < to`.
    pub fn to_request(&self) -> Result<RunRequest, ReconError> {
        let ctx = TenantContext::resolve(Some(self.tenant.as_str()), self.station.as_deref())?;
        if self.from >= self.to {
            return Err(ReconError::InvalidWindow {
                start: self.from.to_rfc3339(),
                end: self.to.to_rfc3339(),
            });
        }

        Ok(RunRequest {
            ctx,
            readings: self.readings.clone(),
            tanks: self.tanks.clone(),
            tank_events: self.tank_events.clone(),
            from: self.from,
            to: self.to,
            window: Duration::hours(i64::from(self.window_hours)),
            report: self.report,
        })
    }
}
