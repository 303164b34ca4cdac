//! Processing strategy module
//!
//! This module defines the Strategy pattern for the complete pipeline, from
//! CSV parsing through ingestion and reconciliation to the report. Different
//! implementations (synchronous, asynchronous batch) are selected at runtime.
//!
//! Both strategies run the same stages:
//!
//! ```text
//! tanks.csv ──► register snapshots
//! readings.csv ┐
//!              ├─► time-ordered steps ──► ingest readings / apply tank events
//! events.csv ──┘
//! windows × (station, fuel) ──► reconcile ──► report
//! ```

use crate::cli::{ReportKind, StrategyType};
use crate::core::{AsyncReconciliationEngine, ReconciliationEngine};
use crate::io::{write_inventory_csv, write_records_csv};
use crate::types::{
    DateRange, DiscrepancySummary, EngineConfig, FuelInventory, FuelType, InventoryOverview,
    Reading, ReconError, ReconciliationWindow, StationId, SummaryScope, TankEvent, TenantContext,
    UnitResult,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

pub mod r#async;
pub mod sync;

pub use self::r#async::{AsyncProcessingStrategy, BatchConfig};
pub use sync::SyncProcessingStrategy;

/// Everything one run needs besides the engine configuration
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub ctx: TenantContext,
    pub readings: PathBuf,
    pub tanks: PathBuf,
    pub tank_events: Option<PathBuf>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,

    /// Length of each reconciliation window
    pub window: Duration,

    pub report: ReportKind,
}

impl RunRequest {
    /// The period cut into reconciliation windows
    pub fn windows(&self) -> Result<Vec<ReconciliationWindow>, ReconError> {
        ReconciliationWindow::tile(self.from, self.to, self.window)
    }

    pub fn summary_scope(&self) -> SummaryScope {
        match self.ctx.station() {
            Some(station) => SummaryScope::Station(station.to_string()),
            None => SummaryScope::Tenant,
        }
    }

    /// Calendar days touched by the period
    pub fn summary_range(&self) -> Result<DateRange, ReconError> {
        let last = self.to - Duration::nanoseconds(1);
        DateRange::new(self.from.date_naive(), last.date_naive())
    }
}

/// Processing strategy trait for the complete pipeline
pub trait ProcessingStrategy: Send + Sync {
    /// Run the pipeline described by `request` and write its report
    ///
    /// # Errors
    ///
    /// Returns an error if an input file cannot be opened, the period is not
    /// a valid window, or output cannot be written.
    ///
    /// Row-level problems (malformed rows, rows outside the tenant scope,
    /// rejected readings or tank events) are logged and skipped; they never
    /// fail the run.
    fn process(&self, request: &RunRequest, output: &mut dyn Write) -> Result<(), ReconError>;
}

/// Create a processing strategy based on the specified strategy type
///
/// `batch` is only used by the async strategy.
pub fn create_strategy(
    strategy_type: StrategyType,
    config: EngineConfig,
    batch: Option<BatchConfig>,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy::new(config)),
        StrategyType::Async => {
            Box::new(AsyncProcessingStrategy::new(config, batch.unwrap_or_default()))
        }
    }
}

/// Whether a row belongs to the run's tenant scope
pub(crate) fn in_scope(ctx: &TenantContext, tenant: &str, station: &str, row: &str) -> bool {
    match ctx.admit(tenant, station) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(tenant, station, row, reason = %e, "ignoring row outside scope");
            false
        }
    }
}

/// One ingestion step
#[derive(Debug)]
pub(crate) enum Step {
    /// Readings between two tank events, in time order
    Readings(Vec<Reading>),
    Event(TankEvent),
}

/// Merge readings and tank events into time order
///
/// Stock counts fix a tank's level and the tracker rejects anything older
/// than one, so readings taken before a count must reach it first. An event
/// sorts before readings taken at the same instant.
pub(crate) fn interleave(mut readings: Vec<Reading>, mut events: Vec<TankEvent>) -> Vec<Step> {
    readings.sort_by_key(|r| r.recorded_at);
    events.sort_by_key(|e| e.recorded_at);

    let mut steps = Vec::with_capacity(events.len() * 2 + 1);
    let mut readings = readings.into_iter().peekable();

    for event in events {
        let mut pending = Vec::new();
        while let Some(reading) = readings.next_if(|r| r.recorded_at < event.recorded_at) {
            pending.push(reading);
        }
        if !pending.is_empty() {
            steps.push(Step::Readings(pending));
        }
        steps.push(Step::Event(event));
    }

    let rest: Vec<Reading> = readings.collect();
    if !rest.is_empty() {
        steps.push(Step::Readings(rest));
    }
    steps
}

/// Every (station, fuel) that has a tank or readings
pub(crate) fn targets(tanks: &[FuelInventory], readings: &[Reading]) -> Vec<(StationId, FuelType)> {
    let mut targets: BTreeSet<(StationId, FuelType)> = tanks
        .iter()
        .map(|tank| (tank.station_id.clone(), tank.fuel_type))
        .collect();
    targets.extend(readings.iter().map(|r| (r.station_id.clone(), r.fuel_type)));
    targets.into_iter().collect()
}

pub(crate) fn log_ingest_summary(tanks: usize, readings: usize, rejected: usize, events: usize) {
    tracing::info!(tanks, readings, rejected, events, "ingestion finished");
}

/// Read-only queries the report needs from either engine
pub(crate) trait ReportSource {
    fn summarize(
        &self,
        ctx: &TenantContext,
        scope: SummaryScope,
        range: DateRange,
    ) -> Result<DiscrepancySummary, ReconError>;

    fn inventory_status(
        &self,
        ctx: &TenantContext,
        station: &str,
    ) -> Result<Vec<FuelInventory>, ReconError>;

    fn inventory_overview(&self, ctx: &TenantContext) -> Result<InventoryOverview, ReconError>;
}

impl ReportSource for ReconciliationEngine {
    fn summarize(
        &self,
        ctx: &TenantContext,
        scope: SummaryScope,
        range: DateRange,
    ) -> Result<DiscrepancySummary, ReconError> {
        ReconciliationEngine::summarize(self, ctx, scope, range)
    }

    fn inventory_status(
        &self,
        ctx: &TenantContext,
        station: &str,
    ) -> Result<Vec<FuelInventory>, ReconError> {
        ReconciliationEngine::inventory_status(self, ctx, station)
    }

    fn inventory_overview(&self, ctx: &TenantContext) -> Result<InventoryOverview, ReconError> {
        ReconciliationEngine::inventory_overview(self, ctx)
    }
}

impl ReportSource for AsyncReconciliationEngine {
    fn summarize(
        &self,
        ctx: &TenantContext,
        scope: SummaryScope,
        range: DateRange,
    ) -> Result<DiscrepancySummary, ReconError> {
        AsyncReconciliationEngine::summarize(self, ctx, scope, range)
    }

    fn inventory_status(
        &self,
        ctx: &TenantContext,
        station: &str,
    ) -> Result<Vec<FuelInventory>, ReconError> {
        AsyncReconciliationEngine::inventory_status(self, ctx, station)
    }

    fn inventory_overview(&self, ctx: &TenantContext) -> Result<InventoryOverview, ReconError> {
        AsyncReconciliationEngine::inventory_overview(self, ctx)
    }
}

fn write_json<T: Serialize>(value: &T, output: &mut dyn Write) -> Result<(), ReconError> {
    serde_json::to_writer_pretty(&mut *output, value).map_err(|e| ReconError::IoError {
        message: format!("Failed to write JSON report: {}", e),
    })?;
    writeln!(output)?;
    Ok(())
}

/// Write the report selected by the request
pub(crate) fn write_report(
    request: &RunRequest,
    engine: &dyn ReportSource,
    results: &[UnitResult],
    targets: &[(StationId, FuelType)],
    output: &mut dyn Write,
) -> Result<(), ReconError> {
    let ctx = &request.ctx;

    match request.report {
        ReportKind::Records => write_records_csv(ctx.tenant()?, results, output),
        ReportKind::Summary => {
            let summary =
                engine.summarize(ctx, request.summary_scope(), request.summary_range()?)?;
            write_json(&summary, output)
        }
        ReportKind::Inventory => {
            let stations: BTreeSet<&str> = targets.iter().map(|(s, _)| s.as_str()).collect();
            let mut tanks = Vec::new();
            for station in stations {
                tanks.extend(engine.inventory_status(ctx, station)?);
            }
            write_inventory_csv(&tanks, output)
        }
        ReportKind::Overview => write_json(&engine.inventory_overview(ctx)?, output),
    }
}
