//! Synchronous processing strategy
//!
//! A single-threaded implementation of the ProcessingStrategy trait. It
//! coordinates the SyncReader (CSV input), the ReconciliationEngine
//! (ingestion and reconciliation) and the csv_format writers (output).
//!
//! Readings and tank events are collected and merged into time order before
//! ingestion; reconciliation then walks every unit sequentially.

use crate::core::ReconciliationEngine;
use crate::io::csv_format::{CsvRow, ReadingRow, TankEventRow, TankRow};
use crate::io::sync_reader::SyncReader;
use crate::strategy::{
    in_scope, interleave, log_ingest_summary, targets, write_report, ProcessingStrategy,
    RunRequest, Step,
};
use crate::types::{EngineConfig, ReconError, ReconciliationUnit, UnitResult};
use std::io::Write;
use std::path::Path;

/// Read every row of a CSV file, logging and skipping the bad ones
fn read_rows<T: CsvRow>(path: &Path) -> Result<Vec<T::Record>, ReconError> {
    let mut records = Vec::new();
    for result in SyncReader::<T>::new(path)? {
        match result {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping row"),
        }
    }
    Ok(records)
}

/// Synchronous processing strategy
///
/// ```no_run
/// use fuel_reconciliation_engine::strategy::{ProcessingStrategy, SyncProcessingStrategy};
/// use fuel_reconciliation_engine::types::EngineConfig;
/// # fn run(request: fuel_reconciliation_engine::strategy::RunRequest) {
/// let strategy = SyncProcessingStrategy::new(EngineConfig::default());
/// strategy.process(&request, &mut std::io::stdout()).expect("Processing failed");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SyncProcessingStrategy {
    config: EngineConfig,
}

impl SyncProcessingStrategy {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl ProcessingStrategy for SyncProcessingStrategy {
    fn process(&self, request: &RunRequest, output: &mut dyn Write) -> Result<(), ReconError> {
        let ctx = &request.ctx;
        let windows = request.windows()?;
        let mut engine = ReconciliationEngine::new(self.config.clone());

        let tanks: Vec<_> = read_rows::<TankRow>(&request.tanks)?
            .into_iter()
            .filter(|t| in_scope(ctx, &t.tenant_id, &t.station_id, "tank"))
            .collect();
        let readings: Vec<_> = read_rows::<ReadingRow>(&request.readings)?
            .into_iter()
            .filter(|r| in_scope(ctx, &r.tenant_id, &r.station_id, "reading"))
            .collect();
        let events: Vec<_> = match &request.tank_events {
            Some(path) => read_rows::<TankEventRow>(path)?
                .into_iter()
                .filter(|e| in_scope(ctx, &e.tenant_id, &e.station_id, "tank event"))
                .collect(),
            None => Vec::new(),
        };
        let targets = targets(&tanks, &readings);
        let (reading_count, event_count) = (readings.len(), events.len());

        let mut registered = 0;
        for tank in tanks {
            match engine.register_tank(ctx, tank) {
                Ok(_) => registered += 1,
                Err(e) => tracing::warn!(error = %e, "tank snapshot rejected"),
            }
        }

        let mut rejected = 0;
        for step in interleave(readings, events) {
            match step {
                Step::Readings(batch) => {
                    for reading in batch {
                        if let Err(e) = engine.ingest_reading(ctx, reading) {
                            tracing::warn!(error = %e, "reading rejected");
                            rejected += 1;
                        }
                    }
                }
                Step::Event(event) => {
                    if let Err(e) = engine.apply_tank_event(ctx, &event) {
                        tracing::warn!(event = %event.event_id, error = %e, "tank event rejected");
                    }
                }
            }
        }
        log_ingest_summary(registered, reading_count, rejected, event_count);

        let results: Vec<UnitResult> = ReconciliationUnit::plan(&targets, &windows)
            .into_iter()
            .map(|unit| {
                let outcome = engine.reconcile_or_unknown(
                    ctx,
                    &unit.station_id,
                    unit.fuel_type,
                    unit.window,
                );
                UnitResult { unit, outcome }
            })
            .collect();

        write_report(request, &engine, &results, &targets, output)
    }
}
