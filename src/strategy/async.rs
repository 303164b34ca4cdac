//! Asynchronous batch processing strategy
//!
//! A multi-threaded implementation of the ProcessingStrategy trait.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── BatchConfig (batch_size, max_concurrent)
//!     ├── AsyncReader (batch CSV reading)
//!     ├── BatchProcessor (station partitioning, one task per station)
//!     ├── WindowScheduler (one task per reconciliation unit, bounded)
//!     └── AsyncReconciliationEngine
//!         ├── AsyncReadingStore (DashMap per nozzle)
//!         └── AsyncInventoryTracker (DashMap per tank)
//! ```
//!
//! Readings are streamed batch by batch; each batch fans out across
//! stations and reconciliation units then run in parallel. Refills and
//! confirmed dispenses are applied before streaming, since the tracker
//! places late dispensed and refill events at their instant. Stock counts
//! fix a tank's level and cannot have older events slotted in before them,
//! so a run with stock counts collects every reading and ingests in time
//! order instead.

use crate::core::r#async::{AsyncReconciliationEngine, BatchProcessor, WindowScheduler};
use crate::io::async_reader::AsyncReader;
use crate::io::csv_format::{CsvRow, ReadingRow, TankEventRow, TankRow};
use crate::strategy::{
    in_scope, interleave, log_ingest_summary, targets, write_report, ProcessingStrategy,
    RunRequest, Step,
};
use crate::types::{
    EngineConfig, FuelType, Reading, ReconError, ReconciliationUnit, StationId, TankEvent,
    TankEventKind,
};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

/// Configuration for batch processing
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Number of readings per ingestion batch
    pub batch_size: usize,
    /// Worker threads, and the bound on units reconciling at once
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a BatchConfig; zero values fall back to the defaults
    pub fn new(batch_size: usize, max_concurrent: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            tracing::warn!(
                batch_size,
                default = default.batch_size,
                "invalid batch_size, using default"
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent = if max_concurrent == 0 {
            tracing::warn!(
                max_concurrent,
                default = default.max_concurrent,
                "invalid max_concurrent, using default"
            );
            default.max_concurrent
        } else {
            max_concurrent
        };

        Self {
            batch_size,
            max_concurrent,
        }
    }
}

/// Open a CSV file for batch reading
async fn open_reader<T>(path: &Path) -> Result<AsyncReader<Compat<tokio::fs::File>, T>, ReconError>
where
    T: CsvRow + Send + 'static,
{
    let file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ReconError::FileNotFound {
            path: path.display().to_string(),
        },
        _ => ReconError::IoError {
            message: format!("Failed to open file '{}': {}", path.display(), e),
        },
    })?;

    Ok(AsyncReader::new(file.compat()))
}

/// Read every row of a CSV file in batches, skipping the bad ones
async fn read_rows<T>(path: &Path, batch_size: usize) -> Result<Vec<T::Record>, ReconError>
where
    T: CsvRow + Send + 'static,
{
    Ok(open_reader::<T>(path).await?.read_all(batch_size).await)
}

/// Ingest one batch, returning how many readings were rejected
async fn ingest_batch(processor: &BatchProcessor, batch: Vec<Reading>) -> usize {
    let mut rejected = 0;
    for result in processor.process_batch(batch).await {
        if let Err(e) = result.result {
            tracing::warn!(
                nozzle = %result.reading.nozzle_id,
                error = %e,
                "reading rejected"
            );
            rejected += 1;
        }
    }
    rejected
}

fn apply_event(engine: &AsyncReconciliationEngine, request: &RunRequest, event: &TankEvent) {
    if let Err(e) = engine.apply_tank_event(&request.ctx, event) {
        tracing::warn!(event = %event.event_id, error = %e, "tank event rejected");
    }
}

/// Counts gathered while ingesting readings
#[derive(Debug, Default)]
struct Ingested {
    readings: usize,
    rejected: usize,
}

/// Asynchronous batch processing strategy
#[derive(Debug, Clone)]
pub struct AsyncProcessingStrategy {
    engine_config: EngineConfig,
    config: BatchConfig,
}

impl AsyncProcessingStrategy {
    pub fn new(engine_config: EngineConfig, config: BatchConfig) -> Self {
        Self {
            engine_config,
            config,
        }
    }
}

impl AsyncProcessingStrategy {
    /// Stream readings in batches straight into the engine
    async fn ingest_streamed(
        &self,
        request: &RunRequest,
        processor: &BatchProcessor,
        targets: &mut BTreeSet<(StationId, FuelType)>,
    ) -> Result<Ingested, ReconError> {
        let batch_size = self.config.batch_size.max(1);
        let mut reader = open_reader::<ReadingRow>(&request.readings).await?;
        let mut ingested = Ingested::default();

        loop {
            let batch = reader.read_batch(batch_size).await;
            if batch.is_empty() {
                return Ok(ingested);
            }
            let batch: Vec<Reading> = batch
                .into_iter()
                .filter(|r| in_scope(&request.ctx, &r.tenant_id, &r.station_id, "reading"))
                .collect();
            targets.extend(batch.iter().map(|r| (r.station_id.clone(), r.fuel_type)));
            ingested.readings += batch.len();
            ingested.rejected += ingest_batch(processor, batch).await;
        }
    }

    /// Collect every reading and ingest in time order around tank events
    async fn ingest_ordered(
        &self,
        request: &RunRequest,
        engine: &AsyncReconciliationEngine,
        processor: &BatchProcessor,
        events: Vec<TankEvent>,
        targets: &mut BTreeSet<(StationId, FuelType)>,
    ) -> Result<Ingested, ReconError> {
        let batch_size = self.config.batch_size.max(1);
        let readings: Vec<Reading> = read_rows::<ReadingRow>(&request.readings, batch_size)
            .await?
            .into_iter()
            .filter(|r| in_scope(&request.ctx, &r.tenant_id, &r.station_id, "reading"))
            .collect();
        targets.extend(crate::strategy::targets(&[], &readings));
        let mut ingested = Ingested {
            readings: readings.len(),
            rejected: 0,
        };

        for step in interleave(readings, events) {
            match step {
                Step::Readings(readings) => {
                    for batch in readings.chunks(batch_size) {
                        ingested.rejected += ingest_batch(processor, batch.to_vec()).await;
                    }
                }
                Step::Event(event) => apply_event(engine, request, &event),
            }
        }
        Ok(ingested)
    }
}

impl ProcessingStrategy for AsyncProcessingStrategy {
    fn process(&self, request: &RunRequest, output: &mut dyn Write) -> Result<(), ReconError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent.max(1))
            .enable_time()
            .build()
            .map_err(|e| ReconError::IoError {
                message: format!("Failed to create tokio runtime: {}", e),
            })?;

        runtime.block_on(async {
            let ctx = &request.ctx;
            let windows = request.windows()?;
            let batch_size = self.config.batch_size.max(1);
            let engine = AsyncReconciliationEngine::new(self.engine_config.clone());

            let tanks: Vec<_> = read_rows::<TankRow>(&request.tanks, batch_size)
                .await?
                .into_iter()
                .filter(|t| in_scope(ctx, &t.tenant_id, &t.station_id, "tank"))
                .collect();
            let events: Vec<_> = match &request.tank_events {
                Some(path) => read_rows::<TankEventRow>(path, batch_size)
                    .await?
                    .into_iter()
                    .filter(|e| in_scope(ctx, &e.tenant_id, &e.station_id, "tank event"))
                    .collect(),
                None => Vec::new(),
            };
            let mut target_set: BTreeSet<_> = targets(&tanks, &[]).into_iter().collect();
            let event_count = events.len();

            let mut registered = 0;
            for tank in tanks {
                match engine.register_tank(ctx, tank) {
                    Ok(_) => registered += 1,
                    Err(e) => tracing::warn!(error = %e, "tank snapshot rejected"),
                }
            }

            let processor = BatchProcessor::new(engine.clone(), ctx.clone());
            let ingested = if events.iter().any(|e| e.kind == TankEventKind::StockCount) {
                tracing::debug!("stock counts present, ingesting in time order");
                self.ingest_ordered(request, &engine, &processor, events, &mut target_set)
                    .await?
            } else {
                for event in &events {
                    apply_event(&engine, request, event);
                }
                self.ingest_streamed(request, &processor, &mut target_set)
                    .await?
            };
            log_ingest_summary(registered, ingested.readings, ingested.rejected, event_count);

            let targets: Vec<_> = target_set.into_iter().collect();
            let units = ReconciliationUnit::plan(&targets, &windows);
            let results = WindowScheduler::new(engine.clone(), self.config.max_concurrent)
                .run(ctx, units)
                .await;

            write_report(request, &engine, &results, &targets, output)
        })
    }
}
