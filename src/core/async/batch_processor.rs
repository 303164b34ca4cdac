//! Batch ingestion with station-based partitioning
//!
//! This module provides the `BatchProcessor`, which ingests a batch of
//! readings concurrently while keeping each station's readings in order.
//!
//! # Design
//!
//! A batch is partitioned by (tenant, station). Each partition is ingested
//! in time order on its own tokio task. Nozzles and tanks both belong to a
//! station, so pairing against the previous reading sees the nozzle's series
//! in order. A depletion older than the tank's latest entry, from a nozzle
//! that arrived in an earlier batch, is inserted into the tank's history at
//! its instant. Partitions share nothing but the ledger.
//!
//! # Architecture
//!
//! ```text
//! BatchProcessor
//!     ├── AsyncReconciliationEngine  (shared, cloneable)
//!     └── TenantContext              (scope of every reading in the batch)
//! ```

use std::collections::HashMap;

use super::AsyncReconciliationEngine;
use crate::core::engine::IngestOutcome;
use crate::types::{ReconError, Reading, StationId, TenantContext, TenantId};

/// Result of ingesting one reading
#[derive(Debug, Clone)]
pub struct IngestResult {
    pub reading: Reading,
    pub result: Result<IngestOutcome, ReconError>,
}

#[derive(Clone)]
pub struct BatchProcessor {
    engine: AsyncReconciliationEngine,
    ctx: TenantContext,
}

impl BatchProcessor {
    pub fn new(engine: AsyncReconciliationEngine, ctx: TenantContext) -> Self {
        Self { engine, ctx }
    }

    /// Group readings by station, keeping input order within each group
    pub fn partition_by_station(
        &self,
        batch: Vec<Reading>,
    ) -> HashMap<(TenantId, StationId), Vec<Reading>> {
        let mut partitions: HashMap<(TenantId, StationId), Vec<Reading>> = HashMap::new();

        for reading in batch {
            partitions
                .entry((reading.tenant_id.clone(), reading.station_id.clone()))
                .or_default()
                .push(reading);
        }

        partitions
    }

    /// Ingest one station's readings in time order
    pub async fn ingest_station(&self, mut readings: Vec<Reading>) -> Vec<IngestResult> {
        // Input files are not required to be sorted; the store is
        readings.sort_by_key(|r| r.recorded_at);

        readings
            .into_iter()
            .map(|reading| {
                let result = self.engine.ingest_reading(&self.ctx, reading.clone());
                IngestResult { reading, result }
            })
            .collect()
    }

    /// Ingest a batch, one task per station
    pub async fn process_batch(&self, batch: Vec<Reading>) -> Vec<IngestResult> {
        let partitions = self.partition_by_station(batch);

        let mut tasks = Vec::with_capacity(partitions.len());
        for (_station, readings) in partitions {
            let processor = self.clone();
            tasks.push(tokio::spawn(async move {
                processor.ingest_station(readings).await
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(nozzle_results) => results.extend(nozzle_results),
                Err(e) => tracing::error!(error = %e, "ingestion task failed"),
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EngineConfig, FuelType, PaymentMethod};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn reading(tenant: &str, nozzle: &str, minute: u32, value: i64) -> Reading {
        Reading {
            nozzle_id: nozzle.to_string(),
            tenant_id: tenant.to_string(),
            station_id: if nozzle == "n2" { "s2" } else { "s1" }.to_string(),
            fuel_type: FuelType::Diesel,
            recorded_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, minute, 0).unwrap(),
            meter_value: Decimal::from(value),
            previous_meter_value: None,
            meter_reset: false,
            payment_method: PaymentMethod::Cash,
            amount: None,
            price_per_unit: None,
        }
    }

    fn processor() -> BatchProcessor {
        BatchProcessor::new(
            AsyncReconciliationEngine::new(EngineConfig::default()),
            TenantContext::new("acme"),
        )
    }

    #[test]
    fn test_partition_keeps_order_within_station() {
        let batch = vec![
            reading("acme", "n1", 1, 10),
            reading("acme", "n2", 1, 50),
            reading("acme", "n1", 2, 11),
            reading("acme", "n1", 3, 12),
        ];

        let partitions = processor().partition_by_station(batch);
        assert_eq!(partitions.len(), 2);

        let n1 = &partitions[&("acme".to_string(), "s1".to_string())];
        let values: Vec<Decimal> = n1.iter().map(|r| r.meter_value).collect();
        assert_eq!(
            values,
            vec![Decimal::from(10), Decimal::from(11), Decimal::from(12)]
        );
    }

    #[tokio::test]
    async fn test_process_batch_reports_every_reading() {
        let batch = vec![
            reading("acme", "n1", 3, 12),
            reading("acme", "n1", 1, 10),
            reading("acme", "n2", 1, 50),
            reading("globex", "n9", 1, 1),
        ];

        let results = processor().process_batch(batch).await;
        assert_eq!(results.len(), 4);

        let rejected: Vec<&IngestResult> = results.iter().filter(|r| r.result.is_err()).collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].reading.tenant_id, "globex");

        // unsorted input is still paired in time order
        let paired = results
            .iter()
            .filter_map(|r| r.result.as_ref().ok())
            .filter(|outcome| outcome.delta.is_some())
            .count();
        assert_eq!(paired, 1);
    }
}
