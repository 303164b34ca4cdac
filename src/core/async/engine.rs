//! Concurrent reconciliation engine
//!
//! This module provides the `AsyncReconciliationEngine`, which serves many
//! stations and tenants at once.
//!
//! # Architecture
//!
//! ```text
//! AsyncReconciliationEngine
//!     ├── Arc<AsyncReadingStore>          (ingestion, per-nozzle entry locks)
//!     ├── Arc<AsyncInventoryTracker>      (per-tank entry locks)
//!     ├── Arc<dyn AsyncReadingSource>     ┐
//!     ├── Arc<dyn AsyncPaymentSource>     ├ fetched concurrently per window
//!     ├── Arc<dyn AsyncInventorySource>   ┘
//!     ├── Arc<ReconciliationLedger>
//!     └── Arc<DiscrepancySummaryService>
//! ```
//!
//! By default the local stores double as the three sources.
//!
//! # Cancellation
//!
//! The three source fetches are joined before any record is built, and the
//! record is committed in one synchronous step afterwards. Dropping a
//! `reconcile` future at any await point leaves the ledger untouched.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{AsyncInventoryTracker, AsyncReadingStore};
use crate::core::alerts::{AlertEvent, AlertSink, AnomalyEvent, TracingAlertSink};
use crate::core::anomaly::{AnomalyDetector, Classification};
use crate::core::engine::{
    commit_and_announce, depletion, log_rejected_depletion, log_reported_gap, IngestOutcome,
};
use crate::core::ledger::ReconciliationLedger;
use crate::core::reconciliation::{WindowFacts, WindowReconciler};
use crate::core::summary::DiscrepancySummaryService;
use crate::core::traits::{AsyncInventorySource, AsyncPaymentSource, AsyncReadingSource};
use crate::core::volume_delta::VolumeDeltaCalculator;
use crate::types::{
    DateRange, DiscrepancySummary, EngineConfig, FuelInventory, FuelType, IncompleteCause,
    InventoryOverview, ReconError, Reading, ReconciliationRecord, ReconciliationWindow,
    SourceKind, SummaryScope, TankEvent, TenantContext, WindowKey, WindowOutcome,
};
use chrono::NaiveDate;

/// Await a source fetch for at most `limit`
///
/// A fetch that does not finish in time makes the window incomplete.
pub(crate) async fn bounded<T, F>(kind: SourceKind, limit: Duration, fetch: F) -> Result<T, ReconError>
where
    F: Future<Output = Result<T, ReconError>>,
{
    match tokio::time::timeout(limit, fetch).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(source = %kind, timeout_ms = limit.as_millis() as u64, "source fetch timed out");
            Err(ReconError::incomplete(kind, IncompleteCause::TimedOut))
        }
    }
}

#[derive(Clone)]
pub struct AsyncReconciliationEngine {
    detector: AnomalyDetector,
    reconciler: WindowReconciler,
    fetch_timeout: Duration,

    readings: Arc<AsyncReadingStore>,
    inventory: Arc<AsyncInventoryTracker>,

    reading_source: Arc<dyn AsyncReadingSource>,
    payment_source: Arc<dyn AsyncPaymentSource>,
    inventory_source: Arc<dyn AsyncInventorySource>,

    ledger: Arc<ReconciliationLedger>,
    summaries: Arc<DiscrepancySummaryService>,
    alerts: Arc<dyn AlertSink>,
}

impl AsyncReconciliationEngine {
    pub fn new(config: EngineConfig) -> Self {
        let readings = Arc::new(AsyncReadingStore::new());
        let inventory = Arc::new(AsyncInventoryTracker::new(config.inventory.clone()));
        let ledger = Arc::new(ReconciliationLedger::new());

        Self {
            detector: AnomalyDetector::new(config.anomaly.clone()),
            reconciler: WindowReconciler::new(&config),
            fetch_timeout: config.sources.fetch_timeout(),
            reading_source: readings.clone(),
            payment_source: readings.clone(),
            inventory_source: inventory.clone(),
            readings,
            inventory,
            summaries: Arc::new(DiscrepancySummaryService::new(
                Arc::clone(&ledger),
                config.summary,
            )),
            ledger,
            alerts: Arc::new(TracingAlertSink),
        }
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = sink;
        self
    }

    /// Reconcile against external sources instead of the local stores
    pub fn with_sources(
        mut self,
        readings: Arc<dyn AsyncReadingSource>,
        payments: Arc<dyn AsyncPaymentSource>,
        inventory: Arc<dyn AsyncInventorySource>,
    ) -> Self {
        self.reading_source = readings;
        self.payment_source = payments;
        self.inventory_source = inventory;
        self
    }

    /// Ingest one reading
    ///
    /// Same semantics as `ReconciliationEngine::ingest_reading`. Safe to call
    /// from many tasks: readings of one nozzle are serialized by the store,
    /// depletion of one tank by the tracker.
    pub fn ingest_reading(
        &self,
        ctx: &TenantContext,
        reading: Reading,
    ) -> Result<IngestOutcome, ReconError> {
        let Some(previous) = self.readings.append(ctx, reading.clone())? else {
            return Ok(IngestOutcome::baseline());
        };

        let delta = VolumeDeltaCalculator::between(&previous, &reading)?;
        if let Some(gap) = VolumeDeltaCalculator::reported_gap(&previous, &reading) {
            log_reported_gap(&reading, gap);
        }
        let classification = self.detector.classify(&delta, previous.meter_value);
        if classification == Classification::Suspect {
            self.alerts.emit(AlertEvent::Anomaly(AnomalyEvent::new(
                &reading,
                &delta,
                classification,
            )));
        }

        let mut outcome = IngestOutcome {
            delta: Some(delta),
            classification: Some(classification),
            inventory: None,
            inventory_error: None,
        };

        if let Some(volume) = depletion(&delta) {
            match self.inventory.apply_dispensed(
                ctx,
                &reading.station_id,
                reading.fuel_type,
                &reading.event_key(),
                volume,
                reading.recorded_at,
            ) {
                Ok(tank) => outcome.inventory = Some(tank),
                Err(e) => {
                    log_rejected_depletion(&reading, volume, &e);
                    outcome.inventory_error = Some(e);
                }
            }
        }

        Ok(outcome)
    }

    pub fn register_tank(
        &self,
        ctx: &TenantContext,
        snapshot: FuelInventory,
    ) -> Result<FuelInventory, ReconError> {
        self.inventory.register(ctx, snapshot)
    }

    pub fn apply_tank_event(
        &self,
        ctx: &TenantContext,
        event: &TankEvent,
    ) -> Result<FuelInventory, ReconError> {
        self.inventory.apply_event(ctx, event)
    }

    pub fn inventory_status(
        &self,
        ctx: &TenantContext,
        station: &str,
    ) -> Result<Vec<FuelInventory>, ReconError> {
        self.inventory.inventory_status(ctx, station)
    }

    pub fn inventory_overview(&self, ctx: &TenantContext) -> Result<InventoryOverview, ReconError> {
        self.inventory.overview(ctx)
    }

    /// Reconcile one station, fuel type and window
    ///
    /// The three sources are fetched concurrently, each bounded by the
    /// configured fetch timeout.
    ///
    /// # Errors
    ///
    /// - scope errors if `station` is outside the context
    /// - `IncompleteWindow { cause: NoData }` if a source has no data
    /// - `IncompleteWindow { cause: TimedOut }` if a source did not answer
    pub async fn reconcile(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: ReconciliationWindow,
    ) -> Result<ReconciliationRecord, ReconError> {
        let tenant = ctx.scope_station(station)?;
        let limit = self.fetch_timeout;

        let (readings, payments, inventory) = tokio::join!(
            bounded(
                SourceKind::Meter,
                limit,
                self.reading_source.window_readings(ctx, station, fuel, &window),
            ),
            bounded(
                SourceKind::Payment,
                limit,
                self.payment_source.window_payments(ctx, station, fuel, &window),
            ),
            bounded(
                SourceKind::Inventory,
                limit,
                self.inventory_source.window_inventory(ctx, station, fuel, &window),
            ),
        );

        let facts = WindowFacts {
            readings: readings?,
            payments: payments?,
            inventory: inventory?,
        };
        let key = WindowKey {
            tenant_id: tenant.to_string(),
            station_id: station.to_string(),
            fuel_type: fuel,
            window,
        };

        let record = self.reconciler.reconcile(&key, &facts)?;
        Ok(commit_and_announce(&self.ledger, self.alerts.as_ref(), record))
    }

    pub async fn reconcile_or_unknown(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: ReconciliationWindow,
    ) -> Result<WindowOutcome, ReconError> {
        WindowOutcome::from_result(self.reconcile(ctx, station, fuel, window).await)
    }

    pub fn discrepancy_summary(
        &self,
        ctx: &TenantContext,
        station: &str,
        date: NaiveDate,
    ) -> Result<DiscrepancySummary, ReconError> {
        self.summarize(
            ctx,
            SummaryScope::Station(station.to_string()),
            DateRange::single(date),
        )
    }

    pub fn summarize(
        &self,
        ctx: &TenantContext,
        scope: SummaryScope,
        range: DateRange,
    ) -> Result<DiscrepancySummary, ReconError> {
        self.summaries.summarize(ctx, scope, range)
    }

    pub fn records(&self, ctx: &TenantContext) -> Result<Vec<ReconciliationRecord>, ReconError> {
        self.ledger.records(ctx)
    }
}
