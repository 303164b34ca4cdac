//! Reconciliation engine
//!
//! This module provides the single-threaded `ReconciliationEngine`, which
//! owns the reading store and the inventory tracker and ties the pipeline
//! together:
//!
//! ```text
//! reading ─▶ ReadingStore ─▶ VolumeDeltaCalculator ─▶ AnomalyDetector ─▶ AlertSink
//!                                      │
//!                                      └─▶ InventoryTracker (depletion)
//!
//! reconcile(window) ─▶ readings + payments + inventory ─▶ WindowReconciler ─▶ Ledger
//! ```
//!
//! Every public operation takes a `TenantContext` and validates it before
//! touching any state.

use crate::core::alerts::{AlertEvent, AlertSink, AnomalyEvent, DiscrepancyEvent, TracingAlertSink};
use crate::core::anomaly::{AnomalyDetector, Classification};
use crate::core::inventory_tracker::InventoryTracker;
use crate::core::ledger::ReconciliationLedger;
use crate::core::reading_store::ReadingStore;
use crate::core::reconciliation::{WindowFacts, WindowReconciler};
use crate::core::summary::DiscrepancySummaryService;
use crate::core::traits::{InventorySource, PaymentSource, ReadingSource};
use crate::core::volume_delta::{VolumeDelta, VolumeDeltaCalculator};
use crate::types::{
    DateRange, DiscrepancySummary, EngineConfig, FuelInventory, FuelType, InventoryOverview,
    ReconError, Reading, ReconciliationRecord, ReconciliationWindow, SummaryScope, TankEvent,
    TenantContext, WindowKey, WindowOutcome,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;

/// What happened to one ingested reading
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    /// `None` for a nozzle's first reading
    pub delta: Option<VolumeDelta>,
    pub classification: Option<Classification>,

    /// Tank state after depletion, when depletion was applied
    pub inventory: Option<FuelInventory>,

    /// Why depletion was not applied; the reading is kept regardless
    pub inventory_error: Option<ReconError>,
}

impl IngestOutcome {
    pub(crate) fn baseline() -> Self {
        Self {
            delta: None,
            classification: None,
            inventory: None,
            inventory_error: None,
        }
    }
}

/// Volume a delta removes from the tank, if any
pub(crate) fn depletion(delta: &VolumeDelta) -> Option<Decimal> {
    delta.dispensed().filter(|volume| *volume > Decimal::ZERO)
}

pub(crate) fn log_rejected_depletion(reading: &Reading, volume: Decimal, error: &ReconError) {
    tracing::warn!(
        tenant = %reading.tenant_id,
        station = %reading.station_id,
        fuel = %reading.fuel_type,
        nozzle = %reading.nozzle_id,
        volume = %volume,
        error = %error,
        "inventory depletion rejected, reading kept"
    );
}

pub(crate) fn log_reported_gap(reading: &Reading, gap: Decimal) {
    tracing::warn!(
        tenant = %reading.tenant_id,
        station = %reading.station_id,
        nozzle = %reading.nozzle_id,
        gap = %gap,
        "reported previous meter value differs from stored reading"
    );
}

/// Single-threaded reconciliation engine
pub struct ReconciliationEngine {
    detector: AnomalyDetector,
    reconciler: WindowReconciler,
    readings: ReadingStore,
    inventory: InventoryTracker,
    ledger: Arc<ReconciliationLedger>,
    summaries: DiscrepancySummaryService,
    alerts: Arc<dyn AlertSink>,
}

impl ReconciliationEngine {
    /// Create an engine with empty stores that reports alerts via `tracing`
    pub fn new(config: EngineConfig) -> Self {
        let ledger = Arc::new(ReconciliationLedger::new());
        Self {
            detector: AnomalyDetector::new(config.anomaly.clone()),
            reconciler: WindowReconciler::new(&config),
            readings: ReadingStore::new(),
            inventory: InventoryTracker::new(config.inventory.clone()),
            summaries: DiscrepancySummaryService::new(Arc::clone(&ledger), config.summary),
            ledger,
            alerts: Arc::new(TracingAlertSink),
        }
    }

    /// Replace the alert sink
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = sink;
        self
    }

    /// Ingest one meter reading
    ///
    /// Appends the reading, derives the delta against the nozzle's previous
    /// reading, classifies it and applies the dispensed volume to the tank.
    /// The reading's event key makes depletion idempotent.
    ///
    /// # Errors
    ///
    /// - scope errors if the reading is outside the context
    /// - `OutOfOrderReading` if it is not later than the nozzle's last reading
    ///
    /// Inventory rejections are not errors: they are logged and returned in
    /// `IngestOutcome::inventory_error`.
    pub fn ingest_reading(
        &mut self,
        ctx: &TenantContext,
        reading: Reading,
    ) -> Result<IngestOutcome, ReconError> {
        let previous = match self.readings.append(ctx, reading.clone())? {
            Some(previous) => previous,
            None => {
                tracing::debug!(
                    tenant = %reading.tenant_id,
                    nozzle = %reading.nozzle_id,
                    "first reading of nozzle"
                );
                return Ok(IngestOutcome::baseline());
            }
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
        &mut self,
        ctx: &TenantContext,
        snapshot: FuelInventory,
    ) -> Result<FuelInventory, ReconError> {
        self.inventory.register(ctx, snapshot)
    }

    /// Apply a refill, stock count or externally confirmed dispense
    pub fn apply_tank_event(
        &mut self,
        ctx: &TenantContext,
        event: &TankEvent,
    ) -> Result<FuelInventory, ReconError> {
        self.inventory.apply_event(ctx, event)
    }

    pub fn current_level(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
    ) -> Result<FuelInventory, ReconError> {
        self.inventory.current_level(ctx, station, fuel)
    }

    /// All tanks of a station
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
    /// The record is committed to the ledger. Re-running on unchanged data
    /// returns the record already on file; changed data yields a new record
    /// superseding it.
    ///
    /// # Errors
    ///
    /// - scope errors if `station` is outside the context
    /// - `IncompleteWindow` if any source has no data for the window
    pub fn reconcile(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: ReconciliationWindow,
    ) -> Result<ReconciliationRecord, ReconError> {
        let tenant = ctx.scope_station(station)?;
        let facts = WindowFacts {
            readings: self.readings.window_readings(ctx, station, fuel, &window)?,
            payments: self.readings.window_payments(ctx, station, fuel, &window)?,
            inventory: self.inventory.window_inventory(ctx, station, fuel, &window)?,
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

    /// Like `reconcile`, but an incomplete window is an `Unknown` outcome
    pub fn reconcile_or_unknown(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: ReconciliationWindow,
    ) -> Result<WindowOutcome, ReconError> {
        WindowOutcome::from_result(self.reconcile(ctx, station, fuel, window))
    }

    /// Summary of one station for one day
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

    /// Current records visible to the context
    pub fn records(&self, ctx: &TenantContext) -> Result<Vec<ReconciliationRecord>, ReconError> {
        self.ledger.records(ctx)
    }

    pub fn ledger(&self) -> &Arc<ReconciliationLedger> {
        &self.ledger
    }
}

/// Commit `record` and raise a discrepancy alert if it is new and not ok
pub(crate) fn commit_and_announce(
    ledger: &ReconciliationLedger,
    alerts: &dyn AlertSink,
    record: ReconciliationRecord,
) -> ReconciliationRecord {
    let fresh_id = record.id;
    let committed = ledger.commit(record);

    tracing::info!(
        tenant = %committed.tenant_id,
        station = %committed.station_id,
        fuel = %committed.fuel_type,
        window = %committed.window,
        meter = %committed.meter_volume,
        payment = %committed.payment_volume,
        inventory = %committed.inventory_volume,
        severity = %committed.severity,
        "window reconciled"
    );

    if committed.id == fresh_id {
        if let Some(event) = DiscrepancyEvent::for_record(&committed) {
            alerts.emit(AlertEvent::Discrepancy(event));
        }
    }
    committed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        IncompleteCause, InventoryStatus, PaymentMethod, Severity, SourceKind, TankEventKind,
    };
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn reading(tenant: &str, nozzle: &str, hour: u32, value: Decimal) -> Reading {
        Reading {
            nozzle_id: nozzle.to_string(),
            tenant_id: tenant.to_string(),
            station_id: "s1".to_string(),
            fuel_type: FuelType::Diesel,
            recorded_at: at(hour),
            meter_value: value,
            previous_meter_value: None,
            meter_reset: false,
            payment_method: PaymentMethod::Cash,
            amount: None,
            price_per_unit: None,
        }
    }

    fn sale(tenant: &str, nozzle: &str, hour: u32, value: Decimal, amount: Decimal) -> Reading {
        let mut r = reading(tenant, nozzle, hour, value);
        r.amount = Some(amount);
        r.price_per_unit = Some(dec!(2));
        r
    }

    fn tank(tenant: &str, current: Decimal) -> FuelInventory {
        FuelInventory {
            tenant_id: tenant.to_string(),
            station_id: "s1".to_string(),
            fuel_type: FuelType::Diesel,
            capacity: dec!(20000),
            minimum_level: dec!(1000),
            current_volume: current,
            status: InventoryStatus::Normal,
            last_updated: at(0),
        }
    }

    fn engine_with_sink() -> (ReconciliationEngine, mpsc::UnboundedReceiver<AlertEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = ReconciliationEngine::new(EngineConfig::default()).with_alert_sink(Arc::new(tx));
        (engine, rx)
    }

    fn window() -> ReconciliationWindow {
        ReconciliationWindow::new(at(2), at(12)).unwrap()
    }

    /// meter 500, payments 495, inventory depletion 510 net of a 1000 L refill
    fn seed_scenario(engine: &mut ReconciliationEngine, ctx: &TenantContext) {
        engine.register_tank(ctx, tank("acme", dec!(6000))).unwrap();
        engine.ingest_reading(ctx, reading("acme", "n1", 1, dec!(10000))).unwrap();
        engine.ingest_reading(ctx, reading("acme", "n2", 1, dec!(8000))).unwrap();
        engine
            .ingest_reading(ctx, sale("acme", "n1", 4, dec!(10300), dec!(594)))
            .unwrap();
        engine
            .ingest_reading(ctx, sale("acme", "n2", 6, dec!(8200), dec!(396)))
            .unwrap();
        engine
            .apply_tank_event(
                ctx,
                &TankEvent {
                    event_id: "refill-1".to_string(),
                    tenant_id: "acme".to_string(),
                    station_id: "s1".to_string(),
                    fuel_type: FuelType::Diesel,
                    kind: TankEventKind::Refill,
                    volume: dec!(1000),
                    recorded_at: at(7),
                },
            )
            .unwrap();
        engine
            .apply_tank_event(
                ctx,
                &TankEvent {
                    event_id: "dip-1".to_string(),
                    tenant_id: "acme".to_string(),
                    station_id: "s1".to_string(),
                    fuel_type: FuelType::Diesel,
                    kind: TankEventKind::StockCount,
                    volume: dec!(6490),
                    recorded_at: at(10),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_ingest_depletes_inventory() {
        let ctx = TenantContext::new("acme");
        let mut engine = ReconciliationEngine::new(EngineConfig::default());
        engine.register_tank(&ctx, tank("acme", dec!(5000))).unwrap();

        let first = engine
            .ingest_reading(&ctx, reading("acme", "n1", 1, dec!(1000)))
            .unwrap();
        assert_eq!(first, IngestOutcome::baseline());

        let second = engine
            .ingest_reading(&ctx, reading("acme", "n1", 2, dec!(1100)))
            .unwrap();
        assert_eq!(second.delta, Some(VolumeDelta::Dispensed(dec!(100))));
        assert_eq!(second.classification, Some(Classification::Normal));
        assert_eq!(second.inventory.unwrap().current_volume, dec!(4900));
    }

    #[test]
    fn test_suspect_jump_is_alerted() {
        let ctx = TenantContext::new("acme");
        let (mut engine, mut rx) = engine_with_sink();
        engine.register_tank(&ctx, tank("acme", dec!(5000))).unwrap();
        engine.ingest_reading(&ctx, reading("acme", "n1", 1, dec!(1000))).unwrap();
        engine.ingest_reading(&ctx, reading("acme", "n1", 2, dec!(1250))).unwrap();

        match rx.try_recv().unwrap() {
            AlertEvent::Anomaly(event) => {
                assert_eq!(event.delta, dec!(250));
                assert_eq!(event.classification, Classification::Suspect);
                assert!(!event.rollback);
            }
            other => panic!("unexpected alert {:?}", other),
        }
    }

    #[test]
    fn test_rollback_is_kept_alerted_and_not_depleted() {
        let ctx = TenantContext::new("acme");
        let (mut engine, mut rx) = engine_with_sink();
        engine.register_tank(&ctx, tank("acme", dec!(5000))).unwrap();
        engine.ingest_reading(&ctx, reading("acme", "n1", 1, dec!(1000))).unwrap();

        let outcome = engine
            .ingest_reading(&ctx, reading("acme", "n1", 2, dec!(900)))
            .unwrap();
        assert!(outcome.delta.unwrap().is_rollback());
        assert_eq!(outcome.inventory, None);
        assert!(matches!(rx.try_recv(), Ok(AlertEvent::Anomaly(e)) if e.rollback));
        assert_eq!(
            engine
                .current_level(&ctx, "s1", FuelType::Diesel)
                .unwrap()
                .current_volume,
            dec!(5000)
        );
    }

    #[test]
    fn test_overdraw_keeps_reading() {
        let ctx = TenantContext::new("acme");
        let mut engine = ReconciliationEngine::new(EngineConfig::default());
        engine.register_tank(&ctx, tank("acme", dec!(50))).unwrap();
        engine.ingest_reading(&ctx, reading("acme", "n1", 1, dec!(1000))).unwrap();

        let outcome = engine
            .ingest_reading(&ctx, reading("acme", "n1", 2, dec!(1100)))
            .unwrap();
        assert!(matches!(
            outcome.inventory_error,
            Some(ReconError::InsufficientInventory { .. })
        ));
        // the next reading pairs with the kept one
        let next = engine
            .ingest_reading(&ctx, reading("acme", "n1", 3, dec!(1110)))
            .unwrap();
        assert_eq!(next.delta, Some(VolumeDelta::Dispensed(dec!(10))));
    }

    #[test]
    fn test_reconcile_scenario_is_warn_and_alerted() {
        let ctx = TenantContext::new("acme");
        let (mut engine, mut rx) = engine_with_sink();
        seed_scenario(&mut engine, &ctx);

        let record = engine.reconcile(&ctx, "s1", FuelType::Diesel, window()).unwrap();
        assert_eq!(record.meter_volume, dec!(500));
        assert_eq!(record.payment_volume, dec!(495));
        assert_eq!(record.inventory_volume, dec!(510));
        assert_eq!(record.discrepancy, dec!(15));
        assert_eq!(record.severity, Severity::Warn);

        let alerts: Vec<AlertEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(alerts
            .iter()
            .any(|a| matches!(a, AlertEvent::Discrepancy(e) if e.severity == Severity::Warn)));
    }

    #[test]
    fn test_nozzles_ingested_out_of_global_order_keep_every_depletion() {
        let ctx = TenantContext::new("acme");
        let mut engine = ReconciliationEngine::new(EngineConfig::default());
        engine.register_tank(&ctx, tank("acme", dec!(5000))).unwrap();

        engine.ingest_reading(&ctx, reading("acme", "n1", 3, dec!(1000))).unwrap();
        engine.ingest_reading(&ctx, reading("acme", "n2", 3, dec!(1000))).unwrap();
        engine
            .ingest_reading(&ctx, sale("acme", "n1", 5, dec!(1100), dec!(200)))
            .unwrap();
        // n2's reading is older than the tank's last depletion at 05:00
        let late = engine
            .ingest_reading(&ctx, sale("acme", "n2", 4, dec!(1050), dec!(100)))
            .unwrap();

        assert_eq!(late.inventory_error, None);
        let tank = engine
            .inventory
            .current_level(&ctx, "s1", FuelType::Diesel)
            .unwrap();
        assert_eq!(tank.current_volume, dec!(4850));

        let record = engine.reconcile(&ctx, "s1", FuelType::Diesel, window()).unwrap();
        assert_eq!(record.meter_volume, dec!(150));
        assert_eq!(record.payment_volume, dec!(150));
        assert_eq!(record.inventory_volume, dec!(150));
        assert_eq!(record.severity, Severity::Ok);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let ctx = TenantContext::new("acme");
        let mut engine = ReconciliationEngine::new(EngineConfig::default());
        seed_scenario(&mut engine, &ctx);

        let first = engine.reconcile(&ctx, "s1", FuelType::Diesel, window()).unwrap();
        let second = engine.reconcile(&ctx, "s1", FuelType::Diesel, window()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.id, second.id);
        assert_eq!(engine.records(&ctx).unwrap().len(), 1);
    }

    #[test]
    fn test_corrected_data_supersedes() {
        let ctx = TenantContext::new("acme");
        let mut engine = ReconciliationEngine::new(EngineConfig::default());
        seed_scenario(&mut engine, &ctx);
        let first = engine.reconcile(&ctx, "s1", FuelType::Diesel, window()).unwrap();

        engine
            .ingest_reading(&ctx, sale("acme", "n1", 8, dec!(10310), dec!(20)))
            .unwrap();
        let second = engine.reconcile(&ctx, "s1", FuelType::Diesel, window()).unwrap();

        assert_eq!(second.supersedes, Some(first.id));
        assert_eq!(second.meter_volume, dec!(510));
    }

    #[test]
    fn test_missing_payments_is_unknown() {
        let ctx = TenantContext::new("acme");
        let mut engine = ReconciliationEngine::new(EngineConfig::default());
        engine.register_tank(&ctx, tank("acme", dec!(5000))).unwrap();
        engine.ingest_reading(&ctx, reading("acme", "n1", 1, dec!(1000))).unwrap();
        engine.ingest_reading(&ctx, reading("acme", "n1", 3, dec!(1100))).unwrap();

        assert_eq!(
            engine.reconcile_or_unknown(&ctx, "s1", FuelType::Diesel, window()),
            Ok(WindowOutcome::Unknown {
                kind: SourceKind::Payment,
                cause: IncompleteCause::NoData
            })
        );
        assert!(engine.records(&ctx).unwrap().is_empty());
    }

    #[test]
    fn test_missing_context_is_rejected() {
        let engine = ReconciliationEngine::new(EngineConfig::default());
        let ctx = TenantContext::new("");
        assert_eq!(
            engine.reconcile(&ctx, "s1", FuelType::Diesel, window()),
            Err(ReconError::MissingTenantContext)
        );
        assert_eq!(
            engine.inventory_status(&ctx, "s1"),
            Err(ReconError::MissingTenantContext)
        );
    }

    #[test]
    fn test_tenants_with_same_station_stay_independent() {
        let acme = TenantContext::new("acme");
        let globex = TenantContext::new("globex");
        let mut engine = ReconciliationEngine::new(EngineConfig::default());
        seed_scenario(&mut engine, &acme);
        engine.register_tank(&globex, tank("globex", dec!(9000))).unwrap();

        engine.reconcile(&acme, "s1", FuelType::Diesel, window()).unwrap();

        assert_eq!(
            engine.reconcile_or_unknown(&globex, "s1", FuelType::Diesel, window()),
            Ok(WindowOutcome::Unknown {
                kind: SourceKind::Meter,
                cause: IncompleteCause::NoData
            })
        );
        assert!(engine.records(&globex).unwrap().is_empty());
        assert_eq!(
            engine.inventory_status(&globex, "s1").unwrap()[0].current_volume,
            dec!(9000)
        );

        let summary = engine
            .discrepancy_summary(&globex, "s1", at(0).date_naive())
            .unwrap();
        assert_eq!(summary.counts.total(), 0);
        let summary = engine
            .discrepancy_summary(&acme, "s1", at(0).date_naive())
            .unwrap();
        assert_eq!(summary.counts.warn, 1);
    }
}
