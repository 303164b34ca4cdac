//! Alert events and the sink they are emitted to
//!
//! The core emits events; formatting and delivery belong to whoever
//! implements `AlertSink`.

use crate::core::anomaly::Classification;
use crate::core::volume_delta::VolumeDelta;
use crate::types::{
    FuelType, NozzleId, Reading, ReconciliationRecord, Severity, StationId, TenantId,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedSender;

/// A suspect meter delta
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyEvent {
    pub tenant_id: TenantId,
    pub station_id: StationId,
    pub fuel_type: FuelType,
    pub nozzle_id: NozzleId,
    pub recorded_at: DateTime<Utc>,

    /// Signed delta; negative for rollbacks
    pub delta: Decimal,

    pub rollback: bool,
    pub classification: Classification,
}

impl AnomalyEvent {
    /// Event for the delta ending at `reading`
    pub fn new(reading: &Reading, delta: &VolumeDelta, classification: Classification) -> Self {
        Self {
            tenant_id: reading.tenant_id.clone(),
            station_id: reading.station_id.clone(),
            fuel_type: reading.fuel_type,
            nozzle_id: reading.nozzle_id.clone(),
            recorded_at: reading.recorded_at,
            delta: delta.raw(),
            rollback: delta.is_rollback(),
            classification,
        }
    }
}

/// A reconciliation record outside the `ok` bucket
#[derive(Debug, Clone, PartialEq)]
pub struct DiscrepancyEvent {
    pub record: ReconciliationRecord,
    pub severity: Severity,
}

impl DiscrepancyEvent {
    /// `None` for records in the `ok` bucket
    pub fn for_record(record: &ReconciliationRecord) -> Option<Self> {
        (record.severity != Severity::Ok).then(|| Self {
            record: record.clone(),
            severity: record.severity,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    Anomaly(AnomalyEvent),
    Discrepancy(DiscrepancyEvent),
}

/// External notification channel
pub trait AlertSink: Send + Sync {
    fn emit(&self, event: AlertEvent);
}

/// Sink that reports events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, event: AlertEvent) {
        match event {
            AlertEvent::Anomaly(e) => tracing::warn!(
                tenant = %e.tenant_id,
                station = %e.station_id,
                fuel = %e.fuel_type,
                nozzle = %e.nozzle_id,
                delta = %e.delta,
                rollback = e.rollback,
                "suspect meter delta"
            ),
            AlertEvent::Discrepancy(e) => tracing::warn!(
                tenant = %e.record.tenant_id,
                station = %e.record.station_id,
                fuel = %e.record.fuel_type,
                window = %e.record.window,
                discrepancy = %e.record.discrepancy,
                relative = %e.record.relative_discrepancy,
                severity = %e.severity,
                "reconciliation discrepancy"
            ),
        }
    }
}

/// Forward events to an async consumer
///
/// A closed receiver drops events silently.
impl AlertSink for UnboundedSender<AlertEvent> {
    fn emit(&self, event: AlertEvent) {
        if self.send(event).is_err() {
            tracing::debug!("alert receiver closed, event dropped");
        }
    }
}
