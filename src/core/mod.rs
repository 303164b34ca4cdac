//! Core reconciliation logic
//!
//! This module contains the reconciliation components:
//! - `volume_delta` - Dispensed volume between consecutive readings
//! - `anomaly` - Large-jump and rollback classification
//! - `inventory_tracker` - Tank levels, status and history
//! - `reading_store` - Append-only meter readings
//! - `reconciliation` - Window computation shared by both engines
//! - `ledger` - Immutable reconciliation records with supersession
//! - `summary` - Discrepancy aggregation
//! - `alerts` - Alert events and sinks
//! - `traits` - Source abstractions consumed by reconciliation
//! - `engine` - Single-threaded orchestration
//! - `async` - Concurrent implementations

pub mod alerts;
pub mod anomaly;
pub mod r#async;
pub mod engine;
pub mod inventory_tracker;
pub mod ledger;
pub mod reading_store;
pub mod reconciliation;
pub mod summary;
pub mod traits;
pub mod volume_delta;

pub use alerts::{AlertEvent, AlertSink, AnomalyEvent, DiscrepancyEvent, TracingAlertSink};
pub use anomaly::{AnomalyDetector, Classification};
pub use engine::{IngestOutcome, ReconciliationEngine};
pub use inventory_tracker::InventoryTracker;
pub use ledger::ReconciliationLedger;
pub use r#async::{
    AsyncInventoryTracker, AsyncReadingStore, AsyncReconciliationEngine, BatchProcessor,
    WindowScheduler,
};
pub use reading_store::ReadingStore;
pub use reconciliation::{WindowFacts, WindowReconciler};
pub use summary::DiscrepancySummaryService;
pub use volume_delta::{VolumeDelta, VolumeDeltaCalculator};
