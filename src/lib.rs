//! Fuel Reconciliation Engine Library
//!
//! # Overview
//!
//! This library decides whether the fuel volumes a station reports through
//! three independent channels agree: nozzle meters, recorded payments, and
//! tank inventory. Disagreement is measured per (station, fuel type, time
//! window) and classified by magnitude. The CSV-driven pipeline runs with
//! either a synchronous or an asynchronous strategy.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (Reading, FuelInventory, ReconciliationRecord, etc.)
//! - [`cli`] - CLI arguments parsing
//! - [`core`] - Business logic components:
//!   - [`core::volume_delta`] - Dispensed volume between consecutive readings
//!   - [`core::anomaly`] - Large-jump and rollback classification
//!   - [`core::inventory_tracker`] - Tank levels, status and level history
//!   - [`core::engine`] - Ingestion and reconciliation orchestration
//!   - [`core::summary`] - Discrepancy aggregation over records
//! - [`io`] - CSV input rows and report writers
//! - [`strategy`] - Sync and async pipelines
//!
//! # Tenancy
//!
//! Every operation takes an explicit [`types::TenantContext`]. Records of
//! another tenant, or of another station when the context is narrowed to
//! one, are never returned or mutated.
//!
//! # Reconciliation
//!
//! For each window the engine derives:
//! - `meter_volume`: the sum of non-rollback deltas between readings
//! - `payment_volume`: the sum of `amount / price_per_unit` of recorded sales
//! - `inventory_volume`: opening level minus closing level plus refills
//!
//! The discrepancy is the largest pairwise difference among the three, and
//! its ratio to the largest volume selects the severity (`ok`, `warn`,
//! `critical`). A window where any source has no data is reported as
//! unknown rather than reconciled against a fabricated zero.

pub mod cli;
pub mod core;
pub mod io;
pub mod strategy;
pub mod types;

pub use self::core::{
    AlertSink, AsyncReconciliationEngine, DiscrepancySummaryService, InventoryTracker,
    ReconciliationEngine, VolumeDelta, VolumeDeltaCalculator,
};
pub use io::{write_inventory_csv, write_records_csv};
pub use types::{
    DiscrepancySummary, EngineConfig, FuelInventory, FuelType, ReconError, Reading,
    ReconciliationRecord, ReconciliationWindow, Severity, TenantContext, WindowOutcome,
};
