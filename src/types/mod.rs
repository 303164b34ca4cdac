//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `reading`: identifiers, fuel grades, meter readings and payments
//! - `tenant`: the explicit tenant scoping value
//! - `inventory`: tank inventory, status and tank events
//! - `reconciliation`: windows, records and severities
//! - `summary`: discrepancy summary shapes
//! - `config`: engine thresholds and their defaults
//! - `error`: error types for the reconciliation core

pub mod config;
pub mod error;
pub mod inventory;
pub mod reading;
pub mod reconciliation;
pub mod summary;
pub mod tenant;

pub use config::{
    AnomalyConfig, EngineConfig, InventoryConfig, SeverityConfig, SourceConfig, SummaryConfig,
};
pub use error::{ErrorClass, IncompleteCause, ReconError, SourceKind};
pub use inventory::{
    FuelInventory, InventoryOverview, InventoryStatus, InventoryWindow, LevelEntry, TankEvent,
    TankEventKind,
};
pub use reading::{
    FuelType, NozzleId, PaymentMethod, PaymentRecord, Reading, StationId, TenantId,
};
pub use reconciliation::{
    ReconciliationRecord, ReconciliationUnit, ReconciliationWindow, Severity, UnitResult,
    WindowKey, WindowOutcome,
};
pub use summary::{DateRange, DiscrepancySummary, Distribution, SeverityCounts, SummaryScope};
pub use tenant::TenantContext;
