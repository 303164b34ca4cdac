//! Error types for the fuel reconciliation engine
//!
//! This module defines every failure the reconciliation core can report.
//! Business disagreements (meter rollbacks, large jumps, discrepancies) are
//! NOT errors: they are returned as classified data. Only structural
//! violations end up here.
//!
//! # Error Categories
//!
//! - **Scope Errors**: missing tenant context, cross-tenant or out-of-scope access
//! - **Reading Errors**: out-of-order or mismatched reading pairs
//! - **Inventory Errors**: insufficient stock, capacity overflow, unknown tanks
//! - **Reconciliation Errors**: incomplete or invalid windows
//! - **File / Parse Errors**: CSV and configuration input problems

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// Which of the three reconciliation sources an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Nozzle meter readings
    Meter,
    /// Payments recorded against readings
    Payment,
    /// Tank inventory levels and refills
    Inventory,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Meter => write!(f, "meter"),
            SourceKind::Payment => write!(f, "payment"),
            SourceKind::Inventory => write!(f, "inventory"),
        }
    }
}

/// Why a reconciliation source could not contribute to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteCause {
    /// The source returned zero data points for the window
    NoData,
    /// The source fetch did not complete within the configured timeout
    TimedOut,
}

impl fmt::Display for IncompleteCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncompleteCause::NoData => write!(f, "no data"),
            IncompleteCause::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Coarse classification used by callers that translate errors into
/// transport-level status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or invalid input (maps to a 4xx response)
    Client,
    /// A source collaborator did not answer in time (maps to a 5xx response)
    Upstream,
    /// Local I/O or arithmetic failure
    Internal,
}

/// Main error type for the reconciliation core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconError {
    /// The call carried no resolved tenant id
    #[error("Missing tenant context")]
    MissingTenantContext,

    /// A record belongs to a different tenant than the calling context
    #[error("Record for tenant '{record_tenant}' rejected in context of tenant '{context_tenant}'")]
    TenantMismatch {
        context_tenant: String,
        record_tenant: String,
    },

    /// The context is scoped to one station and the call named another
    #[error("Station '{station}' is outside the scope of station '{scoped}'")]
    StationOutOfScope { scoped: String, station: String },

    /// The current reading is not strictly later than the previous one
    #[error("Out-of-order reading for nozzle {nozzle}: {current} is not after {previous}")]
    OutOfOrderReading {
        nozzle: String,
        previous: String,
        current: String,
    },

    /// Two readings paired for a delta do not describe the same meter
    #[error("Reading pair mismatch on {field}: '{previous}' vs '{current}'")]
    ReadingMismatch {
        field: String,
        previous: String,
        current: String,
    },

    /// Applying a dispensed volume would drive the tank negative
    #[error("Insufficient inventory at station {station} ({fuel}): available {available}, requested {requested}")]
    InsufficientInventory {
        station: String,
        fuel: String,
        available: Decimal,
        requested: Decimal,
    },

    /// Applying a refill or stock count would exceed tank capacity
    #[error("Capacity exceeded at station {station} ({fuel}): capacity {capacity}, resulting volume {resulting}")]
    CapacityExceeded {
        station: String,
        fuel: String,
        capacity: Decimal,
        resulting: Decimal,
    },

    /// A mutation carried a volume that is not usable
    #[error("Invalid volume {volume} for {operation}")]
    InvalidVolume { volume: Decimal, operation: String },

    /// A tank event is older than a measurement of the tank's level
    #[error("Stale tank event {event_id} at station {station} ({fuel}): {at} precedes the level measured at {measured_at}")]
    StaleTankEvent {
        event_id: String,
        station: String,
        fuel: String,
        at: String,
        measured_at: String,
    },

    /// No tank is registered for the station and fuel type
    #[error("No inventory registered for station {station} ({fuel})")]
    InventoryNotFound { station: String, fuel: String },

    /// A reconciliation source could not contribute to the window
    #[error("Incomplete window: {kind} source {cause}")]
    IncompleteWindow {
        kind: SourceKind,
        cause: IncompleteCause,
    },

    /// The window bounds are not usable
    #[error("Invalid window: {start} is not before {end}")]
    InvalidWindow { start: String, end: String },

    /// Checked arithmetic failed
    #[error("Arithmetic overflow in {operation}")]
    ArithmeticOverflow { operation: String },

    /// A configuration value could not be loaded
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// File not found at the specified path
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// I/O error occurred while reading or writing files
    #[error("I/O error: {message}")]
    IoError { message: String },

    /// CSV parsing error occurred
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError { line: Option<u64>, message: String },
}

impl From<std::io::Error> for ReconError {
    fn from(error: std::io::Error) -> Self {
        ReconError::IoError {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for ReconError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        ReconError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for ReconError {
    fn from(error: serde_json::Error) -> Self {
        ReconError::invalid_config(error.to_string())
    }
}

// Helper functions for creating common errors

impl ReconError {
    pub fn tenant_mismatch(context_tenant: &str, record_tenant: &str) -> Self {
        ReconError::TenantMismatch {
            context_tenant: context_tenant.to_string(),
            record_tenant: record_tenant.to_string(),
        }
    }

    pub fn station_out_of_scope(scoped: &str, station: &str) -> Self {
        ReconError::StationOutOfScope {
            scoped: scoped.to_string(),
            station: station.to_string(),
        }
    }

    pub fn out_of_order(nozzle: &str, previous: impl ToString, current: impl ToString) -> Self {
        ReconError::OutOfOrderReading {
            nozzle: nozzle.to_string(),
            previous: previous.to_string(),
            current: current.to_string(),
        }
    }

    pub fn reading_mismatch(field: &str, previous: &str, current: &str) -> Self {
        ReconError::ReadingMismatch {
            field: field.to_string(),
            previous: previous.to_string(),
            current: current.to_string(),
        }
    }

    pub fn insufficient_inventory(
        station: &str,
        fuel: impl ToString,
        available: Decimal,
        requested: Decimal,
    ) -> Self {
        ReconError::InsufficientInventory {
            station: station.to_string(),
            fuel: fuel.to_string(),
            available,
            requested,
        }
    }

    pub fn capacity_exceeded(
        station: &str,
        fuel: impl ToString,
        capacity: Decimal,
        resulting: Decimal,
    ) -> Self {
        ReconError::CapacityExceeded {
            station: station.to_string(),
            fuel: fuel.to_string(),
            capacity,
            resulting,
        }
    }

    pub fn invalid_volume(volume: Decimal, operation: &str) -> Self {
        ReconError::InvalidVolume {
            volume,
            operation: operation.to_string(),
        }
    }

    pub fn stale_tank_event(
        event_id: &str,
        station: &str,
        fuel: impl ToString,
        at: impl ToString,
        measured_at: impl ToString,
    ) -> Self {
        ReconError::StaleTankEvent {
            event_id: event_id.to_string(),
            station: station.to_string(),
            fuel: fuel.to_string(),
            at: at.to_string(),
            measured_at: measured_at.to_string(),
        }
    }

    pub fn inventory_not_found(station: &str, fuel: impl ToString) -> Self {
        ReconError::InventoryNotFound {
            station: station.to_string(),
            fuel: fuel.to_string(),
        }
    }

    pub fn incomplete(kind: SourceKind, cause: IncompleteCause) -> Self {
        ReconError::IncompleteWindow { kind, cause }
    }

    pub fn arithmetic_overflow(operation: &str) -> Self {
        ReconError::ArithmeticOverflow {
            operation: operation.to_string(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        ReconError::InvalidConfig {
            message: message.into(),
        }
    }

    /// Classify the error for transport-level translation
    ///
    /// Source-fetch timeouts are the only upstream failures; everything the
    /// caller can fix by sending different input is a client error.
    pub fn class(&self) -> ErrorClass {
        match self {
            ReconError::IncompleteWindow {
                cause: IncompleteCause::TimedOut,
                ..
            } => ErrorClass::Upstream,
            ReconError::ArithmeticOverflow { .. } | ReconError::IoError { .. } => {
                ErrorClass::Internal
            }
            _ => ErrorClass::Client,
        }
    }
}
