//! Fuel inventory types
//!
//! One `FuelInventory` exists per (tenant, station, fuel type). Its status is
//! a pure function of the current volume and the static thresholds.

use super::reading::{FuelType, StationId, TenantId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stock status of a tank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryStatus {
    Normal,
    Low,
    Critical,
}

impl InventoryStatus {
    /// Derive the status from a volume and the tank thresholds
    ///
    /// - `Critical` when `current <= minimum`
    /// - `Low` when `current <= minimum * low_multiplier`
    /// - `Normal` otherwise
    pub fn classify(current: Decimal, minimum: Decimal, low_multiplier: Decimal) -> Self {
        if current <= minimum {
            return InventoryStatus::Critical;
        }
        match minimum.checked_mul(low_multiplier) {
            Some(low_ceiling) if current <= low_ceiling => InventoryStatus::Low,
            _ => InventoryStatus::Normal,
        }
    }
}

impl fmt::Display for InventoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryStatus::Normal => write!(f, "normal"),
            InventoryStatus::Low => write!(f, "low"),
            InventoryStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Live inventory of one tank
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuelInventory {
    pub tenant_id: TenantId,
    pub station_id: StationId,
    pub fuel_type: FuelType,
    pub capacity: Decimal,
    pub minimum_level: Decimal,

    /// Invariant: `0 <= current_volume <= capacity`
    pub current_volume: Decimal,

    pub status: InventoryStatus,
    pub last_updated: DateTime<Utc>,
}

/// Kind of mutation applied to a tank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TankEventKind {
    /// Confirmed volume dispensed from the tank
    Dispensed,
    /// Fuel delivered into the tank
    Refill,
    /// Physically measured tank level (dip or gauge)
    StockCount,
}

impl FromStr for TankEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dispensed" => Ok(TankEventKind::Dispensed),
            "refill" => Ok(TankEventKind::Refill),
            "stock_count" | "dip" => Ok(TankEventKind::StockCount),
            other => Err(format!("Invalid tank event kind: '{}'", other)),
        }
    }
}

/// A tank mutation carrying a caller-supplied idempotency key
#[derive(Debug, Clone, PartialEq)]
pub struct TankEvent {
    pub event_id: String,
    pub tenant_id: TenantId,
    pub station_id: StationId,
    pub fuel_type: FuelType,
    pub kind: TankEventKind,

    /// Dispensed or refilled volume; the measured level for stock counts
    pub volume: Decimal,

    pub recorded_at: DateTime<Utc>,
}

/// Entry in a tank's level history
#[derive(Debug, Clone, PartialEq)]
pub struct LevelEntry {
    pub at: DateTime<Utc>,
    pub kind: Option<TankEventKind>,
    pub volume: Decimal,
    pub level_after: Decimal,
}

/// Inventory facts for one reconciliation window
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InventoryWindow {
    /// Tank level at the window start, if known
    pub opening_level: Option<Decimal>,
    /// Tank level at the window end, if known
    pub closing_level: Option<Decimal>,
    /// Total volume refilled within the window
    pub refilled: Decimal,
}

/// Fleet-wide inventory figures for a tenant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InventoryOverview {
    pub total_tanks: usize,
    pub low_stock_count: usize,
    pub total_capacity: Decimal,
    pub total_current_stock: Decimal,

    /// Rounded percentage of capacity currently in stock
    pub average_fill_percentage: Decimal,
}
