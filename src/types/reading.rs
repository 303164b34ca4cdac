//! Meter reading and payment types
//!
//! Readings are append-only facts produced by field ingestion. Each reading
//! carries the cumulative meter value of one nozzle and, when a sale was
//! recorded with it, the payment amount and unit price.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tenant identifier
pub type TenantId = String;

/// Station identifier (unique within a tenant)
pub type StationId = String;

/// Nozzle identifier (unique within a tenant)
pub type NozzleId = String;

/// Fuel grades dispensed by a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    Petrol,
    Diesel,
    Premium,
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuelType::Petrol => write!(f, "petrol"),
            FuelType::Diesel => write!(f, "diesel"),
            FuelType::Premium => write!(f, "premium"),
        }
    }
}

impl FromStr for FuelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "petrol" => Ok(FuelType::Petrol),
            "diesel" => Ok(FuelType::Diesel),
            "premium" => Ok(FuelType::Premium),
            other => Err(format!("Invalid fuel type: '{}'", other)),
        }
    }
}

/// How a sale recorded with a reading was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
    Credit,
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "upi" => Ok(PaymentMethod::Upi),
            "credit" => Ok(PaymentMethod::Credit),
            other => Err(format!("Invalid payment method: '{}'", other)),
        }
    }
}

/// A single cumulative meter reading for one nozzle
///
/// For a fixed nozzle, readings are totally ordered by `recorded_at`. A valid
/// reading's `meter_value` is at least the preceding reading's value unless
/// `meter_reset` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub nozzle_id: NozzleId,
    pub tenant_id: TenantId,
    pub station_id: StationId,

    /// Fuel grade of the nozzle at the time of the reading
    pub fuel_type: FuelType,

    pub recorded_at: DateTime<Utc>,

    /// Cumulative meter value
    pub meter_value: Decimal,

    /// Meter value of the preceding reading, as reported by the field device
    pub previous_meter_value: Option<Decimal>,

    /// The meter was replaced or zeroed before this reading was taken
    pub meter_reset: bool,

    pub payment_method: PaymentMethod,

    /// Sale amount recorded with this reading
    pub amount: Option<Decimal>,

    /// Unit price applied to the sale
    pub price_per_unit: Option<Decimal>,
}

impl Reading {
    /// Key used to make inventory depletion from this reading idempotent
    pub fn event_key(&self) -> String {
        format!("{}@{}", self.nozzle_id, self.recorded_at.to_rfc3339())
    }

    /// The payment recorded with this reading, if it carries both an amount
    /// and a unit price
    pub fn payment(&self) -> Option<PaymentRecord> {
        match (self.amount, self.price_per_unit) {
            (Some(amount), Some(price_per_unit)) => Some(PaymentRecord {
                tenant_id: self.tenant_id.clone(),
                station_id: self.station_id.clone(),
                fuel_type: self.fuel_type,
                nozzle_id: self.nozzle_id.clone(),
                recorded_at: self.recorded_at,
                method: self.payment_method,
                amount,
                price_per_unit,
            }),
            _ => None,
        }
    }
}

/// A payment recorded against a station and fuel type
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub tenant_id: TenantId,
    pub station_id: StationId,
    pub fuel_type: FuelType,
    pub nozzle_id: NozzleId,
    pub recorded_at: DateTime<Utc>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub price_per_unit: Decimal,
}

impl PaymentRecord {
    /// Volume paid for, `amount / price_per_unit`
    ///
    /// Returns `None` when the price is not positive.
    pub fn volume(&self) -> Option<Decimal> {
        if self.price_per_unit <= Decimal::ZERO {
            return None;
        }
        self.amount.checked_div(self.price_per_unit)
    }
}
