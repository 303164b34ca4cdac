//! CSV format handling for field data and reconciliation output
//!
//! This module centralizes all CSV format concerns, providing:
//! - Row structures for readings, tank snapshots and tank events
//! - Conversion from rows to domain types
//! - Reconciliation and inventory output serialization
//!
//! All functions are pure (no file handling) for easy testing.

use crate::types::{
    FuelInventory, FuelType, IncompleteCause, InventoryConfig, InventoryStatus, PaymentMethod,
    Reading, ReconError, SourceKind, TankEvent, TankEventKind, UnitResult, WindowOutcome,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

/// A deserialized CSV row that converts into a domain record
///
/// Rows keep their fields as raw strings so a bad value is reported with the
/// column it came from instead of as a generic deserialization failure.
pub trait CsvRow: DeserializeOwned {
    type Record;

    fn convert(self) -> Result<Self::Record, String>;
}

/// Meter reading row
///
/// Columns: nozzle_id, tenant_id, station_id, fuel_type, recorded_at,
/// meter_value, previous_meter_value, meter_reset, payment_method, amount,
/// price_per_unit. The last five are optional.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ReadingRow {
    pub nozzle_id: String,
    pub tenant_id: String,
    pub station_id: String,
    pub fuel_type: String,
    pub recorded_at: String,
    pub meter_value: String,
    #[serde(default)]
    pub previous_meter_value: Option<String>,
    #[serde(default)]
    pub meter_reset: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub price_per_unit: Option<String>,
}

/// Tank snapshot row
///
/// Columns: tenant_id, station_id, fuel_type, capacity, minimum_level,
/// current_volume, last_updated.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TankRow {
    pub tenant_id: String,
    pub station_id: String,
    pub fuel_type: String,
    pub capacity: String,
    pub minimum_level: String,
    pub current_volume: String,
    pub last_updated: String,
}

/// Tank event row
///
/// Columns: event_id, tenant_id, station_id, fuel_type, kind, volume,
/// recorded_at. `kind` is one of dispensed, refill, stock_count (or dip).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TankEventRow {
    pub event_id: String,
    pub tenant_id: String,
    pub station_id: String,
    pub fuel_type: String,
    pub kind: String,
    pub volume: String,
    pub recorded_at: String,
}

fn required<'a>(field: &str, raw: &'a str) -> Result<&'a str, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(format!("Missing {}", field));
    }
    Ok(trimmed)
}

/// An optional column is absent when missing or blank
fn present(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_decimal(field: &str, raw: &str) -> Result<Decimal, String> {
    let value = required(field, raw)?;
    Decimal::from_str(value).map_err(|_| format!("Invalid {} '{}'", field, value))
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, String> {
    let value = required(field, raw)?;
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| format!("Invalid {} '{}' (expected RFC 3339)", field, value))
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, String> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("Invalid {} '{}'", field, other)),
    }
}

impl CsvRow for ReadingRow {
    type Record = Reading;

    fn convert(self) -> Result<Reading, String> {
        let nozzle_id = required("nozzle_id", &self.nozzle_id)?.to_string();
        let fuel_type = FuelType::from_str(&self.fuel_type)
            .map_err(|e| format!("{} for nozzle {}", e, nozzle_id))?;

        let previous_meter_value = present(&self.previous_meter_value)
            .map(|raw| parse_decimal("previous_meter_value", raw))
            .transpose()?;
        let meter_reset = present(&self.meter_reset)
            .map(|raw| parse_bool("meter_reset", raw))
            .transpose()?
            .unwrap_or(false);
        let payment_method = present(&self.payment_method)
            .map(PaymentMethod::from_str)
            .transpose()?
            .unwrap_or(PaymentMethod::Cash);
        let amount = present(&self.amount)
            .map(|raw| parse_decimal("amount", raw))
            .transpose()?;
        let price_per_unit = present(&self.price_per_unit)
            .map(|raw| parse_decimal("price_per_unit", raw))
            .transpose()?;

        Ok(Reading {
            tenant_id: required("tenant_id", &self.tenant_id)?.to_string(),
            station_id: required("station_id", &self.station_id)?.to_string(),
            fuel_type,
            recorded_at: parse_timestamp("recorded_at", &self.recorded_at)?,
            meter_value: parse_decimal("meter_value", &self.meter_value)?,
            previous_meter_value,
            meter_reset,
            payment_method,
            amount,
            price_per_unit,
            nozzle_id,
        })
    }
}

impl CsvRow for TankRow {
    type Record = FuelInventory;

    fn convert(self) -> Result<FuelInventory, String> {
        let minimum_level = parse_decimal("minimum_level", &self.minimum_level)?;
        let current_volume = parse_decimal("current_volume", &self.current_volume)?;

        Ok(FuelInventory {
            tenant_id: required("tenant_id", &self.tenant_id)?.to_string(),
            station_id: required("station_id", &self.station_id)?.to_string(),
            fuel_type: FuelType::from_str(&self.fuel_type)?,
            capacity: parse_decimal("capacity", &self.capacity)?,
            // Recomputed with the configured multiplier on registration
            status: InventoryStatus::classify(
                current_volume,
                minimum_level,
                InventoryConfig::default().low_level_multiplier,
            ),
            minimum_level,
            current_volume,
            last_updated: parse_timestamp("last_updated", &self.last_updated)?,
        })
    }
}

impl CsvRow for TankEventRow {
    type Record = TankEvent;

    fn convert(self) -> Result<TankEvent, String> {
        Ok(TankEvent {
            event_id: required("event_id", &self.event_id)?.to_string(),
            tenant_id: required("tenant_id", &self.tenant_id)?.to_string(),
            station_id: required("station_id", &self.station_id)?.to_string(),
            fuel_type: FuelType::from_str(&self.fuel_type)?,
            kind: TankEventKind::from_str(&self.kind)?,
            volume: parse_decimal("volume", &self.volume)?,
            recorded_at: parse_timestamp("recorded_at", &self.recorded_at)?,
        })
    }
}

fn incomplete_note(kind: SourceKind, cause: IncompleteCause) -> String {
    format!("{} source {}", kind, cause)
}

/// Output columns after the window bounds for a unit without a record
fn unreconciled(severity: &str, note: String) -> Vec<String> {
    let mut columns = vec![String::new(); 11];
    columns[5] = severity.to_string();
    columns[10] = note;
    columns
}

/// Write reconciliation results to CSV format
///
/// One row per unit, ordered by window start, station and fuel type.
/// Reconciled units carry their record; units with an incomplete source are
/// written with severity `unknown` and units that failed with `error`, the
/// reason going to the `note` column.
pub fn write_records_csv(
    tenant: &str,
    results: &[UnitResult],
    output: &mut dyn Write,
) -> Result<(), ReconError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "tenant_id",
        "station_id",
        "fuel_type",
        "window_start",
        "window_end",
        "meter_volume",
        "payment_volume",
        "inventory_volume",
        "discrepancy",
        "relative_discrepancy",
        "severity",
        "rollback_count",
        "suspect_count",
        "record_id",
        "supersedes",
        "note",
    ])?;

    let mut sorted: Vec<&UnitResult> = results.iter().collect();
    sorted.sort_by(|a, b| {
        a.unit
            .window
            .start
            .cmp(&b.unit.window.start)
            .then_with(|| a.unit.station_id.cmp(&b.unit.station_id))
            .then_with(|| a.unit.fuel_type.cmp(&b.unit.fuel_type))
    });

    for result in sorted {
        let unit = &result.unit;
        let mut row = vec![
            tenant.to_string(),
            unit.station_id.clone(),
            unit.fuel_type.to_string(),
            unit.window.start.to_rfc3339(),
            unit.window.end.to_rfc3339(),
        ];

        match &result.outcome {
            Ok(WindowOutcome::Reconciled(record)) => row.extend([
                format!("{:.4}", record.meter_volume),
                format!("{:.4}", record.payment_volume),
                format!("{:.4}", record.inventory_volume),
                format!("{:.4}", record.discrepancy),
                format!("{:.6}", record.relative_discrepancy),
                record.severity.to_string(),
                record.rollback_count.to_string(),
                record.suspect_count.to_string(),
                record.id.to_string(),
                record.supersedes.map(|id| id.to_string()).unwrap_or_default(),
                String::new(),
            ]),
            Ok(WindowOutcome::Unknown { kind, cause }) => {
                row.extend(unreconciled("unknown", incomplete_note(*kind, *cause)))
            }
            Err(e) => row.extend(unreconciled("error", e.to_string())),
        }

        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write tank inventory to CSV format, ordered by station and fuel type
pub fn write_inventory_csv(
    tanks: &[FuelInventory],
    output: &mut dyn Write,
) -> Result<(), ReconError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record([
        "tenant_id",
        "station_id",
        "fuel_type",
        "capacity",
        "minimum_level",
        "current_volume",
        "status",
        "last_updated",
    ])?;

    let mut sorted: Vec<&FuelInventory> = tanks.iter().collect();
    sorted.sort_by(|a, b| {
        a.station_id
            .cmp(&b.station_id)
            .then_with(|| a.fuel_type.cmp(&b.fuel_type))
    });

    for tank in sorted {
        writer.write_record(&[
            tank.tenant_id.clone(),
            tank.station_id.clone(),
            tank.fuel_type.to_string(),
            format!("{:.4}", tank.capacity),
            format!("{:.4}", tank.minimum_level),
            format!("{:.4}", tank.current_volume),
            tank.status.to_string(),
            tank.last_updated.to_rfc3339(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
