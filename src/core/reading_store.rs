//! Append-only meter reading storage
//!
//! This module provides the `ReadingStore`, which keeps every accepted
//! reading grouped by (tenant, nozzle). It serves both the meter and the
//! payment side of reconciliation, since a payment is the sale recorded
//! with a reading.
//!
//! # Ordering
//!
//! Each nozzle's series is strictly increasing in time. A reading that is
//! not later than the nozzle's latest reading is rejected with
//! `OutOfOrderReading`; the store never reorders or guesses corrections.

use crate::core::traits::{PaymentSource, ReadingSource};
use crate::types::{
    FuelType, NozzleId, PaymentRecord, ReconError, Reading, ReconciliationWindow, TenantContext,
    TenantId,
};
use std::collections::HashMap;

/// Select the readings relevant to a window from per-nozzle series
///
/// For each series, keeps the readings of `station`/`fuel` inside `window`
/// and, when at least one exists, the latest reading before the window as
/// the baseline the first in-window reading is paired with.
pub(crate) fn select_window<'a>(
    series: impl Iterator<Item = &'a [Reading]>,
    station: &str,
    fuel: FuelType,
    window: &ReconciliationWindow,
) -> Vec<Reading> {
    let mut selected = Vec::new();

    for readings in series {
        let mut baseline: Option<&Reading> = None;
        let mut inside = Vec::new();

        for reading in readings
            .iter()
            .filter(|r| r.station_id == station && r.fuel_type == fuel)
        {
            if reading.recorded_at < window.start {
                baseline = Some(reading);
            } else if window.contains(reading.recorded_at) {
                inside.push(reading.clone());
            }
        }

        if inside.is_empty() {
            continue;
        }
        if let Some(baseline) = baseline {
            selected.push(baseline.clone());
        }
        selected.extend(inside);
    }

    selected
}

/// Payments recorded with the readings of `station`/`fuel` inside `window`
pub(crate) fn select_payments<'a>(
    series: impl Iterator<Item = &'a [Reading]>,
    station: &str,
    fuel: FuelType,
    window: &ReconciliationWindow,
) -> Vec<PaymentRecord> {
    series
        .flat_map(|readings| readings.iter())
        .filter(|r| r.station_id == station && r.fuel_type == fuel && window.contains(r.recorded_at))
        .filter_map(Reading::payment)
        .collect()
}

/// Single-threaded reading store
#[derive(Debug, Default)]
pub struct ReadingStore {
    /// Per-nozzle series, ordered by `recorded_at`
    readings: HashMap<(TenantId, NozzleId), Vec<Reading>>,
}

impl ReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading to its nozzle's series
    ///
    /// # Arguments
    ///
    /// * `ctx` - Scope the reading must belong to
    /// * `reading` - The reading to append
    ///
    /// # Returns
    ///
    /// * `Ok(Some(previous))` - The nozzle's preceding reading
    /// * `Ok(None)` - This is the nozzle's first reading
    /// * `Err(ReconError)` - Scope violation or `OutOfOrderReading`
    pub fn append(
        &mut self,
        ctx: &TenantContext,
        reading: Reading,
    ) -> Result<Option<Reading>, ReconError> {
        ctx.admit(&reading.tenant_id, &reading.station_id)?;

        let series = self
            .readings
            .entry((reading.tenant_id.clone(), reading.nozzle_id.clone()))
            .or_default();

        let previous = series.last().cloned();
        if let Some(previous) = &previous {
            if reading.recorded_at <= previous.recorded_at {
                return Err(ReconError::out_of_order(
                    &reading.nozzle_id,
                    previous.recorded_at.to_rfc3339(),
                    reading.recorded_at.to_rfc3339(),
                ));
            }
        }

        series.push(reading);
        Ok(previous)
    }

    /// Latest reading of a nozzle within the context tenant
    pub fn latest(&self, ctx: &TenantContext, nozzle: &str) -> Result<Option<&Reading>, ReconError> {
        let tenant = ctx.tenant()?;
        Ok(self
            .readings
            .get(&(tenant.to_string(), nozzle.to_string()))
            .and_then(|series| series.last()))
    }

    /// Number of stored readings across all tenants
    pub fn len(&self) -> usize {
        self.readings.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    fn tenant_series<'a>(&'a self, tenant: &'a str) -> impl Iterator<Item = &'a [Reading]> + 'a {
        self.readings
            .iter()
            .filter(move |((t, _), _)| t == tenant)
            .map(|(_, series)| series.as_slice())
    }
}

impl ReadingSource for ReadingStore {
    fn window_readings(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<Reading>, ReconError> {
        let tenant = ctx.scope_station(station)?;
        Ok(select_window(self.tenant_series(tenant), station, fuel, window))
    }
}

impl PaymentSource for ReadingStore {
    fn window_payments(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<PaymentRecord>, ReconError> {
        let tenant = ctx.scope_station(station)?;
        Ok(select_payments(self.tenant_series(tenant), station, fuel, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PaymentMethod;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

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
            payment_method: PaymentMethod::Card,
            amount: Some(dec!(100)),
            price_per_unit: Some(dec!(2)),
        }
    }

    #[test]
    fn test_append_returns_previous() {
        let ctx = TenantContext::new("acme");
        let mut store = ReadingStore::new();

        assert_eq!(store.append(&ctx, reading("acme", "n1", 1, dec!(10))), Ok(None));
        let previous = store
            .append(&ctx, reading("acme", "n1", 2, dec!(20)))
            .unwrap()
            .unwrap();
        assert_eq!(previous.meter_value, dec!(10));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_append_rejects_out_of_order() {
        let ctx = TenantContext::new("acme");
        let mut store = ReadingStore::new();
        store.append(&ctx, reading("acme", "n1", 5, dec!(10))).unwrap();

        let result = store.append(&ctx, reading("acme", "n1", 5, dec!(12)));
        assert!(matches!(result, Err(ReconError::OutOfOrderReading { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_append_rejects_foreign_tenant() {
        let ctx = TenantContext::new("acme");
        let mut store = ReadingStore::new();
        let result = store.append(&ctx, reading("globex", "n1", 1, dec!(10)));
        assert_eq!(result, Err(ReconError::tenant_mismatch("acme", "globex")));
        assert!(store.is_empty());
    }

    #[test]
    fn test_window_includes_baseline_per_nozzle() {
        let ctx = TenantContext::new("acme");
        let mut store = ReadingStore::new();
        for (hour, value) in [(1, dec!(100)), (2, dec!(110)), (4, dec!(130)), (9, dec!(200))] {
            store.append(&ctx, reading("acme", "n1", hour, value)).unwrap();
        }

        let window = ReconciliationWindow::new(at(3), at(9)).unwrap();
        let readings = store
            .window_readings(&ctx, "s1", FuelType::Diesel, &window)
            .unwrap();
        let values: Vec<Decimal> = readings.iter().map(|r| r.meter_value).collect();
        assert_eq!(values, vec![dec!(110), dec!(130)]);

        let payments = store
            .window_payments(&ctx, "s1", FuelType::Diesel, &window)
            .unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].recorded_at, at(4));
    }

    #[test]
    fn test_window_is_tenant_scoped() {
        let acme = TenantContext::new("acme");
        let globex = TenantContext::new("globex");
        let mut store = ReadingStore::new();
        store.append(&acme, reading("acme", "n1", 4, dec!(100))).unwrap();
        store.append(&globex, reading("globex", "n1", 4, dec!(900))).unwrap();

        let window = ReconciliationWindow::new(at(3), at(5)).unwrap();
        let readings = store
            .window_readings(&globex, "s1", FuelType::Diesel, &window)
            .unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].tenant_id, "globex");
    }

    #[test]
    fn test_window_respects_station_scope() {
        let ctx = TenantContext::new("acme").with_station("s2");
        let store = ReadingStore::new();
        let window = ReconciliationWindow::new(at(3), at(5)).unwrap();
        assert_eq!(
            store.window_readings(&ctx, "s1", FuelType::Diesel, &window),
            Err(ReconError::station_out_of_scope("s2", "s1"))
        );
    }
}
