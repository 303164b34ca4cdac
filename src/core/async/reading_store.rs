//! Thread-safe reading storage
//!
//! `AsyncReadingStore` keeps the same per-nozzle series as `ReadingStore`,
//! but in a `DashMap`. Appends to one nozzle are serialized through its
//! entry lock; appends to different nozzles proceed concurrently.

use crate::core::reading_store::{select_payments, select_window};
use crate::core::traits::{AsyncPaymentSource, AsyncReadingSource};
use crate::types::{
    FuelType, NozzleId, PaymentRecord, ReconError, Reading, ReconciliationWindow, TenantContext,
    TenantId,
};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct AsyncReadingStore {
    readings: DashMap<(TenantId, NozzleId), Vec<Reading>>,
}

impl AsyncReadingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading; returns the nozzle's preceding reading
    ///
    /// # Errors
    ///
    /// Scope errors, or `OutOfOrderReading` if the reading is not later
    /// than the nozzle's latest one.
    pub fn append(
        &self,
        ctx: &TenantContext,
        reading: Reading,
    ) -> Result<Option<Reading>, ReconError> {
        ctx.admit(&reading.tenant_id, &reading.station_id)?;

        let mut series = self
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

        series.value_mut().push(reading);
        Ok(previous)
    }

    pub fn len(&self) -> usize {
        self.readings.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Window readings with per-nozzle baselines
    pub fn readings_in(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<Reading>, ReconError> {
        let tenant = ctx.scope_station(station)?;
        let mut selected = Vec::new();
        for entry in self.readings.iter().filter(|entry| entry.key().0 == tenant) {
            selected.extend(select_window(
                std::iter::once(entry.value().as_slice()),
                station,
                fuel,
                window,
            ));
        }
        Ok(selected)
    }

    pub fn payments_in(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<PaymentRecord>, ReconError> {
        let tenant = ctx.scope_station(station)?;
        let mut selected = Vec::new();
        for entry in self.readings.iter().filter(|entry| entry.key().0 == tenant) {
            selected.extend(select_payments(
                std::iter::once(entry.value().as_slice()),
                station,
                fuel,
                window,
            ));
        }
        Ok(selected)
    }
}

#[async_trait]
impl AsyncReadingSource for AsyncReadingStore {
    async fn window_readings(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<Reading>, ReconError> {
        self.readings_in(ctx, station, fuel, window)
    }
}

#[async_trait]
impl AsyncPaymentSource for AsyncReadingStore {
    async fn window_payments(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<PaymentRecord>, ReconError> {
        self.payments_in(ctx, station, fuel, window)
    }
}
