//! Source traits consumed by reconciliation
//!
//! Reconciliation reads three independent sources for a window. The
//! single-threaded engine reads them through the plain traits; the
//! concurrent engine awaits the `Async*` variants so the three fetches can
//! be joined.

use crate::types::{
    FuelType, InventoryWindow, PaymentRecord, ReconError, Reading, ReconciliationWindow,
    TenantContext,
};
use async_trait::async_trait;

/// Meter readings of a station and fuel type
pub trait ReadingSource {
    /// Readings recorded inside `window`, plus the latest reading of each
    /// nozzle before `window.start` as the pairing baseline
    fn window_readings(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<Reading>, ReconError>;
}

/// Payments recorded against a station and fuel type
pub trait PaymentSource {
    fn window_payments(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<PaymentRecord>, ReconError>;
}

/// Tank levels around a window
pub trait InventorySource {
    /// Opening and closing levels plus refills inside `window`
    ///
    /// An unknown tank yields an empty `InventoryWindow` rather than an
    /// error; the caller decides whether that makes the window incomplete.
    fn window_inventory(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<InventoryWindow, ReconError>;
}

#[async_trait]
pub trait AsyncReadingSource: Send + Sync {
    async fn window_readings(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<Reading>, ReconError>;
}

#[async_trait]
pub trait AsyncPaymentSource: Send + Sync {
    async fn window_payments(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Vec<PaymentRecord>, ReconError>;
}

#[async_trait]
pub trait AsyncInventorySource: Send + Sync {
    async fn window_inventory(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<InventoryWindow, ReconError>;
}
