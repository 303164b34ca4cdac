//! Thread-safe inventory tracking for concurrent ingestion
//!
//! This module provides the `AsyncInventoryTracker`, the concurrent
//! counterpart of `InventoryTracker`.
//!
//! # Design
//!
//! Tanks live in a `DashMap` keyed by (tenant, station, fuel type). Every
//! mutation runs while holding the tank's entry lock, so read-modify-write
//! on one tank is serialized and no depletion event is lost, while tanks of
//! other stations or fuel types are updated in parallel. There is no global
//! lock.

use crate::core::inventory_tracker::{overview, scoped_event, Tank, TankKey};
use crate::core::traits::AsyncInventorySource;
use crate::types::{
    FuelInventory, FuelType, InventoryConfig, InventoryOverview, InventoryWindow, ReconError,
    ReconciliationWindow, TankEvent, TankEventKind, TenantContext,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

#[derive(Debug, Default)]
pub struct AsyncInventoryTracker {
    config: InventoryConfig,

    /// One live tank per key; the entry lock is the per-tank writer lock
    tanks: DashMap<TankKey, Tank>,
}

impl AsyncInventoryTracker {
    pub fn new(config: InventoryConfig) -> Self {
        Self {
            config,
            tanks: DashMap::new(),
        }
    }

    /// Register (or re-register) a tank snapshot
    pub fn register(
        &self,
        ctx: &TenantContext,
        snapshot: FuelInventory,
    ) -> Result<FuelInventory, ReconError> {
        ctx.admit(&snapshot.tenant_id, &snapshot.station_id)?;
        let key = (
            snapshot.tenant_id.clone(),
            snapshot.station_id.clone(),
            snapshot.fuel_type,
        );
        let tank = Tank::open(snapshot, &self.config)?;
        let inventory = tank.inventory.clone();
        self.tanks.insert(key, tank);
        Ok(inventory)
    }

    /// Run `f` on one tank while holding its entry lock
    fn update<F, T>(&self, key: &TankKey, f: F) -> Result<T, ReconError>
    where
        F: FnOnce(&mut Tank) -> Result<T, ReconError>,
    {
        let mut entry = self
            .tanks
            .get_mut(key)
            .ok_or_else(|| ReconError::inventory_not_found(&key.1, key.2))?;
        f(entry.value_mut())
    }

    pub fn apply_event(
        &self,
        ctx: &TenantContext,
        event: &TankEvent,
    ) -> Result<FuelInventory, ReconError> {
        ctx.admit(&event.tenant_id, &event.station_id)?;
        let key = (
            event.tenant_id.clone(),
            event.station_id.clone(),
            event.fuel_type,
        );
        self.update(&key, |tank| tank.apply(event, &self.config))
    }

    pub fn apply_dispensed(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        event_id: &str,
        volume: Decimal,
        at: DateTime<Utc>,
    ) -> Result<FuelInventory, ReconError> {
        let event = scoped_event(ctx, station, fuel, event_id, TankEventKind::Dispensed, volume, at)?;
        self.apply_event(ctx, &event)
    }

    pub fn apply_refill(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        event_id: &str,
        volume: Decimal,
        at: DateTime<Utc>,
    ) -> Result<FuelInventory, ReconError> {
        let event = scoped_event(ctx, station, fuel, event_id, TankEventKind::Refill, volume, at)?;
        self.apply_event(ctx, &event)
    }

    pub fn apply_stock_count(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        event_id: &str,
        measured: Decimal,
        at: DateTime<Utc>,
    ) -> Result<FuelInventory, ReconError> {
        let event = scoped_event(
            ctx,
            station,
            fuel,
            event_id,
            TankEventKind::StockCount,
            measured,
            at,
        )?;
        self.apply_event(ctx, &event)
    }

    pub fn current_level(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
    ) -> Result<FuelInventory, ReconError> {
        let tenant = ctx.scope_station(station)?;
        self.tanks
            .get(&(tenant.to_string(), station.to_string(), fuel))
            .map(|tank| tank.inventory.clone())
            .ok_or_else(|| ReconError::inventory_not_found(station, fuel))
    }

    pub fn inventory_status(
        &self,
        ctx: &TenantContext,
        station: &str,
    ) -> Result<Vec<FuelInventory>, ReconError> {
        let tenant = ctx.scope_station(station)?;
        let mut tanks: Vec<FuelInventory> = self
            .tanks
            .iter()
            .filter(|entry| {
                let (t, s, _) = entry.key();
                t == tenant && s == station
            })
            .map(|entry| entry.value().inventory.clone())
            .collect();
        tanks.sort_by_key(|tank| tank.fuel_type);
        Ok(tanks)
    }

    pub fn overview(&self, ctx: &TenantContext) -> Result<InventoryOverview, ReconError> {
        let tenant = ctx.tenant()?;
        let tanks: Vec<FuelInventory> = self
            .tanks
            .iter()
            .filter(|entry| {
                let (t, s, _) = entry.key();
                t == tenant && ctx.station().map_or(true, |scoped| scoped == s)
            })
            .map(|entry| entry.value().inventory.clone())
            .collect();
        overview(tanks.iter())
    }

    /// Window facts of one tank; synchronous so callers may use it outside
    /// a runtime
    pub fn window(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<InventoryWindow, ReconError> {
        let tenant = ctx.scope_station(station)?;
        match self.tanks.get(&(tenant.to_string(), station.to_string(), fuel)) {
            Some(tank) => tank.window(window),
            None => Ok(InventoryWindow::default()),
        }
    }
}

#[async_trait]
impl AsyncInventorySource for AsyncInventoryTracker {
    async fn window_inventory(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<InventoryWindow, ReconError> {
        self.window(ctx, station, fuel, window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::inventory_tracker::tests::{at, snapshot};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    #[test]
    fn test_replay_does_not_double_deplete() {
        let ctx = TenantContext::new("acme");
        let tracker = AsyncInventoryTracker::default();
        tracker.register(&ctx, snapshot("acme", "s1", dec!(5000))).unwrap();

        for _ in 0..3 {
            tracker
                .apply_dispensed(&ctx, "s1", FuelType::Diesel, "evt-1", dec!(250), at(1))
                .unwrap();
        }
        assert_eq!(
            tracker
                .current_level(&ctx, "s1", FuelType::Diesel)
                .unwrap()
                .current_volume,
            dec!(4750)
        );
    }

    #[test]
    fn test_unknown_tank_is_reported() {
        let ctx = TenantContext::new("acme");
        let tracker = AsyncInventoryTracker::default();
        assert_eq!(
            tracker.apply_refill(&ctx, "s1", FuelType::Diesel, "r1", dec!(10), at(1)),
            Err(ReconError::inventory_not_found("s1", FuelType::Diesel))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispensing_loses_no_update() {
        let ctx = TenantContext::new("acme");
        let tracker = Arc::new(AsyncInventoryTracker::default());
        tracker.register(&ctx, snapshot("acme", "s1", dec!(10000))).unwrap();

        let mut tasks = Vec::new();
        for i in 0..100u32 {
            let tracker = Arc::clone(&tracker);
            let ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                tracker.apply_dispensed(
                    &ctx,
                    "s1",
                    FuelType::Diesel,
                    &format!("evt-{}", i),
                    dec!(10),
                    at(1),
                )
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let tank = tracker.current_level(&ctx, "s1", FuelType::Diesel).unwrap();
        assert_eq!(tank.current_volume, dec!(9000));
    }

    #[tokio::test]
    async fn test_window_source_is_tenant_scoped() {
        let tracker = AsyncInventoryTracker::default();
        tracker
            .register(&TenantContext::new("acme"), snapshot("acme", "s1", dec!(5000)))
            .unwrap();

        let window = ReconciliationWindow::new(at(1), at(2)).unwrap();
        let facts = tracker
            .window_inventory(&TenantContext::new("globex"), "s1", FuelType::Diesel, &window)
            .await
            .unwrap();
        assert_eq!(facts, InventoryWindow::default());
    }
}
