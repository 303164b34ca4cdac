//! Tank inventory tracking
//!
//! This module provides the `InventoryTracker`, which owns one tank per
//! (tenant, station, fuel type) and applies dispensed, refill and stock
//! count events to it.
//!
//! The InventoryTracker is responsible for:
//! - Registering tank snapshots
//! - Applying mutations exactly once per caller-supplied event id
//! - Rejecting mutations that would break `0 <= volume <= capacity`
//! - Recomputing the tank status after every mutation
//! - Keeping a timestamped level history for reconciliation windows

use crate::core::traits::InventorySource;
use crate::types::{
    FuelInventory, FuelType, InventoryConfig, InventoryOverview, InventoryStatus, InventoryWindow,
    LevelEntry, ReconError, ReconciliationWindow, StationId, TankEvent, TankEventKind,
    TenantContext, TenantId,
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

/// Key of one live tank
pub type TankKey = (TenantId, StationId, FuelType);

/// A tank and its history
///
/// Shared by the single-threaded and the concurrent trackers; callers are
/// responsible for serializing access to one tank.
#[derive(Debug, Clone)]
pub(crate) struct Tank {
    pub(crate) inventory: FuelInventory,
    history: Vec<LevelEntry>,
    /// Event ids applied since the latest stock count, with their instants
    applied: HashMap<String, DateTime<Utc>>,
}

impl Tank {
    /// Validate a snapshot and open a tank from it
    pub(crate) fn open(
        mut snapshot: FuelInventory,
        config: &InventoryConfig,
    ) -> Result<Self, ReconError> {
        if snapshot.capacity <= Decimal::ZERO {
            return Err(ReconError::invalid_volume(snapshot.capacity, "capacity"));
        }
        if snapshot.minimum_level < Decimal::ZERO {
            return Err(ReconError::invalid_volume(
                snapshot.minimum_level,
                "minimum level",
            ));
        }
        if snapshot.current_volume < Decimal::ZERO {
            return Err(ReconError::invalid_volume(
                snapshot.current_volume,
                "current volume",
            ));
        }
        if snapshot.current_volume > snapshot.capacity {
            return Err(ReconError::capacity_exceeded(
                &snapshot.station_id,
                snapshot.fuel_type,
                snapshot.capacity,
                snapshot.current_volume,
            ));
        }

        snapshot.status = InventoryStatus::classify(
            snapshot.current_volume,
            snapshot.minimum_level,
            config.low_level_multiplier,
        );

        let history = vec![LevelEntry {
            at: snapshot.last_updated,
            kind: None,
            volume: snapshot.current_volume,
            level_after: snapshot.current_volume,
        }];

        Ok(Self {
            inventory: snapshot,
            history,
            applied: HashMap::new(),
        })
    }

    /// Apply one event; a replayed event id leaves the tank unchanged
    ///
    /// Events usually arrive in time order and are appended. A dispensed or
    /// refill event older than the latest entry is inserted at its instant
    /// and the levels after it are shifted, as long as every level in the
    /// history stays within `0..=capacity`. Snapshots and stock counts fix
    /// the level, so nothing may be inserted before one; such events are
    /// `StaleTankEvent`. Ids of events before the latest stock count are
    /// forgotten, and a replay of one is reported stale as well.
    pub(crate) fn apply(
        &mut self,
        event: &TankEvent,
        config: &InventoryConfig,
    ) -> Result<FuelInventory, ReconError> {
        if self.applied.contains_key(&event.event_id) {
            tracing::debug!(
                event_id = %event.event_id,
                station = %event.station_id,
                fuel = %event.fuel_type,
                "tank event already applied"
            );
            return Ok(self.inventory.clone());
        }

        let position = self
            .history
            .partition_point(|entry| entry.at <= event.recorded_at);
        if position < self.history.len() {
            return self.insert_late(event, position, config);
        }

        let inventory = &self.inventory;
        let level_after = match event.kind {
            TankEventKind::Dispensed => {
                if event.volume < Decimal::ZERO {
                    return Err(ReconError::invalid_volume(event.volume, "dispensed"));
                }
                if event.volume > inventory.current_volume {
                    return Err(ReconError::insufficient_inventory(
                        &inventory.station_id,
                        inventory.fuel_type,
                        inventory.current_volume,
                        event.volume,
                    ));
                }
                inventory
                    .current_volume
                    .checked_sub(event.volume)
                    .ok_or_else(|| ReconError::arithmetic_overflow("dispensed"))?
            }
            TankEventKind::Refill => {
                if event.volume <= Decimal::ZERO {
                    return Err(ReconError::invalid_volume(event.volume, "refill"));
                }
                let resulting = inventory
                    .current_volume
                    .checked_add(event.volume)
                    .ok_or_else(|| ReconError::arithmetic_overflow("refill"))?;
                if resulting > inventory.capacity {
                    return Err(ReconError::capacity_exceeded(
                        &inventory.station_id,
                        inventory.fuel_type,
                        inventory.capacity,
                        resulting,
                    ));
                }
                resulting
            }
            TankEventKind::StockCount => {
                if event.volume < Decimal::ZERO {
                    return Err(ReconError::invalid_volume(event.volume, "stock count"));
                }
                if event.volume > inventory.capacity {
                    return Err(ReconError::capacity_exceeded(
                        &inventory.station_id,
                        inventory.fuel_type,
                        inventory.capacity,
                        event.volume,
                    ));
                }
                event.volume
            }
        };

        self.history.push(LevelEntry {
            at: event.recorded_at,
            kind: Some(event.kind),
            volume: event.volume,
            level_after,
        });
        self.inventory.last_updated = event.recorded_at;
        if event.kind == TankEventKind::StockCount {
            let counted_at = event.recorded_at;
            self.applied.retain(|_, at| *at >= counted_at);
        }
        self.settle(event, level_after, config)
    }

    /// Insert a dispensed or refill event before later history entries
    fn insert_late(
        &mut self,
        event: &TankEvent,
        position: usize,
        config: &InventoryConfig,
    ) -> Result<FuelInventory, ReconError> {
        let measured = self.history[position..]
            .iter()
            .find(|entry| matches!(entry.kind, None | Some(TankEventKind::StockCount)));
        if let Some(entry) = measured {
            return Err(self.stale(event, entry.at));
        }

        let change = match event.kind {
            TankEventKind::Dispensed if event.volume >= Decimal::ZERO => -event.volume,
            TankEventKind::Dispensed => {
                return Err(ReconError::invalid_volume(event.volume, "dispensed"))
            }
            TankEventKind::Refill if event.volume > Decimal::ZERO => event.volume,
            TankEventKind::Refill => return Err(ReconError::invalid_volume(event.volume, "refill")),
            TankEventKind::StockCount => {
                return Err(self.stale(event, self.inventory.last_updated))
            }
        };

        let opening = match position.checked_sub(1).and_then(|i| self.history.get(i)) {
            Some(entry) => entry.level_after,
            None => return Err(self.stale(event, self.inventory.last_updated)),
        };

        // the inserted level followed by every later level, shifted
        let mut levels = Vec::with_capacity(self.history.len() - position + 1);
        for before in std::iter::once(opening)
            .chain(self.history[position..].iter().map(|entry| entry.level_after))
        {
            let shifted = before
                .checked_add(change)
                .ok_or_else(|| ReconError::arithmetic_overflow("late tank event"))?;
            if shifted < Decimal::ZERO {
                return Err(ReconError::insufficient_inventory(
                    &self.inventory.station_id,
                    self.inventory.fuel_type,
                    before,
                    event.volume,
                ));
            }
            if shifted > self.inventory.capacity {
                return Err(ReconError::capacity_exceeded(
                    &self.inventory.station_id,
                    self.inventory.fuel_type,
                    self.inventory.capacity,
                    shifted,
                ));
            }
            levels.push(shifted);
        }

        for (entry, level) in self.history[position..].iter_mut().zip(&levels[1..]) {
            entry.level_after = *level;
        }
        self.history.insert(
            position,
            LevelEntry {
                at: event.recorded_at,
                kind: Some(event.kind),
                volume: event.volume,
                level_after: levels[0],
            },
        );

        tracing::debug!(
            event_id = %event.event_id,
            station = %event.station_id,
            fuel = %event.fuel_type,
            at = %event.recorded_at,
            shifted = levels.len() - 1,
            "late tank event inserted"
        );

        let current = levels[levels.len() - 1];
        self.settle(event, current, config)
    }

    /// Record the event as applied and reclassify the tank at `level`
    fn settle(
        &mut self,
        event: &TankEvent,
        level: Decimal,
        config: &InventoryConfig,
    ) -> Result<FuelInventory, ReconError> {
        let previous_status = self.inventory.status;
        self.inventory.current_volume = level;
        self.inventory.status =
            InventoryStatus::classify(level, self.inventory.minimum_level, config.low_level_multiplier);
        self.applied
            .insert(event.event_id.clone(), event.recorded_at);

        if self.inventory.status != previous_status {
            tracing::info!(
                tenant = %self.inventory.tenant_id,
                station = %self.inventory.station_id,
                fuel = %self.inventory.fuel_type,
                from = %previous_status,
                to = %self.inventory.status,
                level = %level,
                "inventory status changed"
            );
        }

        Ok(self.inventory.clone())
    }

    fn stale(&self, event: &TankEvent, measured_at: DateTime<Utc>) -> ReconError {
        ReconError::stale_tank_event(
            &event.event_id,
            &event.station_id,
            event.fuel_type,
            event.recorded_at.to_rfc3339(),
            measured_at.to_rfc3339(),
        )
    }

    #[cfg(test)]
    pub(crate) fn remembered_events(&self) -> usize {
        self.applied.len()
    }

    /// Level at instant `at`
    ///
    /// Includes every entry strictly before `at`, plus measurements
    /// (snapshots and stock counts) taken exactly at `at`.
    pub(crate) fn level_at(&self, at: DateTime<Utc>) -> Option<Decimal> {
        self.history
            .iter()
            .filter(|entry| {
                entry.at < at
                    || (entry.at == at
                        && matches!(entry.kind, None | Some(TankEventKind::StockCount)))
            })
            .last()
            .map(|entry| entry.level_after)
    }

    /// Sum of refills with `start <= at < end`
    pub(crate) fn refills_between(
        &self,
        window: &ReconciliationWindow,
    ) -> Result<Decimal, ReconError> {
        self.history
            .iter()
            .filter(|entry| entry.kind == Some(TankEventKind::Refill) && window.contains(entry.at))
            .try_fold(Decimal::ZERO, |total, entry| {
                total
                    .checked_add(entry.volume)
                    .ok_or_else(|| ReconError::arithmetic_overflow("refill total"))
            })
    }

    pub(crate) fn window(&self, window: &ReconciliationWindow) -> Result<InventoryWindow, ReconError> {
        Ok(InventoryWindow {
            opening_level: self.level_at(window.start),
            closing_level: self.level_at(window.end),
            refilled: self.refills_between(window)?,
        })
    }
}

/// Build the overview figures from a set of tanks
pub(crate) fn overview<'a>(
    tanks: impl Iterator<Item = &'a FuelInventory>,
) -> Result<InventoryOverview, ReconError> {
    let mut total_tanks = 0;
    let mut low_stock_count = 0;
    let mut total_capacity = Decimal::ZERO;
    let mut total_current_stock = Decimal::ZERO;

    for tank in tanks {
        total_tanks += 1;
        if matches!(tank.status, InventoryStatus::Low | InventoryStatus::Critical) {
            low_stock_count += 1;
        }
        total_capacity = total_capacity
            .checked_add(tank.capacity)
            .ok_or_else(|| ReconError::arithmetic_overflow("capacity total"))?;
        total_current_stock = total_current_stock
            .checked_add(tank.current_volume)
            .ok_or_else(|| ReconError::arithmetic_overflow("stock total"))?;
    }

    let average_fill_percentage = if total_capacity > Decimal::ZERO {
        (total_current_stock * Decimal::ONE_HUNDRED / total_capacity)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
    } else {
        Decimal::ZERO
    };

    Ok(InventoryOverview {
        total_tanks,
        low_stock_count,
        total_capacity,
        total_current_stock,
        average_fill_percentage,
    })
}

/// Single-threaded inventory tracker
///
/// Mutations take `&mut self`, which serializes them per tracker. The
/// concurrent counterpart is `AsyncInventoryTracker`.
#[derive(Debug, Default)]
pub struct InventoryTracker {
    config: InventoryConfig,
    tanks: HashMap<TankKey, Tank>,
}

impl InventoryTracker {
    pub fn new(config: InventoryConfig) -> Self {
        Self {
            config,
            tanks: HashMap::new(),
        }
    }

    /// Register (or re-register) a tank snapshot
    ///
    /// # Errors
    ///
    /// - scope errors if the snapshot belongs to another tenant or station
    /// - `InvalidVolume` / `CapacityExceeded` if the snapshot breaks the
    ///   volume invariant
    pub fn register(
        &mut self,
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

    /// Current inventory of one tank
    pub fn current_level(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
    ) -> Result<FuelInventory, ReconError> {
        self.tank(ctx, station, fuel).map(|tank| tank.inventory.clone())
    }

    /// Tank level at instant `at`, `None` before the first snapshot
    pub fn level_at(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        at: DateTime<Utc>,
    ) -> Result<Option<Decimal>, ReconError> {
        Ok(self.tank(ctx, station, fuel)?.level_at(at))
    }

    /// Volume delivered to the tank within `window`
    pub fn refills_between(
        &self,
        ctx: &TenantContext,
        station: &str,
        fuel: FuelType,
        window: &ReconciliationWindow,
    ) -> Result<Decimal, ReconError> {
        self.tank(ctx, station, fuel)?.refills_between(window)
    }

    fn tank(&self, ctx: &TenantContext, station: &str, fuel: FuelType) -> Result<&Tank, ReconError> {
        let tenant = ctx.scope_station(station)?;
        self.tanks
            .get(&(tenant.to_string(), station.to_string(), fuel))
            .ok_or_else(|| ReconError::inventory_not_found(station, fuel))
    }

    /// Apply any tank event
    pub fn apply_event(
        &mut self,
        ctx: &TenantContext,
        event: &TankEvent,
    ) -> Result<FuelInventory, ReconError> {
        ctx.admit(&event.tenant_id, &event.station_id)?;
        let config = &self.config;
        let tank = self
            .tanks
            .get_mut(&(
                event.tenant_id.clone(),
                event.station_id.clone(),
                event.fuel_type,
            ))
            .ok_or_else(|| ReconError::inventory_not_found(&event.station_id, event.fuel_type))?;
        tank.apply(event, config)
    }

    /// Decrease the tank by a confirmed dispensed volume
    ///
    /// # Errors
    ///
    /// Returns `InsufficientInventory` if the volume exceeds the current
    /// level; the tank is left unchanged.
    pub fn apply_dispensed(
        &mut self,
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

    /// Increase the tank by a delivered volume
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` if the refill would overflow the tank.
    pub fn apply_refill(
        &mut self,
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

    /// Set the tank to a physically measured level
    pub fn apply_stock_count(
        &mut self,
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

    /// All tanks of a station, ordered by fuel type
    pub fn inventory_status(
        &self,
        ctx: &TenantContext,
        station: &str,
    ) -> Result<Vec<FuelInventory>, ReconError> {
        let tenant = ctx.scope_station(station)?;
        let mut tanks: Vec<FuelInventory> = self
            .tanks
            .iter()
            .filter(|((t, s, _), _)| t == tenant && s == station)
            .map(|(_, tank)| tank.inventory.clone())
            .collect();
        tanks.sort_by_key(|tank| tank.fuel_type);
        Ok(tanks)
    }

    /// Fleet figures over every tank visible to the context
    pub fn overview(&self, ctx: &TenantContext) -> Result<InventoryOverview, ReconError> {
        let tenant = ctx.tenant()?;
        overview(
            self.tanks
                .iter()
                .filter(|((t, s, _), _)| t == tenant && ctx.station().map_or(true, |scoped| scoped == s))
                .map(|(_, tank)| &tank.inventory),
        )
    }
}

impl InventorySource for InventoryTracker {
    fn window_inventory(
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

/// Build a tank event owned by the context tenant
pub(crate) fn scoped_event(
    ctx: &TenantContext,
    station: &str,
    fuel: FuelType,
    event_id: &str,
    kind: TankEventKind,
    volume: Decimal,
    at: DateTime<Utc>,
) -> Result<TankEvent, ReconError> {
    let tenant = ctx.scope_station(station)?;
    Ok(TankEvent {
        event_id: event_id.to_string(),
        tenant_id: tenant.to_string(),
        station_id: station.to_string(),
        fuel_type: fuel,
        kind,
        volume,
        recorded_at: at,
    })
}
