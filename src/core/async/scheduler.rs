//! Parallel reconciliation of independent windows
//!
//! A reconciliation unit is one (station, fuel type, window). Units share no
//! mutable state beyond the ledger, so the `WindowScheduler` runs each on its
//! own tokio task and bounds how many are in flight at once.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::AsyncReconciliationEngine;
use crate::types::{ReconciliationUnit, TenantContext, UnitResult};

#[derive(Clone)]
pub struct WindowScheduler {
    engine: AsyncReconciliationEngine,
    permits: Arc<Semaphore>,
}

impl WindowScheduler {
    /// `max_concurrent` of zero is treated as one
    pub fn new(engine: AsyncReconciliationEngine, max_concurrent: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Run every unit; results come back in the order of `units`
    pub async fn run(&self, ctx: &TenantContext, units: Vec<ReconciliationUnit>) -> Vec<UnitResult> {
        let mut tasks = Vec::with_capacity(units.len());

        for unit in units {
            let engine = self.engine.clone();
            let permits = Arc::clone(&self.permits);
            let ctx = ctx.clone();
            let task_unit = unit.clone();

            let handle = tokio::spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                engine
                    .reconcile_or_unknown(
                        &ctx,
                        &task_unit.station_id,
                        task_unit.fuel_type,
                        task_unit.window,
                    )
                    .await
            });
            tasks.push((unit, handle));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (unit, handle) in tasks {
            match handle.await {
                Ok(outcome) => results.push(UnitResult { unit, outcome }),
                Err(e) => tracing::error!(
                    station = %unit.station_id,
                    fuel = %unit.fuel_type,
                    window = %unit.window,
                    error = %e,
                    "reconciliation task failed"
                ),
            }
        }

        results
    }
}
