//! Reconciliation record ledger
//!
//! Records are immutable once committed. Re-reconciling a window either
//! returns the record already on file (same outcome) or appends a new record
//! whose `supersedes` names the one it replaces. Nothing is overwritten.
//!
//! The ledger is shared by both engines and the summary service, so it is
//! backed by `DashMap` and used through `&self`.

use crate::types::{ReconError, ReconciliationRecord, TenantContext, TenantId, WindowKey};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct ReconciliationLedger {
    /// Every record ever committed per window, oldest first
    history: DashMap<WindowKey, Vec<ReconciliationRecord>>,

    /// Bumped whenever a tenant gains a new record
    revisions: DashMap<TenantId, u64>,
}

impl ReconciliationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a freshly computed record
    ///
    /// The window's entry stays locked for the whole compare-and-append, so
    /// two concurrent commits for one window cannot both supersede the same
    /// record.
    ///
    /// # Returns
    ///
    /// The record now current for the window: either the existing one (if
    /// structurally equal) or `record` linked to its predecessor.
    pub fn commit(&self, mut record: ReconciliationRecord) -> ReconciliationRecord {
        let key = record.key();
        let tenant = record.tenant_id.clone();

        let committed = {
            let mut entry = self.history.entry(key).or_default();
            let records = entry.value_mut();

            if let Some(current) = records.last() {
                if *current == record {
                    tracing::debug!(
                        tenant = %current.tenant_id,
                        station = %current.station_id,
                        fuel = %current.fuel_type,
                        window = %current.window,
                        "reconciliation unchanged"
                    );
                    return current.clone();
                }
                record.supersedes = Some(current.id);
                tracing::info!(
                    tenant = %record.tenant_id,
                    station = %record.station_id,
                    fuel = %record.fuel_type,
                    window = %record.window,
                    supersedes = %current.id,
                    "reconciliation superseded"
                );
            }

            records.push(record.clone());
            record
        };

        *self.revisions.entry(tenant).or_insert(0) += 1;
        committed
    }

    /// Current record of one window
    pub fn latest(
        &self,
        ctx: &TenantContext,
        key: &WindowKey,
    ) -> Result<Option<ReconciliationRecord>, ReconError> {
        ctx.admit(&key.tenant_id, &key.station_id)?;
        Ok(self
            .history
            .get(key)
            .and_then(|records| records.last().cloned()))
    }

    /// All records of one window, oldest first
    pub fn history(
        &self,
        ctx: &TenantContext,
        key: &WindowKey,
    ) -> Result<Vec<ReconciliationRecord>, ReconError> {
        ctx.admit(&key.tenant_id, &key.station_id)?;
        Ok(self
            .history
            .get(key)
            .map(|records| records.clone())
            .unwrap_or_default())
    }

    /// Current records visible to the context, ordered by window start,
    /// station and fuel type
    pub fn records(&self, ctx: &TenantContext) -> Result<Vec<ReconciliationRecord>, ReconError> {
        let tenant = ctx.tenant()?;
        let mut records: Vec<ReconciliationRecord> = self
            .history
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.tenant_id == tenant
                    && ctx.station().map_or(true, |station| station == key.station_id)
            })
            .filter_map(|entry| entry.value().last().cloned())
            .collect();

        records.sort_by(|a, b| {
            a.window
                .start
                .cmp(&b.window.start)
                .then_with(|| a.station_id.cmp(&b.station_id))
                .then_with(|| a.fuel_type.cmp(&b.fuel_type))
        });
        Ok(records)
    }

    /// Revision counter of a tenant; changes whenever its records change
    pub fn revision(&self, tenant: &str) -> u64 {
        self.revisions.get(tenant).map(|rev| *rev).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FuelType, ReconciliationWindow, Severity};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn record(tenant: &str, meter: Decimal) -> ReconciliationRecord {
        ReconciliationRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            station_id: "s1".to_string(),
            fuel_type: FuelType::Petrol,
            window: ReconciliationWindow::new(
                Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
            )
            .unwrap(),
            meter_volume: meter,
            payment_volume: dec!(100),
            inventory_volume: dec!(100),
            discrepancy: Decimal::ZERO,
            relative_discrepancy: Decimal::ZERO,
            severity: Severity::Ok,
            rollback_count: 0,
            suspect_count: 0,
            supersedes: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_equal_commit_keeps_existing_record() {
        let ledger = ReconciliationLedger::new();
        let first = ledger.commit(record("acme", dec!(100)));
        let again = ledger.commit(record("acme", dec!(100)));

        assert_eq!(again.id, first.id);
        assert_eq!(ledger.revision("acme"), 1);
    }

    #[test]
    fn test_changed_commit_supersedes() {
        let ctx = TenantContext::new("acme");
        let ledger = ReconciliationLedger::new();
        let first = ledger.commit(record("acme", dec!(100)));
        let corrected = ledger.commit(record("acme", dec!(104)));

        assert_eq!(corrected.supersedes, Some(first.id));
        assert_eq!(ledger.revision("acme"), 2);

        let history = ledger.history(&ctx, &first.key()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert_eq!(ledger.latest(&ctx, &first.key()).unwrap(), Some(corrected));
    }

    #[test]
    fn test_records_are_tenant_scoped() {
        let ledger = ReconciliationLedger::new();
        ledger.commit(record("acme", dec!(100)));
        ledger.commit(record("globex", dec!(300)));

        let records = ledger.records(&TenantContext::new("globex")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].meter_volume, dec!(300));

        let key = records[0].key();
        assert_eq!(
            ledger.history(&TenantContext::new("acme"), &key),
            Err(ReconError::tenant_mismatch("acme", "globex"))
        );
        assert_eq!(ledger.revision("initech"), 0);
    }
}
