//! Discrepancy summaries
//!
//! This module provides the `DiscrepancySummaryService`, a pure aggregator
//! over records already in the `ReconciliationLedger`. It never reconciles
//! anything itself.
//!
//! # Caching
//!
//! Summaries are cached per (context, scope, date range). Each entry keeps
//! the tenant's ledger revision it was computed at and is recomputed once
//! the ledger has moved on. The context (and so the tenant id) is part of
//! the key, so one tenant can never be served another tenant's summary.
//!
//! Recomputing a summary evicts the tenant's entries left at older
//! revisions. The cache holds at most `CACHE_CAPACITY` entries and is
//! cleared when a new entry would exceed that.

use crate::core::ledger::ReconciliationLedger;
use crate::types::{
    DateRange, DiscrepancySummary, Distribution, ReconError, ReconciliationRecord, Severity,
    SeverityCounts, SummaryConfig, SummaryScope, TenantContext,
};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;

type CacheKey = (TenantContext, SummaryScope, DateRange);

const CACHE_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct DiscrepancySummaryService {
    ledger: Arc<ReconciliationLedger>,
    config: SummaryConfig,
    cache: DashMap<CacheKey, (u64, DiscrepancySummary)>,
}

impl DiscrepancySummaryService {
    pub fn new(ledger: Arc<ReconciliationLedger>, config: SummaryConfig) -> Self {
        Self {
            ledger,
            config,
            cache: DashMap::new(),
        }
    }

    /// Summarize the records of `scope` whose window overlaps `range`
    ///
    /// # Errors
    ///
    /// Scope errors if the context is missing or `scope` names a station
    /// outside the context.
    pub fn summarize(
        &self,
        ctx: &TenantContext,
        scope: SummaryScope,
        range: DateRange,
    ) -> Result<DiscrepancySummary, ReconError> {
        let tenant = match &scope {
            SummaryScope::Station(station) => ctx.scope_station(station)?,
            SummaryScope::Tenant => ctx.tenant()?,
        };
        let revision = self.ledger.revision(tenant);
        let key = (ctx.clone(), scope.clone(), range);

        if let Some(cached) = self.cache.get(&key) {
            let (cached_revision, summary) = cached.value();
            if *cached_revision == revision {
                tracing::debug!(tenant = %tenant, revision, "summary served from cache");
                return Ok(summary.clone());
            }
        }

        let span = range.as_window()?;
        let records: Vec<ReconciliationRecord> = self
            .ledger
            .records(ctx)?
            .into_iter()
            .filter(|record| match &scope {
                SummaryScope::Station(station) => &record.station_id == station,
                SummaryScope::Tenant => true,
            })
            .filter(|record| record.window.overlaps(&span))
            .collect();

        let summary = aggregate(tenant, scope, range, records, self.config.top_n);
        self.store(tenant, revision, key, summary.clone());
        Ok(summary)
    }

    fn store(&self, tenant: &str, revision: u64, key: CacheKey, summary: DiscrepancySummary) {
        self.cache.retain(|(cached_ctx, _, _), (cached_revision, _)| {
            *cached_revision == revision || cached_ctx.tenant().map_or(true, |t| t != tenant)
        });
        if self.cache.len() >= CACHE_CAPACITY {
            tracing::debug!(entries = self.cache.len(), "summary cache full, clearing");
            self.cache.clear();
        }
        self.cache.insert(key, (revision, summary));
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.len()
    }
}

/// Build a summary from the records already selected for it
pub fn aggregate(
    tenant: &str,
    scope: SummaryScope,
    range: DateRange,
    mut records: Vec<ReconciliationRecord>,
    top_n: usize,
) -> DiscrepancySummary {
    let mut counts = SeverityCounts::default();
    for record in &records {
        match record.severity {
            Severity::Ok => counts.ok += 1,
            Severity::Warn => counts.warn += 1,
            Severity::Critical => counts.critical += 1,
        }
    }

    let mut relatives: Vec<Decimal> = records.iter().map(|r| r.relative_discrepancy).collect();
    relatives.sort();
    let relative_distribution = distribution(&relatives);

    // Largest relative discrepancy first; ties go to the most recent window
    records.sort_by(|a, b| {
        b.relative_discrepancy
            .cmp(&a.relative_discrepancy)
            .then_with(|| b.window.end.cmp(&a.window.end))
    });
    records.truncate(top_n);

    DiscrepancySummary {
        tenant_id: tenant.to_string(),
        scope,
        range,
        counts,
        relative_distribution,
        top: records,
    }
}

fn distribution(sorted: &[Decimal]) -> Option<Distribution> {
    let (min, max) = (*sorted.first()?, *sorted.last()?);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / Decimal::TWO
    } else {
        sorted[mid]
    };
    Some(Distribution { min, median, max })
}
