//! Discrepancy summary types

use super::error::ReconError;
use super::reconciliation::{ReconciliationRecord, ReconciliationWindow};
use super::reading::StationId;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

/// What a summary aggregates over
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase", tag = "scope", content = "id")]
pub enum SummaryScope {
    /// A single station of the context tenant
    Station(StationId),
    /// Every station of the context tenant
    Tenant,
}

/// Inclusive range of calendar days (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, ReconError> {
        if from > to {
            return Err(ReconError::InvalidWindow {
                start: from.to_string(),
                end: to.to_string(),
            });
        }
        Ok(Self { from, to })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            from: date,
            to: date,
        }
    }

    /// The half-open instant range covered by these days
    pub fn as_window(&self) -> Result<ReconciliationWindow, ReconError> {
        let start = ReconciliationWindow::day(self.from)?.start;
        let end = ReconciliationWindow::day(self.to)?.start + Duration::days(1);
        ReconciliationWindow::new(start, end)
    }
}

/// Count of records per severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SeverityCounts {
    pub ok: usize,
    pub warn: usize,
    pub critical: usize,
}

impl SeverityCounts {
    pub fn total(&self) -> usize {
        self.ok + self.warn + self.critical
    }
}

/// Min / median / max of relative discrepancies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub min: Decimal,
    pub median: Decimal,
    pub max: Decimal,
}

/// Aggregate view of reconciliation records for a scope and date range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscrepancySummary {
    pub tenant_id: String,
    pub scope: SummaryScope,
    pub range: DateRange,
    pub counts: SeverityCounts,

    /// `None` when no record falls in the range
    pub relative_distribution: Option<Distribution>,

    /// Most significant records, largest relative discrepancy first
    pub top: Vec<ReconciliationRecord>,
}
