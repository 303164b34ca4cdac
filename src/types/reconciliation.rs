//! Reconciliation window and record types

use super::error::{IncompleteCause, ReconError, SourceKind};
use super::reading::{FuelType, StationId, TenantId};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ReconciliationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReconciliationWindow {
    /// Create a window
    ///
    /// # Errors
    ///
    /// Returns `InvalidWindow` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ReconError> {
        if start >= end {
            return Err(ReconError::InvalidWindow {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Whole UTC day starting at midnight of `date`
    pub fn day(date: chrono::NaiveDate) -> Result<Self, ReconError> {
        let start = date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| ReconError::InvalidWindow {
                start: date.to_string(),
                end: date.to_string(),
            })?;
        Self::new(start, start + Duration::days(1))
    }

    /// Cut `[from, to)` into consecutive windows of `step`; the last window
    /// is shortened to end at `to`.
    pub fn tile(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<Self>, ReconError> {
        let whole = Self::new(from, to)?;
        if step <= Duration::zero() {
            return Ok(vec![whole]);
        }

        let mut windows = Vec::new();
        let mut start = from;
        while start < to {
            let end = (start + step).min(to);
            windows.push(Self { start, end });
            start = end;
        }
        Ok(windows)
    }

    /// `start <= at < end`
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    /// Whether this window shares any instant with `other`
    pub fn overlaps(&self, other: &ReconciliationWindow) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for ReconciliationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Classification of a discrepancy's relative magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warn,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ok => write!(f, "ok"),
            Severity::Warn => write!(f, "warn"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Identity of a reconciliation unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub tenant_id: TenantId,
    pub station_id: StationId,
    pub fuel_type: FuelType,
    pub window: ReconciliationWindow,
}

/// Outcome of reconciling one (station, fuel type, window)
///
/// Records are immutable. When source data is corrected, a new record is
/// created whose `supersedes` names the record it replaces.
///
/// Equality is structural over the reconciled facts: the record id, creation
/// time and supersession link are bookkeeping and do not take part in it.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub station_id: StationId,
    pub fuel_type: FuelType,
    pub window: ReconciliationWindow,

    /// Sum of non-rollback meter deltas in the window
    pub meter_volume: Decimal,

    /// Sum of `amount / price_per_unit` over payments in the window
    pub payment_volume: Decimal,

    /// Opening level minus closing level plus refills
    pub inventory_volume: Decimal,

    /// Largest pairwise absolute difference among the three volumes
    pub discrepancy: Decimal,

    /// `discrepancy` relative to the largest volume
    pub relative_discrepancy: Decimal,

    pub severity: Severity,

    /// Meter rollbacks excluded from `meter_volume`
    pub rollback_count: usize,

    /// Deltas classified as suspect (rollbacks included)
    pub suspect_count: usize,

    pub supersedes: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationRecord {
    pub fn key(&self) -> WindowKey {
        WindowKey {
            tenant_id: self.tenant_id.clone(),
            station_id: self.station_id.clone(),
            fuel_type: self.fuel_type,
            window: self.window,
        }
    }
}

impl PartialEq for ReconciliationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.tenant_id == other.tenant_id
            && self.station_id == other.station_id
            && self.fuel_type == other.fuel_type
            && self.window == other.window
            && self.meter_volume == other.meter_volume
            && self.payment_volume == other.payment_volume
            && self.inventory_volume == other.inventory_volume
            && self.discrepancy == other.discrepancy
            && self.relative_discrepancy == other.relative_discrepancy
            && self.severity == other.severity
            && self.rollback_count == other.rollback_count
            && self.suspect_count == other.suspect_count
    }
}

/// Reconciliation result for callers that tolerate partial answers
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Reconciled(ReconciliationRecord),
    /// A source had no data or did not answer in time
    Unknown {
        kind: SourceKind,
        cause: IncompleteCause,
    },
}

impl WindowOutcome {
    /// Map `IncompleteWindow` to `Unknown`; every other error propagates
    pub fn from_result(
        result: Result<ReconciliationRecord, ReconError>,
    ) -> Result<Self, ReconError> {
        match result {
            Ok(record) => Ok(WindowOutcome::Reconciled(record)),
            Err(ReconError::IncompleteWindow { kind, cause }) => {
                Ok(WindowOutcome::Unknown { kind, cause })
            }
            Err(e) => Err(e),
        }
    }

    pub fn record(&self) -> Option<&ReconciliationRecord> {
        match self {
            WindowOutcome::Reconciled(record) => Some(record),
            WindowOutcome::Unknown { .. } => None,
        }
    }
}

/// One independent unit of reconciliation work within a tenant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconciliationUnit {
    pub station_id: StationId,
    pub fuel_type: FuelType,
    pub window: ReconciliationWindow,
}

impl ReconciliationUnit {
    /// Cross every (station, fuel) target with every window
    ///
    /// Units are ordered by window start, station and fuel type, without
    /// duplicates.
    pub fn plan(targets: &[(StationId, FuelType)], windows: &[ReconciliationWindow]) -> Vec<Self> {
        let mut units: Vec<Self> = targets
            .iter()
            .flat_map(|(station, fuel)| {
                windows.iter().map(move |window| Self {
                    station_id: station.clone(),
                    fuel_type: *fuel,
                    window: *window,
                })
            })
            .collect();

        units.sort_by(|a, b| {
            a.window
                .start
                .cmp(&b.window.start)
                .then_with(|| a.station_id.cmp(&b.station_id))
                .then_with(|| a.fuel_type.cmp(&b.fuel_type))
        });
        units.dedup();
        units
    }
}

/// What reconciling one unit produced
#[derive(Debug, Clone)]
pub struct UnitResult {
    pub unit: ReconciliationUnit,
    pub outcome: Result<WindowOutcome, ReconError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_window_requires_start_before_end() {
        assert!(ReconciliationWindow::new(at(8), at(8)).is_err());
        assert!(ReconciliationWindow::new(at(9), at(8)).is_err());
        assert!(ReconciliationWindow::new(at(8), at(9)).is_ok());
    }

    #[test]
    fn test_window_is_half_open() {
        let window = ReconciliationWindow::new(at(8), at(10)).unwrap();
        assert!(window.contains(at(8)));
        assert!(window.contains(at(9)));
        assert!(!window.contains(at(10)));
    }

    #[test]
    fn test_tile_shortens_last_window() {
        let windows = ReconciliationWindow::tile(at(0), at(10), Duration::hours(4)).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], ReconciliationWindow::new(at(0), at(4)).unwrap());
        assert_eq!(windows[2], ReconciliationWindow::new(at(8), at(10)).unwrap());
    }

    #[test]
    fn test_day_window() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let window = ReconciliationWindow::day(date).unwrap();
        assert_eq!(window.start, at(0));
        assert_eq!(window.end, Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_overlaps() {
        let a = ReconciliationWindow::new(at(0), at(4)).unwrap();
        let b = ReconciliationWindow::new(at(4), at(8)).unwrap();
        let c = ReconciliationWindow::new(at(3), at(5)).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Ok < Severity::Warn);
        assert!(Severity::Warn < Severity::Critical);
    }

    #[test]
    fn test_outcome_maps_only_incomplete_window() {
        let unknown = WindowOutcome::from_result(Err(ReconError::incomplete(
            SourceKind::Payment,
            IncompleteCause::NoData,
        )));
        assert_eq!(
            unknown,
            Ok(WindowOutcome::Unknown {
                kind: SourceKind::Payment,
                cause: IncompleteCause::NoData
            })
        );

        let fatal = WindowOutcome::from_result(Err(ReconError::MissingTenantContext));
        assert_eq!(fatal, Err(ReconError::MissingTenantContext));
    }
}
