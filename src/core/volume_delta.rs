//! Dispensed volume from consecutive meter readings
//!
//! The calculator never clamps: a reading lower than its predecessor is
//! returned as a `MeterRollback` carrying the raw negative delta so the
//! caller decides policy. Only structural problems (ordering, mismatched
//! pairs) are errors.

use crate::types::{ReconError, Reading};
use rust_decimal::Decimal;

/// Result of comparing two consecutive readings of one nozzle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeDelta {
    /// `current - previous`, non-negative
    Dispensed(Decimal),

    /// The current reading carries the meter-reset flag; everything on the
    /// meter since the reset was dispensed
    MeterReset { dispensed: Decimal },

    /// The meter went backwards without a reset flag
    MeterRollback { raw_delta: Decimal },
}

impl VolumeDelta {
    /// Volume that counts as dispensed; `None` for rollbacks
    pub fn dispensed(&self) -> Option<Decimal> {
        match self {
            VolumeDelta::Dispensed(volume) => Some(*volume),
            VolumeDelta::MeterReset { dispensed } => Some(*dispensed),
            VolumeDelta::MeterRollback { .. } => None,
        }
    }

    pub fn is_rollback(&self) -> bool {
        matches!(self, VolumeDelta::MeterRollback { .. })
    }

    /// The signed difference reported to alert consumers
    pub fn raw(&self) -> Decimal {
        match self {
            VolumeDelta::Dispensed(volume) => *volume,
            VolumeDelta::MeterReset { dispensed } => *dispensed,
            VolumeDelta::MeterRollback { raw_delta } => *raw_delta,
        }
    }
}

/// Converts pairs of meter readings into dispensed volumes
pub struct VolumeDeltaCalculator;

impl VolumeDeltaCalculator {
    /// Compute the delta between `previous` and `current`
    ///
    /// # Errors
    ///
    /// - `ReadingMismatch` if the readings belong to different nozzles or tenants
    /// - `OutOfOrderReading` unless `current.recorded_at > previous.recorded_at`
    /// - `ArithmeticOverflow` if the subtraction overflows
    pub fn between(previous: &Reading, current: &Reading) -> Result<VolumeDelta, ReconError> {
        if previous.nozzle_id != current.nozzle_id {
            return Err(ReconError::reading_mismatch(
                "nozzle",
                &previous.nozzle_id,
                &current.nozzle_id,
            ));
        }
        if previous.tenant_id != current.tenant_id {
            return Err(ReconError::reading_mismatch(
                "tenant",
                &previous.tenant_id,
                &current.tenant_id,
            ));
        }
        if current.recorded_at <= previous.recorded_at {
            return Err(ReconError::out_of_order(
                &current.nozzle_id,
                previous.recorded_at.to_rfc3339(),
                current.recorded_at.to_rfc3339(),
            ));
        }

        if current.meter_reset {
            return Ok(VolumeDelta::MeterReset {
                dispensed: current.meter_value,
            });
        }

        let delta = current
            .meter_value
            .checked_sub(previous.meter_value)
            .ok_or_else(|| ReconError::arithmetic_overflow("meter delta"))?;

        if delta < Decimal::ZERO {
            Ok(VolumeDelta::MeterRollback { raw_delta: delta })
        } else {
            Ok(VolumeDelta::Dispensed(delta))
        }
    }

    /// Difference between the previous value the device reported with
    /// `current` and the stored `previous` reading
    ///
    /// A non-zero gap means readings were taken between the two that never
    /// reached the store. `None` when the device reported nothing or the
    /// values agree.
    pub fn reported_gap(previous: &Reading, current: &Reading) -> Option<Decimal> {
        let reported = current.previous_meter_value?;
        let gap = reported.checked_sub(previous.meter_value)?;
        (!gap.is_zero()).then_some(gap)
    }

    /// Pair consecutive readings of each nozzle
    ///
    /// Readings are re-sorted by (nozzle, timestamp) before pairing, so the
    /// store does not have to guarantee ordering. Pairs never cross nozzles.
    pub fn pair_consecutive(readings: &[Reading]) -> Vec<(&Reading, &Reading)> {
        let mut sorted: Vec<&Reading> = readings.iter().collect();
        sorted.sort_by(|a, b| {
            a.nozzle_id
                .cmp(&b.nozzle_id)
                .then(a.recorded_at.cmp(&b.recorded_at))
        });

        sorted
            .windows(2)
            .filter(|pair| pair[0].nozzle_id == pair[1].nozzle_id)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    }
}
