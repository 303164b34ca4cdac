//! Window reconciliation
//!
//! Pure computation shared by the single-threaded and the concurrent
//! engines: given the facts fetched from the three sources, derive the
//! meter, payment and inventory volumes and classify their disagreement.
//!
//! A source with no usable data points makes the window incomplete. A zero
//! is never substituted for a missing source.

use crate::core::anomaly::{AnomalyDetector, Classification};
use crate::core::volume_delta::VolumeDeltaCalculator;
use crate::types::{
    EngineConfig, IncompleteCause, InventoryWindow, PaymentRecord, ReconError, Reading,
    ReconciliationRecord, ReconciliationWindow, SeverityConfig, SourceKind, WindowKey,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Floor of the relative-discrepancy divisor
pub const RELATIVE_EPSILON: Decimal = dec!(0.000001);

/// Decimal places kept on the relative discrepancy
const RELATIVE_SCALE: u32 = 6;

/// Everything fetched for one window
#[derive(Debug, Clone, Default)]
pub struct WindowFacts {
    pub readings: Vec<Reading>,
    pub payments: Vec<PaymentRecord>,
    pub inventory: InventoryWindow,
}

/// Meter side of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeterTally {
    pub volume: Decimal,
    pub pairs: usize,
    pub rollback_count: usize,
    pub suspect_count: usize,
}

/// Computes reconciliation records from window facts
#[derive(Debug, Clone, Default)]
pub struct WindowReconciler {
    detector: AnomalyDetector,
    severity: SeverityConfig,
}

impl WindowReconciler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            detector: AnomalyDetector::new(config.anomaly.clone()),
            severity: config.severity.clone(),
        }
    }

    /// Sum the non-rollback deltas whose later reading lies in `window`
    ///
    /// # Errors
    ///
    /// `IncompleteWindow(meter, no data)` when no pair ends inside the window.
    pub fn meter_tally(
        &self,
        readings: &[Reading],
        window: &ReconciliationWindow,
    ) -> Result<MeterTally, ReconError> {
        let mut tally = MeterTally::default();

        for (previous, current) in VolumeDeltaCalculator::pair_consecutive(readings) {
            if !window.contains(current.recorded_at) {
                continue;
            }
            let delta = VolumeDeltaCalculator::between(previous, current)?;
            tally.pairs += 1;

            if self.detector.classify(&delta, previous.meter_value) == Classification::Suspect {
                tally.suspect_count += 1;
            }

            match delta.dispensed() {
                Some(volume) => {
                    tally.volume = tally
                        .volume
                        .checked_add(volume)
                        .ok_or_else(|| ReconError::arithmetic_overflow("meter volume"))?;
                }
                None => tally.rollback_count += 1,
            }
        }

        if tally.pairs == 0 {
            return Err(ReconError::incomplete(
                SourceKind::Meter,
                IncompleteCause::NoData,
            ));
        }
        Ok(tally)
    }

    /// Sum of `amount / price_per_unit`
    ///
    /// Payments without a positive price are skipped.
    pub fn payment_volume(payments: &[PaymentRecord]) -> Result<Decimal, ReconError> {
        let mut total = Decimal::ZERO;
        let mut usable = 0usize;

        for payment in payments {
            match payment.volume() {
                Some(volume) => {
                    usable += 1;
                    total = total
                        .checked_add(volume)
                        .ok_or_else(|| ReconError::arithmetic_overflow("payment volume"))?;
                }
                None => tracing::warn!(
                    station = %payment.station_id,
                    nozzle = %payment.nozzle_id,
                    price = %payment.price_per_unit,
                    "payment without usable unit price skipped"
                ),
            }
        }

        if usable == 0 {
            return Err(ReconError::incomplete(
                SourceKind::Payment,
                IncompleteCause::NoData,
            ));
        }
        Ok(total)
    }

    /// Opening minus closing level, with refills subtracted out of the
    /// depletion
    pub fn inventory_volume(inventory: &InventoryWindow) -> Result<Decimal, ReconError> {
        let (Some(opening), Some(closing)) = (inventory.opening_level, inventory.closing_level)
        else {
            return Err(ReconError::incomplete(
                SourceKind::Inventory,
                IncompleteCause::NoData,
            ));
        };

        opening
            .checked_sub(closing)
            .and_then(|drop| drop.checked_add(inventory.refilled))
            .ok_or_else(|| ReconError::arithmetic_overflow("inventory volume"))
    }

    /// Build the record for `key` from its facts
    pub fn reconcile(
        &self,
        key: &WindowKey,
        facts: &WindowFacts,
    ) -> Result<ReconciliationRecord, ReconError> {
        let meter = self.meter_tally(&facts.readings, &key.window)?;
        let payment_volume = Self::payment_volume(&facts.payments)?;
        let inventory_volume = Self::inventory_volume(&facts.inventory)?;

        let (discrepancy, relative_discrepancy) =
            discrepancy(meter.volume, payment_volume, inventory_volume)?;
        let severity = self.severity.classify(relative_discrepancy);

        Ok(ReconciliationRecord {
            id: Uuid::new_v4(),
            tenant_id: key.tenant_id.clone(),
            station_id: key.station_id.clone(),
            fuel_type: key.fuel_type,
            window: key.window,
            meter_volume: meter.volume,
            payment_volume,
            inventory_volume,
            discrepancy,
            relative_discrepancy,
            severity,
            rollback_count: meter.rollback_count,
            suspect_count: meter.suspect_count,
            supersedes: None,
            created_at: Utc::now(),
        })
    }
}

/// Absolute and relative disagreement among three volumes
///
/// The absolute figure is `max - min`, which equals the largest pairwise
/// absolute difference. The relative figure divides it by the largest
/// volume, floored at `RELATIVE_EPSILON`.
pub fn discrepancy(
    meter: Decimal,
    payment: Decimal,
    inventory: Decimal,
) -> Result<(Decimal, Decimal), ReconError> {
    let max = meter.max(payment).max(inventory);
    let min = meter.min(payment).min(inventory);

    let absolute = max
        .checked_sub(min)
        .ok_or_else(|| ReconError::arithmetic_overflow("discrepancy"))?;
    let relative = absolute
        .checked_div(max.max(RELATIVE_EPSILON))
        .ok_or_else(|| ReconError::arithmetic_overflow("relative discrepancy"))?
        .round_dp(RELATIVE_SCALE);

    Ok((absolute, relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FuelType, PaymentMethod, Severity};
    use chrono::{DateTime, TimeZone};
    use rstest::rstest;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn reading(nozzle: &str, hour: u32, value: Decimal) -> Reading {
        Reading {
            nozzle_id: nozzle.to_string(),
            tenant_id: "acme".to_string(),
            station_id: "s1".to_string(),
            fuel_type: FuelType::Diesel,
            recorded_at: at(hour),
            meter_value: value,
            previous_meter_value: None,
            meter_reset: false,
            payment_method: PaymentMethod::Cash,
            amount: None,
            price_per_unit: None,
        }
    }

    fn payment(amount: Decimal, price: Decimal) -> PaymentRecord {
        PaymentRecord {
            tenant_id: "acme".to_string(),
            station_id: "s1".to_string(),
            fuel_type: FuelType::Diesel,
            nozzle_id: "n1".to_string(),
            recorded_at: at(3),
            method: PaymentMethod::Card,
            amount,
            price_per_unit: price,
        }
    }

    fn key() -> WindowKey {
        WindowKey {
            tenant_id: "acme".to_string(),
            station_id: "s1".to_string(),
            fuel_type: FuelType::Diesel,
            window: ReconciliationWindow::new(at(2), at(10)).unwrap(),
        }
    }

    fn inventory(opening: Decimal, closing: Decimal, refilled: Decimal) -> InventoryWindow {
        InventoryWindow {
            opening_level: Some(opening),
            closing_level: Some(closing),
            refilled,
        }
    }

    #[rstest]
    #[case::spread(dec!(500), dec!(495), dec!(510), dec!(15), dec!(0.029412))]
    #[case::agree(dec!(100), dec!(100), dec!(100), dec!(0), dec!(0))]
    #[case::idle(dec!(0), dec!(0), dec!(0), dec!(0), dec!(0))]
    #[case::meter_only(dec!(40), dec!(0), dec!(0), dec!(40), dec!(1))]
    fn test_discrepancy(
        #[case] meter: Decimal,
        #[case] payment: Decimal,
        #[case] inventory: Decimal,
        #[case] absolute: Decimal,
        #[case] relative: Decimal,
    ) {
        assert_eq!(
            discrepancy(meter, payment, inventory),
            Ok((absolute, relative))
        );
    }

    #[test]
    fn test_scenario_500_495_510_is_warn() {
        let reconciler = WindowReconciler::default();
        let facts = WindowFacts {
            readings: vec![
                reading("n1", 1, dec!(10000)),
                reading("n1", 4, dec!(10300)),
                reading("n2", 3, dec!(8000)),
                reading("n2", 6, dec!(8200)),
            ],
            payments: vec![payment(dec!(990), dec!(2))],
            inventory: inventory(dec!(6000), dec!(6490), dec!(1000)),
        };

        let record = reconciler.reconcile(&key(), &facts).unwrap();
        assert_eq!(record.meter_volume, dec!(500));
        assert_eq!(record.payment_volume, dec!(495));
        assert_eq!(record.inventory_volume, dec!(510));
        assert_eq!(record.discrepancy, dec!(15));
        assert_eq!(record.severity, Severity::Warn);
    }

    #[test]
    fn test_rollback_excluded_and_counted() {
        let reconciler = WindowReconciler::default();
        let readings = vec![
            reading("n1", 3, dec!(1000)),
            reading("n1", 4, dec!(1100)),
            reading("n1", 5, dec!(50)),
            reading("n1", 6, dec!(65)),
        ];
        let tally = reconciler.meter_tally(&readings, &key().window).unwrap();
        assert_eq!(tally.pairs, 3);
        assert_eq!(tally.rollback_count, 1);
        // the rollback and the 50 -> 65 jump (> 20% of 50) are suspect
        assert_eq!(tally.suspect_count, 2);
        assert_eq!(tally.volume, dec!(115));
    }

    #[test]
    fn test_pair_ending_before_window_is_ignored() {
        let reconciler = WindowReconciler::default();
        let readings = vec![reading("n1", 0, dec!(1000)), reading("n1", 1, dec!(1100))];
        assert_eq!(
            reconciler.meter_tally(&readings, &key().window),
            Err(ReconError::incomplete(SourceKind::Meter, IncompleteCause::NoData))
        );
    }

    #[test]
    fn test_payments_without_price_make_window_incomplete() {
        assert_eq!(
            WindowReconciler::payment_volume(&[payment(dec!(10), dec!(0))]),
            Err(ReconError::incomplete(SourceKind::Payment, IncompleteCause::NoData))
        );
        assert_eq!(
            WindowReconciler::payment_volume(&[]),
            Err(ReconError::incomplete(SourceKind::Payment, IncompleteCause::NoData))
        );
    }

    #[rstest]
    #[case::no_opening(None, Some(dec!(10)))]
    #[case::no_closing(Some(dec!(10)), None)]
    fn test_missing_inventory_level_is_incomplete(
        #[case] opening: Option<Decimal>,
        #[case] closing: Option<Decimal>,
    ) {
        let facts = InventoryWindow {
            opening_level: opening,
            closing_level: closing,
            refilled: Decimal::ZERO,
        };
        assert_eq!(
            WindowReconciler::inventory_volume(&facts),
            Err(ReconError::incomplete(SourceKind::Inventory, IncompleteCause::NoData))
        );
    }

    #[test]
    fn test_reconcile_twice_is_structurally_equal() {
        let reconciler = WindowReconciler::default();
        let facts = WindowFacts {
            readings: vec![reading("n1", 1, dec!(100)), reading("n1", 3, dec!(110))],
            payments: vec![payment(dec!(20), dec!(2))],
            inventory: inventory(dec!(500), dec!(490), dec!(0)),
        };
        let first = reconciler.reconcile(&key(), &facts).unwrap();
        let second = reconciler.reconcile(&key(), &facts).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(first, second);
        assert_eq!(first.severity, Severity::Ok);
    }
}
