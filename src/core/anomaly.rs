//! Large-jump detection on meter deltas
//!
//! A delta is suspect when it exceeds a configurable fraction of the
//! previous cumulative meter value. Rollbacks are always suspect. The
//! detector only classifies; emitting alerts is the caller's business.

use crate::core::volume_delta::VolumeDelta;
use crate::types::AnomalyConfig;
use rust_decimal::Decimal;
use serde::Serialize;

/// Outcome of anomaly classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Normal,
    Suspect,
}

/// Classifies meter deltas as normal or suspect
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    /// Classify `delta` against the previous reading's cumulative value
    ///
    /// Suspect iff `delta > previous_value * jump_threshold_ratio`; a delta
    /// exactly at the threshold is normal.
    pub fn classify(&self, delta: &VolumeDelta, previous_value: Decimal) -> Classification {
        let dispensed = match delta.dispensed() {
            Some(volume) => volume,
            None => return Classification::Suspect,
        };

        match previous_value.checked_mul(self.config.jump_threshold_ratio) {
            Some(threshold) if dispensed > threshold => Classification::Suspect,
            Some(_) => Classification::Normal,
            // A threshold that overflows cannot be exceeded
            None => Classification::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case::large_jump(dec!(1000), dec!(250), Classification::Suspect)]
    #[case::at_threshold(dec!(1000), dec!(200), Classification::Normal)]
    #[case::just_above_threshold(dec!(1000), dec!(200.001), Classification::Suspect)]
    #[case::small(dec!(1000), dec!(15), Classification::Normal)]
    #[case::zero_delta(dec!(1000), dec!(0), Classification::Normal)]
    #[case::first_movement_from_zero(dec!(0), dec!(5), Classification::Suspect)]
    fn test_jump_rule(
        #[case] previous: Decimal,
        #[case] delta: Decimal,
        #[case] expected: Classification,
    ) {
        let detector = AnomalyDetector::default();
        assert_eq!(
            detector.classify(&VolumeDelta::Dispensed(delta), previous),
            expected
        );
    }

    #[rstest]
    #[case::tiny(dec!(-0.001))]
    #[case::huge(dec!(-99999))]
    fn test_rollback_is_always_suspect(#[case] raw_delta: Decimal) {
        let detector = AnomalyDetector::default();
        assert_eq!(
            detector.classify(&VolumeDelta::MeterRollback { raw_delta }, dec!(1000)),
            Classification::Suspect
        );
    }

    #[test]
    fn test_threshold_is_configurable() {
        let relaxed = AnomalyDetector::new(AnomalyConfig {
            jump_threshold_ratio: dec!(0.3),
        });
        assert_eq!(
            relaxed.classify(&VolumeDelta::Dispensed(dec!(250)), dec!(1000)),
            Classification::Normal
        );
    }

    #[test]
    fn test_reset_uses_volume_since_reset() {
        let detector = AnomalyDetector::default();
        let delta = VolumeDelta::MeterReset {
            dispensed: dec!(35),
        };
        assert_eq!(detector.classify(&delta, dec!(1000)), Classification::Normal);
    }
}
