//! Engine configuration
//!
//! Every threshold the core applies is configurable with a documented
//! default. Configuration is read from an optional JSON file; values that
//! would make the engine misbehave fall back to their defaults with a
//! warning instead of aborting the run.
//!
//! ```json
//! {
//!   "anomaly":   { "jump_threshold_ratio": "0.2" },
//!   "inventory": { "low_level_multiplier": "1.5" },
//!   "severity":  { "ok_max_ratio": "0.02", "warn_max_ratio": "0.10" },
//!   "summary":   { "top_n": 5 },
//!   "sources":   { "fetch_timeout_ms": 3000 }
//! }
//! ```

use super::error::ReconError;
use super::reconciliation::Severity;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Large-jump detection
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// A delta is suspect when it exceeds `previous_value * jump_threshold_ratio`
    pub jump_threshold_ratio: Decimal,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            jump_threshold_ratio: dec!(0.2),
        }
    }
}

/// Inventory status thresholds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// A tank is `low` at or below `minimum_level * low_level_multiplier`
    pub low_level_multiplier: Decimal,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            low_level_multiplier: dec!(1.5),
        }
    }
}

/// Severity cutoffs on the relative discrepancy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    pub ok_max_ratio: Decimal,
    pub warn_max_ratio: Decimal,
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            ok_max_ratio: dec!(0.02),
            warn_max_ratio: dec!(0.10),
        }
    }
}

impl SeverityConfig {
    /// Bucket a relative discrepancy (both cutoffs inclusive)
    pub fn classify(&self, relative: Decimal) -> Severity {
        if relative <= self.ok_max_ratio {
            Severity::Ok
        } else if relative <= self.warn_max_ratio {
            Severity::Warn
        } else {
            Severity::Critical
        }
    }
}

/// Summary aggregation
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Number of records reported as top offenders
    pub top_n: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

/// Source fetch behaviour
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub fetch_timeout_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 3000,
        }
    }
}

impl SourceConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub anomaly: AnomalyConfig,
    pub inventory: InventoryConfig,
    pub severity: SeverityConfig,
    pub summary: SummaryConfig,
    pub sources: SourceConfig,
}

impl EngineConfig {
    /// Load configuration from a JSON file and sanitize it
    ///
    /// # Errors
    ///
    /// - `FileNotFound` if the path does not exist
    /// - `IoError` if the file cannot be read
    /// - `InvalidConfig` if the file is not valid JSON for this shape
    pub fn from_json_file(path: &Path) -> Result<Self, ReconError> {
        if !path.exists() {
            return Err(ReconError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ReconError> {
        let config: EngineConfig = serde_json::from_str(raw)?;
        Ok(config.sanitized())
    }

    /// Replace unusable values with their defaults
    pub fn sanitized(mut self) -> Self {
        let defaults = EngineConfig::default();

        if self.anomaly.jump_threshold_ratio <= Decimal::ZERO {
            tracing::warn!(
                value = %self.anomaly.jump_threshold_ratio,
                default = %defaults.anomaly.jump_threshold_ratio,
                "invalid jump_threshold_ratio, using default"
            );
            self.anomaly = defaults.anomaly;
        }

        if self.inventory.low_level_multiplier < Decimal::ONE {
            tracing::warn!(
                value = %self.inventory.low_level_multiplier,
                default = %defaults.inventory.low_level_multiplier,
                "invalid low_level_multiplier, using default"
            );
            self.inventory = defaults.inventory;
        }

        if self.severity.ok_max_ratio < Decimal::ZERO
            || self.severity.warn_max_ratio < self.severity.ok_max_ratio
        {
            tracing::warn!(
                ok = %self.severity.ok_max_ratio,
                warn = %self.severity.warn_max_ratio,
                "invalid severity cutoffs, using defaults"
            );
            self.severity = defaults.severity;
        }

        if self.summary.top_n == 0 {
            tracing::warn!(
                default = defaults.summary.top_n,
                "invalid top_n (0), using default"
            );
            self.summary = defaults.summary;
        }

        if self.sources.fetch_timeout_ms == 0 {
            tracing::warn!(
                default = defaults.sources.fetch_timeout_ms,
                "invalid fetch_timeout_ms (0), using default"
            );
            self.sources = defaults.sources;
        }

        self
    }
}
