//! Usage percentage to risk band classification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};

/// Default caution threshold (60%).
pub const DEFAULT_CAUTION_THRESHOLD: f64 = 60.0;

/// Default warning threshold (80%).
pub const DEFAULT_WARNING_THRESHOLD: f64 = 80.0;

/// Default critical threshold (95%).
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 95.0;

/// Ordered risk band. Comparison follows escalation order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Normal,
    Caution,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Caution => "caution",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds (inclusive, in percent) of the caution, warning and critical bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub caution: f64,
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub fn new(caution: f64, warning: f64, critical: f64) -> ConfigResult<Self> {
        let thresholds = Self {
            caution,
            warning,
            critical,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let values = [self.caution, self.warning, self.critical];
        if values.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "thresholds".into(),
                message: format!(
                    "thresholds must be finite and positive, got {}/{}/{}",
                    self.caution, self.warning, self.critical
                ),
            });
        }
        if !(self.caution < self.warning && self.warning < self.critical) {
            return Err(ConfigError::InvalidValue {
                key: "thresholds".into(),
                message: format!(
                    "thresholds must be strictly ascending, got {}/{}/{}",
                    self.caution, self.warning, self.critical
                ),
            });
        }
        Ok(())
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            caution: DEFAULT_CAUTION_THRESHOLD,
            warning: DEFAULT_WARNING_THRESHOLD,
            critical: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeverityClassifier {
    thresholds: Thresholds,
}

impl SeverityClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Total over every input: negative and NaN percentages classify as `Normal`.
    pub fn classify(&self, percentage: f64) -> Severity {
        if percentage >= self.thresholds.critical {
            Severity::Critical
        } else if percentage >= self.thresholds.warning {
            Severity::Warning
        } else if percentage >= self.thresholds.caution {
            Severity::Caution
        } else {
            Severity::Normal
        }
    }
}
