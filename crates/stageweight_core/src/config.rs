//! Engine configuration.
//!
//! # Invariants
//! - `root_total` is finite and positive.
//! - Both tolerances are finite and positive; `save_tolerance` gates the save
//!   action and is never tighter than `tolerance`.

use crate::model::node::{DEFAULT_ROOT_TOTAL, SAVE_TOLERANCE, WEIGHT_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Tunables shared by editor and scope services.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed total for top-level sibling groups.
    pub root_total: f64,
    /// Sum invariant tolerance.
    pub tolerance: f64,
    /// Tolerance used by `is_weight_valid`.
    pub save_tolerance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_total: DEFAULT_ROOT_TOTAL,
            tolerance: WEIGHT_TOLERANCE,
            save_tolerance: SAVE_TOLERANCE,
        }
    }
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidRootTotal(f64),
    InvalidTolerance(f64),
    SaveToleranceTooTight { tolerance: f64, save_tolerance: f64 },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRootTotal(value) => {
                write!(f, "root_total must be finite and > 0, got {value}")
            }
            Self::InvalidTolerance(value) => {
                write!(f, "tolerance must be finite and > 0, got {value}")
            }
            Self::SaveToleranceTooTight {
                tolerance,
                save_tolerance,
            } => write!(
                f,
                "save_tolerance {save_tolerance} must not be below tolerance {tolerance}"
            ),
        }
    }
}

impl Error for ConfigError {}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root_total.is_finite() || self.root_total <= 0.0 {
            return Err(ConfigError::InvalidRootTotal(self.root_total));
        }
        for value in [self.tolerance, self.save_tolerance] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidTolerance(value));
            }
        }
        if self.save_tolerance < self.tolerance {
            return Err(ConfigError::SaveToleranceTooTight {
                tolerance: self.tolerance,
                save_tolerance: self.save_tolerance,
            });
        }
        Ok(())
    }

    /// Save gate against this configuration's root total and tolerance.
    pub fn is_weight_valid(&self, root_sum: f64) -> bool {
        (root_sum - self.root_total).abs() < self.save_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.root_total, 100.0);
        assert!(config.validate().is_ok());
        assert!(config.is_weight_valid(99.95));
        assert!(!config.is_weight_valid(99.8));
    }

    #[test]
    fn rejects_non_positive_total_and_tight_save_tolerance() {
        let config = EngineConfig {
            root_total: 0.0,
            ..EngineConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidRootTotal(0.0)));

        let config = EngineConfig {
            tolerance: 0.5,
            save_tolerance: 0.1,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SaveToleranceTooTight { .. })
        ));
    }
}
