//! Engine configuration
//!
//! All fields have defaults, so an empty document is a valid configuration:
//!
//! ```toml
//! severity_scope = "hazard"
//! fraction_tolerance = 0.01
//! cut_set_warning_threshold = 50000
//! mission_time = 10000.0
//!
//! [asil_targets.b]
//! dc = 0.9
//! spfm = 0.92
//! lpfm = 0.6
//! ```

use crate::asil::{AsilLevel, MetricTargets};
use crate::assurance::SeverityScope;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// I/O error reading the configuration file
    #[error("I/O error: {0}")]
    Io(String),

    /// TOML parsing error
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Per-ASIL replacement of the default FMEDA targets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsilTargetOverrides {
    pub qm: Option<MetricTargets>,
    pub a: Option<MetricTargets>,
    pub b: Option<MetricTargets>,
    pub c: Option<MetricTargets>,
    pub d: Option<MetricTargets>,
}

impl AsilTargetOverrides {
    fn get(&self, asil: AsilLevel) -> Option<MetricTargets> {
        match asil {
            AsilLevel::QM => self.qm,
            AsilLevel::A => self.a,
            AsilLevel::B => self.b,
            AsilLevel::C => self.c,
            AsilLevel::D => self.d,
        }
    }
}

/// Tunables for evaluation passes, cut-set enumeration and FMEDA roll-ups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where the highest severity for the severity adjustment comes from
    pub severity_scope: SeverityScope,
    /// Allowed deviation of a component's fault-fraction sum from 1.0
    pub fraction_tolerance: f64,
    /// Cut-set family size above which a cost warning is logged
    pub cut_set_warning_threshold: usize,
    /// Mission time τ in hours for basic-event failure probabilities
    pub mission_time: f64,
    pub asil_targets: AsilTargetOverrides,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            severity_scope: SeverityScope::Parents,
            fraction_tolerance: 1e-3,
            cut_set_warning_threshold: 10_000,
            mission_time: 1.0,
            asil_targets: AsilTargetOverrides::default(),
        }
    }
}

impl EngineConfig {
    /// FMEDA targets for an ASIL, honoring overrides
    pub fn targets_for(&self, asil: AsilLevel) -> MetricTargets {
        self.asil_targets
            .get(asil)
            .unwrap_or_else(|| asil.fmeda_targets())
    }

    /// Reject negative tolerances, non-positive mission times and targets
    /// outside [0, 1]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fraction_tolerance.is_finite() || self.fraction_tolerance < 0.0 {
            return Err(ConfigError::Validation(format!(
                "fraction_tolerance must be a non-negative number, got {}",
                self.fraction_tolerance
            )));
        }
        if !self.mission_time.is_finite() || self.mission_time <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "mission_time must be a positive number of hours, got {}",
                self.mission_time
            )));
        }
        for asil in AsilLevel::ALL {
            if let Some(targets) = self.asil_targets.get(asil) {
                targets.validate().map_err(|e| {
                    ConfigError::Validation(format!("targets for {}: {}", asil, e))
                })?;
            }
        }
        Ok(())
    }
}

/// Load and validate a configuration file
pub fn from_path(path: impl AsRef<Path>) -> Result<EngineConfig, ConfigError> {
    let contents =
        std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
    from_str(&contents)
}

/// Parse and validate a configuration from a TOML string
pub fn from_str(s: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
