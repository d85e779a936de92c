//! Runtime configuration for the tracking pipeline.
//!
//! One flat struct carries every tunable with its default; `validate` gates
//! the whole run, so out-of-range parameters fail before any day is
//! processed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::composite::CompositeMethod;
use crate::label::Connectivity;

/// Configuration for labelling, tracking, normalization and compositing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Smallest cell count an object may have and still be emitted.
    pub minpix: usize,

    /// Overlap threshold for declaring continuation or split, in [0, 1].
    pub alpha: f64,

    /// Post-hoc archive filter: drop tracks shorter than this many days.
    /// `None` disables the filter.
    pub cut_off: Option<u32>,

    /// Cell adjacency used by the labeller.
    pub connectivity: Connectivity,

    /// Polar grid resolution of the normalized frame (radial and angular).
    pub resolution: usize,

    /// Number of lifecycle phases in the normalized frame.
    pub n_phases: usize,

    /// Geodesic earth radius in kilometres.
    pub earth_radius_km: f64,

    /// Aggregate used by the composite reducer.
    pub composite_method: CompositeMethod,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minpix: 10,
            alpha: 0.5,
            cut_off: None,
            connectivity: Connectivity::Eight,
            resolution: 50,
            n_phases: 5,
            earth_radius_km: 6371.0,
            composite_method: CompositeMethod::Mean,
        }
    }
}

impl Config {
    /// Check every parameter against its admissible range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ConfigError::Alpha(self.alpha));
        }
        if self.minpix < 1 {
            return Err(ConfigError::MinPix(self.minpix));
        }
        if self.resolution < 2 {
            return Err(ConfigError::Resolution(self.resolution));
        }
        if self.n_phases < 1 {
            return Err(ConfigError::Phases(self.n_phases));
        }
        if !(self.earth_radius_km > 0.0) {
            return Err(ConfigError::EarthRadius(self.earth_radius_km));
        }
        Ok(())
    }
}

/// A parameter outside its admissible range. Fails the whole run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("parameter out of range: alpha must be within [0, 1], got {0}")]
    Alpha(f64),

    #[error("parameter out of range: minpix must be at least 1, got {0}")]
    MinPix(usize),

    #[error("parameter out of range: resolution must be at least 2, got {0}")]
    Resolution(usize),

    #[error("parameter out of range: n_phases must be at least 1, got {0}")]
    Phases(usize),

    #[error("parameter out of range: earth radius must be positive, got {0}")]
    EarthRadius(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn each_bound_is_enforced() {
        let base = Config::default();

        let cfg = Config { alpha: 1.2, ..base.clone() };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::Alpha(1.2));

        let cfg = Config { alpha: -0.1, ..base.clone() };
        assert!(matches!(cfg.validate().unwrap_err(), ConfigError::Alpha(_)));

        let cfg = Config { minpix: 0, ..base.clone() };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::MinPix(0));

        let cfg = Config { resolution: 1, ..base.clone() };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::Resolution(1));

        let cfg = Config { n_phases: 0, ..base.clone() };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::Phases(0));

        let cfg = Config { earth_radius_km: 0.0, ..base };
        assert_eq!(cfg.validate().unwrap_err(), ConfigError::EarthRadius(0.0));
    }
}
