//! Parameter metadata for pattern detectors
//!
//! This module provides metadata about detector parameters, enabling:
//! - Grid search over detector settings
//! - Parameter documentation
//! - Construction from loosely-typed key/value maps
//!
//! # Example
//!
//! ```rust
//! use chartscan::params::{ParamMeta, ParamType, ParameterizedDetector};
//! use chartscan::prelude::*;
//!
//! for param in EngulfingDetector::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//! ```

use std::collections::HashMap;

use crate::{Error, Factor, Period, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Fraction in 0.0..=1.0 (tolerances, R² thresholds)
  Ratio,
  /// Positive integer (window lengths)
  Period,
  /// Positive multiplier or percentage (body ratio, pole move)
  Factor,
}

/// Metadata for a single detector parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "min_body_ratio")
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Range for optimization: (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  pub const fn factor(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Factor, default, range, description }
  }

  /// Generate all values for grid search
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    if step <= 0.0 {
      return vec![min];
    }
    let mut values = Vec::new();
    let mut k = 0usize;
    loop {
      let v = min + step * k as f64;
      if v > max + 1e-9 {
        break;
      }
      values.push(v);
      k += 1;
    }
    values
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if value < min || value > max {
      return Err(Error::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Factor => Factor::new(value).map(|_| ()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(Error::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
    }
  }
}

// ============================================================
// PARAMETERIZED DETECTOR TRAIT
// ============================================================

/// Trait for detectors that support parameterization
pub trait ParameterizedDetector: Sized {
  /// Returns metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Creates a detector with parameters from a HashMap
  ///
  /// Missing parameters use their default values.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

/// Helper to get a Period from params with default fallback
pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  if value < 1.0 || value.fract() != 0.0 {
    return Err(Error::InvalidValue("Period must be a positive integer"));
  }
  Period::new(value as usize)
}

/// Helper to get a Factor from params with default fallback
pub fn get_factor(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Factor> {
  let value = params.get(key).copied().unwrap_or(default);
  Factor::new(value)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detectors::{EngulfingDetector, TriangleDetector};

  #[test]
  fn test_param_meta_ratio() {
    let meta = ParamMeta::ratio("test_ratio", 0.5, (0.3, 0.7, 0.1), "Test ratio parameter");

    assert_eq!(meta.name, "test_ratio");
    assert_eq!(meta.param_type, ParamType::Ratio);
    assert_eq!(meta.default, 0.5);
  }

  #[test]
  fn test_param_meta_period() {
    let meta = ParamMeta::period("test_period", 14.0, (10.0, 20.0, 2.0), "Test period parameter");

    assert_eq!(meta.param_type, ParamType::Period);
    assert_eq!(meta.default, 14.0);
  }

  #[test]
  fn test_generate_grid() {
    let meta = ParamMeta::factor("min_body_ratio", 1.5, (1.05, 1.5, 0.15), "Test");

    let grid = meta.generate_grid();
    assert_eq!(grid.len(), 4);
    assert!((grid[0] - 1.05).abs() < 1e-9);
    assert!((grid[3] - 1.5).abs() < 1e-9);
  }

  #[test]
  fn test_validate_by_type() {
    let ratio = ParamMeta::ratio("test", 0.5, (0.3, 0.7, 0.1), "Test");
    assert!(ratio.validate(0.5).is_ok());
    assert!(ratio.validate(0.2).is_err());
    assert!(ratio.validate(0.8).is_err());

    let period = ParamMeta::period("test", 14.0, (10.0, 20.0, 2.0), "Test");
    assert!(period.validate(14.0).is_ok());
    assert!(period.validate(14.5).is_err());
    assert!(period.validate(22.0).is_err());
  }

  #[test]
  fn test_helpers_fallback_to_default() {
    let mut params = HashMap::new();
    params.insert("key1", 0.8);
    params.insert("window", 20.0);

    assert!((get_ratio(&params, "key1", 0.5).unwrap().get() - 0.8).abs() < f64::EPSILON);
    assert!((get_ratio(&params, "key2", 0.5).unwrap().get() - 0.5).abs() < f64::EPSILON);
    assert_eq!(get_period(&params, "window", 14).unwrap().get(), 20);
    assert_eq!(get_period(&params, "other", 14).unwrap().get(), 14);
    assert!(get_factor(&params, "missing", 0.0).is_err());
  }

  #[test]
  fn test_detector_from_params() {
    let mut params = HashMap::new();
    params.insert("min_body_ratio", 1.2);
    let detector = EngulfingDetector::with_params(&params).unwrap();
    assert!((detector.min_body_ratio.get() - 1.2).abs() < f64::EPSILON);

    params.insert("min_body_ratio", -1.0);
    assert!(EngulfingDetector::with_params(&params).is_err());

    let mut bad = HashMap::new();
    bad.insert("lookback", 2.0);
    assert!(TriangleDetector::with_params(&bad).is_err());
  }

  #[test]
  fn test_every_default_lies_on_its_grid_bounds() {
    let all: [&[ParamMeta]; 2] = [EngulfingDetector::param_meta(), TriangleDetector::param_meta()];
    for meta in all.iter().flat_map(|m| m.iter()) {
      assert!(meta.validate(meta.default).is_ok(), "{} default out of range", meta.name);
    }
  }
}
