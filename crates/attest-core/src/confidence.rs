//! Fixed-point confidence arithmetic.
//!
//! Confidences are held as basis points (`0..=10_000`) and deltas as signed
//! basis points, so combining critiques is exact integer addition and the
//! threshold comparisons in [`crate::policy`] never see rounding drift.
//! JSON surfaces still use floats on the `0.0..=1.0` scale.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Basis points in one whole unit of confidence.
pub const SCALE: i32 = 10_000;

fn to_basis_points(value: f64) -> i64 { (value * f64::from(SCALE)).round() as i64 }

// ─── Confidence ──────────────────────────────────────────────────────────────

/// A confidence figure on the normalised `0.0..=1.0` scale.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
  Serialize, Deserialize,
)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(u16);

impl Confidence {
  pub const ZERO: Self = Self(0);
  pub const ONE: Self = Self(SCALE as u16);

  /// Build from basis points; `None` above 10 000.
  pub const fn from_basis_points(bp: u16) -> Option<Self> {
    if bp as i32 > SCALE { None } else { Some(Self(bp)) }
  }

  /// Build from basis points, saturating at 1.0.
  pub const fn saturating(bp: u16) -> Self {
    if bp as i32 > SCALE { Self::ONE } else { Self(bp) }
  }

  pub const fn basis_points(self) -> u16 { self.0 }

  /// Parse a float, rejecting anything outside `0.0..=1.0`.
  pub fn from_f64(value: f64) -> Result<Self> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
      return Err(Error::validation(format!(
        "confidence {value} is outside [0.0, 1.0]"
      )));
    }
    Ok(Self(to_basis_points(value) as u16))
  }

  pub fn as_f64(self) -> f64 { f64::from(self.0) / f64::from(SCALE) }

  /// `clamp(self + Σ deltas, 0, 1)`. Integer addition, so the result does not
  /// depend on the order of `deltas`.
  pub fn combine<I>(self, deltas: I) -> Self
  where
    I: IntoIterator<Item = Delta>,
  {
    let sum: i64 = deltas.into_iter().map(|d| i64::from(d.0)).sum();
    let total = (i64::from(self.0) + sum).clamp(0, i64::from(SCALE));
    Self(total as u16)
  }
}

impl TryFrom<f64> for Confidence {
  type Error = Error;

  fn try_from(value: f64) -> Result<Self> { Self::from_f64(value) }
}

impl From<Confidence> for f64 {
  fn from(c: Confidence) -> Self { c.as_f64() }
}

impl fmt::Display for Confidence {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.4}", self.as_f64())
  }
}

// ─── Delta ───────────────────────────────────────────────────────────────────

/// A signed adjustment to a confidence figure.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
  Serialize, Deserialize,
)]
#[serde(try_from = "f64", into = "f64")]
pub struct Delta(i32);

impl Delta {
  pub const ZERO: Self = Self(0);

  pub const fn from_basis_points(bp: i32) -> Self { Self(bp) }

  pub const fn basis_points(self) -> i32 { self.0 }

  /// Parse a float, rejecting anything outside `-1.0..=1.0`.
  pub fn from_f64(value: f64) -> Result<Self> {
    if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
      return Err(Error::validation(format!(
        "delta {value} is outside [-1.0, 1.0]"
      )));
    }
    Ok(Self(to_basis_points(value) as i32))
  }

  pub fn as_f64(self) -> f64 { f64::from(self.0) / f64::from(SCALE) }
}

impl TryFrom<f64> for Delta {
  type Error = Error;

  fn try_from(value: f64) -> Result<Self> { Self::from_f64(value) }
}

impl From<Delta> for f64 {
  fn from(d: Delta) -> Self { d.as_f64() }
}

impl fmt::Display for Delta {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:+.4}", self.as_f64())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn c(v: f64) -> Confidence { Confidence::from_f64(v).unwrap() }
  fn d(v: f64) -> Delta { Delta::from_f64(v).unwrap() }

  #[test]
  fn float_round_trip_is_exact_at_basis_points() {
    assert_eq!(c(0.85).basis_points(), 8500);
    assert_eq!(c(0.7).basis_points(), 7000);
    assert_eq!(d(-0.1).basis_points(), -1000);
    assert_eq!(c(0.85).as_f64(), 0.85);
  }

  #[test]
  fn combine_is_exact() {
    // 0.85 - 0.10 in binary floating point is not exactly 0.75.
    assert_eq!(c(0.85).combine([d(-0.10), d(0.0)]), c(0.75));
    assert_eq!(c(0.60).combine([d(-0.05), d(-0.10)]), c(0.45));
  }

  #[test]
  fn combine_clamps_to_unit_interval() {
    assert_eq!(c(0.95).combine([d(0.10), d(0.10)]), Confidence::ONE);
    assert_eq!(c(0.10).combine([d(-0.30), d(-0.20)]), Confidence::ZERO);
  }

  #[test]
  fn out_of_range_values_are_rejected() {
    assert!(Confidence::from_f64(1.01).is_err());
    assert!(Confidence::from_f64(-0.01).is_err());
    assert!(Confidence::from_f64(f64::NAN).is_err());
    assert!(Delta::from_f64(1.5).is_err());
  }

  #[test]
  fn display_shows_every_basis_point() {
    assert_eq!(c(0.8499).to_string(), "0.8499");
    assert_eq!(c(0.7).to_string(), "0.7000");
    assert_eq!(d(-0.0005).to_string(), "-0.0005");
    assert_eq!(d(0.1).to_string(), "+0.1000");
  }

  #[test]
  fn serde_uses_floats() {
    let json = serde_json::to_string(&c(0.75)).unwrap();
    assert_eq!(json, "0.75");
    let back: Confidence = serde_json::from_str("0.75").unwrap();
    assert_eq!(back, c(0.75));
    assert!(serde_json::from_str::<Confidence>("1.2").is_err());
  }
}
