//! Decision thresholds and retry bounds.
//!
//! Combination is additive (`clamp(initial + Σ deltas)`); sharply divergent
//! critiques are not treated specially. The thresholds and bounds below are
//! the only tunable policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Confidence, Error, Result, status::Annotation};

/// Maximum upstream retrieval attempts before a fact is recorded incomplete.
pub const MAX_RETRIEVAL_ATTEMPTS: u32 = 3;

/// Tunable decision policy. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
  /// `combined >= auto_accept` → accepted without notes.
  pub auto_accept:       Confidence,
  /// `combined >= accept_with_notes` → accepted with notes.
  pub accept_with_notes: Confidence,
  /// `combined >= revision_floor` → revision requested; below → rejected.
  pub revision_floor:    Confidence,
  /// Resubmissions allowed per review cycle.
  pub max_revisions:     u32,
  /// Bounded wait for every expected critique role.
  #[serde(with = "duration_secs")]
  pub critique_timeout:  Duration,
}

impl Default for DecisionPolicy {
  fn default() -> Self {
    Self {
      auto_accept:       Confidence::saturating(8_500),
      accept_with_notes: Confidence::saturating(7_000),
      revision_floor:    Confidence::saturating(5_000),
      max_revisions:     2,
      critique_timeout:  Duration::from_secs(30),
    }
  }
}

/// The bucket a combined confidence falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Accept(Annotation),
  NeedsRevision,
  Reject,
}

impl DecisionPolicy {
  /// Thresholds must be ordered `revision_floor <= accept_with_notes <=
  /// auto_accept` and the critique timeout must be non-zero.
  pub fn validate(&self) -> Result<()> {
    if !(self.revision_floor <= self.accept_with_notes
      && self.accept_with_notes <= self.auto_accept)
    {
      return Err(Error::validation(format!(
        "policy thresholds out of order: revision_floor {} <= accept_with_notes {} <= \
         auto_accept {} does not hold",
        self.revision_floor, self.accept_with_notes, self.auto_accept
      )));
    }
    if self.critique_timeout.is_zero() {
      return Err(Error::validation("critique_timeout must be greater than zero"));
    }
    Ok(())
  }

  /// Classify a combined confidence. Every boundary belongs to the upper
  /// bucket. A partial result never accepts and is not evidence of falsity,
  /// so it always asks for a revision.
  pub fn classify(&self, combined: Confidence, partial: bool) -> Outcome {
    if partial {
      return Outcome::NeedsRevision;
    }
    if combined >= self.auto_accept {
      Outcome::Accept(Annotation::AutoAccept)
    } else if combined >= self.accept_with_notes {
      Outcome::Accept(Annotation::AcceptWithNotes)
    } else if combined >= self.revision_floor {
      Outcome::NeedsRevision
    } else {
      Outcome::Reject
    }
  }

  /// Whether a fact that already used `retry_count` resubmissions may be sent
  /// back for another revision.
  pub fn may_revise(&self, retry_count: u32) -> bool { retry_count < self.max_revisions }
}

mod duration_secs {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(d)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn c(v: f64) -> Confidence { Confidence::from_f64(v).unwrap() }

  #[test]
  fn buckets_with_inclusive_boundaries() {
    let p = DecisionPolicy::default();
    assert_eq!(p.classify(c(0.85), false), Outcome::Accept(Annotation::AutoAccept));
    assert_eq!(p.classify(c(0.97), false), Outcome::Accept(Annotation::AutoAccept));
    assert_eq!(p.classify(c(0.8499), false), Outcome::Accept(Annotation::AcceptWithNotes));
    assert_eq!(p.classify(c(0.75), false), Outcome::Accept(Annotation::AcceptWithNotes));
    assert_eq!(p.classify(c(0.70), false), Outcome::Accept(Annotation::AcceptWithNotes));
    assert_eq!(p.classify(c(0.6999), false), Outcome::NeedsRevision);
    assert_eq!(p.classify(c(0.60), false), Outcome::NeedsRevision);
    assert_eq!(p.classify(c(0.50), false), Outcome::NeedsRevision);
    assert_eq!(p.classify(c(0.4999), false), Outcome::Reject);
    assert_eq!(p.classify(c(0.40), false), Outcome::Reject);
  }

  #[test]
  fn partial_results_never_accept() {
    let p = DecisionPolicy::default();
    assert_eq!(p.classify(c(1.0), true), Outcome::NeedsRevision);
    assert_eq!(p.classify(c(0.1), true), Outcome::NeedsRevision);
  }

  #[test]
  fn default_policy_is_valid() { DecisionPolicy::default().validate().unwrap(); }

  #[test]
  fn disordered_thresholds_are_invalid() {
    let p = DecisionPolicy {
      auto_accept: c(0.6),
      accept_with_notes: c(0.7),
      ..DecisionPolicy::default()
    };
    assert!(matches!(p.validate(), Err(Error::Validation(_))));

    let p = DecisionPolicy { revision_floor: c(0.75), ..DecisionPolicy::default() };
    assert!(matches!(p.validate(), Err(Error::Validation(_))));

    let p = DecisionPolicy { critique_timeout: Duration::ZERO, ..DecisionPolicy::default() };
    assert!(matches!(p.validate(), Err(Error::Validation(_))));
  }

  #[test]
  fn equal_thresholds_are_allowed() {
    let p = DecisionPolicy {
      auto_accept: c(0.7),
      accept_with_notes: c(0.7),
      revision_floor: c(0.7),
      ..DecisionPolicy::default()
    };
    p.validate().unwrap();
  }

  #[test]
  fn revision_budget() {
    let p = DecisionPolicy::default();
    assert!(p.may_revise(0));
    assert!(p.may_revise(1));
    assert!(!p.may_revise(2));
  }
}
