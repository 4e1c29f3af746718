//! Advisory critiques and the critic capability interface.
//!
//! A critic supplies a signed confidence delta and findings for one content
//! revision of a fact. It has no authority over status; the decision engine
//! combines critiques and decides.

use std::{future::Future, pin::Pin};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Delta, Error, Result, fact::FactVersion};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type returned by critics. Any failure leaves the role missing from
/// the combined result.
pub type CriticError = Box<dyn std::error::Error + Send + Sync>;

// ─── Roles ───────────────────────────────────────────────────────────────────

/// A review role and the range its deltas must fall in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRole {
  pub name:      String,
  pub min_delta: Delta,
  pub max_delta: Delta,
}

impl ReviewRole {
  pub fn new(name: impl Into<String>, min_delta: Delta, max_delta: Delta) -> Self {
    Self { name: name.into(), min_delta, max_delta }
  }

  /// Source-hierarchy and citation standards: `[-0.20, +0.10]`.
  pub fn standards() -> Self {
    Self::new(
      "standards",
      Delta::from_basis_points(-2_000),
      Delta::from_basis_points(1_000),
    )
  }

  /// Evidence analysis and correlation: `[-0.30, +0.10]`.
  pub fn reasoning() -> Self {
    Self::new(
      "reasoning",
      Delta::from_basis_points(-3_000),
      Delta::from_basis_points(1_000),
    )
  }

  pub fn allows(&self, delta: Delta) -> bool {
    (self.min_delta..=self.max_delta).contains(&delta)
  }

  pub fn check(&self, delta: Delta) -> Result<()> {
    if self.allows(delta) {
      Ok(())
    } else {
      Err(Error::validation(format!(
        "delta {delta} outside range [{}, {}] for role {:?}",
        self.min_delta, self.max_delta, self.name
      )))
    }
  }

  /// Clamp a raw delta into this role's range.
  pub fn clamp(&self, delta: Delta) -> Delta { delta.clamp(self.min_delta, self.max_delta) }
}

// ─── Critiques ───────────────────────────────────────────────────────────────

/// One deficiency (or strength) noted by a critic, tagged by dimension so a
/// revision request can enumerate them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
  pub dimension: String,
  pub detail:    String,
}

impl Finding {
  pub fn new(dimension: impl Into<String>, detail: impl Into<String>) -> Self {
    Self { dimension: dimension.into(), detail: detail.into() }
  }
}

/// What a critic produces for a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueDraft {
  pub delta:    Delta,
  #[serde(default)]
  pub findings: Vec<Finding>,
  pub reason:   String,
}

/// A critique as delivered to the aggregator. `critique_id` is the
/// idempotency key: re-delivery of the same id is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
  pub critique_id: Uuid,
  pub fact_id:     Uuid,
  pub revision:    u32,
  pub role:        String,
  pub delta:       Delta,
  #[serde(default)]
  pub findings:    Vec<Finding>,
  pub reason:      String,
}

impl Critique {
  pub fn from_draft(
    fact_id: Uuid,
    revision: u32,
    role: impl Into<String>,
    draft: CritiqueDraft,
  ) -> Self {
    Self {
      critique_id: Uuid::new_v4(),
      fact_id,
      revision,
      role: role.into(),
      delta: draft.delta,
      findings: draft.findings,
      reason: draft.reason,
    }
  }
}

// ─── Critic ──────────────────────────────────────────────────────────────────

/// An in-process critic for one review role.
///
/// Adding a role means implementing this trait and registering the critic
/// with the engine; the engine has no per-role branches.
pub trait Critic: Send + Sync {
  fn role(&self) -> &ReviewRole;

  fn evaluate<'a>(
    &'a self,
    snapshot: &'a FactVersion,
  ) -> BoxFuture<'a, std::result::Result<CritiqueDraft, CriticError>>;
}
