//! Review status, the transition table, and resolved lifecycle views.
//!
//! Version records are immutable. When a later version of an identity is
//! accepted, the earlier accepted version is not rewritten; a supersession
//! row is appended instead and the effective status is computed at read time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Error, Result, fact::FactVersion};

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr,
  Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FactStatus {
  Proposed,
  UnderReview,
  NeedsRevision,
  Accepted,
  Rejected,
  /// Only ever an effective status; see [`ResolvedVersion`].
  Superseded,
  ConflictHeld,
}

impl FactStatus {
  /// Terminal for the version that carries it.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Accepted | Self::Rejected | Self::Superseded)
  }

  /// Statuses that must be entered with an explanatory reason supplied by the
  /// caller. The ledger additionally requires some reason on every record.
  pub fn requires_reason(self) -> bool {
    !matches!(self, Self::Proposed | Self::UnderReview)
  }

  /// Whether the decision engine may append a record with status `next` on
  /// top of a current record with status `self`.
  pub fn can_transition_to(self, next: FactStatus) -> bool {
    use FactStatus::*;
    matches!(
      (self, next),
      (Proposed, UnderReview)
        // recovery re-dispatches a review interrupted by a restart
        | (UnderReview, UnderReview)
        | (UnderReview, Accepted)
        | (UnderReview, NeedsRevision)
        | (UnderReview, Rejected)
        | (UnderReview, ConflictHeld)
        | (NeedsRevision, Proposed)
        | (NeedsRevision, Rejected)
        | (ConflictHeld, UnderReview)
        | (ConflictHeld, Rejected)
        | (Accepted, Proposed)
    )
  }

  /// Validate a transition and its reason together.
  pub fn check_transition(self, next: FactStatus, reason: &str) -> Result<()> {
    if !self.can_transition_to(next) {
      return Err(Error::validation(format!(
        "transition {self} -> {next} is not permitted"
      )));
    }
    if reason.trim().is_empty() {
      return Err(Error::validation(format!(
        "transition {self} -> {next} requires a reason"
      )));
    }
    Ok(())
  }
}

/// How an acceptance was reached.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum Annotation {
  AutoAccept,
  AcceptWithNotes,
}

// ─── Supersession ────────────────────────────────────────────────────────────

/// Records that an accepted version was replaced by a later accepted version
/// of the same identity. Written in the same transaction as the later
/// acceptance; a record is superseded at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supersession {
  pub fact_id:     Uuid,
  pub old_seq:     i64,
  pub new_seq:     i64,
  pub recorded_at: DateTime<Utc>,
}

/// A version record bundled with its effective lifecycle status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVersion {
  pub record:        FactVersion,
  pub superseded_by: Option<Supersession>,
}

impl ResolvedVersion {
  pub fn effective_status(&self) -> FactStatus {
    if self.superseded_by.is_some() {
      FactStatus::Superseded
    } else {
      self.record.status
    }
  }
}
