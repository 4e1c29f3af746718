//! Egress events observable by presentation and sync collaborators.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Confidence, Delta, critique::Finding, status::Annotation};

/// Sent back to the originating proposer when a revision is needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRequest {
  pub fact_id:           Uuid,
  pub revision:          u32,
  /// Agent that proposed the revision under review.
  pub proposer:          String,
  pub combined:          Confidence,
  /// Per-dimension deficiencies collected from every critique.
  pub deficiencies:      Vec<Finding>,
  /// Roles that did not answer before the timeout.
  pub missing_roles:     Vec<String>,
  pub retries_remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEvent {
  ProposedFact {
    fact_id:    Uuid,
    subject_id: Uuid,
    revision:   u32,
    proposer:   String,
  },
  CritiqueReceived {
    fact_id:     Uuid,
    revision:    u32,
    critique_id: Uuid,
    role:        String,
    delta:       Delta,
  },
  AcceptedFact {
    fact_id:    Uuid,
    version:    u32,
    seq:        i64,
    combined:   Confidence,
    annotation: Annotation,
  },
  SearchRevisionRequest(RevisionRequest),
  ConflictDetected {
    fact_id:        Uuid,
    conflicts_with: Vec<Uuid>,
  },
  Superseded {
    fact_id: Uuid,
    old_seq: i64,
    new_seq: i64,
  },
  RejectedFact {
    fact_id: Uuid,
    version: u32,
    reason:  String,
  },
}

impl LedgerEvent {
  pub fn fact_id(&self) -> Uuid {
    match self {
      Self::ProposedFact { fact_id, .. }
      | Self::CritiqueReceived { fact_id, .. }
      | Self::AcceptedFact { fact_id, .. }
      | Self::ConflictDetected { fact_id, .. }
      | Self::Superseded { fact_id, .. }
      | Self::RejectedFact { fact_id, .. } => *fact_id,
      Self::SearchRevisionRequest(req) => req.fact_id,
    }
  }

  /// Discriminant used in log lines.
  pub fn name(&self) -> &'static str {
    match self {
      Self::ProposedFact { .. } => "PROPOSED_FACT",
      Self::CritiqueReceived { .. } => "CRITIQUE_RECEIVED",
      Self::AcceptedFact { .. } => "ACCEPTED_FACT",
      Self::SearchRevisionRequest(_) => "SEARCH_REVISION_REQUEST",
      Self::ConflictDetected { .. } => "CONFLICT_DETECTED",
      Self::Superseded { .. } => "SUPERSEDED",
      Self::RejectedFact { .. } => "REJECTED_FACT",
    }
  }
}
