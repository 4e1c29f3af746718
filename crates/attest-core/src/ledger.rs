//! The ledger traits and supporting types.
//!
//! Traits are implemented by storage backends (e.g. `attest-store-sqlite`).
//! Higher layers depend on these abstractions, not on a concrete backend.
//!
//! Capabilities are split so that single-writer authority is structural:
//! readers and proposers get a cloneable [`LedgerProposer`] handle, while the
//! one [`LedgerAppender`] is handed to the decision engine and nobody else.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  fact::{ConfidenceDelta, FactVersion, NewFact, Relations, Revision},
  status::{Annotation, FactStatus, ResolvedVersion},
};

/// Cursor value that replays the accepted stream from the beginning.
pub const GENESIS: i64 = 0;

// ─── Status change ───────────────────────────────────────────────────────────

/// New content carried by a PROPOSED append.
#[derive(Debug, Clone)]
pub struct Resubmission {
  pub revision:    Revision,
  /// Retry counter for the new review cycle.
  pub retry_count: u32,
}

/// Input to [`LedgerAppender::append_version`].
///
/// Fields not mentioned are carried over from the current version.
#[derive(Debug, Clone)]
pub struct StatusChange {
  /// The version the caller believes is current (optimistic check).
  pub expected_version: u32,
  pub status:           FactStatus,
  pub reason:           String,
  pub annotation:       Option<Annotation>,
  /// Appended to the current revision's deltas.
  pub deltas:           Vec<ConfidenceDelta>,
  /// Replaces the relation links when set.
  pub relations:        Option<Relations>,
  /// Starts a new content revision; clears deltas and relations.
  pub resubmission:     Option<Resubmission>,
}

impl StatusChange {
  pub fn new(
    expected_version: u32,
    status: FactStatus,
    reason: impl Into<String>,
  ) -> Self {
    Self {
      expected_version,
      status,
      reason: reason.into(),
      annotation: None,
      deltas: Vec::new(),
      relations: None,
      resubmission: None,
    }
  }

  pub fn with_annotation(mut self, annotation: Annotation) -> Self {
    self.annotation = Some(annotation);
    self
  }

  pub fn with_deltas(mut self, deltas: Vec<ConfidenceDelta>) -> Self {
    self.deltas = deltas;
    self
  }

  pub fn with_relations(mut self, relations: Relations) -> Self {
    self.relations = Some(relations);
    self
  }

  pub fn with_resubmission(mut self, revision: Revision, retry_count: u32) -> Self {
    self.resubmission = Some(Resubmission { revision, retry_count });
    self
  }
}

// ─── Record construction ─────────────────────────────────────────────────────

/// Build version 1 of a new identity. `seq` is left at 0 for the backend to
/// fill in.
pub fn first_version(
  fact_id: Uuid,
  input: NewFact,
  now: DateTime<Utc>,
) -> Result<FactVersion> {
  input.validate()?;
  let reason = format!("proposed by {}", input.proposer.agent);
  Ok(FactVersion {
    seq: 0,
    fact_id,
    version: 1,
    supersedes: None,
    revision: 1,
    retry_count: 0,
    kind: input.kind,
    subject_id: input.subject_id,
    content: input.content,
    citations: input.citations,
    proposer: input.proposer,
    initial_confidence: input.initial_confidence,
    deltas: Vec::new(),
    final_confidence: input.initial_confidence,
    status: FactStatus::Proposed,
    annotation: None,
    reason,
    relations: Relations::default(),
    created_at: now,
    status_changed_at: now,
  })
}

/// Build version N+1 from the current version N. Validates the transition,
/// the reason and any new content. `seq` is left at 0 for the backend.
///
/// Deltas whose `critique_id` is already recorded on the revision are
/// skipped, so re-delivering a critique never double-applies it.
pub fn next_version(
  current: &FactVersion,
  change: StatusChange,
  now: DateTime<Utc>,
) -> Result<FactVersion> {
  current.status.check_transition(change.status, &change.reason)?;
  if change.annotation.is_some() && change.status != FactStatus::Accepted {
    return Err(Error::validation("only an ACCEPTED version carries an annotation"));
  }

  let mut next = current.clone();
  next.seq = 0;
  next.version = current.version + 1;
  next.supersedes = Some(current.seq);
  next.status = change.status;
  next.reason = change.reason;
  next.annotation = change.annotation;
  next.status_changed_at = now;

  match (change.status, change.resubmission) {
    (FactStatus::Proposed, Some(Resubmission { revision, retry_count })) => {
      revision.validate()?;
      next.revision = current.revision + 1;
      next.retry_count = retry_count;
      next.content = revision.content;
      next.citations = revision.citations;
      next.initial_confidence = revision.initial_confidence;
      next.deltas.clear();
      next.relations = Relations::default();
    }
    (FactStatus::Proposed, None) => {
      return Err(Error::validation("a PROPOSED version requires new content"));
    }
    (_, Some(_)) => {
      return Err(Error::validation("only a PROPOSED version may carry new content"));
    }
    (_, None) => {
      for delta in change.deltas {
        if next.deltas.iter().all(|d| d.critique_id != delta.critique_id) {
          next.deltas.push(delta);
        }
      }
    }
  }

  if let Some(relations) = change.relations {
    next.relations = relations;
  }
  next.final_confidence = next.combined();
  Ok(next)
}

// ─── Accepted stream ─────────────────────────────────────────────────────────

/// One entry of the accepted-fact stream, in ledger append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedEvent {
  /// Resume point: pass it back as `since` to continue after this event.
  pub cursor:              i64,
  pub record:              FactVersion,
  /// Record key of the previously accepted version this one replaced.
  pub supersedes_accepted: Option<i64>,
}

// ─── Traits ──────────────────────────────────────────────────────────────────

/// Read access to the ledger.
///
/// All methods return `Send` futures so the traits can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait LedgerReader: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  /// The current version of an identity. `None` if the identity is unknown.
  fn read_current(
    &self,
    fact_id: Uuid,
  ) -> impl Future<Output = Result<Option<FactVersion>, Self::Error>> + Send + '_;

  /// Every version of an identity, oldest first, with supersessions
  /// resolved. Empty if the identity is unknown.
  fn read_history(
    &self,
    fact_id: Uuid,
  ) -> impl Future<Output = Result<Vec<ResolvedVersion>, Self::Error>> + Send + '_;

  /// The currently accepted version of each identity about `subject_id`.
  fn read_accepted_for_subject(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Vec<FactVersion>, Self::Error>> + Send + '_;

  /// Accepted records appended after `since`, in append order, at most
  /// `limit` of them.
  fn stream_accepted(
    &self,
    since: i64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<AcceptedEvent>, Self::Error>> + Send + '_;

  /// Current records of every identity whose current status is `status`.
  fn list_current(
    &self,
    status: FactStatus,
  ) -> impl Future<Output = Result<Vec<FactVersion>, Self::Error>> + Send + '_;
}

/// Creating new identities. Available to every proposer collaborator.
pub trait LedgerProposer: LedgerReader {
  /// Validate and persist version 1 of a new identity with status PROPOSED.
  fn propose(
    &self,
    input: NewFact,
  ) -> impl Future<Output = Result<FactVersion, Self::Error>> + Send + '_;
}

/// The append capability. Exactly one value exists per opened ledger and it
/// belongs to the decision engine.
pub trait LedgerAppender: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  /// Atomically append version N+1 of `fact_id` and move the current pointer
  /// to it.
  ///
  /// Fails with [`crate::Error::ConcurrencyConflict`] when
  /// `change.expected_version` is not the current version, and with
  /// [`crate::Error::Validation`] when the transition is not permitted or the
  /// reason is blank.
  fn append_version(
    &self,
    fact_id: Uuid,
    change: StatusChange,
  ) -> impl Future<Output = Result<FactVersion, Self::Error>> + Send + '_;
}
