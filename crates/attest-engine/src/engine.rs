//! [`DecisionEngine`]: the only holder of the ledger's append capability.
//!
//! Every transition for one fact identity runs under that identity's async
//! mutex, so transitions are strictly sequential per identity while distinct
//! identities proceed concurrently. Review windows are opened before the
//! review task is spawned, so critiques can be submitted as soon as
//! [`DecisionEngine::start_review`] returns.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError, Weak},
  time::Duration,
};

use attest_core::{
  Confidence, Error, Result,
  critique::{Critic, Critique, CritiqueDraft, Finding},
  event::{LedgerEvent, RevisionRequest},
  fact::{ConfidenceDelta, FactVersion, NewFact, Relations, Revision},
  ledger::{LedgerAppender, LedgerProposer, StatusChange},
  policy::{DecisionPolicy, Outcome},
  status::{Annotation, FactStatus},
};
use chrono::Utc;
use tokio::{
  sync::{Mutex as AsyncMutex, OwnedMutexGuard, broadcast},
  task::JoinHandle,
};
use uuid::Uuid;

use crate::{
  aggregator::{CritiqueAggregator, SubmitOutcome},
  alert,
};

const EVENT_CAPACITY: usize = 1024;

/// A review running in the background. The critique window is already open.
pub struct ReviewTicket {
  pub fact_id:  Uuid,
  pub revision: u32,
  handle:       JoinHandle<Result<FactVersion>>,
}

impl ReviewTicket {
  /// Wait for the decision record.
  pub async fn outcome(self) -> Result<FactVersion> {
    self.handle.await.map_err(|e| Error::Storage(Box::new(e)))?
  }
}

/// Drives facts through the review state machine.
///
/// Cheap to clone; all clones share one engine.
pub struct DecisionEngine<L, W> {
  inner: Arc<Inner<L, W>>,
}

impl<L, W> Clone for DecisionEngine<L, W> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

struct Inner<L, W> {
  ledger:     L,
  appender:   W,
  aggregator: CritiqueAggregator,
  policy:     DecisionPolicy,
  critics:    Vec<Arc<dyn Critic>>,
  locks:      Mutex<HashMap<Uuid, Weak<AsyncMutex<()>>>>,
  events:     broadcast::Sender<LedgerEvent>,
}

impl<L, W> DecisionEngine<L, W>
where
  L: LedgerProposer + Clone + 'static,
  W: LedgerAppender + 'static,
{
  /// Build an engine. `roles` are the review roles every decision waits for;
  /// `critics` run in-process and must each serve one of those roles.
  pub fn new(
    ledger: L,
    appender: W,
    policy: DecisionPolicy,
    roles: impl IntoIterator<Item = attest_core::critique::ReviewRole>,
    critics: Vec<Arc<dyn Critic>>,
  ) -> Self {
    let aggregator = CritiqueAggregator::new(roles);
    let critics = critics
      .into_iter()
      .filter(|critic| {
        let known = aggregator.role(&critic.role().name).is_some();
        if !known {
          tracing::warn!(role = %critic.role().name, "ignoring critic for unconfigured role");
        }
        known
      })
      .collect();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    Self {
      inner: Arc::new(Inner {
        ledger,
        appender,
        aggregator,
        policy,
        critics,
        locks: Mutex::new(HashMap::new()),
        events,
      }),
    }
  }

  pub fn ledger(&self) -> &L { &self.inner.ledger }

  pub fn policy(&self) -> &DecisionPolicy { &self.inner.policy }

  pub fn aggregator(&self) -> &CritiqueAggregator { &self.inner.aggregator }

  /// Receive every egress event emitted after this call.
  pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> { self.inner.events.subscribe() }

  // ─── Ingress ───────────────────────────────────────────────────────────────

  /// Record version 1 of a new fact. Review is started separately.
  pub async fn propose(&self, input: NewFact) -> Result<FactVersion> {
    let record = self.inner.ledger.propose(input).await.map_err(alert)?;
    tracing::info!(
      fact_id = %record.fact_id,
      subject_id = %record.subject_id,
      kind = %record.kind.as_ref(),
      "fact proposed"
    );
    self.inner.emit(LedgerEvent::ProposedFact {
      fact_id:    record.fact_id,
      subject_id: record.subject_id,
      revision:   record.revision,
      proposer:   record.proposer.agent.clone(),
    });
    Ok(record)
  }

  /// Hand a critique to the open review window. Re-delivering a critique
  /// that was already recorded is a `Duplicate` even after the window closed.
  pub async fn submit_critique(&self, critique: Critique) -> Result<SubmitOutcome> {
    let open = self
      .inner
      .aggregator
      .is_open(critique.fact_id, critique.revision);
    if !open && self.inner.is_recorded(&critique).await? {
      tracing::debug!(
        fact_id = %critique.fact_id,
        critique_id = %critique.critique_id,
        "critique already recorded"
      );
      return Ok(SubmitOutcome::Duplicate);
    }
    self.inner.submit(critique)
  }

  /// Submit new content for a fact in NEEDS_REVISION (retry counter + 1) or
  /// ACCEPTED (new cycle, retry counter 0).
  pub async fn resubmit_revision(
    &self,
    fact_id: Uuid,
    expected_version: Option<u32>,
    revision: Revision,
  ) -> Result<FactVersion> {
    revision.validate()?;
    let _guard = self.inner.lock(fact_id).await;
    let current = self.inner.current(fact_id).await?;
    let max = self.inner.policy.max_revisions;

    let (retry_count, reason) = match current.status {
      FactStatus::NeedsRevision => {
        let retry = current.retry_count + 1;
        if retry > max {
          return Err(Error::validation(format!(
            "fact {fact_id} already used {} of {max} revisions",
            current.retry_count
          )));
        }
        (retry, format!("revision {} resubmitted (retry {retry} of {max})", current.revision + 1))
      }
      FactStatus::Accepted => {
        (0, format!("new revision {} submitted", current.revision + 1))
      }
      other => {
        return Err(Error::validation(format!(
          "fact {fact_id} is {other}; only NEEDS_REVISION or ACCEPTED facts take a revision"
        )));
      }
    };

    let change = StatusChange::new(
      expected_version.unwrap_or(current.version),
      FactStatus::Proposed,
      reason,
    )
    .with_resubmission(revision, retry_count);
    let record = self.inner.append(fact_id, change).await?;

    self.inner.emit(LedgerEvent::ProposedFact {
      fact_id,
      subject_id: record.subject_id,
      revision: record.revision,
      proposer: record.proposer.agent.clone(),
    });
    Ok(record)
  }

  /// Resolve a CONFLICT_HELD fact. `resulting` must be UNDER_REVIEW (the fact
  /// is then decided again from its recorded critiques) or REJECTED.
  pub async fn adjudicate_conflict(
    &self,
    fact_id: Uuid,
    resolution_note: String,
    resulting: FactStatus,
  ) -> Result<FactVersion> {
    if resolution_note.trim().is_empty() {
      return Err(Error::validation("resolution note must not be empty"));
    }
    if !matches!(resulting, FactStatus::UnderReview | FactStatus::Rejected) {
      return Err(Error::validation(format!(
        "adjudication must result in UNDER_REVIEW or REJECTED, not {resulting}"
      )));
    }

    let _guard = self.inner.lock(fact_id).await;
    let current = self.inner.current(fact_id).await?;
    if current.status != FactStatus::ConflictHeld {
      return Err(Error::validation(format!(
        "fact {fact_id} is {}, not CONFLICT_HELD",
        current.status
      )));
    }

    let relations = Relations {
      resolution: Some(resolution_note.clone()),
      ..current.relations.clone()
    };
    let change =
      StatusChange::new(current.version, resulting, format!("adjudicated: {resolution_note}"))
        .with_relations(relations);
    let record = self.inner.append(fact_id, change).await?;
    tracing::info!(%fact_id, status = %resulting, "conflict adjudicated");

    if resulting == FactStatus::Rejected {
      self.inner.emit(LedgerEvent::RejectedFact {
        fact_id,
        version: record.version,
        reason: record.reason.clone(),
      });
      return Ok(record);
    }
    self.inner.decide(record, Vec::new(), Vec::new(), Vec::new()).await
  }

  // ─── Review ────────────────────────────────────────────────────────────────

  /// Move a PROPOSED fact to UNDER_REVIEW, open its critique window, dispatch
  /// the in-process critics and spawn the task that decides once the window
  /// closes. A fact left UNDER_REVIEW (after a restart) is reviewed again; an
  /// adjudicated one is decided straight away.
  pub async fn start_review(&self, fact_id: Uuid) -> Result<ReviewTicket> {
    let guard = self.inner.lock(fact_id).await;
    let current = self.inner.current(fact_id).await?;

    let status = current.status;
    let reason = match status {
      FactStatus::Proposed => "critiques dispatched",
      FactStatus::UnderReview if current.relations.resolution.is_some() => {
        let revision = current.revision;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
          let _guard = guard;
          inner.decide(current, Vec::new(), Vec::new(), Vec::new()).await
        });
        return Ok(ReviewTicket { fact_id, revision, handle });
      }
      FactStatus::UnderReview => "review restarted",
      other => {
        return Err(Error::validation(format!(
          "fact {fact_id} is {other}; only PROPOSED facts can be reviewed"
        )));
      }
    };

    let record = self
      .inner
      .append(fact_id, StatusChange::new(current.version, FactStatus::UnderReview, reason))
      .await?;
    tracing::info!(%fact_id, revision = record.revision, "review opened");

    self
      .inner
      .aggregator
      .open_review(fact_id, record.revision, record.initial_confidence);
    self.inner.dispatch_critics(&record);

    let revision = record.revision;
    let inner = Arc::clone(&self.inner);
    let handle = tokio::spawn(async move {
      let _guard: OwnedMutexGuard<()> = guard;
      inner.finish_review(record).await
    });
    Ok(ReviewTicket { fact_id, revision, handle })
  }

  /// Run one full review cycle and return the decision record.
  pub async fn review(&self, fact_id: Uuid) -> Result<FactVersion> {
    self.start_review(fact_id).await?.outcome().await
  }

  // ─── Maintenance ───────────────────────────────────────────────────────────

  /// Reject every NEEDS_REVISION fact whose revision request is older than
  /// `window`. Returns how many were rejected.
  pub async fn expire_stale_revisions(&self, window: Duration) -> Result<usize> {
    let Some(cutoff) = chrono::Duration::from_std(window)
      .ok()
      .and_then(|w| Utc::now().checked_sub_signed(w))
    else {
      return Ok(0);
    };

    let waiting = self
      .inner
      .ledger
      .list_current(FactStatus::NeedsRevision)
      .await
      .map_err(alert)?;

    let mut expired = 0;
    for stale in waiting.into_iter().filter(|v| v.status_changed_at <= cutoff) {
      let _guard = self.inner.lock(stale.fact_id).await;
      let current = self.inner.current(stale.fact_id).await?;
      if current.version != stale.version {
        continue;
      }
      let record = self
        .inner
        .append(
          stale.fact_id,
          StatusChange::new(
            current.version,
            FactStatus::Rejected,
            format!("revision window of {window:?} elapsed without resubmission"),
          ),
        )
        .await?;
      self.inner.emit(LedgerEvent::RejectedFact {
        fact_id: record.fact_id,
        version: record.version,
        reason:  record.reason.clone(),
      });
      expired += 1;
    }
    if expired > 0 {
      tracing::info!(expired, "expired stale revision requests");
    }
    Ok(expired)
  }

  /// Restart review for every fact left PROPOSED or UNDER_REVIEW, e.g. by a
  /// crash. Returns the number of reviews started.
  pub async fn recover(&self) -> Result<usize> {
    let mut pending = self
      .inner
      .ledger
      .list_current(FactStatus::Proposed)
      .await
      .map_err(alert)?;
    pending.extend(
      self
        .inner
        .ledger
        .list_current(FactStatus::UnderReview)
        .await
        .map_err(alert)?,
    );

    let mut started = 0;
    for record in pending {
      match self.start_review(record.fact_id).await {
        Ok(_) => started += 1,
        Err(err) => {
          tracing::warn!(fact_id = %record.fact_id, %err, "could not restart review");
        }
      }
    }
    tracing::info!(started, "recovery complete");
    Ok(started)
  }
}

// ─── Internals ───────────────────────────────────────────────────────────────

impl<L, W> Inner<L, W>
where
  L: LedgerProposer + Clone + 'static,
  W: LedgerAppender + 'static,
{
  async fn lock(&self, fact_id: Uuid) -> OwnedMutexGuard<()> {
    let mutex = {
      let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
      locks.retain(|_, m| m.strong_count() > 0);
      match locks.get(&fact_id).and_then(Weak::upgrade) {
        Some(m) => m,
        None => {
          let m = Arc::new(AsyncMutex::new(()));
          locks.insert(fact_id, Arc::downgrade(&m));
          m
        }
      }
    };
    mutex.lock_owned().await
  }

  fn emit(&self, event: LedgerEvent) {
    tracing::info!(event = event.name(), fact_id = %event.fact_id(), "ledger event");
    // No subscribers is fine.
    let _ = self.events.send(event);
  }

  async fn current(&self, fact_id: Uuid) -> Result<FactVersion> {
    self
      .ledger
      .read_current(fact_id)
      .await
      .map_err(alert)?
      .ok_or(Error::FactNotFound(fact_id))
  }

  async fn append(&self, fact_id: Uuid, change: StatusChange) -> Result<FactVersion> {
    let status = change.status;
    let record = self
      .appender
      .append_version(fact_id, change)
      .await
      .map_err(alert)?;
    tracing::info!(%fact_id, version = record.version, %status, "transition recorded");
    Ok(record)
  }

  /// Whether a decision record for the critique's revision already carries
  /// its delta.
  async fn is_recorded(&self, critique: &Critique) -> Result<bool> {
    let history = self
      .ledger
      .read_history(critique.fact_id)
      .await
      .map_err(alert)?;
    Ok(history.iter().any(|h| {
      h.record.revision == critique.revision
        && h.record.deltas.iter().any(|d| {
          d.critique_id == critique.critique_id && d.role == critique.role
        })
    }))
  }

  fn submit(&self, critique: Critique) -> Result<SubmitOutcome> {
    let event = LedgerEvent::CritiqueReceived {
      fact_id:     critique.fact_id,
      revision:    critique.revision,
      critique_id: critique.critique_id,
      role:        critique.role.clone(),
      delta:       critique.delta,
    };
    let outcome = self.aggregator.submit(critique)?;
    match outcome {
      SubmitOutcome::Accepted => self.emit(event),
      SubmitOutcome::Duplicate => {
        tracing::debug!(fact_id = %event.fact_id(), "duplicate critique ignored");
      }
    }
    Ok(outcome)
  }

  fn dispatch_critics(self: &Arc<Self>, record: &FactVersion) {
    for critic in &self.critics {
      let critic = Arc::clone(critic);
      let inner = Arc::clone(self);
      let snapshot = record.clone();
      tokio::spawn(async move {
        let Some(role) = inner.aggregator.role(&critic.role().name).cloned() else {
          return;
        };
        match critic.evaluate(&snapshot).await {
          Ok(draft) => {
            let draft = CritiqueDraft { delta: role.clamp(draft.delta), ..draft };
            let critique =
              Critique::from_draft(snapshot.fact_id, snapshot.revision, role.name.clone(), draft);
            if let Err(err) = inner.submit(critique) {
              tracing::warn!(fact_id = %snapshot.fact_id, role = %role.name, %err, "critique dropped");
            }
          }
          Err(err) => {
            tracing::warn!(fact_id = %snapshot.fact_id, role = %role.name, %err, "critic failed");
          }
        }
      });
    }
  }

  async fn finish_review(&self, record: FactVersion) -> Result<FactVersion> {
    let expected = self.aggregator.role_names();
    let result = self
      .aggregator
      .await_combined(record.fact_id, record.revision, &expected, self.policy.critique_timeout)
      .await?;

    if result.partial {
      let timeout = Error::CritiqueTimeout {
        fact_id: record.fact_id,
        missing: result.missing_roles.clone(),
      };
      tracing::warn!(%timeout, "deciding on a partial critique result");
    }

    let now = Utc::now();
    let deltas = result
      .critiques
      .iter()
      .map(|c| ConfidenceDelta {
        critique_id: c.critique_id,
        role:        c.role.clone(),
        value:       c.delta,
        reason:      c.reason.clone(),
        recorded_at: now,
      })
      .collect();
    let findings = result
      .critiques
      .iter()
      .flat_map(|c| c.findings.iter().cloned())
      .collect();

    self.decide(record, deltas, findings, result.missing_roles).await
  }

  /// Append the decision for an UNDER_REVIEW record. `deltas` are the new
  /// critiques for this revision; previously recorded ones still count.
  async fn decide(
    &self,
    current: FactVersion,
    deltas: Vec<ConfidenceDelta>,
    findings: Vec<Finding>,
    missing_roles: Vec<String>,
  ) -> Result<FactVersion> {
    let policy = &self.policy;
    let combined = current.initial_confidence.combine(
      current.deltas.iter().chain(&deltas).map(|d| d.value),
    );
    let partial = !missing_roles.is_empty();

    // Incomplete facts go back for revision whatever they score.
    let mut outcome = if current.content.is_incomplete() {
      Outcome::NeedsRevision
    } else {
      policy.classify(combined, partial)
    };
    let exhausted =
      outcome == Outcome::NeedsRevision && !policy.may_revise(current.retry_count);
    if exhausted {
      outcome = Outcome::Reject;
    }

    match outcome {
      Outcome::Accept(annotation) => {
        self.accept_or_hold(current, deltas, combined, annotation).await
      }
      Outcome::NeedsRevision => {
        let reason = if partial {
          format!("critique timeout; missing roles {missing_roles:?}")
        } else if current.content.is_incomplete() {
          format!("incomplete retrieval at combined confidence {combined}")
        } else {
          format!(
            "combined confidence {combined} below {}",
            policy.accept_with_notes
          )
        };
        let record = self
          .append(
            current.fact_id,
            StatusChange::new(current.version, FactStatus::NeedsRevision, reason)
              .with_deltas(deltas),
          )
          .await?;
        self.emit(LedgerEvent::SearchRevisionRequest(RevisionRequest {
          fact_id: record.fact_id,
          revision: record.revision,
          proposer: record.proposer.agent.clone(),
          combined,
          deficiencies: findings,
          missing_roles,
          retries_remaining: policy.max_revisions.saturating_sub(record.retry_count),
        }));
        Ok(record)
      }
      Outcome::Reject => {
        let reason = if exhausted {
          format!(
            "revision limit of {} reached at combined confidence {combined}",
            policy.max_revisions
          )
        } else {
          format!(
            "combined confidence {combined} below revision floor {}",
            policy.revision_floor
          )
        };
        let record = self
          .append(
            current.fact_id,
            StatusChange::new(current.version, FactStatus::Rejected, reason)
              .with_deltas(deltas),
          )
          .await?;
        self.emit(LedgerEvent::RejectedFact {
          fact_id: record.fact_id,
          version: record.version,
          reason:  record.reason.clone(),
        });
        Ok(record)
      }
    }
  }

  /// Accept, unless another identity's accepted fact on the same subject and
  /// claim says something different and no adjudication covers it.
  async fn accept_or_hold(
    &self,
    current: FactVersion,
    deltas: Vec<ConfidenceDelta>,
    combined: Confidence,
    annotation: Annotation,
  ) -> Result<FactVersion> {
    let accepted = self
      .ledger
      .read_accepted_for_subject(current.subject_id)
      .await
      .map_err(alert)?;

    let previous_accepted = accepted
      .iter()
      .find(|v| v.fact_id == current.fact_id)
      .map(|v| v.seq);

    let mut relations = Relations {
      resolution: current.relations.resolution.clone(),
      ..Relations::default()
    };
    for other in accepted.iter().filter(|v| {
      v.fact_id != current.fact_id
        && v.kind == current.kind
        && v.content.claim == current.content.claim
    }) {
      if other.content.value == current.content.value {
        relations.corroborated_by.push(other.fact_id);
      } else {
        relations.conflicts_with.push(other.fact_id);
      }
    }

    if relations.has_unresolved_conflict() {
      let conflicting = relations.conflicts_with.clone();
      let conflict = Error::Conflict { fact_id: current.fact_id, conflicting: conflicting.clone() };
      tracing::warn!(%conflict, "holding fact for adjudication");
      let record = self
        .append(
          current.fact_id,
          StatusChange::new(
            current.version,
            FactStatus::ConflictHeld,
            format!("conflicts with accepted facts {conflicting:?}"),
          )
          .with_deltas(deltas)
          .with_relations(relations),
        )
        .await?;
      self.emit(LedgerEvent::ConflictDetected {
        fact_id:        record.fact_id,
        conflicts_with: conflicting,
      });
      return Ok(record);
    }

    let reason = match annotation {
      Annotation::AutoAccept => {
        format!("combined confidence {combined} >= {}", self.policy.auto_accept)
      }
      Annotation::AcceptWithNotes => {
        format!(
          "combined confidence {combined} >= {}; accepted with notes",
          self.policy.accept_with_notes
        )
      }
    };
    let record = self
      .append(
        current.fact_id,
        StatusChange::new(current.version, FactStatus::Accepted, reason)
          .with_annotation(annotation)
          .with_deltas(deltas)
          .with_relations(relations),
      )
      .await?;

    self.emit(LedgerEvent::AcceptedFact {
      fact_id: record.fact_id,
      version: record.version,
      seq: record.seq,
      combined: record.final_confidence,
      annotation,
    });
    if let Some(old_seq) = previous_accepted {
      self.emit(LedgerEvent::Superseded {
        fact_id: record.fact_id,
        old_seq,
        new_seq: record.seq,
      });
    }
    Ok(record)
  }
}
