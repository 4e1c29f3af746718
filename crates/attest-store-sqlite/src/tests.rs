//! Integration tests for the SQLite ledger and projections, against
//! in-memory databases.

use attest_core::{
  Confidence,
  fact::{
    Citation, EvidenceType, FactContent, FactKind, NewFact, Proposer, Revision,
    SourceLevel,
  },
  ledger::{
    AcceptedEvent, GENESIS, LedgerAppender, LedgerProposer, LedgerReader, StatusChange,
  },
  projection::ProjectionStore,
  status::{Annotation, FactStatus},
};
use serde_json::json;
use uuid::Uuid;

use crate::{Error, SqliteAppender, SqliteLedger, SqliteProjections};

async fn ledger() -> (SqliteLedger, SqliteAppender) {
  SqliteLedger::open_in_memory().await.expect("in-memory ledger")
}

async fn projections() -> SqliteProjections {
  SqliteProjections::open_in_memory()
    .await
    .expect("in-memory projections")
}

fn citation() -> Citation {
  Citation {
    source:      "Baptismal register, Sint-Jacobskerk".into(),
    level:       SourceLevel::Primary,
    evidence:    EvidenceType::Direct,
    locator:     Some("entry 214".into()),
    attests:     Some("1850-03-02".into()),
    is_original: true,
  }
}

fn birth_fact(subject_id: Uuid, date: &str) -> NewFact {
  NewFact {
    subject_id,
    kind: FactKind::Birth,
    content: FactContent::new("birth_date", json!(date)),
    citations: vec![citation()],
    proposer: Proposer {
      agent:  "records-agent".into(),
      method: Default::default(),
    },
    initial_confidence: Confidence::from_f64(0.9).unwrap(),
  }
}

/// Drive a freshly proposed fact to ACCEPTED; returns the accepted record.
async fn accept(
  l: &SqliteLedger,
  a: &SqliteAppender,
  fact_id: Uuid,
) -> attest_core::fact::FactVersion {
  let current = l.read_current(fact_id).await.unwrap().unwrap();
  let review = a
    .append_version(
      fact_id,
      StatusChange::new(current.version, FactStatus::UnderReview, "review opened"),
    )
    .await
    .unwrap();
  a.append_version(
    fact_id,
    StatusChange::new(review.version, FactStatus::Accepted, "auto-accept")
      .with_annotation(Annotation::AutoAccept),
  )
  .await
  .unwrap()
}

// ─── Proposals ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn propose_writes_version_one() {
  let (l, _a) = ledger().await;
  let proposed = l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();

  assert_eq!(proposed.version, 1);
  assert_eq!(proposed.status, FactStatus::Proposed);
  assert!(proposed.seq > GENESIS);
  assert!(proposed.supersedes.is_none());

  let current = l.read_current(proposed.fact_id).await.unwrap().unwrap();
  assert_eq!(current, proposed);
}

#[tokio::test]
async fn propose_rejects_missing_citations() {
  let (l, _a) = ledger().await;
  let mut input = birth_fact(Uuid::new_v4(), "1850-03-02");
  input.citations.clear();

  let err = l.propose(input).await.unwrap_err();
  assert!(matches!(err, Error::Core(attest_core::Error::Validation(_))));
}

#[tokio::test]
async fn read_current_missing_returns_none() {
  let (l, _a) = ledger().await;
  assert!(l.read_current(Uuid::new_v4()).await.unwrap().is_none());
  assert!(l.read_history(Uuid::new_v4()).await.unwrap().is_empty());
}

// ─── Appends ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn history_is_contiguous_and_linked() {
  let (l, a) = ledger().await;
  let proposed = l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();
  accept(&l, &a, proposed.fact_id).await;

  let history = l.read_history(proposed.fact_id).await.unwrap();
  let versions: Vec<u32> = history.iter().map(|h| h.record.version).collect();
  assert_eq!(versions, vec![1, 2, 3]);
  assert_eq!(history[1].record.supersedes, Some(history[0].record.seq));
  assert_eq!(history[2].record.supersedes, Some(history[1].record.seq));
  assert_eq!(history[2].record.status, FactStatus::Accepted);
  assert_eq!(history[2].record.annotation, Some(Annotation::AutoAccept));
  // Content survives every status transition untouched.
  assert!(history.iter().all(|h| h.record.content == proposed.content));
}

#[tokio::test]
async fn stale_expected_version_is_a_concurrency_conflict() {
  let (l, a) = ledger().await;
  let proposed = l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();
  a.append_version(
    proposed.fact_id,
    StatusChange::new(1, FactStatus::UnderReview, "review opened"),
  )
  .await
  .unwrap();

  let err = a
    .append_version(
      proposed.fact_id,
      StatusChange::new(1, FactStatus::UnderReview, "review opened again"),
    )
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    Error::ConcurrencyConflict { expected: 1, actual: 2, .. }
  ));
  assert_eq!(l.read_history(proposed.fact_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn append_to_unknown_fact_is_not_found() {
  let (_l, a) = ledger().await;
  let id = Uuid::new_v4();
  let err = a
    .append_version(id, StatusChange::new(1, FactStatus::UnderReview, "review"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::FactNotFound(missing) if missing == id));
}

#[tokio::test]
async fn illegal_transition_writes_nothing() {
  let (l, a) = ledger().await;
  let proposed = l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();

  let err = a
    .append_version(
      proposed.fact_id,
      StatusChange::new(1, FactStatus::Accepted, "skipping review"),
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(attest_core::Error::Validation(_))));
  assert_eq!(l.read_history(proposed.fact_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn versions_cannot_be_updated_or_deleted() {
  let (l, _a) = ledger().await;
  l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();

  let update = l
    .execute_raw("UPDATE fact_versions SET reason = 'edited' WHERE version = 1")
    .await;
  assert!(update.is_err());
  let delete = l.execute_raw("DELETE FROM fact_versions").await;
  assert!(delete.is_err());
}

// ─── Accepted reads & supersession ───────────────────────────────────────────

#[tokio::test]
async fn accepted_for_subject_returns_only_accepted() {
  let (l, a) = ledger().await;
  let subject = Uuid::new_v4();
  let first = l.propose(birth_fact(subject, "1850-03-02")).await.unwrap();
  l.propose(birth_fact(subject, "1850-03-04")).await.unwrap();
  l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();
  accept(&l, &a, first.fact_id).await;

  let accepted = l.read_accepted_for_subject(subject).await.unwrap();
  assert_eq!(accepted.len(), 1);
  assert_eq!(accepted[0].fact_id, first.fact_id);
  assert_eq!(accepted[0].status, FactStatus::Accepted);
}

#[tokio::test]
async fn re_acceptance_supersedes_previous_accepted_version() {
  let (l, a) = ledger().await;
  let subject = Uuid::new_v4();
  let proposed = l.propose(birth_fact(subject, "1850-03-02")).await.unwrap();
  let first_accept = accept(&l, &a, proposed.fact_id).await;

  a.append_version(
    proposed.fact_id,
    StatusChange::new(first_accept.version, FactStatus::Proposed, "new evidence")
      .with_resubmission(
        Revision {
          content:            FactContent::new("birth_date", json!("1850-03-01")),
          citations:          vec![citation()],
          initial_confidence: Confidence::from_f64(0.95).unwrap(),
        },
        0,
      ),
  )
  .await
  .unwrap();
  let second_accept = accept(&l, &a, proposed.fact_id).await;
  assert_eq!(second_accept.revision, 2);

  let history = l.read_history(proposed.fact_id).await.unwrap();
  let old = history
    .iter()
    .find(|h| h.record.seq == first_accept.seq)
    .unwrap();
  assert_eq!(old.effective_status(), FactStatus::Superseded);
  assert_eq!(
    old.superseded_by.as_ref().map(|s| s.new_seq),
    Some(second_accept.seq)
  );
  let newest = history.last().unwrap();
  assert_eq!(newest.effective_status(), FactStatus::Accepted);

  let accepted = l.read_accepted_for_subject(subject).await.unwrap();
  assert_eq!(accepted.len(), 1);
  assert_eq!(accepted[0].seq, second_accept.seq);

  let stream = l.stream_accepted(GENESIS, 10).await.unwrap();
  assert_eq!(stream.len(), 2);
  assert_eq!(stream[0].supersedes_accepted, None);
  assert_eq!(stream[1].supersedes_accepted, Some(first_accept.seq));
}

#[tokio::test]
async fn stream_accepted_resumes_from_cursor() {
  let (l, a) = ledger().await;
  let mut accepted_seqs = Vec::new();
  for day in 1..=4 {
    let p = l
      .propose(birth_fact(Uuid::new_v4(), &format!("1850-03-0{day}")))
      .await
      .unwrap();
    accepted_seqs.push(accept(&l, &a, p.fact_id).await.seq);
  }

  let first_page = l.stream_accepted(GENESIS, 2).await.unwrap();
  assert_eq!(first_page.len(), 2);
  let resume = first_page.last().unwrap().cursor;
  let rest = l.stream_accepted(resume, 10).await.unwrap();

  let all: Vec<i64> = first_page.iter().chain(&rest).map(|e| e.cursor).collect();
  assert_eq!(all, accepted_seqs);
  assert!(l.stream_accepted(*accepted_seqs.last().unwrap(), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn list_current_filters_by_status() {
  let (l, a) = ledger().await;
  let p1 = l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();
  let p2 = l.propose(birth_fact(Uuid::new_v4(), "1850-03-03")).await.unwrap();
  a.append_version(p2.fact_id, StatusChange::new(1, FactStatus::UnderReview, "review"))
    .await
    .unwrap();

  let proposed = l.list_current(FactStatus::Proposed).await.unwrap();
  assert_eq!(proposed.iter().map(|v| v.fact_id).collect::<Vec<_>>(), vec![p1.fact_id]);
  let reviewing = l.list_current(FactStatus::UnderReview).await.unwrap();
  assert_eq!(reviewing.iter().map(|v| v.fact_id).collect::<Vec<_>>(), vec![p2.fact_id]);
}

// ─── Corruption ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn tampered_confidence_is_reported_as_corruption() {
  let (l, _a) = ledger().await;
  let p = l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();
  l.execute_raw(
    "DROP TRIGGER fact_versions_no_update;
     UPDATE fact_versions SET final_confidence = 1 WHERE version = 1;",
  )
  .await
  .unwrap();

  let err = l.read_current(p.fact_id).await.unwrap_err();
  assert!(matches!(err, Error::Corrupt(_)));
}

#[tokio::test]
async fn broken_version_chain_is_reported_as_corruption() {
  let (l, a) = ledger().await;
  let p = l.propose(birth_fact(Uuid::new_v4(), "1850-03-02")).await.unwrap();
  accept(&l, &a, p.fact_id).await;
  l.execute_raw(
    "DROP TRIGGER fact_versions_no_update;
     UPDATE fact_versions SET version = 7 WHERE version = 2;",
  )
  .await
  .unwrap();

  let err = l.read_history(p.fact_id).await.unwrap_err();
  assert!(matches!(err, Error::Corrupt(_)));
}

// ─── Projections ─────────────────────────────────────────────────────────────

async fn accepted_events() -> Vec<AcceptedEvent> {
  let (l, a) = ledger().await;
  let subject = Uuid::new_v4();
  let p1 = l.propose(birth_fact(subject, "1850-03-02")).await.unwrap();
  let first = accept(&l, &a, p1.fact_id).await;
  a.append_version(
    p1.fact_id,
    StatusChange::new(first.version, FactStatus::Proposed, "corrected date")
      .with_resubmission(
        Revision {
          content:            FactContent::new("birth_date", json!("1850-03-09 Haarlem")),
          citations:          vec![citation()],
          initial_confidence: Confidence::from_f64(0.9).unwrap(),
        },
        0,
      ),
  )
  .await
  .unwrap();
  accept(&l, &a, p1.fact_id).await;
  let p2 = l.propose(birth_fact(Uuid::new_v4(), "1851-07-14")).await.unwrap();
  accept(&l, &a, p2.fact_id).await;
  l.stream_accepted(GENESIS, 100).await.unwrap()
}

#[tokio::test]
async fn projection_apply_is_idempotent() {
  let events = accepted_events().await;
  let p = projections().await;
  p.apply_batch(&events).await.unwrap();
  let once = p.snapshot().await.unwrap();
  p.apply_batch(&events).await.unwrap();
  p.apply_batch(&events[..1]).await.unwrap();
  let again = p.snapshot().await.unwrap();

  assert_eq!(once, again);
  assert_eq!(once.cursor, events.last().unwrap().cursor);
  assert_eq!(once.summary.len(), 2);
  assert_eq!(once.sync_feed.len(), 3);
}

#[tokio::test]
async fn projection_order_of_batches_does_not_matter() {
  let events = accepted_events().await;

  let forward = projections().await;
  for e in &events {
    forward.apply_batch(std::slice::from_ref(e)).await.unwrap();
  }
  let backward = projections().await;
  for e in events.iter().rev() {
    backward.apply_batch(std::slice::from_ref(e)).await.unwrap();
  }

  assert_eq!(forward.snapshot().await.unwrap(), backward.snapshot().await.unwrap());
}

#[tokio::test]
async fn search_only_matches_current_summary_version() {
  let events = accepted_events().await;
  let p = projections().await;
  p.apply_batch(&events).await.unwrap();

  let hits = p.search("haarlem 1850", 10).await.unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].version, events[1].record.version);

  // "02" only occurred in the superseded value.
  assert!(p.search("03 02", 10).await.unwrap().is_empty());
  assert!(p.search("", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_feed_pages_in_ledger_order() {
  let events = accepted_events().await;
  let p = projections().await;
  p.apply_batch(&events).await.unwrap();

  let page = p.sync_feed(GENESIS, 2).await.unwrap();
  assert_eq!(page.len(), 2);
  let rest = p.sync_feed(page[1].seq, 10).await.unwrap();
  assert_eq!(rest.len(), 1);
  assert_eq!(rest[0].seq, events[2].cursor);
}

#[tokio::test]
async fn clear_resets_cursor_and_content() {
  let events = accepted_events().await;
  let p = projections().await;
  p.apply_batch(&events).await.unwrap();
  p.clear().await.unwrap();

  let snap = p.snapshot().await.unwrap();
  assert_eq!(snap.cursor, GENESIS);
  assert!(snap.summary.is_empty());
  assert!(snap.postings.is_empty());
  assert!(snap.sync_feed.is_empty());
}
