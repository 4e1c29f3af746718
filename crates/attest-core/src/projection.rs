//! Derived, rebuildable read models over the accepted-fact stream.
//!
//! Nothing here is authoritative. Every store is fed exclusively from
//! [`AcceptedEvent`]s and every write is an idempotent upsert keyed by
//! `(fact_id, version)`, so replaying the stream in any grouping yields the
//! same content.

use std::{collections::BTreeSet, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Confidence,
  fact::{FactKind, FactVersion},
  ledger::AcceptedEvent,
  status::Annotation,
};

// ─── Rows ────────────────────────────────────────────────────────────────────

/// Relational summary: the highest accepted version of one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
  pub fact_id:     Uuid,
  pub version:     u32,
  pub seq:         i64,
  pub subject_id:  Uuid,
  pub kind:        FactKind,
  pub claim:       String,
  pub value:       serde_json::Value,
  pub confidence:  Confidence,
  pub annotation:  Option<Annotation>,
  pub accepted_at: DateTime<Utc>,
}

impl SummaryRow {
  pub fn from_record(record: &FactVersion) -> Self {
    Self {
      fact_id:     record.fact_id,
      version:     record.version,
      seq:         record.seq,
      subject_id:  record.subject_id,
      kind:        record.kind,
      claim:       record.content.claim.clone(),
      value:       record.content.value.clone(),
      confidence:  record.final_confidence,
      annotation:  record.annotation,
      accepted_at: record.status_changed_at,
    }
  }
}

/// Search index posting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Posting {
  pub token:   String,
  pub fact_id: Uuid,
  pub version: u32,
}

/// External-sync outbox entry; one per accepted `(fact_id, version)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEntry {
  pub seq:     i64,
  pub fact_id: Uuid,
  pub version: u32,
  pub payload: serde_json::Value,
}

/// Full, deterministically ordered content of every derived store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
  pub cursor:    i64,
  pub summary:   Vec<SummaryRow>,
  pub postings:  Vec<Posting>,
  pub sync_feed: Vec<SyncEntry>,
}

impl ProjectionSnapshot {
  /// Canonical byte encoding used for equality checks and digests.
  pub fn to_bytes(&self) -> crate::Result<Vec<u8>> { Ok(serde_json::to_vec(self)?) }
}

// ─── Tokenisation ────────────────────────────────────────────────────────────

/// Lowercased alphanumeric tokens (two characters or more) drawn from the
/// kind, claim and every string or number inside the value.
pub fn tokens(record: &FactVersion) -> BTreeSet<String> {
  let mut out = BTreeSet::new();
  push_tokens(record.kind.as_ref(), &mut out);
  push_tokens(&record.content.claim, &mut out);
  collect_value(&record.content.value, &mut out);
  out
}

/// Tokens of a free-text query, normalised the same way as indexed content.
pub fn query_tokens(text: &str) -> BTreeSet<String> {
  let mut out = BTreeSet::new();
  push_tokens(text, &mut out);
  out
}

fn collect_value(value: &serde_json::Value, out: &mut BTreeSet<String>) {
  match value {
    serde_json::Value::String(s) => push_tokens(s, out),
    serde_json::Value::Number(n) => push_tokens(&n.to_string(), out),
    serde_json::Value::Array(items) => {
      items.iter().for_each(|v| collect_value(v, out));
    }
    serde_json::Value::Object(map) => {
      map.values().for_each(|v| collect_value(v, out));
    }
    serde_json::Value::Bool(_) | serde_json::Value::Null => {}
  }
}

fn push_tokens(text: &str, out: &mut BTreeSet<String>) {
  text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|t| t.chars().count() >= 2)
    .for_each(|t| {
      out.insert(t.to_lowercase());
    });
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Backend for the derived stores.
pub trait ProjectionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + Into<crate::Error> + 'static;

  /// Remove all derived content and reset the cursor to genesis.
  fn clear(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Apply events atomically across every derived store. Re-applying an
  /// event already present changes nothing.
  fn apply_batch<'a>(
    &'a self,
    events: &'a [AcceptedEvent],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Highest ledger cursor applied so far.
  fn cursor(&self) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  fn snapshot(
    &self,
  ) -> impl Future<Output = Result<ProjectionSnapshot, Self::Error>> + Send + '_;

  /// Current summaries whose tokens contain every token in `text`.
  fn search<'a>(
    &'a self,
    text: &'a str,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<SummaryRow>, Self::Error>> + Send + 'a;

  /// Outbox entries after `after`, in ledger order.
  fn sync_feed(
    &self,
    after: i64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<SyncEntry>, Self::Error>> + Send + '_;
}
