//! Fact types: the fundamental unit of the Attest ledger.
//!
//! A fact identity names one claim about one subject for its whole lifetime.
//! Every change to the claim (content revision or review outcome) is a new,
//! immutable [`FactVersion`] appended to the ledger; nothing is updated in
//! place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use uuid::Uuid;

use crate::{
  Confidence, Delta, Error, Result,
  status::{Annotation, FactStatus},
};

// ─── Classification ──────────────────────────────────────────────────────────

/// What sort of claim a fact makes. The discriminant is stored in the `kind`
/// column of the version log.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FactKind {
  Name,
  Birth,
  Baptism,
  Death,
  Burial,
  Marriage,
  Residence,
  Occupation,
  Parentage,
  Attribute,
}

/// Where a cited source sits in the source hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLevel {
  /// Created at or near the time of the event.
  Primary,
  /// Derived from or interpreting a primary source.
  Secondary,
  /// Indexes, databases, compiled trees.
  Tertiary,
}

/// How a citation bears on the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceType {
  /// Explicitly answers the question.
  Direct,
  /// Requires inference.
  Indirect,
  /// Absence of an expected record.
  Negative,
}

// ─── Citations ───────────────────────────────────────────────────────────────

/// A reference to the evidence backing a fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
  pub source:        String,
  pub level:         SourceLevel,
  pub evidence:      EvidenceType,
  /// Page, entry number, film/item, or URL within the source.
  #[serde(default)]
  pub locator:       Option<String>,
  /// The value this citation attests, if it states one.
  #[serde(default)]
  pub attests:       Option<String>,
  /// Original record rather than a transcript or derivative.
  #[serde(default)]
  pub is_original:   bool,
}

// ─── Provenance ──────────────────────────────────────────────────────────────

/// How the proposer obtained the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
  #[default]
  Manual,
  RecordSearch,
  Transcription,
  Translation,
  Inference,
}

/// The collaborator that originated a fact or revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposer {
  pub agent:  String,
  #[serde(default)]
  pub method: ExtractionMethod,
}

// ─── Content ─────────────────────────────────────────────────────────────────

/// Marks a fact recorded from an upstream retrieval that never completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incomplete {
  pub attempts:   u32,
  pub last_error: String,
}

/// The structured claim.
///
/// `claim` is the key that two facts about the same subject must share to
/// corroborate or contradict each other (e.g. `"birth_date"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactContent {
  pub claim:      String,
  pub value:      serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub incomplete: Option<Incomplete>,
}

impl FactContent {
  pub fn new(claim: impl Into<String>, value: serde_json::Value) -> Self {
    Self { claim: claim.into(), value, incomplete: None }
  }

  pub fn is_incomplete(&self) -> bool { self.incomplete.is_some() }

  fn validate(&self) -> Result<()> {
    if self.claim.trim().is_empty() {
      return Err(Error::validation("content.claim must not be empty"));
    }
    if self.value.is_null() {
      return Err(Error::validation("content.value is required"));
    }
    Ok(())
  }
}

/// One signed adjustment recorded against a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDelta {
  pub critique_id: Uuid,
  pub role:        String,
  pub value:       Delta,
  pub reason:      String,
  pub recorded_at: DateTime<Utc>,
}

/// Corroboration and conflict links to other fact identities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relations {
  #[serde(default)]
  pub corroborated_by: Vec<Uuid>,
  #[serde(default)]
  pub conflicts_with:  Vec<Uuid>,
  /// Adjudication note; present once the conflicts above were resolved.
  #[serde(default)]
  pub resolution:      Option<String>,
}

impl Relations {
  pub fn has_unresolved_conflict(&self) -> bool {
    !self.conflicts_with.is_empty() && self.resolution.is_none()
  }
}

// ─── FactVersion ─────────────────────────────────────────────────────────────

/// One immutable snapshot of a fact. Once written, no field is ever updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactVersion {
  /// Ledger append sequence; the record key.
  pub seq:                i64,
  pub fact_id:            Uuid,
  pub version:            u32,
  /// Record key of the version this one replaces; `None` for version 1.
  pub supersedes:         Option<i64>,
  /// Content revision; bumped only by a resubmission.
  pub revision:           u32,
  /// Resubmissions consumed in the current review cycle.
  pub retry_count:        u32,
  pub kind:               FactKind,
  pub subject_id:         Uuid,
  pub content:            FactContent,
  pub citations:          Vec<Citation>,
  pub proposer:           Proposer,
  pub initial_confidence: Confidence,
  pub deltas:             Vec<ConfidenceDelta>,
  pub final_confidence:   Confidence,
  pub status:             FactStatus,
  pub annotation:         Option<Annotation>,
  pub reason:             String,
  pub relations:          Relations,
  /// When the identity was first proposed; identical on every version.
  pub created_at:         DateTime<Utc>,
  pub status_changed_at:  DateTime<Utc>,
}

impl FactVersion {
  /// `clamp(initial + Σ deltas)` recomputed from the recorded deltas.
  pub fn combined(&self) -> Confidence {
    self
      .initial_confidence
      .combine(self.deltas.iter().map(|d| d.value))
  }
}

// ─── NewFact ─────────────────────────────────────────────────────────────────

/// Input to [`crate::ledger::LedgerProposer::propose`].
/// Identity, timestamps and status are always set by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFact {
  pub subject_id:         Uuid,
  pub kind:               FactKind,
  pub content:            FactContent,
  pub citations:          Vec<Citation>,
  pub proposer:           Proposer,
  pub initial_confidence: Confidence,
}

impl NewFact {
  pub fn validate(&self) -> Result<()> {
    self.content.validate()?;
    validate_citations(&self.citations)?;
    if self.proposer.agent.trim().is_empty() {
      return Err(Error::validation("proposer.agent must not be empty"));
    }
    Ok(())
  }
}

/// New content submitted by a proposer for the next review cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
  pub content:            FactContent,
  pub citations:          Vec<Citation>,
  pub initial_confidence: Confidence,
}

impl Revision {
  pub fn validate(&self) -> Result<()> {
    self.content.validate()?;
    validate_citations(&self.citations)
  }
}

fn validate_citations(citations: &[Citation]) -> Result<()> {
  if citations.is_empty() {
    return Err(Error::validation("at least one citation is required"));
  }
  if citations.iter().any(|c| c.source.trim().is_empty()) {
    return Err(Error::validation("citation source must not be empty"));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn citation() -> Citation {
    Citation {
      source:      "Parish register, St. Bavo".into(),
      level:       SourceLevel::Primary,
      evidence:    EvidenceType::Direct,
      locator:     Some("fol. 12r".into()),
      attests:     Some("1850-03-02".into()),
      is_original: true,
    }
  }

  fn new_fact() -> NewFact {
    NewFact {
      subject_id:         Uuid::new_v4(),
      kind:               FactKind::Birth,
      content:            FactContent::new("birth_date", json!("1850-03-02")),
      citations:          vec![citation()],
      proposer:           Proposer {
        agent:  "records-agent".into(),
        method: ExtractionMethod::RecordSearch,
      },
      initial_confidence: Confidence::from_f64(0.8).unwrap(),
    }
  }

  #[test]
  fn valid_fact_passes() { new_fact().validate().unwrap(); }

  #[test]
  fn empty_citations_rejected() {
    let mut f = new_fact();
    f.citations.clear();
    assert!(matches!(f.validate(), Err(Error::Validation(_))));
  }

  #[test]
  fn missing_content_rejected() {
    let mut f = new_fact();
    f.content.value = serde_json::Value::Null;
    assert!(matches!(f.validate(), Err(Error::Validation(_))));

    let mut f = new_fact();
    f.content.claim = "  ".into();
    assert!(matches!(f.validate(), Err(Error::Validation(_))));
  }

  #[test]
  fn kind_discriminant_round_trip() {
    use std::str::FromStr;
    assert_eq!(FactKind::Marriage.as_ref(), "marriage");
    assert_eq!(FactKind::from_str("parentage").unwrap(), FactKind::Parentage);
  }

  #[test]
  fn confidence_out_of_range_in_json_is_rejected() {
    let mut body = serde_json::to_value(new_fact()).unwrap();
    body["initial_confidence"] = json!(1.4);
    assert!(serde_json::from_value::<NewFact>(body).is_err());
  }
}
