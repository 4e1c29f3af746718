//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings,
//! confidences integer basis points, structured fields compact JSON. Any
//! value that fails to decode is reported as [`Error::Corrupt`]: the ledger
//! never guesses at a damaged record.

use std::str::FromStr;

use attest_core::{
  Confidence,
  fact::FactVersion,
  status::{Annotation, FactStatus, Supersession},
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(column: &str, s: &str) -> Result<Uuid> {
  Uuid::parse_str(s).map_err(|e| Error::Corrupt(format!("{column}: {e}")))
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(column: &str, s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Corrupt(format!("{column}: {e}")))
}

pub fn encode_confidence(c: Confidence) -> i64 { i64::from(c.basis_points()) }

pub fn decode_confidence(column: &str, bp: i64) -> Result<Confidence> {
  u16::try_from(bp)
    .ok()
    .and_then(Confidence::from_basis_points)
    .ok_or_else(|| Error::Corrupt(format!("{column}: {bp} basis points out of range")))
}

pub fn decode_u32(column: &str, n: i64) -> Result<u32> {
  u32::try_from(n).map_err(|_| Error::Corrupt(format!("{column}: {n} out of range")))
}

pub fn decode_enum<T: FromStr>(column: &str, s: &str) -> Result<T> {
  T::from_str(s).map_err(|_| Error::Corrupt(format!("{column}: unknown value {s:?}")))
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_json<T: serde::Serialize>(value: &T) -> Result<String> {
  Ok(serde_json::to_string(value)?)
}

pub fn decode_json<T: DeserializeOwned>(column: &str, s: &str) -> Result<T> {
  serde_json::from_str(s).map_err(|e| Error::Corrupt(format!("{column}: {e}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list shared by every query that reads whole version records.
/// [`RawVersion::from_row`] depends on this order.
pub const VERSION_COLUMNS: &str = "
  v.seq, v.fact_id, v.version, v.supersedes, v.revision, v.retry_count,
  v.kind, v.subject_id, v.content_json, v.citations_json, v.proposer_json,
  v.initial_confidence, v.deltas_json, v.final_confidence, v.status,
  v.annotation, v.reason, v.relations_json, v.created_at, v.status_changed_at";

/// Number of columns in [`VERSION_COLUMNS`]; joined columns start here.
pub const VERSION_COLUMN_COUNT: usize = 20;

/// Raw values read directly from a `fact_versions` row.
pub struct RawVersion {
  pub seq:                i64,
  pub fact_id:            String,
  pub version:            i64,
  pub supersedes:         Option<i64>,
  pub revision:           i64,
  pub retry_count:        i64,
  pub kind:               String,
  pub subject_id:         String,
  pub content_json:       String,
  pub citations_json:     String,
  pub proposer_json:      String,
  pub initial_confidence: i64,
  pub deltas_json:        String,
  pub final_confidence:   i64,
  pub status:             String,
  pub annotation:         Option<String>,
  pub reason:             String,
  pub relations_json:     String,
  pub created_at:         String,
  pub status_changed_at:  String,
}

impl RawVersion {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      seq:                row.get(0)?,
      fact_id:            row.get(1)?,
      version:            row.get(2)?,
      supersedes:         row.get(3)?,
      revision:           row.get(4)?,
      retry_count:        row.get(5)?,
      kind:               row.get(6)?,
      subject_id:         row.get(7)?,
      content_json:       row.get(8)?,
      citations_json:     row.get(9)?,
      proposer_json:      row.get(10)?,
      initial_confidence: row.get(11)?,
      deltas_json:        row.get(12)?,
      final_confidence:   row.get(13)?,
      status:             row.get(14)?,
      annotation:         row.get(15)?,
      reason:             row.get(16)?,
      relations_json:     row.get(17)?,
      created_at:         row.get(18)?,
      status_changed_at:  row.get(19)?,
    })
  }

  pub fn into_version(self) -> Result<FactVersion> {
    let record = FactVersion {
      seq:                self.seq,
      fact_id:            decode_uuid("fact_id", &self.fact_id)?,
      version:            decode_u32("version", self.version)?,
      supersedes:         self.supersedes,
      revision:           decode_u32("revision", self.revision)?,
      retry_count:        decode_u32("retry_count", self.retry_count)?,
      kind:               decode_enum("kind", &self.kind)?,
      subject_id:         decode_uuid("subject_id", &self.subject_id)?,
      content:            decode_json("content_json", &self.content_json)?,
      citations:          decode_json("citations_json", &self.citations_json)?,
      proposer:           decode_json("proposer_json", &self.proposer_json)?,
      initial_confidence: decode_confidence(
        "initial_confidence",
        self.initial_confidence,
      )?,
      deltas:             decode_json("deltas_json", &self.deltas_json)?,
      final_confidence:   decode_confidence("final_confidence", self.final_confidence)?,
      status:             decode_enum::<FactStatus>("status", &self.status)?,
      annotation:         self
        .annotation
        .as_deref()
        .map(|a| decode_enum::<Annotation>("annotation", a))
        .transpose()?,
      reason:             self.reason,
      relations:          decode_json("relations_json", &self.relations_json)?,
      created_at:         decode_dt("created_at", &self.created_at)?,
      status_changed_at:  decode_dt("status_changed_at", &self.status_changed_at)?,
    };

    if record.reason.trim().is_empty() {
      return Err(Error::Corrupt(format!("record {} has an empty reason", record.seq)));
    }
    if record.final_confidence != record.combined() {
      return Err(Error::Corrupt(format!(
        "record {} final confidence {} does not match its deltas",
        record.seq, record.final_confidence
      )));
    }
    Ok(record)
  }
}

/// Encoded column values for inserting a version record.
pub struct EncodedVersion {
  pub fact_id:            String,
  pub version:            i64,
  pub supersedes:         Option<i64>,
  pub revision:           i64,
  pub retry_count:        i64,
  pub kind:               String,
  pub subject_id:         String,
  pub content_json:       String,
  pub citations_json:     String,
  pub proposer_json:      String,
  pub initial_confidence: i64,
  pub deltas_json:        String,
  pub final_confidence:   i64,
  pub status:             String,
  pub annotation:         Option<String>,
  pub reason:             String,
  pub relations_json:     String,
  pub created_at:         String,
  pub status_changed_at:  String,
}

impl EncodedVersion {
  pub fn encode(record: &FactVersion) -> Result<Self> {
    Ok(Self {
      fact_id:            encode_uuid(record.fact_id),
      version:            i64::from(record.version),
      supersedes:         record.supersedes,
      revision:           i64::from(record.revision),
      retry_count:        i64::from(record.retry_count),
      kind:               record.kind.as_ref().to_owned(),
      subject_id:         encode_uuid(record.subject_id),
      content_json:       encode_json(&record.content)?,
      citations_json:     encode_json(&record.citations)?,
      proposer_json:      encode_json(&record.proposer)?,
      initial_confidence: encode_confidence(record.initial_confidence),
      deltas_json:        encode_json(&record.deltas)?,
      final_confidence:   encode_confidence(record.final_confidence),
      status:             record.status.as_ref().to_owned(),
      annotation:         record.annotation.map(|a| a.as_ref().to_owned()),
      reason:             record.reason.clone(),
      relations_json:     encode_json(&record.relations)?,
      created_at:         encode_dt(record.created_at),
      status_changed_at:  encode_dt(record.status_changed_at),
    })
  }

  /// Insert into `fact_versions` and return the assigned `seq`.
  pub fn insert(&self, conn: &rusqlite::Connection) -> rusqlite::Result<i64> {
    conn.execute(
      "INSERT INTO fact_versions (
         fact_id, version, supersedes, revision, retry_count, kind, subject_id,
         content_json, citations_json, proposer_json, initial_confidence,
         deltas_json, final_confidence, status, annotation, reason,
         relations_json, created_at, status_changed_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                 ?15, ?16, ?17, ?18, ?19)",
      rusqlite::params![
        self.fact_id,
        self.version,
        self.supersedes,
        self.revision,
        self.retry_count,
        self.kind,
        self.subject_id,
        self.content_json,
        self.citations_json,
        self.proposer_json,
        self.initial_confidence,
        self.deltas_json,
        self.final_confidence,
        self.status,
        self.annotation,
        self.reason,
        self.relations_json,
        self.created_at,
        self.status_changed_at,
      ],
    )?;
    Ok(conn.last_insert_rowid())
  }
}

/// Raw values of a `supersessions` row joined onto a version.
pub struct RawSupersession {
  pub new_seq:     i64,
  pub recorded_at: String,
}

impl RawSupersession {
  pub fn into_supersession(self, fact_id: Uuid, old_seq: i64) -> Result<Supersession> {
    Ok(Supersession {
      fact_id,
      old_seq,
      new_seq: self.new_seq,
      recorded_at: decode_dt("supersessions.recorded_at", &self.recorded_at)?,
    })
  }
}
