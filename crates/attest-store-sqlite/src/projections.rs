//! [`SqliteProjections`]: the derived stores, kept in their own SQLite
//! file so they can be deleted and rebuilt without touching the ledger.

use std::{collections::BTreeSet, path::Path};

use attest_core::{
  ledger::{AcceptedEvent, GENESIS},
  projection::{
    Posting, ProjectionSnapshot, ProjectionStore, SummaryRow, SyncEntry, query_tokens,
    tokens,
  },
};
use rusqlite::OptionalExtension as _;

use crate::{
  Error, Result,
  encode::{
    decode_confidence, decode_dt, decode_enum, decode_json, decode_u32, decode_uuid,
    encode_confidence, encode_dt, encode_json, encode_uuid,
  },
  schema::PROJECTION_SCHEMA,
};

const CURSOR_KEY: &str = "cursor";

const SUMMARY_COLUMNS: &str = "f.fact_id, f.version, f.seq, f.subject_id, f.kind, \
                               f.claim, f.value_json, f.confidence, f.annotation, \
                               f.accepted_at";

/// SQLite-backed relational summary, search postings and sync outbox.
#[derive(Clone)]
pub struct SqliteProjections {
  conn: tokio_rusqlite::Connection,
}

impl SqliteProjections {
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(PROJECTION_SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn })
  }
}

// ─── Row encoding ────────────────────────────────────────────────────────────

struct RawSummary {
  fact_id:     String,
  version:     i64,
  seq:         i64,
  subject_id:  String,
  kind:        String,
  claim:       String,
  value_json:  String,
  confidence:  i64,
  annotation:  Option<String>,
  accepted_at: String,
}

impl RawSummary {
  fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      fact_id:     row.get(0)?,
      version:     row.get(1)?,
      seq:         row.get(2)?,
      subject_id:  row.get(3)?,
      kind:        row.get(4)?,
      claim:       row.get(5)?,
      value_json:  row.get(6)?,
      confidence:  row.get(7)?,
      annotation:  row.get(8)?,
      accepted_at: row.get(9)?,
    })
  }

  fn into_row(self) -> Result<SummaryRow> {
    Ok(SummaryRow {
      fact_id:     decode_uuid("fact_summary.fact_id", &self.fact_id)?,
      version:     decode_u32("fact_summary.version", self.version)?,
      seq:         self.seq,
      subject_id:  decode_uuid("fact_summary.subject_id", &self.subject_id)?,
      kind:        decode_enum("fact_summary.kind", &self.kind)?,
      claim:       self.claim,
      value:       decode_json("fact_summary.value_json", &self.value_json)?,
      confidence:  decode_confidence("fact_summary.confidence", self.confidence)?,
      annotation:  self
        .annotation
        .as_deref()
        .map(|a| decode_enum("fact_summary.annotation", a))
        .transpose()?,
      accepted_at: decode_dt("fact_summary.accepted_at", &self.accepted_at)?,
    })
  }
}

/// Everything one accepted event writes, pre-encoded off the SQLite thread.
struct EncodedEvent {
  cursor:      i64,
  fact_id:     String,
  version:     i64,
  seq:         i64,
  subject_id:  String,
  kind:        String,
  claim:       String,
  value_json:  String,
  confidence:  i64,
  annotation:  Option<String>,
  accepted_at: String,
  tokens:      BTreeSet<String>,
  payload:     String,
}

impl EncodedEvent {
  fn encode(event: &AcceptedEvent) -> Result<Self> {
    let record = &event.record;
    let summary = SummaryRow::from_record(record);
    Ok(Self {
      cursor:      event.cursor,
      fact_id:     encode_uuid(record.fact_id),
      version:     i64::from(record.version),
      seq:         record.seq,
      subject_id:  encode_uuid(record.subject_id),
      kind:        record.kind.as_ref().to_owned(),
      claim:       record.content.claim.clone(),
      value_json:  encode_json(&record.content.value)?,
      confidence:  encode_confidence(record.final_confidence),
      annotation:  record.annotation.map(|a| a.as_ref().to_owned()),
      accepted_at: encode_dt(record.status_changed_at),
      tokens:      tokens(record),
      payload:     encode_json(&summary)?,
    })
  }

  fn apply(&self, tx: &rusqlite::Transaction<'_>) -> rusqlite::Result<()> {
    // Only a strictly newer version replaces the summary row, so replays and
    // out-of-order batches converge on the same content.
    tx.execute(
      "INSERT INTO fact_summary
         (fact_id, version, seq, subject_id, kind, claim, value_json,
          confidence, annotation, accepted_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
       ON CONFLICT(fact_id) DO UPDATE SET
         version     = excluded.version,
         seq         = excluded.seq,
         subject_id  = excluded.subject_id,
         kind        = excluded.kind,
         claim       = excluded.claim,
         value_json  = excluded.value_json,
         confidence  = excluded.confidence,
         annotation  = excluded.annotation,
         accepted_at = excluded.accepted_at
       WHERE excluded.version > fact_summary.version",
      rusqlite::params![
        self.fact_id,
        self.version,
        self.seq,
        self.subject_id,
        self.kind,
        self.claim,
        self.value_json,
        self.confidence,
        self.annotation,
        self.accepted_at,
      ],
    )?;

    for token in &self.tokens {
      tx.execute(
        "INSERT OR IGNORE INTO search_terms (token, fact_id, version)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![token, self.fact_id, self.version],
      )?;
    }

    tx.execute(
      "INSERT OR IGNORE INTO sync_feed (fact_id, version, seq, payload_json)
       VALUES (?1, ?2, ?3, ?4)",
      rusqlite::params![self.fact_id, self.version, self.seq, self.payload],
    )?;

    tx.execute(
      "INSERT INTO projection_state (key, value) VALUES (?1, ?2)
       ON CONFLICT(key) DO UPDATE SET value = MAX(value, excluded.value)",
      rusqlite::params![CURSOR_KEY, self.cursor],
    )?;
    Ok(())
  }
}

// ─── ProjectionStore ─────────────────────────────────────────────────────────

impl ProjectionStore for SqliteProjections {
  type Error = Error;

  async fn clear(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(
          "BEGIN IMMEDIATE;
           DELETE FROM fact_summary;
           DELETE FROM search_terms;
           DELETE FROM sync_feed;
           DELETE FROM projection_state;
           COMMIT;",
        )?;
        Ok(())
      })
      .await?;
    tracing::info!("cleared derived stores");
    Ok(())
  }

  async fn apply_batch<'a>(&'a self, events: &'a [AcceptedEvent]) -> Result<()> {
    if events.is_empty() {
      return Ok(());
    }
    let encoded = events.iter().map(EncodedEvent::encode).collect::<Result<Vec<_>>>()?;
    let count = encoded.len();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for event in &encoded {
          event.apply(&tx)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    tracing::debug!(count, "applied accepted events to projections");
    Ok(())
  }

  async fn cursor(&self) -> Result<i64> {
    let value: Option<i64> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT value FROM projection_state WHERE key = ?1",
              rusqlite::params![CURSOR_KEY],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(value.unwrap_or(GENESIS))
  }

  async fn snapshot(&self) -> Result<ProjectionSnapshot> {
    type RawPosting = (String, String, i64);
    type RawSync = (i64, String, i64, String);

    let (cursor, summary, postings, sync): (
      Option<i64>,
      Vec<RawSummary>,
      Vec<RawPosting>,
      Vec<RawSync>,
    ) = self
      .conn
      .call(|conn| {
        let tx = conn.transaction()?;
        let cursor = tx
          .query_row(
            "SELECT value FROM projection_state WHERE key = ?1",
            rusqlite::params![CURSOR_KEY],
            |r| r.get(0),
          )
          .optional()?;
        let summary = tx
          .prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM fact_summary f ORDER BY f.fact_id"
          ))?
          .query_map([], RawSummary::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let postings = tx
          .prepare(
            "SELECT token, fact_id, version FROM search_terms
             ORDER BY token, fact_id, version",
          )?
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        let sync = tx
          .prepare(
            "SELECT seq, fact_id, version, payload_json FROM sync_feed
             ORDER BY seq, fact_id, version",
          )?
          .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((cursor, summary, postings, sync))
      })
      .await?;

    let summary = summary.into_iter().map(RawSummary::into_row).collect::<Result<_>>()?;
    let postings = postings
      .into_iter()
      .map(|(token, fact_id, version)| {
        Ok(Posting {
          token,
          fact_id: decode_uuid("search_terms.fact_id", &fact_id)?,
          version: decode_u32("search_terms.version", version)?,
        })
      })
      .collect::<Result<_>>()?;
    let sync_feed = sync.into_iter().map(decode_sync).collect::<Result<_>>()?;

    Ok(ProjectionSnapshot {
      cursor: cursor.unwrap_or(GENESIS),
      summary,
      postings,
      sync_feed,
    })
  }

  async fn search<'a>(&'a self, text: &'a str, limit: usize) -> Result<Vec<SummaryRow>> {
    let wanted: Vec<String> = query_tokens(text).into_iter().collect();
    if wanted.is_empty() || limit == 0 {
      return Ok(Vec::new());
    }
    let needed = wanted.len() as i64;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<RawSummary> = self
      .conn
      .call(move |conn| {
        // Postings of superseded versions stay in the index; matching only
        // against the summary's version hides them.
        let placeholders = (0..wanted.len())
          .map(|i| format!("?{}", i + 3))
          .collect::<Vec<_>>()
          .join(", ");
        let sql = format!(
          "SELECT {SUMMARY_COLUMNS}
           FROM fact_summary f
           JOIN search_terms t ON t.fact_id = f.fact_id AND t.version = f.version
           WHERE t.token IN ({placeholders})
           GROUP BY f.fact_id
           HAVING COUNT(DISTINCT t.token) = ?1
           ORDER BY f.confidence DESC, f.seq
           LIMIT ?2"
        );
        let mut params: Vec<rusqlite::types::Value> =
          vec![needed.into(), limit.into()];
        params.extend(wanted.into_iter().map(rusqlite::types::Value::from));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawSummary::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSummary::into_row).collect()
  }

  async fn sync_feed(&self, after: i64, limit: usize) -> Result<Vec<SyncEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<(i64, String, i64, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT seq, fact_id, version, payload_json FROM sync_feed
           WHERE seq > ?1 ORDER BY seq LIMIT ?2",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![after, limit], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(decode_sync).collect()
  }
}

fn decode_sync((seq, fact_id, version, payload): (i64, String, i64, String)) -> Result<SyncEntry> {
  Ok(SyncEntry {
    seq,
    fact_id: decode_uuid("sync_feed.fact_id", &fact_id)?,
    version: decode_u32("sync_feed.version", version)?,
    payload: decode_json("sync_feed.payload_json", &payload)?,
  })
}
