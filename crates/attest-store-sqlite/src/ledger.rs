//! [`SqliteLedger`] and [`SqliteAppender`]: the SQLite implementation of
//! the ledger traits.

use std::path::Path;

use attest_core::{
  fact::{FactVersion, NewFact},
  ledger::{
    AcceptedEvent, LedgerAppender, LedgerProposer, LedgerReader, StatusChange,
    first_version, next_version,
  },
  status::{FactStatus, ResolvedVersion},
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{
    EncodedVersion, RawSupersession, RawVersion, VERSION_COLUMN_COUNT,
    VERSION_COLUMNS, decode_u32, encode_dt, encode_uuid,
  },
  schema::LEDGER_SCHEMA,
};

// ─── Handles ─────────────────────────────────────────────────────────────────

/// Read and propose access to a ledger backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteLedger {
  conn: tokio_rusqlite::Connection,
}

/// The append capability for one opened ledger. Deliberately not `Clone`:
/// it is moved into the decision engine.
pub struct SqliteAppender {
  conn: tokio_rusqlite::Connection,
}

impl SqliteLedger {
  /// Open (or create) a ledger at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<(Self, SqliteAppender)> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory ledger, for tests.
  pub async fn open_in_memory() -> Result<(Self, SqliteAppender)> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<(Self, SqliteAppender)> {
    conn
      .call(|conn| {
        conn.execute_batch(LEDGER_SCHEMA)?;
        Ok(())
      })
      .await?;
    let appender = SqliteAppender { conn: conn.clone() };
    Ok((Self { conn }, appender))
  }

  /// Run raw SQL against the ledger file. Test-only: used to simulate damage.
  #[cfg(test)]
  pub(crate) async fn execute_raw(&self, sql: &'static str) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn query_versions(
    &self,
    sql: String,
    param: rusqlite::types::Value,
  ) -> Result<Vec<FactVersion>> {
    let raws: Vec<RawVersion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![param], RawVersion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawVersion::into_version).collect()
  }
}

// ─── Reads ───────────────────────────────────────────────────────────────────

impl LedgerReader for SqliteLedger {
  type Error = Error;

  async fn read_current(&self, fact_id: Uuid) -> Result<Option<FactVersion>> {
    let id_str = encode_uuid(fact_id);

    let raw: Option<(RawVersion, i64)> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {VERSION_COLUMNS}, c.version
           FROM current_versions c
           JOIN fact_versions v ON v.seq = c.seq
           WHERE c.fact_id = ?1"
        );
        Ok(
          conn
            .query_row(&sql, rusqlite::params![id_str], |row| {
              Ok((RawVersion::from_row(row)?, row.get(VERSION_COLUMN_COUNT)?))
            })
            .optional()?,
        )
      })
      .await?;

    let Some((raw, pointer_version)) = raw else {
      return Ok(None);
    };
    let record = raw.into_version()?;
    if record.fact_id != fact_id || i64::from(record.version) != pointer_version {
      return Err(Error::Corrupt(format!(
        "current pointer of {fact_id} names version {pointer_version} but record \
         {} is version {}",
        record.seq, record.version
      )));
    }
    Ok(Some(record))
  }

  async fn read_history(&self, fact_id: Uuid) -> Result<Vec<ResolvedVersion>> {
    let id_str = encode_uuid(fact_id);

    let raws: Vec<(RawVersion, Option<RawSupersession>)> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {VERSION_COLUMNS}, s.new_seq, s.recorded_at
           FROM fact_versions v
           LEFT JOIN supersessions s ON s.old_seq = v.seq
           WHERE v.fact_id = ?1
           ORDER BY v.version"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![id_str], |row| {
            let new_seq: Option<i64> = row.get(VERSION_COLUMN_COUNT)?;
            let recorded_at: Option<String> = row.get(VERSION_COLUMN_COUNT + 1)?;
            let sup = match (new_seq, recorded_at) {
              (Some(new_seq), Some(recorded_at)) => {
                Some(RawSupersession { new_seq, recorded_at })
              }
              _ => None,
            };
            Ok((RawVersion::from_row(row)?, sup))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut history: Vec<ResolvedVersion> = Vec::with_capacity(raws.len());
    for (raw, sup) in raws {
      let record = raw.into_version()?;
      let expected_version = history.len() as u32 + 1;
      let expected_back_link = history.last().map(|prev| prev.record.seq);
      if record.version != expected_version || record.supersedes != expected_back_link {
        return Err(Error::Corrupt(format!(
          "history of {fact_id} is broken at record {}: version {} (expected \
           {expected_version}), supersedes {:?} (expected {expected_back_link:?})",
          record.seq, record.version, record.supersedes
        )));
      }
      let superseded_by = sup
        .map(|s| s.into_supersession(fact_id, record.seq))
        .transpose()?;
      history.push(ResolvedVersion { record, superseded_by });
    }
    Ok(history)
  }

  async fn read_accepted_for_subject(&self, subject_id: Uuid) -> Result<Vec<FactVersion>> {
    let sql = format!(
      "SELECT {VERSION_COLUMNS}
       FROM current_versions c
       JOIN fact_versions v ON v.seq = c.accepted_seq
       WHERE v.subject_id = ?1
       ORDER BY v.seq"
    );
    self.query_versions(sql, encode_uuid(subject_id).into()).await
  }

  async fn stream_accepted(&self, since: i64, limit: usize) -> Result<Vec<AcceptedEvent>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let raws: Vec<(RawVersion, Option<i64>)> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {VERSION_COLUMNS}, s.old_seq
           FROM fact_versions v
           LEFT JOIN supersessions s ON s.new_seq = v.seq
           WHERE v.status = 'ACCEPTED' AND v.seq > ?1
           ORDER BY v.seq
           LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params![since, limit], |row| {
            Ok((RawVersion::from_row(row)?, row.get(VERSION_COLUMN_COUNT)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(|(raw, supersedes_accepted)| {
        let record = raw.into_version()?;
        Ok(AcceptedEvent { cursor: record.seq, record, supersedes_accepted })
      })
      .collect()
  }

  async fn list_current(&self, status: FactStatus) -> Result<Vec<FactVersion>> {
    let sql = format!(
      "SELECT {VERSION_COLUMNS}
       FROM current_versions c
       JOIN fact_versions v ON v.seq = c.seq
       WHERE v.status = ?1
       ORDER BY v.seq"
    );
    self.query_versions(sql, status.as_ref().to_owned().into()).await
  }
}

// ─── Proposals ───────────────────────────────────────────────────────────────

impl LedgerProposer for SqliteLedger {
  async fn propose(&self, input: NewFact) -> Result<FactVersion> {
    let mut record = first_version(Uuid::new_v4(), input, Utc::now())?;
    let encoded = EncodedVersion::encode(&record)?;

    let seq = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let seq = encoded.insert(&tx)?;
        tx.execute(
          "INSERT INTO current_versions (fact_id, seq, version, accepted_seq)
           VALUES (?1, ?2, 1, NULL)",
          rusqlite::params![encoded.fact_id, seq],
        )?;
        tx.commit()?;
        Ok(seq)
      })
      .await?;

    record.seq = seq;
    tracing::debug!(fact_id = %record.fact_id, seq, "proposed fact");
    Ok(record)
  }
}

// ─── Appends ─────────────────────────────────────────────────────────────────

impl LedgerAppender for SqliteAppender {
  type Error = Error;

  async fn append_version(&self, fact_id: Uuid, change: StatusChange) -> Result<FactVersion> {
    let now = Utc::now();

    let outcome: Result<FactVersion> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = append_in_tx(&tx, fact_id, change, now);
        // Dropping an uncommitted transaction rolls it back.
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?;

    let record = outcome?;
    tracing::debug!(
      fact_id = %fact_id,
      version = record.version,
      status = %record.status,
      seq = record.seq,
      "appended version"
    );
    Ok(record)
  }
}

fn append_in_tx(
  tx: &rusqlite::Transaction<'_>,
  fact_id: Uuid,
  change: StatusChange,
  now: DateTime<Utc>,
) -> Result<FactVersion> {
  let id_str = encode_uuid(fact_id);

  let pointer: Option<(i64, i64, Option<i64>)> = tx
    .query_row(
      "SELECT seq, version, accepted_seq FROM current_versions WHERE fact_id = ?1",
      rusqlite::params![id_str],
      |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()?;

  let Some((current_seq, current_version, accepted_seq)) = pointer else {
    return Err(Error::FactNotFound(fact_id));
  };

  let actual = decode_u32("current_versions.version", current_version)?;
  if actual != change.expected_version {
    return Err(Error::ConcurrencyConflict {
      fact_id,
      expected: change.expected_version,
      actual,
    });
  }

  let current = tx
    .query_row(
      &format!("SELECT {VERSION_COLUMNS} FROM fact_versions v WHERE v.seq = ?1"),
      rusqlite::params![current_seq],
      RawVersion::from_row,
    )?
    .into_version()?;
  if current.fact_id != fact_id || current.version != actual {
    return Err(Error::Corrupt(format!(
      "current pointer of {fact_id} names record {current_seq}, which is version \
       {} of {}",
      current.version, current.fact_id
    )));
  }

  let mut next = next_version(&current, change, now)?;
  let new_seq = EncodedVersion::encode(&next)?.insert(tx)?;
  next.seq = new_seq;

  let accepted_seq = if next.status == FactStatus::Accepted {
    if let Some(old_seq) = accepted_seq {
      tx.execute(
        "INSERT INTO supersessions (old_seq, new_seq, fact_id, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![old_seq, new_seq, id_str, encode_dt(now)],
      )?;
    }
    Some(new_seq)
  } else {
    accepted_seq
  };

  tx.execute(
    "UPDATE current_versions SET seq = ?2, version = ?3, accepted_seq = ?4
     WHERE fact_id = ?1",
    rusqlite::params![id_str, new_seq, i64::from(next.version), accepted_seq],
  )?;

  Ok(next)
}
