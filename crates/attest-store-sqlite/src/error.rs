//! Error type for `attest-store-sqlite`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] attest_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A stored row could not be decoded or breaks a ledger invariant.
  #[error("corrupt record: {0}")]
  Corrupt(String),

  #[error("fact not found: {0}")]
  FactNotFound(Uuid),

  #[error(
    "concurrent modification of fact {fact_id}: expected version {expected}, \
     found {actual}"
  )]
  ConcurrencyConflict {
    fact_id:  Uuid,
    expected: u32,
    actual:   u32,
  },
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self { Self::Database(e.into()) }
}

impl From<Error> for attest_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(inner) => inner,
      Error::Json(inner) => Self::Serialization(inner),
      Error::Corrupt(msg) => Self::Corruption(msg),
      Error::FactNotFound(id) => Self::FactNotFound(id),
      Error::ConcurrencyConflict { fact_id, expected, actual } => {
        Self::ConcurrencyConflict { fact_id, expected, actual }
      }
      Error::Database(inner) => Self::Storage(Box::new(inner)),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
