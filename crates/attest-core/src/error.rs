//! Error taxonomy shared by every Attest crate.
//!
//! Storage backends keep their own error types but must convert into
//! [`Error`] so the decision engine can tell a stale write apart from a
//! corrupted log.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// Malformed proposal, critique or status change. Nothing was persisted.
  #[error("validation failed: {0}")]
  Validation(String),

  /// The caller's view of the current version is stale; re-read and retry.
  #[error(
    "concurrent modification of fact {fact_id}: expected version {expected}, \
     found {actual}"
  )]
  ConcurrencyConflict {
    fact_id:  Uuid,
    expected: u32,
    actual:   u32,
  },

  /// One or more expected critique roles did not respond in time.
  #[error("critique timeout for fact {fact_id}: missing roles {missing:?}")]
  CritiqueTimeout { fact_id: Uuid, missing: Vec<String> },

  /// The fact contradicts another accepted fact on the same subject and claim.
  #[error("fact {fact_id} conflicts with accepted facts {conflicting:?}")]
  Conflict {
    fact_id:     Uuid,
    conflicting: Vec<Uuid>,
  },

  /// A ledger record could not be decoded or violates a ledger invariant.
  #[error("ledger corruption: {0}")]
  Corruption(String),

  #[error("fact not found: {0}")]
  FactNotFound(Uuid),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Shorthand for building a [`Error::Validation`].
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
