//! SQLite backend for the Attest ledger and its derived projections.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The ledger and the projections live in
//! separate database files: projections can be deleted and rebuilt at any
//! time, the ledger never.

mod encode;
mod ledger;
mod projections;
mod schema;

pub mod error;

pub use error::{Error, Result};
pub use ledger::{SqliteAppender, SqliteLedger};
pub use projections::SqliteProjections;

#[cfg(test)]
mod tests;
