//! Review workflow for the Attest fact ledger: critique aggregation, the
//! decision state machine, built-in critics, upstream intake and projection
//! maintenance.

pub mod aggregator;
pub mod critics;
pub mod engine;
pub mod intake;
pub mod projection;
pub mod worker;

pub use aggregator::{CombinedResult, CritiqueAggregator, SubmitOutcome};
pub use engine::{DecisionEngine, ReviewTicket};
pub use intake::{Intake, IntakeReview};
pub use projection::{ProjectionBuilder, accepted_stream, snapshot_digest};
pub use worker::RevisionSweeper;


/// Convert a backend error, raising an alert when it reports corruption.
pub(crate) fn alert<E: Into<attest_core::Error>>(err: E) -> attest_core::Error {
  let err = err.into();
  if let attest_core::Error::Corruption(detail) = &err {
    tracing::error!(target: "attest::alert", %detail, "ledger corruption detected");
  }
  err
}
