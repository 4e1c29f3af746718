//! Shared handler state.

use std::sync::Arc;

use attest_core::{
  ledger::{LedgerAppender, LedgerProposer},
  projection::ProjectionStore,
};
use attest_engine::DecisionEngine;

/// The storage types one deployment runs on.
pub trait Backend: Send + Sync + 'static {
  type Ledger: LedgerProposer + Clone + 'static;
  type Appender: LedgerAppender + 'static;
  type Projections: ProjectionStore + 'static;
}

pub struct ApiState<B: Backend> {
  pub engine:      DecisionEngine<B::Ledger, B::Appender>,
  pub projections: Arc<B::Projections>,
}

impl<B: Backend> ApiState<B> {
  pub fn new(
    engine: DecisionEngine<B::Ledger, B::Appender>,
    projections: Arc<B::Projections>,
  ) -> Self {
    Self { engine, projections }
  }
}

impl<B: Backend> Clone for ApiState<B> {
  fn clone(&self) -> Self {
    Self {
      engine:      self.engine.clone(),
      projections: Arc::clone(&self.projections),
    }
  }
}
