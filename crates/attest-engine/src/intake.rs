//! Upstream record retrieval with bounded retry.

use std::{sync::Arc, time::Duration};

use attest_core::{
  Confidence, Result,
  critique::{BoxFuture, CriticError},
  fact::{
    Citation, EvidenceType, FactContent, FactKind, FactVersion, Incomplete, NewFact,
    Proposer, SourceLevel,
  },
  ledger::{LedgerAppender, LedgerProposer},
  policy::MAX_RETRIEVAL_ATTEMPTS,
};
use serde_json::json;
use uuid::Uuid;

use crate::{DecisionEngine, ReviewTicket};

/// What to look for, and where.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
  pub subject_id: Uuid,
  pub kind:       FactKind,
  pub claim:      String,
  /// Archive, index or service being searched.
  pub repository: String,
  pub query:      String,
  pub proposer:   Proposer,
}

/// A successful retrieval.
#[derive(Debug, Clone)]
pub struct Retrieved {
  pub value:              serde_json::Value,
  pub citations:          Vec<Citation>,
  pub initial_confidence: Confidence,
}

/// An upstream record source (archive search, transcription service, ...).
pub trait SourceRetriever: Send + Sync {
  fn retrieve<'a>(
    &'a self,
    request: &'a RetrievalRequest,
  ) -> BoxFuture<'a, std::result::Result<Retrieved, CriticError>>;
}

/// A retrieved fact and the review it entered.
pub struct IntakeReview {
  /// Version 1, as proposed.
  pub proposed: FactVersion,
  pub review:   ReviewTicket,
}

/// Turns retrievals into proposals and starts their review. After
/// [`MAX_RETRIEVAL_ATTEMPTS`] failures the fact is still proposed, marked
/// incomplete, so the gap is on record.
pub struct Intake {
  retriever: Arc<dyn SourceRetriever>,
  backoff:   Duration,
}

impl Intake {
  pub fn new(retriever: Arc<dyn SourceRetriever>) -> Self {
    Self { retriever, backoff: Duration::from_millis(250) }
  }

  /// Base delay between attempts; attempt `n` waits `n * backoff`.
  pub fn with_backoff(mut self, backoff: Duration) -> Self {
    self.backoff = backoff;
    self
  }

  pub async fn run<L, W>(
    &self,
    engine: &DecisionEngine<L, W>,
    request: RetrievalRequest,
  ) -> Result<IntakeReview>
  where
    L: LedgerProposer + Clone + 'static,
    W: LedgerAppender + 'static,
  {
    let input = self.retrieve(request).await;
    let proposed = engine.propose(input).await?;
    let review = engine.start_review(proposed.fact_id).await?;
    Ok(IntakeReview { proposed, review })
  }

  async fn retrieve(&self, request: RetrievalRequest) -> NewFact {
    let mut last_error = String::new();
    for attempt in 1..=MAX_RETRIEVAL_ATTEMPTS {
      match self.retriever.retrieve(&request).await {
        Ok(found) => {
          tracing::debug!(attempt, repository = %request.repository, "retrieval succeeded");
          return NewFact {
            subject_id:         request.subject_id,
            kind:               request.kind,
            content:            FactContent::new(request.claim, found.value),
            citations:          found.citations,
            proposer:           request.proposer,
            initial_confidence: found.initial_confidence,
          };
        }
        Err(err) => {
          tracing::warn!(
            attempt,
            max = MAX_RETRIEVAL_ATTEMPTS,
            repository = %request.repository,
            %err,
            "retrieval failed"
          );
          last_error = err.to_string();
          if attempt < MAX_RETRIEVAL_ATTEMPTS {
            tokio::time::sleep(self.backoff * attempt).await;
          }
        }
      }
    }

    incomplete_fact(request, last_error)
  }
}

fn incomplete_fact(request: RetrievalRequest, last_error: String) -> NewFact {
  let mut content = FactContent::new(request.claim, json!({ "query": request.query }));
  content.incomplete = Some(Incomplete { attempts: MAX_RETRIEVAL_ATTEMPTS, last_error });
  NewFact {
    subject_id: request.subject_id,
    kind: request.kind,
    content,
    citations: vec![Citation {
      source:      request.repository,
      level:       SourceLevel::Tertiary,
      evidence:    EvidenceType::Indirect,
      locator:     Some(request.query),
      attests:     None,
      is_original: false,
    }],
    proposer: request.proposer,
    initial_confidence: Confidence::ZERO,
  }
}
