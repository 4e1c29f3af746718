//! Handlers for `/facts` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/facts` | Body: [`NewFact`]; returns 201 + version 1, review starts |
//! | `GET`  | `/facts/:id` | Current version |
//! | `GET`  | `/facts/:id/history` | Every version, oldest first |
//! | `POST` | `/facts/:id/critiques` | Body: [`CritiqueBody`]; returns 202 |
//! | `POST` | `/facts/:id/revisions` | Body: [`RevisionBody`]; review restarts |
//! | `POST` | `/facts/:id/adjudication` | Body: [`AdjudicationBody`] |

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use attest_core::{
  Delta,
  critique::{Critique, Finding},
  fact::{FactVersion, NewFact, Revision},
  ledger::LedgerReader,
  status::{FactStatus, ResolvedVersion},
};
use attest_engine::SubmitOutcome;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
  error::{ApiError, backend},
  state::{ApiState, Backend},
};

/// Start the review of a fact that just became PROPOSED. The review runs in
/// the background; the critique window is open once this returns.
async fn begin_review<B: Backend>(state: &ApiState<B>, fact_id: Uuid) -> Result<(), ApiError> {
  let ticket = state.engine.start_review(fact_id).await?;
  tracing::debug!(%fact_id, revision = ticket.revision, "review started");
  Ok(())
}

// ─── Create ───────────────────────────────────────────────────────────────────

/// `POST /facts`: returns 201 + the PROPOSED version.
pub async fn create<B: Backend>(
  State(state): State<ApiState<B>>,
  Json(body): Json<NewFact>,
) -> Result<impl IntoResponse, ApiError> {
  let record = state.engine.propose(body).await?;
  begin_review(&state, record.fact_id).await?;
  Ok((StatusCode::CREATED, Json(record)))
}

// ─── Reads ────────────────────────────────────────────────────────────────────

/// `GET /facts/:id`
pub async fn get_one<B: Backend>(
  State(state): State<ApiState<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<FactVersion>, ApiError> {
  let record = state
    .engine
    .ledger()
    .read_current(id)
    .await
    .map_err(backend)?
    .ok_or_else(|| ApiError::NotFound(format!("fact {id} not found")))?;
  Ok(Json(record))
}

/// One history entry with its effective status resolved.
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
  #[serde(flatten)]
  pub resolved:         ResolvedVersion,
  pub effective_status: FactStatus,
}

/// `GET /facts/:id/history`
pub async fn history<B: Backend>(
  State(state): State<ApiState<B>>,
  Path(id): Path<Uuid>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
  let history = state
    .engine
    .ledger()
    .read_history(id)
    .await
    .map_err(backend)?;
  if history.is_empty() {
    return Err(ApiError::NotFound(format!("fact {id} not found")));
  }
  Ok(Json(
    history
      .into_iter()
      .map(|resolved| HistoryEntry { effective_status: resolved.effective_status(), resolved })
      .collect(),
  ))
}

// ─── Critiques ────────────────────────────────────────────────────────────────

/// JSON body accepted by `POST /facts/:id/critiques`.
#[derive(Debug, Deserialize)]
pub struct CritiqueBody {
  /// Lets the critic retry delivery safely; generated when absent.
  pub critique_id: Option<Uuid>,
  pub revision:    u32,
  pub role:        String,
  pub delta:       Delta,
  #[serde(default)]
  pub findings:    Vec<Finding>,
  pub reason:      String,
}

/// `POST /facts/:id/critiques`: returns 202 + `{"outcome": "accepted" | "duplicate"}`.
pub async fn critique<B: Backend>(
  State(state): State<ApiState<B>>,
  Path(fact_id): Path<Uuid>,
  Json(body): Json<CritiqueBody>,
) -> Result<impl IntoResponse, ApiError> {
  let critique = Critique {
    critique_id: body.critique_id.unwrap_or_else(Uuid::new_v4),
    fact_id,
    revision: body.revision,
    role: body.role,
    delta: body.delta,
    findings: body.findings,
    reason: body.reason,
  };
  let critique_id = critique.critique_id;
  let outcome = match state.engine.submit_critique(critique).await? {
    SubmitOutcome::Accepted => "accepted",
    SubmitOutcome::Duplicate => "duplicate",
  };
  Ok((
    StatusCode::ACCEPTED,
    Json(json!({ "critique_id": critique_id, "outcome": outcome })),
  ))
}

// ─── Revisions ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RevisionBody {
  /// Optimistic check against the current version.
  pub expected_version: Option<u32>,
  #[serde(flatten)]
  pub revision:         Revision,
}

/// `POST /facts/:id/revisions`: returns the new PROPOSED version.
pub async fn revise<B: Backend>(
  State(state): State<ApiState<B>>,
  Path(fact_id): Path<Uuid>,
  Json(body): Json<RevisionBody>,
) -> Result<Json<FactVersion>, ApiError> {
  let record = state
    .engine
    .resubmit_revision(fact_id, body.expected_version, body.revision)
    .await?;
  begin_review(&state, fact_id).await?;
  Ok(Json(record))
}

// ─── Adjudication ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AdjudicationBody {
  pub resolution_note:  String,
  /// `UNDER_REVIEW` or `REJECTED`.
  pub resulting_status: FactStatus,
}

/// `POST /facts/:id/adjudication`: returns the decision record.
pub async fn adjudicate<B: Backend>(
  State(state): State<ApiState<B>>,
  Path(fact_id): Path<Uuid>,
  Json(body): Json<AdjudicationBody>,
) -> Result<Json<FactVersion>, ApiError> {
  let record = state
    .engine
    .adjudicate_conflict(fact_id, body.resolution_note, body.resulting_status)
    .await?;
  Ok(Json(record))
}
