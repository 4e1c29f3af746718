//! Handler for `GET /subjects/:id/accepted`.

use axum::{
  Json,
  extract::{Path, State},
};
use attest_core::{fact::FactVersion, ledger::LedgerReader};
use uuid::Uuid;

use crate::{
  error::{ApiError, backend},
  state::{ApiState, Backend},
};

/// `GET /subjects/:id/accepted`: the accepted version of every fact
/// identity about the subject. Empty if there are none.
pub async fn accepted<B: Backend>(
  State(state): State<ApiState<B>>,
  Path(subject_id): Path<Uuid>,
) -> Result<Json<Vec<FactVersion>>, ApiError> {
  let facts = state
    .engine
    .ledger()
    .read_accepted_for_subject(subject_id)
    .await
    .map_err(backend)?;
  Ok(Json(facts))
}
