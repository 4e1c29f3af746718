//! Cursor-paged feeds: the accepted stream, projection search and the sync
//! outbox.

use axum::{
  Json,
  extract::{Query, State},
};
use attest_core::{
  ledger::{AcceptedEvent, GENESIS, LedgerReader},
  projection::{ProjectionStore, SummaryRow, SyncEntry},
};
use serde::{Deserialize, Serialize};

use crate::{
  error::{ApiError, backend},
  state::{ApiState, Backend},
};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1_000;

fn clamp_limit(limit: Option<usize>) -> usize {
  limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

#[derive(Debug, Deserialize, Default)]
pub struct PageParams {
  /// Resume after this cursor. Defaults to the start of the ledger.
  pub cursor: Option<i64>,
  pub limit:  Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
  pub items:       Vec<T>,
  /// Pass back as `cursor` to continue; unchanged when nothing was returned.
  pub next_cursor: i64,
}

/// `GET /accepted[?cursor=...][&limit=...]`
pub async fn accepted<B: Backend>(
  State(state): State<ApiState<B>>,
  Query(params): Query<PageParams>,
) -> Result<Json<Page<AcceptedEvent>>, ApiError> {
  let cursor = params.cursor.unwrap_or(GENESIS);
  let items = state
    .engine
    .ledger()
    .stream_accepted(cursor, clamp_limit(params.limit))
    .await
    .map_err(backend)?;
  let next_cursor = items.last().map_or(cursor, |e| e.cursor);
  Ok(Json(Page { items, next_cursor }))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
  pub text:  String,
  pub limit: Option<usize>,
}

/// `GET /search?text=...[&limit=...]`: every query token must match.
pub async fn search<B: Backend>(
  State(state): State<ApiState<B>>,
  Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SummaryRow>>, ApiError> {
  let rows = state
    .projections
    .search(&params.text, clamp_limit(params.limit))
    .await
    .map_err(backend)?;
  Ok(Json(rows))
}

/// `GET /sync[?cursor=...][&limit=...]`
pub async fn sync<B: Backend>(
  State(state): State<ApiState<B>>,
  Query(params): Query<PageParams>,
) -> Result<Json<Page<SyncEntry>>, ApiError> {
  let cursor = params.cursor.unwrap_or(GENESIS);
  let items = state
    .projections
    .sync_feed(cursor, clamp_limit(params.limit))
    .await
    .map_err(backend)?;
  let next_cursor = items.last().map_or(cursor, |e| e.seq);
  Ok(Json(Page { items, next_cursor }))
}
