//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// Stale expected version, or a conflict with accepted facts.
  #[error("conflict: {0}")]
  Conflict(String),

  #[error("timed out: {0}")]
  Timeout(String),

  #[error("internal error: {0}")]
  Internal(#[source] attest_core::Error),
}

impl From<attest_core::Error> for ApiError {
  fn from(e: attest_core::Error) -> Self {
    use attest_core::Error as E;
    match e {
      E::Validation(_) => Self::BadRequest(e.to_string()),
      E::FactNotFound(_) => Self::NotFound(e.to_string()),
      E::ConcurrencyConflict { .. } | E::Conflict { .. } => Self::Conflict(e.to_string()),
      E::CritiqueTimeout { .. } => Self::Timeout(e.to_string()),
      other => Self::Internal(other),
    }
  }
}

/// Map a storage backend's error through the core taxonomy.
pub(crate) fn backend<E: Into<attest_core::Error>>(e: E) -> ApiError {
  let core: attest_core::Error = e.into();
  ApiError::from(core)
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let (status, message) = match &self {
      ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
      ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      ApiError::Timeout(m) => (StatusCode::GATEWAY_TIMEOUT, m.clone()),
      ApiError::Internal(e) => {
        tracing::error!(error = %e, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
      }
    };
    (status, Json(json!({ "error": message }))).into_response()
  }
}
