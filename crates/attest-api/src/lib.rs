//! JSON REST API for Attest.
//!
//! Exposes an axum [`Router`] over a [`DecisionEngine`](attest_engine::DecisionEngine)
//! and the derived projection stores. Auth, TLS, and transport concerns are
//! the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", attest_api::api_router(state))
//! ```

pub mod error;
pub mod facts;
pub mod feeds;
pub mod state;
pub mod subjects;

use axum::{
  Router,
  routing::{get, post},
};

pub use error::ApiError;
pub use state::{ApiState, Backend};

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<B: Backend>(state: ApiState<B>) -> Router<()> {
  Router::new()
    // Facts
    .route("/facts", post(facts::create::<B>))
    .route("/facts/{id}", get(facts::get_one::<B>))
    .route("/facts/{id}/history", get(facts::history::<B>))
    .route("/facts/{id}/critiques", post(facts::critique::<B>))
    .route("/facts/{id}/revisions", post(facts::revise::<B>))
    .route("/facts/{id}/adjudication", post(facts::adjudicate::<B>))
    // Subjects
    .route("/subjects/{id}/accepted", get(subjects::accepted::<B>))
    // Feeds
    .route("/accepted", get(feeds::accepted::<B>))
    .route("/search", get(feeds::search::<B>))
    .route("/sync", get(feeds::sync::<B>))
    .with_state(state)
}

#[cfg(test)]
mod tests;
