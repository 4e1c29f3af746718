//! Deployment glue for the Attest server: configuration, storage wiring,
//! authentication and the HTTP stack around [`attest_api::api_router`].

pub mod auth;

use std::{path::PathBuf, sync::Arc, time::Duration};

use attest_api::{ApiState, Backend, api_router};
use attest_core::{
  critique::{Critic, ReviewRole},
  policy::DecisionPolicy,
};
use attest_engine::critics::{EvidenceCorrelationCritic, SourceQualityCritic};
use attest_store_sqlite::{SqliteAppender, SqliteLedger, SqliteProjections};
use axum::{Router, middleware};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use auth::{AuthConfig, require_auth};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `ATTEST_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:               String,
  #[serde(default = "default_port")]
  pub port:               u16,
  pub ledger_path:        PathBuf,
  pub projection_path:    PathBuf,
  pub auth_username:      String,
  pub auth_password_hash: String,
  #[serde(default)]
  pub review:             ReviewConfig,
}

impl ServerConfig {
  /// Reject configurations the engine cannot run with.
  pub fn validate(&self) -> attest_core::Result<()> {
    self.review.policy.validate()?;
    if self.review.roles.is_empty() {
      return Err(attest_core::Error::validation("at least one review role is required"));
    }
    Ok(())
  }
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 7300 }

/// The `[review]` table.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReviewConfig {
  pub policy:                   DecisionPolicy,
  /// Roles every decision waits for.
  pub roles:                    Vec<ReviewRole>,
  /// Run the source-quality and evidence-correlation critics in-process.
  pub builtin_critics:          bool,
  /// How long a NEEDS_REVISION fact may wait for its resubmission.
  pub revision_window_secs:     u64,
  pub sweep_interval_secs:      u64,
  /// Fallback projection refresh when no acceptance was observed.
  pub projection_interval_secs: u64,
}

impl Default for ReviewConfig {
  fn default() -> Self {
    Self {
      policy:                   DecisionPolicy::default(),
      roles:                    vec![ReviewRole::standards(), ReviewRole::reasoning()],
      builtin_critics:          true,
      revision_window_secs:     7 * 24 * 60 * 60,
      sweep_interval_secs:      60 * 60,
      projection_interval_secs: 30,
    }
  }
}

impl ReviewConfig {
  pub fn revision_window(&self) -> Duration { Duration::from_secs(self.revision_window_secs) }

  pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_secs.max(1)) }

  pub fn projection_interval(&self) -> Duration {
    Duration::from_secs(self.projection_interval_secs.max(1))
  }

  /// The built-in critics serving configured roles, if enabled. A role the
  /// critics don't know is left to external critics.
  pub fn critics(&self) -> Vec<Arc<dyn Critic>> {
    if !self.builtin_critics {
      return Vec::new();
    }
    self
      .roles
      .iter()
      .filter_map(|role| -> Option<Arc<dyn Critic>> {
        match role.name.as_str() {
          "standards" => Some(Arc::new(SourceQualityCritic::new(role.clone()))),
          "reasoning" => Some(Arc::new(EvidenceCorrelationCritic::new(role.clone()))),
          _ => None,
        }
      })
      .collect()
  }
}

// ─── Storage ──────────────────────────────────────────────────────────────────

/// The SQLite-backed deployment.
pub struct SqliteBackend;

impl Backend for SqliteBackend {
  type Ledger = SqliteLedger;
  type Appender = SqliteAppender;
  type Projections = SqliteProjections;
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The API behind basic auth, with request tracing.
pub fn router(state: ApiState<SqliteBackend>, auth: Arc<AuthConfig>) -> Router {
  api_router(state)
    .layer(middleware::from_fn_with_state(auth, require_auth))
    .layer(TraceLayer::new_for_http())
}
