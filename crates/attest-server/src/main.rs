//! attest server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), opens the SQLite
//! ledger and projection stores, recovers interrupted reviews, and serves the
//! JSON API over HTTP behind basic auth.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for `auth_password_hash` in config.toml:
//!
//! ```
//! cargo run -p attest-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use attest_api::ApiState;
use attest_engine::{DecisionEngine, ProjectionBuilder, RevisionSweeper};
use attest_server::{ServerConfig, auth::AuthConfig};
use attest_store_sqlite::{SqliteLedger, SqliteProjections};
use clap::Parser;
use rand_core::OsRng;
use tokio::{net::TcpListener, sync::watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Attest fact ledger server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,

  /// Rebuild every projection from the accepted stream, print the snapshot
  /// digest and exit.
  #[arg(long)]
  rebuild_projections: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    let password = read_password()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("ATTEST").separator("__"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  server_cfg.validate().context("invalid configuration")?;

  // Open storage.
  let ledger_path = expand_tilde(&server_cfg.ledger_path);
  let (ledger, appender) = SqliteLedger::open(&ledger_path)
    .await
    .with_context(|| format!("failed to open ledger at {ledger_path:?}"))?;

  let projection_path = expand_tilde(&server_cfg.projection_path);
  let projections = SqliteProjections::open(&projection_path)
    .await
    .with_context(|| format!("failed to open projections at {projection_path:?}"))?;

  let builder = Arc::new(ProjectionBuilder::new(ledger.clone(), projections.clone()));

  if cli.rebuild_projections {
    let cursor = builder.rebuild().await.context("projection rebuild failed")?;
    let digest = builder.digest().await.context("failed to digest projections")?;
    println!("cursor {cursor}\ndigest {digest}");
    return Ok(());
  }

  // Engine.
  let review = &server_cfg.review;
  let engine = DecisionEngine::new(
    ledger,
    appender,
    review.policy.clone(),
    review.roles.clone(),
    review.critics(),
  );
  let recovered = engine.recover().await.context("review recovery failed")?;
  tracing::info!(recovered, "ledger opened");

  // Background workers.
  let (shutdown_tx, shutdown_rx) = watch::channel(false);

  let follower = {
    let builder = Arc::clone(&builder);
    let events = engine.subscribe();
    let interval = review.projection_interval();
    let shutdown = shutdown_rx.clone();
    tokio::spawn(async move { builder.follow(events, interval, shutdown).await })
  };

  let sweeper = {
    let sweeper =
      RevisionSweeper::new(engine.clone(), review.revision_window(), review.sweep_interval());
    let shutdown = shutdown_rx.clone();
    tokio::spawn(async move { sweeper.run(shutdown).await })
  };

  // HTTP.
  let state = ApiState::new(engine, Arc::new(projections));
  let auth = Arc::new(AuthConfig {
    username:      server_cfg.auth_username.clone(),
    password_hash: server_cfg.auth_password_hash.clone(),
  });
  let app = attest_server::router(state, auth);
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
      }
      tracing::info!("shutting down");
      let _ = shutdown_tx.send(true);
    })
    .await
    .context("server error")?;

  follower.await.context("projection follower panicked")?;
  sweeper.await.context("revision sweeper panicked")?;

  Ok(())
}

/// Read a password from stdin.
fn read_password() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
