//! Background worker that rejects revision requests nobody answered.

use std::time::Duration;

use attest_core::ledger::{LedgerAppender, LedgerProposer};
use tokio::{sync::watch, time::interval};

use crate::DecisionEngine;

/// Runs [`DecisionEngine::expire_stale_revisions`] on a fixed schedule.
pub struct RevisionSweeper<L, W> {
  engine:   DecisionEngine<L, W>,
  window:   Duration,
  interval: Duration,
}

impl<L, W> RevisionSweeper<L, W>
where
  L: LedgerProposer + Clone + 'static,
  W: LedgerAppender + 'static,
{
  /// `window` is how long a NEEDS_REVISION fact may wait; `interval` is how
  /// often to look.
  pub fn new(engine: DecisionEngine<L, W>, window: Duration, interval: Duration) -> Self {
    Self { engine, window, interval }
  }

  /// One sweep. Returns the number of facts rejected.
  pub async fn sweep(&self) -> attest_core::Result<usize> {
    self.engine.expire_stale_revisions(self.window).await
  }

  /// Sweep every `interval` until `shutdown` flips.
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(self.interval);
    tracing::info!(
      "revision sweeper started (window: {:?}, interval: {:?})",
      self.window,
      self.interval
    );

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          match self.sweep().await {
            Ok(0) => tracing::debug!("sweep found nothing to expire"),
            Ok(n) => tracing::info!("sweep rejected {} stale revision request(s)", n),
            Err(e) => tracing::error!("sweep failed: {}", e),
          }
        }
        _ = shutdown.changed() => {
          tracing::info!("shutdown signal received, stopping revision sweeper");
          break;
        }
      }
    }
  }
}
