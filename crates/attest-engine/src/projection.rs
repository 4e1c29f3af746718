//! [`ProjectionBuilder`]: keeps the derived stores in step with the ledger's
//! accepted stream.

use std::{collections::VecDeque, time::Duration};

use attest_core::{
  Result,
  event::LedgerEvent,
  ledger::{AcceptedEvent, LedgerReader},
  projection::{ProjectionSnapshot, ProjectionStore},
};
use futures_util::{Stream, StreamExt as _, stream};
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, watch};

use crate::alert;

const DEFAULT_BATCH: usize = 256;

/// SHA-256 (hex) over the canonical snapshot bytes.
pub fn snapshot_digest(snapshot: &ProjectionSnapshot) -> Result<String> {
  let hash = Sha256::digest(snapshot.to_bytes()?);
  Ok(hex::encode(hash))
}

/// Lazy, restartable stream of accepted events after `since`, fetched from
/// the ledger `batch` at a time. Ends once the ledger has nothing newer;
/// restart from the last yielded `cursor` to continue.
pub fn accepted_stream<L>(
  ledger: L,
  since: i64,
  batch: usize,
) -> impl Stream<Item = Result<AcceptedEvent>>
where
  L: LedgerReader + Clone,
{
  struct State<L> {
    ledger: L,
    cursor: i64,
    buffer: VecDeque<AcceptedEvent>,
    done:   bool,
  }

  let batch = batch.max(1);
  let start = State { ledger, cursor: since, buffer: VecDeque::new(), done: false };

  stream::unfold(start, move |mut st| async move {
    if st.buffer.is_empty() && !st.done {
      match st.ledger.stream_accepted(st.cursor, batch).await {
        Ok(events) => {
          st.done = events.len() < batch;
          st.buffer.extend(events);
        }
        Err(err) => {
          st.done = true;
          return Some((Err(alert(err)), st));
        }
      }
    }
    let event = st.buffer.pop_front()?;
    st.cursor = event.cursor;
    Some((Ok(event), st))
  })
}

pub struct ProjectionBuilder<L, P> {
  ledger: L,
  store:  P,
  batch:  usize,
}

impl<L, P> ProjectionBuilder<L, P>
where
  L: LedgerReader + Clone,
  P: ProjectionStore,
{
  pub fn new(ledger: L, store: P) -> Self { Self { ledger, store, batch: DEFAULT_BATCH } }

  pub fn with_batch_size(mut self, batch: usize) -> Self {
    self.batch = batch.max(1);
    self
  }

  pub fn store(&self) -> &P { &self.store }

  /// Clear every derived store and replay the accepted stream from genesis.
  /// Returns the cursor reached.
  pub async fn rebuild(&self) -> Result<i64> {
    self.store.clear().await.map_err(alert)?;
    let cursor = self.catch_up().await?;
    tracing::info!(cursor, "projections rebuilt");
    Ok(cursor)
  }

  pub async fn apply(&self, event: &AcceptedEvent) -> Result<()> {
    self.apply_batch(std::slice::from_ref(event)).await
  }

  pub async fn apply_batch(&self, events: &[AcceptedEvent]) -> Result<()> {
    self.store.apply_batch(events).await.map_err(alert)
  }

  /// Apply everything accepted after the stored cursor.
  pub async fn catch_up(&self) -> Result<i64> {
    let mut cursor = self.store.cursor().await.map_err(alert)?;
    let mut chunks =
      std::pin::pin!(accepted_stream(self.ledger.clone(), cursor, self.batch).chunks(self.batch));

    while let Some(chunk) = chunks.next().await {
      let events = chunk.into_iter().collect::<Result<Vec<_>>>()?;
      self.apply_batch(&events).await?;
      if let Some(last) = events.last() {
        cursor = last.cursor;
      }
    }
    Ok(cursor)
  }

  pub async fn digest(&self) -> Result<String> {
    let snapshot = self.store.snapshot().await.map_err(alert)?;
    snapshot_digest(&snapshot)
  }

  /// Catch up, then keep catching up whenever a fact is accepted (or every
  /// `interval` as a fallback) until `shutdown` flips or the engine goes away.
  pub async fn follow(
    &self,
    mut events: broadcast::Receiver<LedgerEvent>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
  ) {
    let mut ticker = tokio::time::interval(interval);
    tracing::info!(?interval, "projection follower started");

    loop {
      tokio::select! {
        _ = ticker.tick() => {}
        received = events.recv() => match received {
          Ok(LedgerEvent::AcceptedFact { .. }) | Err(broadcast::error::RecvError::Lagged(_)) => {}
          Ok(_) => continue,
          Err(broadcast::error::RecvError::Closed) => {
            tracing::info!("event channel closed, stopping projection follower");
            break;
          }
        },
        _ = shutdown.changed() => {
          tracing::info!("shutdown signal received, stopping projection follower");
          break;
        }
      }

      match self.catch_up().await {
        Ok(cursor) => tracing::debug!(cursor, "projections caught up"),
        Err(err) => tracing::error!(%err, "projection catch-up failed"),
      }
    }
  }
}
