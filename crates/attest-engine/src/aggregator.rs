//! Collects critiques for one `(fact_id, revision)` review window and
//! combines them once every expected role has answered or the wait times out.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  sync::{Mutex, PoisonError},
  time::Duration,
};

use attest_core::{
  Confidence, Error, Result,
  critique::{Critique, ReviewRole},
};
use tokio::sync::watch;
use uuid::Uuid;

type WindowKey = (Uuid, u32);

/// Result of [`CritiqueAggregator::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
  Accepted,
  /// The critique id was already recorded; nothing changed.
  Duplicate,
}

/// Everything the decision engine needs from a closed review window.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedResult {
  pub initial:       Confidence,
  /// Received critiques, ordered by role name.
  pub critiques:     Vec<Critique>,
  pub combined:      Confidence,
  pub missing_roles: Vec<String>,
  pub partial:       bool,
}

struct Window {
  initial:   Confidence,
  critiques: BTreeMap<String, Critique>,
  /// Publishes the set of roles that have answered so far.
  answered:  watch::Sender<BTreeSet<String>>,
}

/// Holds open review windows. Roles and their delta ranges are fixed at
/// construction.
pub struct CritiqueAggregator {
  roles:   BTreeMap<String, ReviewRole>,
  windows: Mutex<HashMap<WindowKey, Window>>,
}

impl CritiqueAggregator {
  pub fn new(roles: impl IntoIterator<Item = ReviewRole>) -> Self {
    Self {
      roles:   roles.into_iter().map(|r| (r.name.clone(), r)).collect(),
      windows: Mutex::new(HashMap::new()),
    }
  }

  pub fn roles(&self) -> impl Iterator<Item = &ReviewRole> { self.roles.values() }

  pub fn role(&self, name: &str) -> Option<&ReviewRole> { self.roles.get(name) }

  /// Names of every configured role, sorted.
  pub fn role_names(&self) -> Vec<String> { self.roles.keys().cloned().collect() }

  fn windows(&self) -> std::sync::MutexGuard<'_, HashMap<WindowKey, Window>> {
    self.windows.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Open (or reopen, discarding anything collected) the window for one
  /// revision.
  pub fn open_review(&self, fact_id: Uuid, revision: u32, initial: Confidence) {
    let (answered, _) = watch::channel(BTreeSet::new());
    self.windows().insert((fact_id, revision), Window {
      initial,
      critiques: BTreeMap::new(),
      answered,
    });
  }

  pub fn is_open(&self, fact_id: Uuid, revision: u32) -> bool {
    self.windows().contains_key(&(fact_id, revision))
  }

  /// Drop a window without combining it.
  pub fn close_review(&self, fact_id: Uuid, revision: u32) {
    self.windows().remove(&(fact_id, revision));
  }

  pub fn submit(&self, critique: Critique) -> Result<SubmitOutcome> {
    let role = self.roles.get(&critique.role).ok_or_else(|| {
      Error::validation(format!("unknown review role {:?}", critique.role))
    })?;
    role.check(critique.delta)?;
    if critique.reason.trim().is_empty() {
      return Err(Error::validation("critique reason must not be empty"));
    }

    let mut windows = self.windows();
    let window = windows
      .get_mut(&(critique.fact_id, critique.revision))
      .ok_or_else(|| {
        Error::validation(format!(
          "fact {} revision {} is not under review",
          critique.fact_id, critique.revision
        ))
      })?;

    if window
      .critiques
      .values()
      .any(|c| c.critique_id == critique.critique_id)
    {
      return Ok(SubmitOutcome::Duplicate);
    }
    if window.critiques.contains_key(&critique.role) {
      return Err(Error::validation(format!(
        "role {:?} already reviewed revision {} of fact {}",
        critique.role, critique.revision, critique.fact_id
      )));
    }

    let role_name = critique.role.clone();
    window.critiques.insert(role_name.clone(), critique);
    window.answered.send_modify(|answered| {
      answered.insert(role_name);
    });
    Ok(SubmitOutcome::Accepted)
  }

  /// Wait until every role in `expected_roles` has answered or `timeout`
  /// elapses, then close the window and combine what arrived.
  pub async fn await_combined(
    &self,
    fact_id: Uuid,
    revision: u32,
    expected_roles: &[String],
    timeout: Duration,
  ) -> Result<CombinedResult> {
    let mut answered = {
      let windows = self.windows();
      let window = windows.get(&(fact_id, revision)).ok_or_else(|| {
        Error::validation(format!(
          "fact {fact_id} revision {revision} is not under review"
        ))
      })?;
      window.answered.subscribe()
    };

    // Elapsing the timeout and losing the sender both just end the wait; the
    // missing roles are reported below.
    let _ = tokio::time::timeout(
      timeout,
      answered.wait_for(|roles| expected_roles.iter().all(|r| roles.contains(r))),
    )
    .await;

    let window = self.windows().remove(&(fact_id, revision)).ok_or_else(|| {
      Error::validation(format!(
        "review window for fact {fact_id} revision {revision} was closed"
      ))
    })?;

    let critiques: Vec<Critique> = window.critiques.into_values().collect();
    let missing_roles: Vec<String> = expected_roles
      .iter()
      .filter(|r| critiques.iter().all(|c| &c.role != *r))
      .cloned()
      .collect();
    let combined = window.initial.combine(critiques.iter().map(|c| c.delta));

    Ok(CombinedResult {
      initial: window.initial,
      combined,
      partial: !missing_roles.is_empty(),
      missing_roles,
      critiques,
    })
  }
}
