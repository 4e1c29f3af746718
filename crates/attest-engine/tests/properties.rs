//! # Property-Based Tests
//!
//! Order independence of critique combination, bucket monotonicity of the
//! decision policy, and equivalence of projection rebuilds.

use std::time::Duration;

use attest_core::{
  Confidence, Delta,
  critique::{Critique, CritiqueDraft, ReviewRole},
  fact::{Citation, EvidenceType, FactContent, FactKind, NewFact, Proposer, SourceLevel},
  ledger::{GENESIS, LedgerReader},
  policy::{DecisionPolicy, Outcome},
};
use attest_engine::{CritiqueAggregator, DecisionEngine, ProjectionBuilder};
use attest_store_sqlite::{SqliteLedger, SqliteProjections};
use proptest::collection::vec;
use proptest::prelude::*;
use uuid::Uuid;

fn runtime() -> tokio::runtime::Runtime {
  tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .expect("runtime")
}

fn wide_role(i: usize) -> ReviewRole {
  ReviewRole::new(
    format!("role-{i}"),
    Delta::from_basis_points(-10_000),
    Delta::from_basis_points(10_000),
  )
}

/// Submit one critique per role in `order` and combine.
fn combine_in_order(initial: u16, deltas: &[i32], order: &[usize]) -> Confidence {
  let roles: Vec<ReviewRole> = (0..deltas.len()).map(wide_role).collect();
  let agg = CritiqueAggregator::new(roles.clone());
  let fact_id = Uuid::new_v4();
  agg.open_review(fact_id, 1, Confidence::saturating(initial));

  for &i in order {
    agg
      .submit(Critique::from_draft(fact_id, 1, roles[i].name.clone(), CritiqueDraft {
        delta:    Delta::from_basis_points(deltas[i]),
        findings: Vec::new(),
        reason:   "property".into(),
      }))
      .expect("valid critique");
  }

  let names = agg.role_names();
  runtime()
    .block_on(agg.await_combined(fact_id, 1, &names, Duration::from_secs(1)))
    .expect("combined")
    .combined
}

fn strategy_deltas() -> impl Strategy<Value = (Vec<i32>, Vec<usize>)> {
  vec(-10_000i32..=10_000, 1..8).prop_flat_map(|deltas| {
    let order: Vec<usize> = (0..deltas.len()).collect();
    (Just(deltas), Just(order).prop_shuffle())
  })
}

fn rank(outcome: Outcome) -> u8 {
  match outcome {
    Outcome::Reject => 0,
    Outcome::NeedsRevision => 1,
    Outcome::Accept(attest_core::status::Annotation::AcceptWithNotes) => 2,
    Outcome::Accept(attest_core::status::Annotation::AutoAccept) => 3,
  }
}

proptest! {
  /// Submission order never changes the combined confidence.
  #[test]
  fn combination_is_order_independent(
    initial in 0u16..=10_000,
    (deltas, order) in strategy_deltas(),
  ) {
    let natural: Vec<usize> = (0..deltas.len()).collect();
    let in_order = combine_in_order(initial, &deltas, &natural);
    let shuffled = combine_in_order(initial, &deltas, &order);
    prop_assert_eq!(in_order, shuffled);

    let sum: i64 = deltas.iter().map(|d| i64::from(*d)).sum();
    let expected = (i64::from(initial) + sum).clamp(0, 10_000) as u16;
    prop_assert_eq!(in_order.basis_points(), expected);
  }

  /// A higher combined confidence never lands in a lower bucket.
  #[test]
  fn classification_is_monotonic(a in 0u16..=10_000, b in 0u16..=10_000) {
    let policy = DecisionPolicy::default();
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let lo = policy.classify(Confidence::saturating(lo), false);
    let hi = policy.classify(Confidence::saturating(hi), false);
    prop_assert!(rank(lo) <= rank(hi));
  }
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(12))]

  /// Incremental projection in any grouping equals a full rebuild.
  #[test]
  fn projection_grouping_does_not_matter(
    initials in vec(0u16..=10_000, 1..8),
    group in 1usize..6,
  ) {
    let rt = runtime();
    let (rebuilt, grouped) = rt.block_on(async {
      let (ledger, appender) = SqliteLedger::open_in_memory().await.expect("ledger");
      let engine = DecisionEngine::new(
        ledger,
        appender,
        DecisionPolicy { critique_timeout: Duration::from_millis(10), ..DecisionPolicy::default() },
        Vec::<ReviewRole>::new(),
        Vec::new(),
      );
      let subject = Uuid::new_v4();
      for (i, initial) in initials.iter().enumerate() {
        let f = engine
          .propose(NewFact {
            subject_id: if i % 2 == 0 { subject } else { Uuid::new_v4() },
            kind: FactKind::Residence,
            content: FactContent::new(format!("residence_{i}"), serde_json::json!("Haarlem")),
            citations: vec![Citation {
              source:      "Population register".into(),
              level:       SourceLevel::Secondary,
              evidence:    EvidenceType::Direct,
              locator:     None,
              attests:     None,
              is_original: false,
            }],
            proposer: Proposer { agent: "records-agent".into(), method: Default::default() },
            initial_confidence: Confidence::saturating(*initial),
          })
          .await
          .expect("propose");
        engine.review(f.fact_id).await.expect("review");
      }

      let events = engine.ledger().stream_accepted(GENESIS, 1_000).await.expect("stream");

      let full = ProjectionBuilder::new(
        engine.ledger().clone(),
        SqliteProjections::open_in_memory().await.expect("projections"),
      );
      full.rebuild().await.expect("rebuild");

      let incremental = ProjectionBuilder::new(
        engine.ledger().clone(),
        SqliteProjections::open_in_memory().await.expect("projections"),
      );
      for chunk in events.chunks(group).rev() {
        incremental.apply_batch(chunk).await.expect("apply");
      }

      (full.digest().await.expect("digest"), incremental.digest().await.expect("digest"))
    });
    prop_assert_eq!(rebuilt, grouped);
  }
}
