//! In-process critics that score a fact from its own citations.
//!
//! Both are deterministic: the same snapshot always yields the same draft.
//! Deltas are computed in basis points and clamped into the critic's role.

use std::collections::BTreeMap;

use attest_core::{
  Delta,
  critique::{BoxFuture, Critic, CriticError, CritiqueDraft, Finding, ReviewRole},
  fact::{EvidenceType, FactVersion, SourceLevel},
};

/// Lowercased, trimmed rendering used to compare attested values.
fn normalise(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s.trim().to_lowercase(),
    other => other.to_string().to_lowercase(),
  }
}

// ─── Source quality ──────────────────────────────────────────────────────────

/// Scores the source hierarchy: original primary records with direct
/// evidence raise confidence, tertiary-only support lowers it.
pub struct SourceQualityCritic {
  role: ReviewRole,
}

impl SourceQualityCritic {
  pub fn new(role: ReviewRole) -> Self { Self { role } }

  pub fn assess(&self, record: &FactVersion) -> CritiqueDraft {
    let mut bp = 0_i32;
    let mut findings = Vec::new();
    let citations = &record.citations;

    let best = citations
      .iter()
      .map(|c| c.level)
      .min_by_key(|level| match level {
        SourceLevel::Primary => 0,
        SourceLevel::Secondary => 1,
        SourceLevel::Tertiary => 2,
      });
    match best {
      Some(SourceLevel::Primary) => bp += 500,
      Some(SourceLevel::Secondary) | None => {}
      Some(SourceLevel::Tertiary) => {
        bp -= 1_000;
        findings.push(Finding::new(
          "source_level",
          "only tertiary sources; corroborate with a primary or secondary source",
        ));
      }
    }

    let derivative_primaries: Vec<&str> = citations
      .iter()
      .filter(|c| c.level == SourceLevel::Primary && !c.is_original)
      .map(|c| c.source.as_str())
      .collect();
    if !derivative_primaries.is_empty() {
      bp -= 500;
      for source in derivative_primaries {
        findings.push(Finding::new(
          "classification",
          format!("primary source {source:?} is a derivative; verify classification"),
        ));
      }
    }

    if citations.iter().any(|c| c.evidence == EvidenceType::Direct) {
      bp += 500;
    } else if citations.iter().all(|c| c.evidence == EvidenceType::Negative) {
      bp -= 500;
      findings.push(Finding::new(
        "evidence",
        "only negative evidence; the claim rests on absence of records",
      ));
    } else {
      findings.push(Finding::new("evidence", "no citation answers the claim directly"));
    }

    if citations.iter().any(|c| c.locator.is_none()) {
      findings.push(Finding::new(
        "locator",
        "some citations lack a locator; record where in the source the claim appears",
      ));
    }

    if let Some(incomplete) = &record.content.incomplete {
      bp -= 1_000;
      findings.push(Finding::new(
        "retrieval",
        format!(
          "retrieval incomplete after {} attempts: {}",
          incomplete.attempts, incomplete.last_error
        ),
      ));
    }

    let delta = self.role.clamp(Delta::from_basis_points(bp));
    let level = best.map_or("none", |l| match l {
      SourceLevel::Primary => "primary",
      SourceLevel::Secondary => "secondary",
      SourceLevel::Tertiary => "tertiary",
    });
    CritiqueDraft {
      delta,
      reason: format!(
        "{} citation(s); best source level {level}; {} finding(s)",
        citations.len(),
        findings.len()
      ),
      findings,
    }
  }
}

impl Default for SourceQualityCritic {
  fn default() -> Self { Self::new(ReviewRole::standards()) }
}

impl Critic for SourceQualityCritic {
  fn role(&self) -> &ReviewRole { &self.role }

  fn evaluate<'a>(
    &'a self,
    snapshot: &'a FactVersion,
  ) -> BoxFuture<'a, Result<CritiqueDraft, CriticError>> {
    Box::pin(async move { Ok(self.assess(snapshot)) })
  }
}

// ─── Evidence correlation ────────────────────────────────────────────────────

/// Groups citations by the value they attest. Agreement with the claimed
/// value is rewarded; any disagreement caps the delta at zero or below.
pub struct EvidenceCorrelationCritic {
  role: ReviewRole,
}

impl EvidenceCorrelationCritic {
  pub fn new(role: ReviewRole) -> Self { Self { role } }

  pub fn assess(&self, record: &FactVersion) -> CritiqueDraft {
    let claimed = normalise(&record.content.value);

    // Citations without an explicit attested value support the claim as stated.
    let mut groups: BTreeMap<String, usize> = BTreeMap::new();
    for citation in &record.citations {
      let key = citation
        .attests
        .as_deref()
        .map(|a| a.trim().to_lowercase())
        .unwrap_or_else(|| claimed.clone());
      *groups.entry(key).or_default() += 1;
    }

    let supporting = groups.get(&claimed).copied().unwrap_or(0);
    let conflicting: usize = groups
      .iter()
      .filter(|(value, _)| **value != claimed)
      .map(|(_, n)| n)
      .sum();

    let mut findings = Vec::new();
    let bp: i32 = if supporting == 0 {
      findings.push(Finding::new(
        "correlation",
        "no citation attests the claimed value",
      ));
      -3_000
    } else if conflicting > 0 {
      for (value, n) in groups.iter().filter(|(value, _)| **value != claimed) {
        findings.push(Finding::new(
          "conflict",
          format!("{n} citation(s) attest {value:?} instead"),
        ));
      }
      -500 * i32::try_from(conflicting).unwrap_or(i32::MAX / 500).min(4)
    } else if supporting >= 3 {
      1_000
    } else if supporting == 2 {
      500
    } else {
      findings.push(Finding::new(
        "corroboration",
        "single citation; seek an independent source",
      ));
      0
    };

    CritiqueDraft {
      delta: self.role.clamp(Delta::from_basis_points(bp)),
      reason: format!("{supporting} supporting, {conflicting} conflicting citation(s)"),
      findings,
    }
  }
}

impl Default for EvidenceCorrelationCritic {
  fn default() -> Self { Self::new(ReviewRole::reasoning()) }
}

impl Critic for EvidenceCorrelationCritic {
  fn role(&self) -> &ReviewRole { &self.role }

  fn evaluate<'a>(
    &'a self,
    snapshot: &'a FactVersion,
  ) -> BoxFuture<'a, Result<CritiqueDraft, CriticError>> {
    Box::pin(async move { Ok(self.assess(snapshot)) })
  }
}
