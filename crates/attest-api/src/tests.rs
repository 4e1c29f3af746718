//! Router tests against in-memory SQLite stores.

use std::{sync::Arc, time::Duration};

use attest_core::{critique::ReviewRole, policy::DecisionPolicy};
use attest_engine::{DecisionEngine, ProjectionBuilder};
use attest_store_sqlite::{SqliteAppender, SqliteLedger, SqliteProjections};
use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt as _;
use uuid::Uuid;

use crate::{ApiState, Backend, api_router};

struct Sqlite;

impl Backend for Sqlite {
  type Ledger = SqliteLedger;
  type Appender = SqliteAppender;
  type Projections = SqliteProjections;
}

struct Harness {
  router:  Router,
  builder: ProjectionBuilder<SqliteLedger, SqliteProjections>,
}

async fn harness() -> Harness {
  let (ledger, appender) = SqliteLedger::open_in_memory().await.unwrap();
  let projections = SqliteProjections::open_in_memory().await.unwrap();
  let engine = DecisionEngine::new(
    ledger.clone(),
    appender,
    DecisionPolicy { critique_timeout: Duration::from_secs(5), ..DecisionPolicy::default() },
    [ReviewRole::standards(), ReviewRole::reasoning()],
    Vec::new(),
  );
  Harness {
    router:  api_router::<Sqlite>(ApiState::new(engine, Arc::new(projections.clone()))),
    builder: ProjectionBuilder::new(ledger, projections),
  }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let request = Request::builder()
    .method(method)
    .uri(uri)
    .header("content-type", "application/json")
    .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
    .unwrap();
  let response = router.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
  (status, value)
}

fn new_fact(subject_id: Uuid, date: &str, initial: f64) -> Value {
  json!({
    "subject_id": subject_id,
    "kind": "birth",
    "content": { "claim": "birth_date", "value": date },
    "citations": [{
      "source": "Civil birth register, Haarlem",
      "level": "primary",
      "evidence": "direct",
      "locator": "akte 311",
      "attests": date,
      "is_original": true
    }],
    "proposer": { "agent": "records-agent" },
    "initial_confidence": initial
  })
}

fn critique(revision: u64, role: &str, delta: f64) -> Value {
  json!({ "revision": revision, "role": role, "delta": delta, "reason": "checked the register" })
}

/// Poll until the fact leaves the review states.
async fn settled(router: &Router, id: &str) -> Value {
  tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      let (_, body) = call(router, "GET", &format!("/facts/{id}"), None).await;
      if !matches!(body["status"].as_str(), Some("PROPOSED" | "UNDER_REVIEW")) {
        return body;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
  })
  .await
  .expect("decision in time")
}

/// Propose, critique with both roles and wait for the decision.
async fn decided(router: &Router, fact: Value, standards: f64, reasoning: f64) -> Value {
  let (status, created) = call(router, "POST", "/facts", Some(fact)).await;
  assert_eq!(status, StatusCode::CREATED);
  let id = created["fact_id"].as_str().unwrap().to_owned();
  let uri = format!("/facts/{id}/critiques");
  let (status, _) = call(router, "POST", &uri, Some(critique(1, "standards", standards))).await;
  assert_eq!(status, StatusCode::ACCEPTED);
  let (status, _) = call(router, "POST", &uri, Some(critique(1, "reasoning", reasoning))).await;
  assert_eq!(status, StatusCode::ACCEPTED);
  settled(router, &id).await
}

// ─── Facts ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn propose_and_accept_over_http() {
  let h = harness().await;
  let (status, created) =
    call(&h.router, "POST", "/facts", Some(new_fact(Uuid::new_v4(), "1850-03-02", 0.85))).await;
  assert_eq!(status, StatusCode::CREATED);
  assert_eq!(created["status"], "PROPOSED");
  assert_eq!(created["version"], 1);

  let id = created["fact_id"].as_str().unwrap();
  let uri = format!("/facts/{id}/critiques");
  call(&h.router, "POST", &uri, Some(critique(1, "standards", -0.10))).await;
  call(&h.router, "POST", &uri, Some(critique(1, "reasoning", 0.0))).await;

  let current = settled(&h.router, id).await;
  assert_eq!(current["status"], "ACCEPTED");
  assert_eq!(current["annotation"], "accept_with_notes");
  assert_eq!(current["final_confidence"], 0.75);

  let (status, history) = call(&h.router, "GET", &format!("/facts/{id}/history"), None).await;
  assert_eq!(status, StatusCode::OK);
  let statuses: Vec<&str> = history
    .as_array()
    .unwrap()
    .iter()
    .map(|e| e["effective_status"].as_str().unwrap())
    .collect();
  assert_eq!(statuses, vec!["PROPOSED", "UNDER_REVIEW", "ACCEPTED"]);
}

#[tokio::test]
async fn invalid_proposal_is_a_bad_request() {
  let h = harness().await;
  let mut fact = new_fact(Uuid::new_v4(), "1850-03-02", 0.9);
  fact["citations"] = json!([]);
  let (status, body) = call(&h.router, "POST", "/facts", Some(fact)).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("citation"));
}

#[tokio::test]
async fn unknown_fact_is_not_found() {
  let h = harness().await;
  let id = Uuid::new_v4();
  let (status, _) = call(&h.router, "GET", &format!("/facts/{id}"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  let (status, _) = call(&h.router, "GET", &format!("/facts/{id}/history"), None).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn out_of_range_critique_is_rejected() {
  let h = harness().await;
  let (_, created) =
    call(&h.router, "POST", "/facts", Some(new_fact(Uuid::new_v4(), "1850-03-02", 0.9))).await;
  let id = created["fact_id"].as_str().unwrap();
  let uri = format!("/facts/{id}/critiques");

  let (status, _) = call(&h.router, "POST", &uri, Some(critique(1, "standards", -0.5))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  let (status, _) = call(&h.router, "POST", &uri, Some(critique(2, "standards", 0.0))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redelivered_critique_reports_duplicate() {
  let h = harness().await;
  let (_, created) =
    call(&h.router, "POST", "/facts", Some(new_fact(Uuid::new_v4(), "1850-03-02", 0.9))).await;
  let id = created["fact_id"].as_str().unwrap();
  let uri = format!("/facts/{id}/critiques");
  let mut body = critique(1, "standards", 0.0);
  body["critique_id"] = json!(Uuid::new_v4());

  let (_, first) = call(&h.router, "POST", &uri, Some(body.clone())).await;
  let (status, second) = call(&h.router, "POST", &uri, Some(body)).await;
  assert_eq!(first["outcome"], "accepted");
  assert_eq!(status, StatusCode::ACCEPTED);
  assert_eq!(second["outcome"], "duplicate");
}

#[tokio::test]
async fn stale_revision_is_a_conflict() {
  let h = harness().await;
  let accepted = decided(&h.router, new_fact(Uuid::new_v4(), "1850-03-02", 0.9), 0.0, 0.0).await;
  let id = accepted["fact_id"].as_str().unwrap();

  let mut revision = new_fact(Uuid::new_v4(), "1850-03-04", 0.9);
  revision["expected_version"] = json!(1);
  let (status, _) =
    call(&h.router, "POST", &format!("/facts/{id}/revisions"), Some(revision)).await;
  assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn adjudication_releases_a_held_fact() {
  let h = harness().await;
  let subject = Uuid::new_v4();
  decided(&h.router, new_fact(subject, "1850-03-02", 0.9), 0.0, 0.0).await;
  let held = decided(&h.router, new_fact(subject, "1850-03-20", 0.9), 0.0, 0.0).await;
  assert_eq!(held["status"], "CONFLICT_HELD");
  let uri = format!("/facts/{}/adjudication", held["fact_id"].as_str().unwrap());

  let (status, _) = call(
    &h.router,
    "POST",
    &uri,
    Some(json!({ "resolution_note": "ok", "resulting_status": "ACCEPTED" })),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);

  let (status, body) = call(
    &h.router,
    "POST",
    &uri,
    Some(json!({
      "resolution_note": "the civil register outranks the church copy",
      "resulting_status": "UNDER_REVIEW"
    })),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "ACCEPTED");

  let (_, accepted) =
    call(&h.router, "GET", &format!("/subjects/{subject}/accepted"), None).await;
  assert_eq!(accepted.as_array().unwrap().len(), 2);
}

// ─── Feeds ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn feeds_page_by_cursor() {
  let h = harness().await;
  decided(&h.router, new_fact(Uuid::new_v4(), "1850-03-02 Haarlem", 0.9), 0.0, 0.0).await;
  decided(&h.router, new_fact(Uuid::new_v4(), "1851-04-05 Leiden", 0.9), 0.0, 0.0).await;
  h.builder.catch_up().await.unwrap();

  let (status, page) = call(&h.router, "GET", "/accepted?limit=1", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(page["items"].as_array().unwrap().len(), 1);
  let next = page["next_cursor"].as_i64().unwrap();
  let (_, rest) = call(&h.router, "GET", &format!("/accepted?cursor={next}"), None).await;
  assert_eq!(rest["items"].as_array().unwrap().len(), 1);

  let (status, hits) = call(&h.router, "GET", "/search?text=leiden", None).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(hits.as_array().unwrap().len(), 1);
  assert_eq!(hits[0]["value"], "1851-04-05 Leiden");

  let (_, sync) = call(&h.router, "GET", "/sync", None).await;
  assert_eq!(sync["items"].as_array().unwrap().len(), 2);
}
