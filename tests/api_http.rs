// tests/api_http.rs
//
// HTTP-level tests for the review Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - review queue / approve / override and the ledger metrics they feed
// - rule editing and override options
// - POST /classify without a trained model
// - mailbox follow-ups after a decision

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use email_behavior_orchestrator::{
    api::{self, AppState},
    ledger::MemoryLedger,
    mailbox::{MemoryMailbox, MessageContent},
    rules::{JsonFileRuleStore, MemoryRuleStore},
    store::PredictionsFile,
    BehaviorLabel, Prediction,
};

const BODY_LIMIT: usize = 1024 * 1024;

struct Fixture {
    _dir: tempfile::TempDir,
    state: AppState,
}

impl Fixture {
    fn router(&self) -> Router {
        api::router(self.state.clone())
    }
}

fn prediction(id: &str, behavior: BehaviorLabel) -> Prediction {
    Prediction {
        thread_id: id.into(),
        sender: "customer@example.com".into(),
        email_text: "Please confirm my booking.".into(),
        predicted_behavior: behavior,
        suggested_action: "Close Ticket".into(),
        confidence: None,
    }
}

/// Memory rules and ledger, predictions on disk, no model file.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let predictions = PredictionsFile::new(dir.path().join("predictions.json"));
    predictions
        .save(&[
            prediction("T1", BehaviorLabel::Confirmation),
            prediction("T2", BehaviorLabel::Unknown),
        ])
        .unwrap();
    let state = AppState::new(
        Arc::new(MemoryRuleStore::default()),
        Arc::new(MemoryLedger::new()),
        predictions,
        dir.path().join("model/model.json"),
    );
    Fixture { _dir: dir, state }
}

async fn call(app: Router, method: &str, uri: &str, payload: Option<Json>) -> (StatusCode, Json) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match payload {
        Some(p) => builder
            .header("content-type", "application/json")
            .body(Body::from(p.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

#[tokio::test]
async fn health_returns_ok() {
    let fx = fixture();
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = fx.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap().trim(), "OK");
}

#[tokio::test]
async fn queue_shows_current_rules_and_pending_status() {
    let fx = fixture();
    let (status, v) = call(fx.router(), "GET", "/review/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    let items = v.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["thread_id"], "T1");
    assert_eq!(items[0]["suggested_action"], "Close Ticket");
    assert_eq!(items[0]["status"], "Pending");
    // Stored suggestion was stale; the queue re-resolves against the rule table.
    assert_eq!(items[1]["suggested_action"], "Review Manually");
}

#[tokio::test]
async fn approve_then_override_moves_accuracy() {
    let fx = fixture();

    let (status, v) = call(
        fx.router(),
        "POST",
        "/review/threads/T1/approve",
        Some(json!({ "user_id": "reviewer" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["entry"]["decision_status"], "Approved");
    assert_eq!(v["entry"]["final_action"], "Close Ticket");
    assert_eq!(v["entry"]["ai_confidence"], 85.0);
    assert!(v.get("follow_up").is_none());

    let (_, m) = call(fx.router(), "GET", "/ledger/metrics", None).await;
    assert_eq!(m["total"], 1);
    assert_eq!(m["accuracy_percent"], 100.0);
    assert_eq!(m["accuracy_display"], "100.0%");

    let (status, v) = call(
        fx.router(),
        "POST",
        "/review/threads/T1/override",
        Some(json!({ "user_id": "reviewer", "final_action": "Escalate to Manager" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["entry"]["decision_status"], "Overridden");
    assert_eq!(v["entry"]["ai_suggestion"], "Close Ticket");

    let (_, m) = call(fx.router(), "GET", "/ledger/metrics", None).await;
    assert_eq!(m["approved_count"], 1);
    assert_eq!(m["overridden_count"], 1);
    assert_eq!(m["accuracy_display"], "50.0%");

    let (_, detail) = call(fx.router(), "GET", "/review/threads/T1", None).await;
    assert_eq!(detail["status"], "Overridden");
    assert_eq!(detail["history"].as_array().unwrap().len(), 2);

    let (_, dash) = call(fx.router(), "GET", "/dashboard", None).await;
    assert_eq!(dash["decisions_logged"], 2);
}

#[tokio::test]
async fn bad_decisions_are_rejected() {
    let fx = fixture();

    let (status, v) = call(
        fx.router(),
        "POST",
        "/review/threads/T1/approve",
        Some(json!({ "user_id": "  " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["error"].as_str().unwrap().contains("user_id"));

    let (status, _) = call(
        fx.router(),
        "POST",
        "/review/threads/T1/override",
        Some(json!({ "user_id": "reviewer", "final_action": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, v) = call(
        fx.router(),
        "POST",
        "/review/threads/NOPE/approve",
        Some(json!({ "user_id": "reviewer" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(v["thread_id"], "NOPE");

    let (_, m) = call(fx.router(), "GET", "/ledger/metrics", None).await;
    assert_eq!(m["total"], 0);
    assert_eq!(m["accuracy_display"], "N/A");
}

#[tokio::test]
async fn rules_edit_and_options() {
    let fx = fixture();

    let (status, _) = call(
        fx.router(),
        "PUT",
        "/rules",
        Some(json!({ "Gratitude": "Say Thanks" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, v) = call(
        fx.router(),
        "PUT",
        "/rules",
        Some(json!({ "Confirmation": "Send Receipt", "Unknown": "Ask Customer" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {v}");

    let (_, rules) = call(fx.router(), "GET", "/rules", None).await;
    assert_eq!(rules["Confirmation"], "Send Receipt");
    assert!(rules.get("Escalation").is_none());

    let (_, queue) = call(fx.router(), "GET", "/review/queue", None).await;
    assert_eq!(queue[0]["suggested_action"], "Send Receipt");
    assert_eq!(queue[1]["suggested_action"], "Ask Customer");

    let (_, opts) = call(fx.router(), "GET", "/rules/options", None).await;
    let opts: Vec<&str> = opts.as_array().unwrap().iter().map(|o| o.as_str().unwrap()).collect();
    assert_eq!(opts, vec!["Ask Customer", "Send Receipt", "No Action"]);
}

#[tokio::test]
async fn rule_edits_persist_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let rules_path = dir.path().join("rules.json");
    let predictions = PredictionsFile::new(dir.path().join("predictions.json"));
    predictions
        .save(&[prediction("T1", BehaviorLabel::Confirmation)])
        .unwrap();
    let state = AppState::new(
        Arc::new(JsonFileRuleStore::new(&rules_path)),
        Arc::new(MemoryLedger::new()),
        predictions,
        dir.path().join("model.json"),
    );

    let (status, _) = call(
        api::router(state.clone()),
        "PUT",
        "/rules",
        Some(json!({ "confirmation": "Archive" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let on_disk: Json =
        serde_json::from_str(&std::fs::read_to_string(&rules_path).unwrap()).unwrap();
    assert_eq!(on_disk["Confirmation"], "Archive");

    let (_, v) = call(
        api::router(state),
        "POST",
        "/review/threads/T1/approve",
        Some(json!({ "user_id": "reviewer", "ai_confidence": 91.5 })),
    )
    .await;
    assert_eq!(v["entry"]["ai_suggestion"], "Archive");
    assert_eq!(v["entry"]["ai_confidence"], 91.5);
}

#[tokio::test]
async fn classify_without_model_is_unknown() {
    let fx = fixture();
    let (status, v) = call(
        fx.router(),
        "POST",
        "/classify",
        Some(json!({ "text": "Please confirm my booking." })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["predicted_behavior"], "Unknown");
    assert_eq!(v["suggested_action"], "Review Manually");
    assert_eq!(v["model_available"], false);
}

#[tokio::test]
async fn follow_up_reply_goes_through_mailbox() {
    let fx = fixture();
    let mailbox = Arc::new(MemoryMailbox::with_labels(["Handled"]));
    mailbox.deliver(
        "T1",
        MessageContent {
            id: "T1".into(),
            subject: "Booking".into(),
            from: "someone-else@example.com".into(),
            body: "Please confirm my booking.".into(),
        },
    );
    let state = fx.state.clone().with_mailbox(mailbox.clone());

    let (status, v) = call(
        api::router(state.clone()),
        "POST",
        "/review/threads/T1/approve",
        Some(json!({
            "user_id": "reviewer",
            "follow_up": { "kind": "reply", "body": "Your booking is confirmed." }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "body: {v}");
    assert_eq!(v["follow_up"]["ok"], true);

    let sent = mailbox.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "customer@example.com");
    assert_eq!(sent[0].subject, "Re: Booking");

    // A failing follow-up does not undo the recorded decision.
    let (status, v) = call(
        api::router(state),
        "POST",
        "/review/threads/T1/approve",
        Some(json!({
            "user_id": "reviewer",
            "follow_up": { "kind": "label", "name": "Missing" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["follow_up"]["ok"], false);
    assert_eq!(v["entry"]["decision_status"], "Approved");
    assert!(mailbox.in_inbox("T1"));
}
