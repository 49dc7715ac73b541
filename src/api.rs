//! HTTP review front end.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::behavior::BehaviorLabel;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::labeler::{Labeled, ModelArtifact};
use crate::ledger::{DecisionEntry, JsonFileLedger, LedgerMetrics, LedgerStore};
use crate::mailbox::{Mailbox, MailboxAction};
use crate::review::{find_prediction, follow_up, DashboardStats, ReviewItem, ReviewService, ThreadDetail};
use crate::rules::{resolve, JsonFileRuleStore, RuleStore, RuleTable};
use crate::store::PredictionsFile;
use crate::thread::Prediction;

pub type SharedRules = Arc<dyn RuleStore>;
pub type SharedLedger = Arc<dyn LedgerStore>;

#[derive(Clone)]
pub struct AppState {
    review: Arc<ReviewService<SharedRules, SharedLedger>>,
    predictions: Arc<PredictionsFile>,
    model_path: PathBuf,
    mailbox: Option<Arc<dyn Mailbox>>,
}

impl AppState {
    pub fn new(
        rules: SharedRules,
        ledger: SharedLedger,
        predictions: PredictionsFile,
        model_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            review: Arc::new(ReviewService::new(rules, ledger)),
            predictions: Arc::new(predictions),
            model_path: model_path.into(),
            mailbox: None,
        }
    }

    /// File-backed stores at the configured paths. The ledger file is
    /// created as `[]` up front.
    pub fn from_config(cfg: &OrchestratorConfig) -> Self {
        let ledger = JsonFileLedger::new(&cfg.paths.ledger);
        if let Err(e) = ledger.ensure_initialized() {
            tracing::warn!(path = %cfg.paths.ledger.display(), error = %e, "could not create ledger file");
        }
        Self::new(
            Arc::new(JsonFileRuleStore::new(&cfg.paths.rules)),
            Arc::new(ledger),
            PredictionsFile::new(&cfg.paths.predictions),
            &cfg.paths.model,
        )
    }

    pub fn with_mailbox(mut self, mailbox: Arc<dyn Mailbox>) -> Self {
        self.mailbox = Some(mailbox);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/review/queue", get(review_queue))
        .route("/review/threads/{id}", get(thread_detail))
        .route("/review/threads/{id}/approve", post(approve))
        .route("/review/threads/{id}/override", post(override_action))
        .route("/rules", get(get_rules).put(put_rules))
        .route("/rules/options", get(rule_options))
        .route("/ledger", get(ledger_entries))
        .route("/ledger/metrics", get(ledger_metrics))
        .route("/dashboard", get(dashboard))
        .route("/classify", post(classify))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    Domain(OrchestratorError),
    BadRequest(String),
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self::Domain(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, thread_id) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Domain(e) => {
                let status = match e {
                    OrchestratorError::UnknownThread { .. } => StatusCode::NOT_FOUND,
                    OrchestratorError::InconsistentDecision { .. }
                    | OrchestratorError::DegenerateInput(_) => StatusCode::BAD_REQUEST,
                    OrchestratorError::ModelMismatch { .. } => StatusCode::CONFLICT,
                    OrchestratorError::ModelUnavailable { .. }
                    | OrchestratorError::AuditWrite { .. } => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = if e.is_audit_loss() {
                    format!("{e}; the decision was NOT recorded, please retry")
                } else {
                    e.to_string()
                };
                (status, message, e.thread_id().map(str::to_string))
            }
        };
        let body = serde_json::json!({ "error": message, "thread_id": thread_id });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ------------------------------------------------------------
// Review
// ------------------------------------------------------------

async fn review_queue(State(state): State<AppState>) -> ApiResult<Vec<ReviewItem>> {
    let preds = state.predictions.load()?;
    Ok(Json(state.review.queue(&preds)?))
}

async fn thread_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ThreadDetail> {
    let preds = state.predictions.load()?;
    Ok(Json(state.review.detail(&preds, &id)?))
}

#[derive(Deserialize)]
struct ApproveReq {
    user_id: String,
    #[serde(default)]
    ai_confidence: Option<f32>,
    #[serde(default)]
    follow_up: Option<MailboxAction>,
}

#[derive(Deserialize)]
struct OverrideReq {
    user_id: String,
    final_action: String,
    #[serde(default)]
    ai_confidence: Option<f32>,
    #[serde(default)]
    follow_up: Option<MailboxAction>,
}

#[derive(Serialize)]
struct FollowUpResult {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct DecisionResp {
    entry: DecisionEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    follow_up: Option<FollowUpResult>,
}

fn require_user(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id is required".into()));
    }
    Ok(())
}

async fn run_follow_up(
    state: &AppState,
    prediction: &Prediction,
    action: Option<&MailboxAction>,
) -> Option<FollowUpResult> {
    let action = action?;
    let Some(mailbox) = state.mailbox.as_deref() else {
        return Some(FollowUpResult {
            ok: false,
            sent_id: None,
            error: Some("no mailbox configured".into()),
        });
    };
    Some(match follow_up(mailbox, prediction, action).await {
        Ok(sent_id) => FollowUpResult {
            ok: true,
            sent_id,
            error: None,
        },
        Err(e) => FollowUpResult {
            ok: false,
            sent_id: None,
            error: Some(e.to_string()),
        },
    })
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveReq>,
) -> ApiResult<DecisionResp> {
    require_user(&req.user_id)?;
    let preds = state.predictions.load()?;
    let prediction = find_prediction(&preds, &id)?;
    let entry = state
        .review
        .approve(prediction, req.user_id.trim(), req.ai_confidence)?;
    let follow_up = run_follow_up(&state, prediction, req.follow_up.as_ref()).await;
    Ok(Json(DecisionResp { entry, follow_up }))
}

async fn override_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<OverrideReq>,
) -> ApiResult<DecisionResp> {
    require_user(&req.user_id)?;
    if req.final_action.trim().is_empty() {
        return Err(ApiError::BadRequest("final_action is required".into()));
    }
    let preds = state.predictions.load()?;
    let prediction = find_prediction(&preds, &id)?;
    let entry = state.review.override_action(
        prediction,
        &req.final_action,
        req.user_id.trim(),
        req.ai_confidence,
    )?;
    let follow_up = run_follow_up(&state, prediction, req.follow_up.as_ref()).await;
    Ok(Json(DecisionResp { entry, follow_up }))
}

// ------------------------------------------------------------
// Rules
// ------------------------------------------------------------

async fn get_rules(State(state): State<AppState>) -> ApiResult<RuleTable> {
    Ok(Json(state.review.rules().load()?))
}

/// Replace the whole table. Every key must name a behavior; actions must be non-empty.
async fn put_rules(
    State(state): State<AppState>,
    Json(body): Json<BTreeMap<String, String>>,
) -> ApiResult<RuleTable> {
    let mut table = RuleTable::default();
    for (behavior, action) in &body {
        table
            .update(behavior, action)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }
    state.review.rules().save(&table)?;
    Ok(Json(table))
}

async fn rule_options(State(state): State<AppState>) -> ApiResult<Vec<String>> {
    Ok(Json(state.review.rules().load()?.override_options()))
}

// ------------------------------------------------------------
// Ledger & dashboard
// ------------------------------------------------------------

async fn ledger_entries(State(state): State<AppState>) -> ApiResult<Vec<DecisionEntry>> {
    Ok(Json(state.review.ledger().all()?))
}

#[derive(Serialize)]
struct MetricsResp {
    #[serde(flatten)]
    metrics: LedgerMetrics,
    accuracy_display: String,
}

async fn ledger_metrics(State(state): State<AppState>) -> ApiResult<MetricsResp> {
    let metrics = state.review.metrics()?;
    let accuracy_display = metrics.accuracy_display();
    Ok(Json(MetricsResp {
        metrics,
        accuracy_display,
    }))
}

async fn dashboard(State(state): State<AppState>) -> ApiResult<DashboardStats> {
    let preds = state.predictions.load()?;
    Ok(Json(state.review.dashboard(&preds)?))
}

// ------------------------------------------------------------
// Single-text inference
// ------------------------------------------------------------

#[derive(Deserialize)]
struct ClassifyReq {
    text: String,
}

#[derive(Serialize)]
struct ClassifyResp {
    predicted_behavior: BehaviorLabel,
    suggested_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence: Option<f32>,
    model_available: bool,
}

/// Without a trained artifact the answer is `Unknown` / "Review Manually".
async fn classify(
    State(state): State<AppState>,
    Json(req): Json<ClassifyReq>,
) -> ApiResult<ClassifyResp> {
    let (labeled, model_available) = match ModelArtifact::load(&state.model_path) {
        Ok(model) => (model.predict_text(&req.text)?, true),
        Err(OrchestratorError::ModelUnavailable { path }) => {
            tracing::warn!(path = %path.display(), "no trained model; answering Unknown");
            (Labeled::unknown(), false)
        }
        Err(e) => return Err(e.into()),
    };
    let rules = state.review.rules().load()?;
    Ok(Json(ClassifyResp {
        predicted_behavior: labeled.label,
        suggested_action: resolve(labeled.label, &rules),
        confidence: labeled.confidence,
        model_available,
    }))
}
