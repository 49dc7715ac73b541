//! Reviewer operations: queue, approve, override, history, dashboard.
//!
//! Suggestions are always re-resolved against the rule table as it is *now*,
//! not as it was when the prediction was made.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};

use crate::behavior::BehaviorLabel;
use crate::error::{OrchestratorError, Result};
pub use crate::ledger::DEFAULT_AI_CONFIDENCE;
use crate::ledger::{
    current_status, thread_history, DecisionEntry, LedgerMetrics, LedgerStore, ThreadStatus,
};
use crate::mailbox::{perform, Mailbox, MailboxAction, MailboxError, MessageRef};
use crate::rules::{resolve, RuleStore, RuleTable};
use crate::thread::Prediction;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub thread_id: String,
    pub sender: String,
    pub predicted_behavior: BehaviorLabel,
    pub suggested_action: String,
    pub status: ThreadStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadDetail {
    /// With `suggested_action` taken from the current rules.
    pub prediction: Prediction,
    pub status: ThreadStatus,
    pub history: Vec<DecisionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub replies_in_inbox: usize,
    pub decisions_logged: usize,
    pub accuracy_percent: Option<f64>,
    pub most_common_behavior: Option<BehaviorLabel>,
}

pub fn find_prediction<'a>(predictions: &'a [Prediction], thread_id: &str) -> Result<&'a Prediction> {
    predictions
        .iter()
        .find(|p| p.thread_id == thread_id)
        .ok_or_else(|| OrchestratorError::UnknownThread {
            thread_id: thread_id.to_string(),
        })
}

/// Model confidence as a percentage when known, else [`DEFAULT_AI_CONFIDENCE`].
pub fn default_confidence(p: &Prediction) -> f32 {
    p.confidence
        .map(|c| (c * 100.0).clamp(0.0, 100.0))
        .unwrap_or(DEFAULT_AI_CONFIDENCE)
}

/// Most frequent behavior; ties go to the earlier label in definition order.
pub fn most_common_behavior(predictions: &[Prediction]) -> Option<BehaviorLabel> {
    let mut counts = [0usize; BehaviorLabel::ALL.len()];
    for p in predictions {
        if let Some(i) = BehaviorLabel::ALL.iter().position(|l| *l == p.predicted_behavior) {
            counts[i] += 1;
        }
    }
    let max = counts.iter().copied().max().filter(|m| *m > 0)?;
    counts
        .iter()
        .position(|c| *c == max)
        .map(|i| BehaviorLabel::ALL[i])
}

pub struct ReviewService<R: RuleStore, L: LedgerStore> {
    rules: R,
    ledger: L,
}

impl<R: RuleStore, L: LedgerStore> ReviewService<R, L> {
    pub fn new(rules: R, ledger: L) -> Self {
        Self { rules, ledger }
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    fn current_rules(&self) -> Result<RuleTable> {
        self.rules.load()
    }

    pub fn current_suggestion(&self, p: &Prediction) -> Result<String> {
        Ok(resolve(p.predicted_behavior, &self.current_rules()?))
    }

    pub fn queue(&self, predictions: &[Prediction]) -> Result<Vec<ReviewItem>> {
        let rules = self.current_rules()?;
        let entries = self.ledger.all()?;
        Ok(predictions
            .iter()
            .map(|p| ReviewItem {
                thread_id: p.thread_id.clone(),
                sender: p.sender.clone(),
                predicted_behavior: p.predicted_behavior,
                suggested_action: resolve(p.predicted_behavior, &rules),
                status: current_status(&entries, &p.thread_id),
            })
            .collect())
    }

    pub fn detail(&self, predictions: &[Prediction], thread_id: &str) -> Result<ThreadDetail> {
        let mut prediction = find_prediction(predictions, thread_id)?.clone();
        prediction.suggested_action = self.current_suggestion(&prediction)?;
        let entries = self.ledger.all()?;
        Ok(ThreadDetail {
            prediction,
            status: current_status(&entries, thread_id),
            history: thread_history(&entries, thread_id),
        })
    }

    /// Accept the current suggestion.
    pub fn approve(
        &self,
        prediction: &Prediction,
        user_id: &str,
        ai_confidence: Option<f32>,
    ) -> Result<DecisionEntry> {
        let suggestion = self.current_suggestion(prediction)?;
        self.record(prediction, suggestion.clone(), suggestion, user_id, ai_confidence)
    }

    /// Replace the suggestion with `final_action`. Choosing the suggestion itself records Approved.
    pub fn override_action(
        &self,
        prediction: &Prediction,
        final_action: &str,
        user_id: &str,
        ai_confidence: Option<f32>,
    ) -> Result<DecisionEntry> {
        let suggestion = self.current_suggestion(prediction)?;
        self.record(
            prediction,
            suggestion,
            final_action.trim().to_string(),
            user_id,
            ai_confidence,
        )
    }

    fn record(
        &self,
        prediction: &Prediction,
        suggestion: String,
        final_action: String,
        user_id: &str,
        ai_confidence: Option<f32>,
    ) -> Result<DecisionEntry> {
        let entry = DecisionEntry::new(
            prediction.thread_id.clone(),
            suggestion,
            final_action,
            user_id,
            ai_confidence.unwrap_or_else(|| default_confidence(prediction)),
            Utc::now(),
        );
        if let Err(e) = self.ledger.append(entry.clone()) {
            if e.is_audit_loss() {
                error!(thread_id = %prediction.thread_id, error = %e, "decision was not recorded; reviewer must retry");
            }
            return Err(e);
        }
        Ok(entry)
    }

    pub fn history(&self, thread_id: &str) -> Result<Vec<DecisionEntry>> {
        Ok(thread_history(&self.ledger.all()?, thread_id))
    }

    pub fn metrics(&self) -> Result<LedgerMetrics> {
        self.ledger.metrics()
    }

    pub fn dashboard(&self, predictions: &[Prediction]) -> Result<DashboardStats> {
        let metrics = self.metrics()?;
        Ok(DashboardStats {
            replies_in_inbox: predictions.len(),
            decisions_logged: metrics.total,
            accuracy_percent: metrics.accuracy_percent,
            most_common_behavior: most_common_behavior(predictions),
        })
    }
}

/// Run a reviewer's mailbox follow-up for a decided thread. The decision is
/// already in the ledger; a failure here does not undo it.
pub async fn follow_up(
    mailbox: &dyn Mailbox,
    prediction: &Prediction,
    action: &MailboxAction,
) -> std::result::Result<Option<String>, MailboxError> {
    let message = mailbox
        .get_content(&MessageRef {
            id: prediction.thread_id.clone(),
            thread_id: prediction.thread_id.clone(),
        })
        .await?;
    let reply_to = (!prediction.sender.is_empty()).then_some(prediction.sender.as_str());
    perform(mailbox, &message, action, reply_to).await.inspect_err(|e| {
        warn!(thread_id = %prediction.thread_id, error = %e, "mailbox follow-up failed");
    })
}
