//! Remote categorical classifier.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use super::provider::{sanitize_reply, DynProvider};
use super::{BehaviorLabeler, LabelDoc, Labeled};
use crate::behavior::BehaviorLabel;
use crate::error::{OrchestratorError, Result};
use crate::telemetry::text_fingerprint;

// Whole-word, case-insensitive pattern per category, in definition order.
static CATEGORY_PATTERNS: Lazy<Vec<(BehaviorLabel, Regex)>> = Lazy::new(|| {
    BehaviorLabel::ALL
        .iter()
        .map(|label| {
            let words = regex::escape(label.as_str()).replace(' ', r"\s+");
            let re = Regex::new(&format!(r"(?i)\b{words}\b")).expect("category regex");
            (*label, re)
        })
        .collect()
});

/// Instruction prompt for one thread. Pure function of the thread text.
pub fn build_prompt(thread_text: &str) -> String {
    let mut p = String::from(
        "You are an assistant that classifies the behavior expressed in a customer email thread.\n\
         Analyse the entire thread, not just the latest message.\n\nCategories:\n",
    );
    for label in BehaviorLabel::ALL {
        p.push_str(&format!("- {}: {}\n", label.as_str(), label.definition()));
    }
    p.push_str(
        "\nRespond with exactly one category name from the list above and nothing else.\n\n\
         Email thread:\n",
    );
    p.push_str(thread_text);
    p.push_str("\n\nAnswer:");
    p
}

/// First category (definition order) found as a whole word in the reply, else `Unknown`.
pub fn extract_label(reply: &str) -> BehaviorLabel {
    CATEGORY_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(reply))
        .map(|(label, _)| *label)
        .unwrap_or(BehaviorLabel::Unknown)
}

/// Sequential remote labeling with a minimum spacing between call starts.
pub struct RemoteLabeler {
    provider: DynProvider,
    min_delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RemoteLabeler {
    pub fn new(provider: DynProvider, min_delay: Duration) -> Self {
        Self {
            provider,
            min_delay,
            last_call: Mutex::new(None),
        }
    }

    /// One rate-limited provider call. Failures come back as
    /// [`OrchestratorError::RemoteClassification`] for the thread.
    pub async fn try_label(&self, doc: &LabelDoc) -> Result<BehaviorLabel> {
        // Held across the call so concurrent callers also queue up behind the delay.
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            match prev.checked_add(self.min_delay) {
                Some(at) => sleep_until(at).await,
                None => sleep(self.min_delay).await,
            }
        }
        *last = Some(Instant::now());

        let prompt = build_prompt(&doc.text);
        let reply = self.provider.generate(&prompt).await.map_err(|e| {
            OrchestratorError::RemoteClassification {
                thread_id: doc.thread_id.clone(),
                reason: e.to_string(),
            }
        })?;
        let label = extract_label(&reply);
        debug!(
            thread_id = %doc.thread_id,
            provider = self.provider.name(),
            reply = %sanitize_reply(&reply, 80),
            label = %label,
            "remote label"
        );
        Ok(label)
    }

    async fn label_one(&self, doc: &LabelDoc) -> Labeled {
        match self.try_label(doc).await {
            Ok(label) => Labeled::of(label),
            Err(e) => {
                counter!("remote_classify_errors_total").increment(1);
                warn!(
                    thread_id = e.thread_id().unwrap_or_default(),
                    text_fp = %text_fingerprint(&doc.text),
                    provider = self.provider.name(),
                    error = %e,
                    "remote classification failed; labeling Unknown"
                );
                Labeled::unknown()
            }
        }
    }
}

#[async_trait]
impl BehaviorLabeler for RemoteLabeler {
    async fn label_batch(&self, docs: &[LabelDoc]) -> Vec<Labeled> {
        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            out.push(self.label_one(doc).await);
        }
        out
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
