//! ledger.rs: append-only decision ledger and the metrics derived from it.
//!
//! The ledger is the full history of reviewer decisions. Anything that looks
//! like a "current status" is a projection over it, never stored.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{OrchestratorError, Result};
use crate::store;

/// Confidence recorded when neither the reviewer nor the model supplies one.
pub const DEFAULT_AI_CONFIDENCE: f32 = 85.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionStatus {
    Approved,
    Overridden,
}

impl DecisionStatus {
    /// Approved iff the final action equals the suggestion.
    pub fn derive(ai_suggestion: &str, final_action: &str) -> Self {
        if final_action == ai_suggestion {
            Self::Approved
        } else {
            Self::Overridden
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Overridden => "Overridden",
        }
    }
}

/// Review state of a thread as shown to a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadStatus {
    Pending,
    Approved,
    Overridden,
}

impl From<DecisionStatus> for ThreadStatus {
    fn from(s: DecisionStatus) -> Self {
        match s {
            DecisionStatus::Approved => Self::Approved,
            DecisionStatus::Overridden => Self::Overridden,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub thread_id: String,
    pub ai_suggestion: String,
    pub final_action: String,
    pub decision_status: DecisionStatus,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    /// Percentage, 0–100.
    pub ai_confidence: f32,
}

impl DecisionEntry {
    pub fn new(
        thread_id: impl Into<String>,
        ai_suggestion: impl Into<String>,
        final_action: impl Into<String>,
        user_id: impl Into<String>,
        ai_confidence: f32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let ai_suggestion = ai_suggestion.into();
        let final_action = final_action.into();
        let decision_status = DecisionStatus::derive(&ai_suggestion, &final_action);
        Self {
            thread_id: thread_id.into(),
            ai_suggestion,
            final_action,
            decision_status,
            user_id: user_id.into(),
            timestamp,
            ai_confidence: percent_or_default(ai_confidence),
        }
    }

    /// Status matches the actions and the confidence is a real percentage.
    pub fn is_consistent(&self) -> bool {
        self.decision_status == DecisionStatus::derive(&self.ai_suggestion, &self.final_action)
            && self.ai_confidence.is_finite()
            && (0.0..=100.0).contains(&self.ai_confidence)
    }
}

// NaN would be written as `null` and make the file unreadable.
fn percent_or_default(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        DEFAULT_AI_CONFIDENCE
    }
}

pub trait LedgerStore: Send + Sync {
    /// Durably add one entry. Inconsistent entries are rejected.
    fn append(&self, entry: DecisionEntry) -> Result<()>;
    /// Every entry, in creation order.
    fn all(&self) -> Result<Vec<DecisionEntry>>;

    fn metrics(&self) -> Result<LedgerMetrics> {
        Ok(LedgerMetrics::from_entries(&self.all()?))
    }
}

impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    fn append(&self, entry: DecisionEntry) -> Result<()> {
        (**self).append(entry)
    }
    fn all(&self) -> Result<Vec<DecisionEntry>> {
        (**self).all()
    }
}

fn check_consistent(entry: &DecisionEntry) -> Result<()> {
    if entry.is_consistent() {
        Ok(())
    } else {
        Err(OrchestratorError::InconsistentDecision {
            thread_id: entry.thread_id.clone(),
        })
    }
}

fn record_logged(entry: &DecisionEntry) {
    counter!("decisions_logged_total", "status" => entry.decision_status.as_str()).increment(1);
    info!(
        thread_id = %entry.thread_id,
        status = entry.decision_status.as_str(),
        final_action = %entry.final_action,
        "decision logged"
    );
}

/// Ledger in a JSON array file. Every append rewrites the file atomically.
#[derive(Debug)]
pub struct JsonFileLedger {
    path: PathBuf,
    // Serializes the read-modify-rewrite sequence.
    write_lock: Mutex<()>,
}

impl JsonFileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an empty `[]` ledger if the file does not exist yet.
    pub fn ensure_initialized(&self) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.path.exists() {
            return Ok(());
        }
        store::write_json_atomic(&self.path, &Vec::<DecisionEntry>::new())?;
        info!(path = %self.path.display(), "decision ledger initialized");
        Ok(())
    }

    fn append_locked(&self, entry: &DecisionEntry) -> io::Result<()> {
        // A ledger that cannot be parsed is never overwritten.
        let mut entries: Vec<DecisionEntry> = match store::read_json(&self.path) {
            Ok(v) => v.unwrap_or_default(),
            Err(OrchestratorError::Io(e)) => return Err(e),
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        };
        entries.push(entry.clone());
        store::write_json_atomic(&self.path, &entries)
    }
}

impl LedgerStore for JsonFileLedger {
    fn append(&self, entry: DecisionEntry) -> Result<()> {
        check_consistent(&entry)?;
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(source) = self.append_locked(&entry) {
            counter!("audit_write_errors_total").increment(1);
            error!(
                thread_id = %entry.thread_id,
                path = %self.path.display(),
                error = %source,
                "decision NOT recorded"
            );
            return Err(OrchestratorError::AuditWrite {
                thread_id: entry.thread_id,
                source,
            });
        }
        record_logged(&entry);
        Ok(())
    }

    /// Missing file reads as an empty ledger.
    fn all(&self) -> Result<Vec<DecisionEntry>> {
        Ok(store::read_json(&self.path)?.unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: Mutex<Vec<DecisionEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn append(&self, entry: DecisionEntry) -> Result<()> {
        check_consistent(&entry)?;
        let mut v = self.inner.lock().map_err(|_| OrchestratorError::AuditWrite {
            thread_id: entry.thread_id.clone(),
            source: io::Error::other("ledger mutex poisoned"),
        })?;
        record_logged(&entry);
        v.push(entry);
        Ok(())
    }

    fn all(&self) -> Result<Vec<DecisionEntry>> {
        Ok(self
            .inner
            .lock()
            .map(|v| v.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone()))
    }
}

/// Aggregates recomputed from the entries on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerMetrics {
    pub total: usize,
    pub approved_count: usize,
    pub overridden_count: usize,
    /// Share of approved decisions; `None` on an empty ledger.
    pub accuracy_percent: Option<f64>,
    /// final_action → count
    pub action_distribution: BTreeMap<String, usize>,
}

impl LedgerMetrics {
    pub fn from_entries(entries: &[DecisionEntry]) -> Self {
        let total = entries.len();
        let overridden_count = entries
            .iter()
            .filter(|e| e.decision_status == DecisionStatus::Overridden)
            .count();
        let approved_count = total - overridden_count;
        let accuracy_percent =
            (total > 0).then(|| approved_count as f64 / total as f64 * 100.0);

        let mut action_distribution = BTreeMap::new();
        for e in entries {
            *action_distribution.entry(e.final_action.clone()).or_insert(0) += 1;
        }

        Self {
            total,
            approved_count,
            overridden_count,
            accuracy_percent,
            action_distribution,
        }
    }

    /// "N/A" for an empty ledger, otherwise one decimal and a percent sign.
    pub fn accuracy_display(&self) -> String {
        match self.accuracy_percent {
            Some(p) => format!("{p:.1}%"),
            None => "N/A".to_string(),
        }
    }
}

/// All entries for one thread, oldest first.
pub fn thread_history(entries: &[DecisionEntry], thread_id: &str) -> Vec<DecisionEntry> {
    entries
        .iter()
        .filter(|e| e.thread_id == thread_id)
        .cloned()
        .collect()
}

/// Status from the most recent entry for the thread, `Pending` if none.
pub fn current_status(entries: &[DecisionEntry], thread_id: &str) -> ThreadStatus {
    entries
        .iter()
        .rev()
        .find(|e| e.thread_id == thread_id)
        .map(|e| e.decision_status.into())
        .unwrap_or(ThreadStatus::Pending)
}
