//! Error taxonomy for the classification pipeline and the decision ledger.
//!
//! Failures are grouped by how the caller must react:
//! - per-thread labeling failures are recovered locally as `Unknown`
//! - model/corpus problems are reported to whoever asked for a fit or a load
//! - ledger write failures are surfaced to the reviewer and never swallowed

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Fitting was requested on a corpus with no usable documents.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Single-text inference was requested but no trained artifact exists.
    #[error("trained model not available at {}", path.display())]
    ModelUnavailable { path: PathBuf },

    /// Vectors built by one vectorizer were fed to a model fit on another.
    #[error("feature space mismatch: model expects {expected}, got {found}")]
    ModelMismatch { expected: String, found: String },

    #[error("remote classification failed for thread {thread_id}: {reason}")]
    RemoteClassification { thread_id: String, reason: String },

    #[error("audit write failed for thread {thread_id}: {source}")]
    AuditWrite {
        thread_id: String,
        #[source]
        source: std::io::Error,
    },

    /// A decision entry whose status disagrees with its actions.
    #[error("decision for thread {thread_id} has a status that contradicts its actions")]
    InconsistentDecision { thread_id: String },

    #[error("no prediction for thread {thread_id}")]
    UnknownThread { thread_id: String },

    #[error("rule store error: {0}")]
    RuleStore(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// Thread the failure relates to, when there is one.
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            Self::RemoteClassification { thread_id, .. }
            | Self::AuditWrite { thread_id, .. }
            | Self::InconsistentDecision { thread_id }
            | Self::UnknownThread { thread_id } => Some(thread_id),
            _ => None,
        }
    }

    /// True for failures that lose an audit record unless the reviewer retries.
    pub fn is_audit_loss(&self) -> bool {
        matches!(self, Self::AuditWrite { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_errors_carry_thread_id() {
        let e = OrchestratorError::AuditWrite {
            thread_id: "T9".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        };
        assert_eq!(e.thread_id(), Some("T9"));
        assert!(e.is_audit_loss());
        assert!(e.to_string().contains("T9"));
    }

    #[test]
    fn degenerate_input_has_no_thread() {
        let e = OrchestratorError::DegenerateInput("empty corpus".into());
        assert!(e.thread_id().is_none());
        assert!(!e.is_audit_loss());
    }
}
