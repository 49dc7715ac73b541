//! Behavior labelers: interchangeable strategies behind one async contract.
//!
//! Every strategy gets the raw `email_text`; local strategies normalize it
//! themselves with the configured mode, the remote strategy sends it as is.

pub mod cluster;
pub mod provider;
pub mod remote;
pub mod supervised;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::behavior::BehaviorLabel;
use crate::config::{OrchestratorConfig, Strategy};
use crate::error::Result;

pub use cluster::{ClusterLabeler, ClusterModel, ClusterParams};
pub use remote::{build_prompt, extract_label, RemoteLabeler};
pub use supervised::{LinearClassifier, ModelArtifact, SupervisedLabeler, TrainParams};

/// One unit of labeling work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDoc {
    pub thread_id: String,
    pub text: String,
}

impl LabelDoc {
    pub fn new(thread_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Labeled {
    pub label: BehaviorLabel,
    /// Probability of `label` when the strategy has one.
    pub confidence: Option<f32>,
}

impl Labeled {
    pub fn unknown() -> Self {
        Self::of(BehaviorLabel::Unknown)
    }

    pub fn of(label: BehaviorLabel) -> Self {
        Self {
            label,
            confidence: None,
        }
    }
}

impl Default for Labeled {
    fn default() -> Self {
        Self::unknown()
    }
}

#[async_trait]
pub trait BehaviorLabeler: Send + Sync {
    /// Exactly one output per input, in input order. Never fails as a whole:
    /// documents that cannot be labeled come back `Unknown`.
    async fn label_batch(&self, docs: &[LabelDoc]) -> Vec<Labeled>;

    async fn label(&self, doc: &LabelDoc) -> Labeled {
        self.label_batch(std::slice::from_ref(doc))
            .await
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    fn name(&self) -> &'static str;

    /// False for strategies that need the whole batch at once.
    fn supports_single(&self) -> bool {
        true
    }
}

pub type DynLabeler = Arc<dyn BehaviorLabeler>;

/// Returns the same label for everything.
#[derive(Debug, Clone, Copy)]
pub struct StaticLabeler(pub BehaviorLabel);

#[async_trait]
impl BehaviorLabeler for StaticLabeler {
    async fn label_batch(&self, docs: &[LabelDoc]) -> Vec<Labeled> {
        vec![Labeled::of(self.0); docs.len()]
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Pick the configured strategy.
///
/// The supervised strategy needs a trained artifact at `paths.model`;
/// a missing one is reported as `ModelUnavailable`.
pub fn build_labeler(cfg: &OrchestratorConfig) -> Result<DynLabeler> {
    let mode = cfg.pipeline.normalizer;
    let labeler: DynLabeler = match cfg.pipeline.strategy {
        Strategy::Clustering => Arc::new(ClusterLabeler::new(
            ClusterParams::from(&cfg.clustering),
            cfg.clustering.cluster_map()?,
            mode,
        )),
        Strategy::Supervised => {
            let artifact = ModelArtifact::load(&cfg.paths.model)?;
            Arc::new(SupervisedLabeler::new(artifact))
        }
        Strategy::Remote => {
            let provider = provider::build_provider(&cfg.remote)?;
            Arc::new(RemoteLabeler::new(provider, cfg.remote.min_delay()))
        }
    };
    info!(strategy = labeler.name(), normalizer = ?mode, "labeler ready");
    Ok(labeler)
}
