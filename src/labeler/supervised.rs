//! Supervised strategy: softmax regression over TF-IDF features, shipped as a
//! single self-contained artifact (normalizer mode + vectorizer + classifier).

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{BehaviorLabeler, LabelDoc, Labeled};
use crate::behavior::BehaviorLabel;
use crate::config::SupervisedConfig;
use crate::error::{OrchestratorError, Result};
use crate::normalize::{normalize_with, NormalizerMode};
use crate::store;
use crate::thread::Prediction;
use crate::vectorize::{FeatureVector, TfidfVectorizer, VectorizerState};

pub const MODEL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainParams {
    pub max_iter: usize,
    pub learning_rate: f64,
    pub c: f64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self::from(&SupervisedConfig::default())
    }
}

impl From<&SupervisedConfig> for TrainParams {
    fn from(c: &SupervisedConfig) -> Self {
        Self {
            max_iter: c.max_iter,
            learning_rate: c.learning_rate,
            c: c.c,
        }
    }
}

/// Multinomial logistic regression. Bound to one vectorizer state by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub classes: Vec<BehaviorLabel>,
    /// One dense row per class.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub feature_fingerprint: String,
}

impl LinearClassifier {
    /// Full-batch gradient descent from zero weights. Deterministic.
    pub fn fit(
        state: &VectorizerState,
        rows: &[FeatureVector],
        labels: &[BehaviorLabel],
        params: &TrainParams,
    ) -> Result<Self> {
        if rows.is_empty() || rows.len() != labels.len() {
            return Err(OrchestratorError::DegenerateInput(format!(
                "{} rows for {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let classes: Vec<BehaviorLabel> = labels.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        let targets: Vec<usize> = labels
            .iter()
            .filter_map(|l| classes.iter().position(|c| c == l))
            .collect();

        let k = classes.len();
        let dim = state.dim();
        let n = rows.len() as f64;
        let lambda = 1.0 / (params.c * n);
        let mut weights = vec![vec![0.0; dim]; k];
        let mut bias = vec![0.0; k];

        for _ in 0..params.max_iter {
            let mut gw = vec![vec![0.0; dim]; k];
            let mut gb = vec![0.0; k];
            for (row, &y) in rows.iter().zip(&targets) {
                let p = softmax(&logits(&weights, &bias, row));
                for (class, pk) in p.iter().enumerate() {
                    let g = pk - if class == y { 1.0 } else { 0.0 };
                    gb[class] += g;
                    for (j, v) in row.iter() {
                        gw[class][j] += g * v;
                    }
                }
            }
            for class in 0..k {
                for (w, g) in weights[class].iter_mut().zip(&gw[class]) {
                    *w -= params.learning_rate * (g / n + lambda * *w);
                }
                bias[class] -= params.learning_rate * gb[class] / n;
            }
        }

        Ok(Self {
            classes,
            weights,
            bias,
            feature_fingerprint: state.fingerprint.clone(),
        })
    }

    /// Class probabilities for a row produced by `state`.
    pub fn predict_proba(&self, state: &VectorizerState, row: &FeatureVector) -> Result<Vec<f64>> {
        if state.fingerprint != self.feature_fingerprint {
            return Err(OrchestratorError::ModelMismatch {
                expected: self.feature_fingerprint.clone(),
                found: state.fingerprint.clone(),
            });
        }
        Ok(softmax(&logits(&self.weights, &self.bias, row)))
    }

    /// Most probable class and its probability. Ties go to the earlier class.
    pub fn predict(&self, state: &VectorizerState, row: &FeatureVector) -> Result<(BehaviorLabel, f64)> {
        let p = self.predict_proba(state, row)?;
        let mut best = (BehaviorLabel::Unknown, f64::NEG_INFINITY);
        for (label, prob) in self.classes.iter().zip(p) {
            if prob > best.1 {
                best = (*label, prob);
            }
        }
        Ok(best)
    }
}

fn logits(weights: &[Vec<f64>], bias: &[f64], row: &FeatureVector) -> Vec<f64> {
    weights.iter().zip(bias).map(|(w, b)| row.dot(w) + b).collect()
}

fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = z.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Versioned, self-contained model bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    /// Number of labeled samples used for training.
    pub trained_on: usize,
    pub normalizer: NormalizerMode,
    pub vectorizer: VectorizerState,
    pub classifier: LinearClassifier,
}

impl ModelArtifact {
    /// Samples whose text normalizes to nothing are skipped.
    pub fn train(
        samples: &[(String, BehaviorLabel)],
        normalizer: NormalizerMode,
        params: &TrainParams,
    ) -> Result<Self> {
        let (texts, labels): (Vec<String>, Vec<BehaviorLabel>) = samples
            .iter()
            .map(|(t, l)| (normalize_with(normalizer, t), *l))
            .filter(|(t, _)| !t.is_empty())
            .unzip();

        let vectorizer = TfidfVectorizer::fit(&texts)?;
        let rows = vectorizer.transform(&texts);
        let classifier = LinearClassifier::fit(&vectorizer, &rows, &labels, params)?;
        info!(
            samples = texts.len(),
            classes = classifier.classes.len(),
            features = vectorizer.dim(),
            fingerprint = %vectorizer.fingerprint,
            "supervised model trained"
        );
        Ok(Self {
            format_version: MODEL_FORMAT_VERSION,
            created_at: Utc::now(),
            trained_on: texts.len(),
            normalizer,
            vectorizer,
            classifier,
        })
    }

    /// Distillation: learn from labels produced by an earlier run.
    pub fn train_from_predictions(
        predictions: &[Prediction],
        normalizer: NormalizerMode,
        params: &TrainParams,
    ) -> Result<Self> {
        let samples: Vec<(String, BehaviorLabel)> = predictions
            .iter()
            .map(|p| (p.email_text.clone(), p.predicted_behavior))
            .collect();
        Self::train(&samples, normalizer, params)
    }

    /// Label one raw text. Empty after normalization → `Unknown` without scoring.
    pub fn predict_text(&self, raw: &str) -> Result<Labeled> {
        let text = normalize_with(self.normalizer, raw);
        if text.is_empty() {
            return Ok(Labeled::unknown());
        }
        let row = self.vectorizer.transform_one(&text);
        let (label, prob) = self.classifier.predict(&self.vectorizer, &row)?;
        Ok(Labeled {
            label,
            confidence: Some(prob as f32),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        store::write_json_atomic(path, self)?;
        info!(path = %path.display(), "model artifact saved");
        Ok(())
    }

    /// Missing file → `ModelUnavailable`; edited or mismatched parts → `ModelMismatch`.
    pub fn load(path: &Path) -> Result<Self> {
        let artifact: Self = store::read_json(path)?.ok_or_else(|| {
            OrchestratorError::ModelUnavailable {
                path: path.to_path_buf(),
            }
        })?;
        if artifact.format_version != MODEL_FORMAT_VERSION {
            return Err(OrchestratorError::ModelMismatch {
                expected: format!("format {MODEL_FORMAT_VERSION}"),
                found: format!("format {}", artifact.format_version),
            });
        }
        if !artifact.vectorizer.verify() {
            return Err(OrchestratorError::ModelMismatch {
                expected: artifact.vectorizer.fingerprint.clone(),
                found: "vectorizer state altered after fitting".into(),
            });
        }
        if artifact.classifier.feature_fingerprint != artifact.vectorizer.fingerprint {
            return Err(OrchestratorError::ModelMismatch {
                expected: artifact.classifier.feature_fingerprint.clone(),
                found: artifact.vectorizer.fingerprint.clone(),
            });
        }
        Ok(artifact)
    }
}

pub struct SupervisedLabeler {
    artifact: ModelArtifact,
}

impl SupervisedLabeler {
    pub fn new(artifact: ModelArtifact) -> Self {
        Self { artifact }
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }
}

#[async_trait]
impl BehaviorLabeler for SupervisedLabeler {
    async fn label_batch(&self, docs: &[LabelDoc]) -> Vec<Labeled> {
        docs.iter()
            .map(|d| {
                self.artifact.predict_text(&d.text).unwrap_or_else(|e| {
                    tracing::warn!(thread_id = %d.thread_id, error = %e, "supervised prediction failed");
                    Labeled::unknown()
                })
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "supervised"
    }
}
