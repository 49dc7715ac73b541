//! TF-IDF vectorizer with a stable vocabulary.
//!
//! `fit` produces a [`VectorizerState`] (vocabulary + IDF weights + fingerprint).
//! The state is the versioned artifact: every later `transform` for that model
//! must use it unchanged. Models remember the fingerprint they were fit against.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{OrchestratorError, Result};

// Unicode words of at least two characters.
static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w\w+\b").expect("token regex"));

/// Sparse, L2-normalised row. Indices are sorted and unique.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureVector {
    pub indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Dot product with a dense row.
    pub fn dot(&self, dense: &[f64]) -> f64 {
        self.iter()
            .map(|(i, v)| dense.get(i).copied().unwrap_or(0.0) * v)
            .sum()
    }

    /// Squared euclidean distance to a dense point.
    pub fn sq_distance(&self, dense: &[f64], dense_sq_norm: f64) -> f64 {
        let own_sq: f64 = self.values.iter().map(|v| v * v).sum();
        (own_sq + dense_sq_norm - 2.0 * self.dot(dense)).max(0.0)
    }
}

/// Fitted vocabulary and IDF weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorizerState {
    /// term → column, columns assigned in lexicographic term order.
    pub vocabulary: BTreeMap<String, usize>,
    pub idf: Vec<f64>,
    /// Hex SHA-256 over vocabulary and IDF; identifies the feature space.
    pub fingerprint: String,
}

pub struct TfidfVectorizer;

impl TfidfVectorizer {
    /// Fit vocabulary + smoothed IDF (`ln((1+n)/(1+df)) + 1`) on a normalized corpus.
    pub fn fit(corpus: &[String]) -> Result<VectorizerState> {
        if corpus.is_empty() {
            return Err(OrchestratorError::DegenerateInput(
                "cannot fit vectorizer on an empty corpus".into(),
            ));
        }

        let mut df: BTreeMap<String, usize> = BTreeMap::new();
        for doc in corpus {
            let uniq: BTreeSet<&str> = tokens(doc).collect();
            for t in uniq {
                *df.entry(t.to_string()).or_insert(0) += 1;
            }
        }
        if df.is_empty() {
            return Err(OrchestratorError::DegenerateInput(format!(
                "empty vocabulary across {} documents",
                corpus.len()
            )));
        }

        let n = corpus.len() as f64;
        let mut vocabulary = BTreeMap::new();
        let mut idf = Vec::with_capacity(df.len());
        for (i, (term, count)) in df.into_iter().enumerate() {
            idf.push(((1.0 + n) / (1.0 + count as f64)).ln() + 1.0);
            vocabulary.insert(term, i);
        }

        let fingerprint = fingerprint(&vocabulary, &idf);
        Ok(VectorizerState {
            vocabulary,
            idf,
            fingerprint,
        })
    }
}

impl VectorizerState {
    pub fn dim(&self) -> usize {
        self.idf.len()
    }

    pub fn transform(&self, texts: &[String]) -> Vec<FeatureVector> {
        texts.iter().map(|t| self.transform_one(t)).collect()
    }

    /// Terms outside the fitted vocabulary are ignored.
    pub fn transform_one(&self, text: &str) -> FeatureVector {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for t in tokens(text) {
            if let Some(&col) = self.vocabulary.get(t) {
                *counts.entry(col).or_insert(0.0) += 1.0;
            }
        }

        let mut indices = Vec::with_capacity(counts.len());
        let mut values = Vec::with_capacity(counts.len());
        for (col, tf) in counts {
            indices.push(col);
            values.push(tf * self.idf[col]);
        }

        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in values.iter_mut() {
                *v /= norm;
            }
        }
        FeatureVector { indices, values }
    }

    /// Recompute the fingerprint; false means the state was edited after fitting.
    pub fn verify(&self) -> bool {
        fingerprint(&self.vocabulary, &self.idf) == self.fingerprint
    }
}

fn tokens(text: &str) -> impl Iterator<Item = &str> + '_ {
    RE_TOKEN.find_iter(text).map(|m| m.as_str())
}

fn fingerprint(vocabulary: &BTreeMap<String, usize>, idf: &[f64]) -> String {
    let mut hasher = Sha256::new();
    for (term, col) in vocabulary {
        hasher.update(term.as_bytes());
        hasher.update([0u8]);
        hasher.update((*col as u64).to_le_bytes());
    }
    for w in idf {
        hasher.update(w.to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
