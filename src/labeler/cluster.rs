//! Unsupervised strategy: k-means over TF-IDF rows of the whole batch,
//! then a human-assigned cluster → behavior table.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{BehaviorLabeler, LabelDoc, Labeled};
use crate::behavior::BehaviorLabel;
use crate::config::ClusteringConfig;
use crate::error::{OrchestratorError, Result};
use crate::normalize::{normalize_with, NormalizerMode};
use crate::vectorize::{FeatureVector, TfidfVectorizer, VectorizerState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    pub k: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self::from(&ClusteringConfig::default())
    }
}

impl From<&ClusteringConfig> for ClusterParams {
    fn from(c: &ClusteringConfig) -> Self {
        Self {
            k: c.k.max(1),
            seed: c.seed,
            n_init: c.n_init.max(1),
            max_iter: c.max_iter.max(1),
            tol: c.tol,
        }
    }
}

/// Result of one fit, kept for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterModel {
    /// Fingerprint of the vectorizer state the centroids live in.
    pub fingerprint: String,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    /// Cluster index per input row.
    pub assignments: Vec<usize>,
}

/// Seeded k-means++ with `n_init` restarts; the run with the lowest inertia wins.
pub fn kmeans(rows: &[FeatureVector], dim: usize, params: &ClusterParams) -> Result<KMeansRun> {
    if rows.len() < params.k {
        return Err(OrchestratorError::DegenerateInput(format!(
            "{} documents cannot form {} clusters",
            rows.len(),
            params.k
        )));
    }
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<KMeansRun> = None;
    for run in 0..params.n_init {
        let init = plus_plus_init(rows, dim, params.k, &mut rng);
        let candidate = lloyd(rows, init, params.max_iter, params.tol);
        debug!(run, inertia = candidate.inertia, "k-means run finished");
        if best.as_ref().map_or(true, |b| candidate.inertia < b.inertia) {
            best = Some(candidate);
        }
    }
    best.ok_or_else(|| OrchestratorError::DegenerateInput("k-means made no runs".into()))
}

#[derive(Debug, Clone)]
pub struct KMeansRun {
    pub centroids: Vec<Vec<f64>>,
    pub assignments: Vec<usize>,
    pub inertia: f64,
}

fn to_dense(row: &FeatureVector, dim: usize) -> Vec<f64> {
    let mut d = vec![0.0; dim];
    for (i, v) in row.iter() {
        d[i] = v;
    }
    d
}

fn sq_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

fn plus_plus_init(rows: &[FeatureVector], dim: usize, k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = rows.len();
    let mut centroids = Vec::with_capacity(k);
    centroids.push(to_dense(&rows[rng.random_range(0..n)], dim));

    let mut closest: Vec<f64> = {
        let c = &centroids[0];
        let cn = sq_norm(c);
        rows.iter().map(|r| r.sq_distance(c, cn)).collect()
    };

    while centroids.len() < k {
        let total: f64 = closest.iter().sum();
        let pick = if total <= 0.0 {
            rng.random_range(0..n)
        } else {
            let target = rng.random::<f64>() * total;
            let mut acc = 0.0;
            closest
                .iter()
                .position(|d| {
                    acc += d;
                    acc > target
                })
                .unwrap_or(n - 1)
        };
        let c = to_dense(&rows[pick], dim);
        let cn = sq_norm(&c);
        for (d, r) in closest.iter_mut().zip(rows) {
            *d = d.min(r.sq_distance(&c, cn));
        }
        centroids.push(c);
    }
    centroids
}

fn nearest(row: &FeatureVector, centroids: &[Vec<f64>], norms: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, (c, cn)) in centroids.iter().zip(norms).enumerate() {
        let d = row.sq_distance(c, *cn);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn lloyd(rows: &[FeatureVector], mut centroids: Vec<Vec<f64>>, max_iter: usize, tol: f64) -> KMeansRun {
    let k = centroids.len();
    let dim = centroids.first().map_or(0, Vec::len);
    let mut assignments = vec![0usize; rows.len()];

    for _ in 0..max_iter {
        let norms: Vec<f64> = centroids.iter().map(|c| sq_norm(c)).collect();
        for (a, r) in assignments.iter_mut().zip(rows) {
            *a = nearest(r, &centroids, &norms).0;
        }

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (r, &a) in rows.iter().zip(&assignments) {
            counts[a] += 1;
            for (i, v) in r.iter() {
                sums[a][i] += v;
            }
        }

        let mut shift = 0.0;
        for (c, (sum, count)) in centroids.iter_mut().zip(sums.into_iter().zip(counts)) {
            // An empty cluster keeps its previous centroid.
            if count == 0 {
                continue;
            }
            let inv = 1.0 / count as f64;
            for (old, s) in c.iter_mut().zip(sum) {
                let new = s * inv;
                shift += (new - *old) * (new - *old);
                *old = new;
            }
        }
        if shift <= tol {
            break;
        }
    }

    let norms: Vec<f64> = centroids.iter().map(|c| sq_norm(c)).collect();
    let mut inertia = 0.0;
    for (a, r) in assignments.iter_mut().zip(rows) {
        let (idx, d) = nearest(r, &centroids, &norms);
        *a = idx;
        inertia += d;
    }
    KMeansRun {
        centroids,
        assignments,
        inertia,
    }
}

pub struct ClusterLabeler {
    params: ClusterParams,
    mapping: HashMap<usize, BehaviorLabel>,
    normalizer: NormalizerMode,
}

impl ClusterLabeler {
    pub fn new(
        params: ClusterParams,
        mapping: HashMap<usize, BehaviorLabel>,
        normalizer: NormalizerMode,
    ) -> Self {
        Self {
            params,
            mapping,
            normalizer,
        }
    }

    /// Unmapped or out-of-range indices are `Unknown`.
    pub fn behavior_for(&self, cluster: usize) -> BehaviorLabel {
        if cluster >= self.params.k {
            return BehaviorLabel::Unknown;
        }
        self.mapping
            .get(&cluster)
            .copied()
            .unwrap_or(BehaviorLabel::Unknown)
    }

    /// Normalize, vectorize and cluster a batch of raw texts.
    pub fn fit_clusters(&self, texts: &[String]) -> Result<(VectorizerState, ClusterModel)> {
        let normalized: Vec<String> = texts
            .iter()
            .map(|t| normalize_with(self.normalizer, t))
            .collect();
        let state = TfidfVectorizer::fit(&normalized)?;
        let rows = state.transform(&normalized);
        let run = kmeans(&rows, state.dim(), &self.params)?;
        let model = ClusterModel {
            fingerprint: state.fingerprint.clone(),
            centroids: run.centroids,
            inertia: run.inertia,
            assignments: run.assignments,
        };
        Ok((state, model))
    }
}

#[async_trait]
impl BehaviorLabeler for ClusterLabeler {
    async fn label_batch(&self, docs: &[LabelDoc]) -> Vec<Labeled> {
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        match self.fit_clusters(&texts) {
            Ok((_, model)) => model
                .assignments
                .iter()
                .map(|&c| Labeled::of(self.behavior_for(c)))
                .collect(),
            Err(e) => {
                warn!(docs = docs.len(), k = self.params.k, error = %e, "clustering skipped; batch labeled Unknown");
                vec![Labeled::unknown(); docs.len()]
            }
        }
    }

    fn name(&self) -> &'static str {
        "clustering"
    }

    fn supports_single(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(k: usize) -> ClusterParams {
        ClusterParams {
            k,
            ..ClusterParams::default()
        }
    }

    fn corpus() -> Vec<String> {
        [
            "confirm booking confirm",
            "booking confirm please",
            "confirm booking thanks",
            "manager escalate urgent",
            "escalate manager now",
            "urgent escalate manager complaint",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn labeler(k: usize) -> ClusterLabeler {
        let mapping = HashMap::from([
            (0, BehaviorLabel::Confirmation),
            (1, BehaviorLabel::Escalation),
        ]);
        ClusterLabeler::new(params(k), mapping, NormalizerMode::Basic)
    }

    #[test]
    fn separates_obvious_groups() {
        let (_, model) = labeler(2).fit_clusters(&corpus()).unwrap();
        let a = &model.assignments;
        assert_eq!(a[0], a[1]);
        assert_eq!(a[1], a[2]);
        assert_eq!(a[3], a[4]);
        assert_eq!(a[4], a[5]);
        assert_ne!(a[0], a[3]);
        assert_eq!(model.centroids.len(), 2);
    }

    #[test]
    fn same_seed_same_assignments() {
        let l = labeler(2);
        let (s1, m1) = l.fit_clusters(&corpus()).unwrap();
        let (s2, m2) = l.fit_clusters(&corpus()).unwrap();
        assert_eq!(m1.assignments, m2.assignments);
        assert_eq!(m1.fingerprint, s1.fingerprint);
        assert_eq!(s1.fingerprint, s2.fingerprint);
    }

    #[test]
    fn unmapped_and_out_of_range_clusters_are_unknown() {
        let l = ClusterLabeler::new(
            params(3),
            HashMap::from([(0, BehaviorLabel::Objection)]),
            NormalizerMode::Basic,
        );
        assert_eq!(l.behavior_for(0), BehaviorLabel::Objection);
        assert_eq!(l.behavior_for(2), BehaviorLabel::Unknown);
        assert_eq!(l.behavior_for(7), BehaviorLabel::Unknown);
    }

    #[tokio::test]
    async fn batch_smaller_than_k_is_all_unknown() {
        let l = labeler(4);
        let docs = vec![LabelDoc::new("a", "confirm"), LabelDoc::new("b", "escalate")];
        let out = l.label_batch(&docs).await;
        assert_eq!(out, vec![Labeled::unknown(); 2]);
    }

    #[test]
    fn identical_rows_do_not_panic() {
        let rows = vec!["same words".to_string(); 5];
        let (_, model) = labeler(3).fit_clusters(&rows).unwrap();
        assert_eq!(model.assignments.len(), 5);
        assert!(model.inertia.abs() < 1e-9);
    }
}
