//! Batch pipeline: threads → email text → labeler → action resolver → predictions.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{info, warn};

use crate::behavior::BehaviorLabel;
use crate::error::Result;
use crate::labeler::{BehaviorLabeler, DynLabeler, LabelDoc, Labeled};
use crate::normalize::{normalize_with, NormalizerMode};
use crate::rules::{resolve, RuleTable};
use crate::thread::{Prediction, TextPolicy, Thread};

/// Where incremental runs keep their progress.
pub trait PredictionSink {
    /// Predictions already written by an earlier run.
    fn existing(&self) -> Result<Vec<Prediction>>;
    /// Replace the stored predictions with `all`.
    fn flush(&mut self, all: &[Prediction]) -> Result<()>;
}

/// In-memory sink; counts flushes.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub predictions: Vec<Prediction>,
    pub flushes: usize,
}

impl PredictionSink for MemorySink {
    fn existing(&self) -> Result<Vec<Prediction>> {
        Ok(self.predictions.clone())
    }

    fn flush(&mut self, all: &[Prediction]) -> Result<()> {
        self.predictions = all.to_vec();
        self.flushes += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunReport {
    pub labeled: usize,
    pub skipped: usize,
    pub unknown: usize,
}

pub struct Pipeline {
    labeler: DynLabeler,
    normalizer: NormalizerMode,
    text_policy: TextPolicy,
}

impl Pipeline {
    pub fn new(labeler: DynLabeler, normalizer: NormalizerMode, text_policy: TextPolicy) -> Self {
        Self {
            labeler,
            normalizer,
            text_policy,
        }
    }

    pub fn with_labeler(labeler: impl BehaviorLabeler + 'static) -> Self {
        Self::new(Arc::new(labeler), NormalizerMode::default(), TextPolicy::default())
    }

    pub fn labeler(&self) -> &DynLabeler {
        &self.labeler
    }

    /// One prediction per thread, in input order. Never fails: threads that
    /// cannot be labeled come out `Unknown`.
    pub async fn classify(&self, threads: &[Thread], rules: &RuleTable) -> Vec<Prediction> {
        let started = Instant::now();
        let texts: Vec<String> = threads
            .iter()
            .map(|t| t.email_text(self.text_policy))
            .collect();

        // Text with nothing left after normalization never reaches the strategy.
        let mut labels = vec![Labeled::unknown(); threads.len()];
        let (slots, docs): (Vec<usize>, Vec<LabelDoc>) = threads
            .iter()
            .zip(&texts)
            .enumerate()
            .filter(|(_, (_, text))| !normalize_with(self.normalizer, text).is_empty())
            .map(|(i, (t, text))| (i, LabelDoc::new(t.thread_id.clone(), text.clone())))
            .unzip();

        if !docs.is_empty() {
            let out = self.labeler.label_batch(&docs).await;
            if out.len() != docs.len() {
                warn!(
                    strategy = self.labeler.name(),
                    expected = docs.len(),
                    got = out.len(),
                    "labeler returned a wrong number of results"
                );
            }
            for (slot, l) in slots.into_iter().zip(out) {
                labels[slot] = l;
            }
        }

        let strategy = self.labeler.name();
        let predictions: Vec<Prediction> = threads
            .iter()
            .zip(texts)
            .zip(labels)
            .map(|((t, email_text), l)| {
                counter!("threads_labeled_total", "behavior" => l.label.as_str(), "strategy" => strategy)
                    .increment(1);
                Prediction {
                    thread_id: t.thread_id.clone(),
                    sender: t.sender.clone(),
                    email_text,
                    predicted_behavior: l.label,
                    suggested_action: resolve(l.label, rules),
                    confidence: l.confidence,
                }
            })
            .collect();

        histogram!("pipeline_batch_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            threads = threads.len(),
            strategy,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch classified"
        );
        predictions
    }

    /// Label and persist as we go.
    ///
    /// Single-capable strategies flush after every thread, so an interrupted run
    /// keeps its progress and `resume` skips threads already in the sink.
    /// Batch-only strategies (clustering) label everything in one pass and
    /// flush once; they ignore `resume` since the model needs the full batch.
    pub async fn run_incremental<S: PredictionSink + ?Sized>(
        &self,
        threads: &[Thread],
        rules: &RuleTable,
        sink: &mut S,
        resume: bool,
    ) -> Result<RunReport> {
        let mut report = RunReport::default();

        if !self.labeler.supports_single() {
            if resume {
                warn!(strategy = self.labeler.name(), "resume ignored for batch-only strategy");
            }
            let all = self.classify(threads, rules).await;
            report.labeled = all.len();
            report.unknown = all.iter().filter(|p| p.predicted_behavior.is_unknown()).count();
            sink.flush(&all)?;
            return Ok(report);
        }

        let mut all = if resume { sink.existing()? } else { Vec::new() };
        let done: HashSet<String> = all.iter().map(|p| p.thread_id.clone()).collect();

        for thread in threads {
            if done.contains(&thread.thread_id) {
                report.skipped += 1;
                continue;
            }
            let mut one = self.classify(std::slice::from_ref(thread), rules).await;
            if let Some(p) = one.pop() {
                if p.predicted_behavior.is_unknown() {
                    report.unknown += 1;
                }
                all.push(p);
                report.labeled += 1;
                sink.flush(&all)?;
            }
        }
        info!(
            labeled = report.labeled,
            skipped = report.skipped,
            unknown = report.unknown,
            "incremental run finished"
        );
        Ok(report)
    }
}

/// Behavior and suggested-action distributions of a predictions set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredictionSummary {
    pub total: usize,
    pub behavior_distribution: BTreeMap<BehaviorLabel, usize>,
    pub action_distribution: BTreeMap<String, usize>,
}

impl PredictionSummary {
    pub fn from_predictions(predictions: &[Prediction]) -> Self {
        let mut behavior_distribution = BTreeMap::new();
        let mut action_distribution = BTreeMap::new();
        for p in predictions {
            *behavior_distribution.entry(p.predicted_behavior).or_insert(0) += 1;
            *action_distribution
                .entry(p.suggested_action.clone())
                .or_insert(0) += 1;
        }
        Self {
            total: predictions.len(),
            behavior_distribution,
            action_distribution,
        }
    }
}
