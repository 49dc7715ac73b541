// src/config/mod.rs
//! Orchestrator configuration, loaded from TOML.
//!
//! Lookup order:
//! 1) $ORCHESTRATOR_CONFIG_PATH
//! 2) config/orchestrator.toml
//! 3) built-in defaults
//!
//! Env overrides applied last: ORCHESTRATOR_STRATEGY, ORCHESTRATOR_MIN_DELAY_SECS,
//! REMOTE_TEST_MODE=mock.

pub mod remote;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::behavior::BehaviorLabel;
use crate::error::{OrchestratorError, Result};
use crate::normalize::NormalizerMode;
use crate::thread::TextPolicy;

pub use remote::RemoteConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/orchestrator.toml";
pub const ENV_CONFIG_PATH: &str = "ORCHESTRATOR_CONFIG_PATH";
pub const ENV_STRATEGY: &str = "ORCHESTRATOR_STRATEGY";
pub const ENV_MIN_DELAY: &str = "ORCHESTRATOR_MIN_DELAY_SECS";
pub const ENV_REMOTE_TEST_MODE: &str = "REMOTE_TEST_MODE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub supervised: SupervisedConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input: PathBuf,
    pub predictions: PathBuf,
    pub rules: PathBuf,
    pub ledger: PathBuf,
    pub model: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data/sample_emails.json"),
            predictions: PathBuf::from("predictions.json"),
            rules: PathBuf::from("rules.json"),
            ledger: PathBuf::from("logs/decisions_log.json"),
            model: PathBuf::from("model/model.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Clustering,
    Supervised,
    Remote,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clustering" | "cluster" | "kmeans" => Some(Self::Clustering),
            "supervised" | "classifier" => Some(Self::Supervised),
            "remote" | "llm" => Some(Self::Remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub strategy: Strategy,
    pub text_policy: TextPolicy,
    pub normalizer: NormalizerMode,
    /// Skip threads already present in the predictions file.
    pub resume: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            text_policy: TextPolicy::FullThread,
            normalizer: NormalizerMode::Basic,
            resume: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub k: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iter: usize,
    pub tol: f64,
    /// Cluster index (as a string key) → behavior name. Assigned by a human per model version.
    pub cluster_to_behavior: BTreeMap<String, String>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        let cluster_to_behavior = BTreeMap::from([
            ("0".to_string(), "Confirmation".to_string()),
            ("1".to_string(), "Objection".to_string()),
            ("2".to_string(), "Escalation".to_string()),
            ("3".to_string(), "New Information".to_string()),
        ]);
        Self {
            k: 4,
            seed: 42,
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            cluster_to_behavior,
        }
    }
}

impl ClusteringConfig {
    /// Parsed cluster → behavior table. Bad indices or names are configuration errors.
    pub fn cluster_map(&self) -> Result<HashMap<usize, BehaviorLabel>> {
        let mut out = HashMap::with_capacity(self.cluster_to_behavior.len());
        for (idx, name) in &self.cluster_to_behavior {
            let i: usize = idx.trim().parse().map_err(|_| {
                OrchestratorError::Configuration(format!("cluster index '{idx}' is not a number"))
            })?;
            let label = BehaviorLabel::parse_name(name).ok_or_else(|| {
                OrchestratorError::Configuration(format!(
                    "cluster {i} maps to unknown behavior '{name}'"
                ))
            })?;
            out.insert(i, label);
        }
        Ok(out)
    }

    fn sanitize(&mut self) {
        let d = Self::default();
        if self.k == 0 {
            self.k = d.k;
        }
        if self.n_init == 0 {
            self.n_init = 1;
        }
        if self.max_iter == 0 {
            self.max_iter = d.max_iter;
        }
        if !self.tol.is_finite() || self.tol < 0.0 {
            self.tol = d.tol;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisedConfig {
    pub max_iter: usize,
    pub learning_rate: f64,
    /// Inverse L2 strength, as in the usual logistic-regression parameterisation.
    pub c: f64,
}

impl Default for SupervisedConfig {
    fn default() -> Self {
        Self {
            max_iter: 500,
            learning_rate: 0.5,
            c: 1.0,
        }
    }
}

impl SupervisedConfig {
    fn sanitize(&mut self) {
        let d = Self::default();
        if self.max_iter == 0 {
            self.max_iter = d.max_iter;
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            self.learning_rate = d.learning_rate;
        }
        if !self.c.is_finite() || self.c <= 0.0 {
            self.c = d.c;
        }
    }
}

impl OrchestratorConfig {
    /// Load using env var + fallbacks, then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(OrchestratorError::Configuration(format!(
                        "{ENV_CONFIG_PATH} points to non-existent path {}",
                        pb.display()
                    )));
                }
                Self::load_from(&pb)?
            }
            Err(_) => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load_from(default)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides()?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: Self =
            toml::from_str(s).map_err(|e| OrchestratorError::Configuration(e.to_string()))?;
        cfg.clustering.cluster_map()?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(s) = std::env::var(ENV_STRATEGY) {
            self.pipeline.strategy = Strategy::parse(&s).ok_or_else(|| {
                OrchestratorError::Configuration(format!("{ENV_STRATEGY}: unknown strategy '{s}'"))
            })?;
        }
        if let Some(secs) = std::env::var(ENV_MIN_DELAY)
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
        {
            self.remote.min_delay_secs = secs;
        }
        if std::env::var(ENV_REMOTE_TEST_MODE)
            .map(|v| v == "mock")
            .unwrap_or(false)
        {
            self.remote.provider = "mock".to_string();
        }
        Ok(())
    }

    fn sanitize(&mut self) {
        self.clustering.sanitize();
        self.supervised.sanitize();
        self.remote.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = OrchestratorConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.pipeline.strategy, Strategy::Clustering);
        assert_eq!(cfg.pipeline.text_policy, TextPolicy::FullThread);
        assert_eq!(cfg.clustering.k, 4);
        assert_eq!(cfg.clustering.seed, 42);
        assert_eq!(cfg.paths.ledger, PathBuf::from("logs/decisions_log.json"));
        assert_eq!(cfg.clustering.cluster_map().unwrap().len(), 4);
    }

    #[test]
    fn parses_sections_and_cluster_map() {
        let toml = r#"
            [pipeline]
            strategy = "remote"
            text_policy = "latest_message"
            normalizer = "rich"

            [clustering]
            k = 2
            [clustering.cluster_to_behavior]
            "0" = "Escalation"
            "1" = "new information"

            [remote]
            provider = "OpenAI"
            min_delay_secs = 2.5
        "#;
        let cfg = OrchestratorConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.pipeline.strategy, Strategy::Remote);
        assert_eq!(cfg.pipeline.text_policy, TextPolicy::LatestMessage);
        assert_eq!(cfg.pipeline.normalizer, NormalizerMode::Rich);
        assert_eq!(cfg.remote.provider, "openai");
        assert!((cfg.remote.min_delay_secs - 2.5).abs() < 1e-9);
        let map = cfg.clustering.cluster_map().unwrap();
        assert_eq!(map[&1], BehaviorLabel::NewInformation);
    }

    #[test]
    fn unknown_cluster_behavior_is_an_error() {
        let toml = r#"
            [clustering.cluster_to_behavior]
            "0" = "Gratitude"
        "#;
        assert!(matches!(
            OrchestratorConfig::from_toml_str(toml),
            Err(OrchestratorError::Configuration(_))
        ));
    }

    #[test]
    fn zero_k_falls_back_to_default() {
        let cfg = OrchestratorConfig::from_toml_str("[clustering]\nk = 0\n").unwrap();
        assert_eq!(cfg.clustering.k, 4);
    }
}
